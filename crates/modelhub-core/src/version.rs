//! Per-model version numbering.
//!
//! Three schemes are supported. Whichever is configured, the number issued
//! for a model is strictly greater than the last one issued for it:
//! - **semantic**: `major.minor.0` where the ordinal `n` maps to
//!   `major = n / 10`, `minor = n % 10`
//! - **timestamp**: wall-clock microseconds, bumped by one when the clock
//!   has not advanced past the previous stamp
//! - **incremental**: a plain counter
//!
//! Numbers from different schemes do not compare meaningfully; a store is
//! expected to keep one scheme for its lifetime.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// How new version numbers are derived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersioningStrategy {
    #[default]
    Semantic,
    Timestamp,
    Incremental,
}

impl VersioningStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersioningStrategy::Semantic => "semantic",
            VersioningStrategy::Timestamp => "timestamp",
            VersioningStrategy::Incremental => "incremental",
        }
    }

    /// Compute the number following `previous`.
    ///
    /// `existing` is the number of versions the model currently has; it seeds
    /// the ordinal when there is no previous number of the same scheme.
    pub fn next(
        &self,
        previous: Option<&VersionNumber>,
        existing: usize,
        now: DateTime<Utc>,
    ) -> VersionNumber {
        match self {
            VersioningStrategy::Semantic => {
                let ordinal = match previous {
                    Some(VersionNumber::Semantic(v)) => v.major * 10 + v.minor,
                    _ => existing as u64,
                } + 1;
                VersionNumber::Semantic(semver::Version::new(ordinal / 10, ordinal % 10, 0))
            }
            VersioningStrategy::Timestamp => {
                let stamp = now.timestamp_micros();
                match previous {
                    Some(VersionNumber::Timestamp(prev)) if stamp <= *prev => {
                        VersionNumber::Timestamp(prev + 1)
                    }
                    _ => VersionNumber::Timestamp(stamp),
                }
            }
            VersioningStrategy::Incremental => {
                let counter = match previous {
                    Some(VersionNumber::Incremental(n)) => *n,
                    _ => existing as u64,
                };
                VersionNumber::Incremental(counter + 1)
            }
        }
    }
}

impl std::fmt::Display for VersioningStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersioningStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(VersioningStrategy::Semantic),
            "timestamp" => Ok(VersioningStrategy::Timestamp),
            "incremental" => Ok(VersioningStrategy::Incremental),
            other => Err(CoreError::UnknownStrategy(other.to_string())),
        }
    }
}

/// A version number issued under one of the [`VersioningStrategy`] schemes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "value", rename_all = "snake_case")]
pub enum VersionNumber {
    Semantic(semver::Version),
    /// Microseconds since the Unix epoch.
    Timestamp(i64),
    Incremental(u64),
}

impl VersionNumber {
    pub fn strategy(&self) -> VersioningStrategy {
        match self {
            VersionNumber::Semantic(_) => VersioningStrategy::Semantic,
            VersionNumber::Timestamp(_) => VersioningStrategy::Timestamp,
            VersionNumber::Incremental(_) => VersioningStrategy::Incremental,
        }
    }
}

impl std::fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VersionNumber::Semantic(v) => write!(f, "{v}"),
            VersionNumber::Timestamp(micros) => match DateTime::from_timestamp_micros(*micros) {
                Some(ts) => write!(f, "{}", ts.format("%Y%m%d.%H%M%S.%6f")),
                None => write!(f, "{micros}"),
            },
            VersionNumber::Incremental(n) => write!(f, "{n}"),
        }
    }
}
