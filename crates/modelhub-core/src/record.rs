//! Version records and their lifecycle enums.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::integrity::ContentHash;
use crate::version::VersionNumber;

/// Lifecycle status of a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    /// Artifact still being produced.
    Training,
    /// Artifact persisted and verified; eligible for deployment.
    Ready,
    /// Has been deployed to at least one stage.
    Deployed,
    /// Superseded; kept for reference.
    Deprecated,
    /// Production of the artifact failed.
    Failed,
}

impl VersionStatus {
    pub const ALL: [VersionStatus; 5] = [
        VersionStatus::Training,
        VersionStatus::Ready,
        VersionStatus::Deployed,
        VersionStatus::Deprecated,
        VersionStatus::Failed,
    ];

    /// Whether an artifact in this status may be loaded or deployed.
    pub fn is_servable(&self) -> bool {
        match self {
            VersionStatus::Ready | VersionStatus::Deployed => true,
            VersionStatus::Training | VersionStatus::Deprecated | VersionStatus::Failed => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Training => "training",
            VersionStatus::Ready => "ready",
            VersionStatus::Deployed => "deployed",
            VersionStatus::Deprecated => "deprecated",
            VersionStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// A named deployment slot. Each (model, stage) pair holds at most one
/// active version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStage {
    Development,
    Staging,
    Production,
    Canary,
    /// Dedicated slot receiving rolled-back versions, so every rollback is
    /// auditable on its own.
    Rollback,
}

impl DeploymentStage {
    pub const ALL: [DeploymentStage; 5] = [
        DeploymentStage::Development,
        DeploymentStage::Staging,
        DeploymentStage::Production,
        DeploymentStage::Canary,
        DeploymentStage::Rollback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStage::Development => "development",
            DeploymentStage::Staging => "staging",
            DeploymentStage::Production => "production",
            DeploymentStage::Canary => "canary",
            DeploymentStage::Rollback => "rollback",
        }
    }
}

impl std::fmt::Display for DeploymentStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStage {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeploymentStage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStage(s.to_string()))
    }
}

/// Per-deployment settings attached to a version when it enters a slot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Set when the deployment is the result of a rollback.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub rollback: bool,
    /// Stage the rollback was performed for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_stage: Option<DeploymentStage>,
    /// Free-form settings (replica counts, traffic weights, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DeploymentConfig {
    /// Config tagging a rollback performed for `stage`.
    pub fn rollback_of(stage: DeploymentStage) -> Self {
        DeploymentConfig {
            rollback: true,
            original_stage: Some(stage),
            extra: serde_json::Map::new(),
        }
    }

    /// Builder: add a free-form setting.
    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Caller-supplied provenance for a new version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionMetadata {
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    /// Library name to version string.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Training configuration, hyperparameters, and so on.
    #[serde(default)]
    pub configuration: BTreeMap<String, serde_json::Value>,
}

impl VersionMetadata {
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.dependencies.insert(name.into(), version.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }
}

/// Everything the registry knows about one artifact version.
///
/// The metadata document persisted next to the artifact is exactly this
/// struct serialized as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version_id: String,
    pub model_id: String,
    pub version_number: VersionNumber,
    pub status: VersionStatus,
    pub deployment_stage: DeploymentStage,
    pub artifact_location: PathBuf,
    pub metadata_location: PathBuf,
    pub checksum: ContentHash,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(default)]
    pub configuration: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub deployment_config: DeploymentConfig,
    /// Back-reference to the version this one was derived from. The parent
    /// may since have been deleted.
    #[serde(default)]
    pub parent_version: Option<String>,
    pub size_bytes: u64,
    #[serde(default)]
    pub is_active: bool,
}

impl VersionRecord {
    /// Whether the delete safety rule permits removing this version without
    /// force.
    pub fn is_deletable(&self) -> bool {
        !self.is_active && self.status != VersionStatus::Deployed
    }

    /// Stamp `updated_at` with the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
