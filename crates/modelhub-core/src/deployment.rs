//! Deployment history entries.
//!
//! History is append-only: deploys, rollbacks, and promotions each add a
//! new record rather than rewriting an old one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{DeploymentConfig, DeploymentStage};

/// One occupancy change of a (model, stage) slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub model_id: String,
    /// Version that entered the slot.
    pub version_id: String,
    pub deployment_stage: DeploymentStage,
    pub deployed_at: DateTime<Utc>,
    #[serde(default)]
    pub config: DeploymentConfig,
    /// Version that occupied the slot before this one, if any.
    #[serde(default)]
    pub previous_version: Option<String>,
}

impl DeploymentRecord {
    /// Create a record stamped with the current time.
    pub fn new(
        model_id: impl Into<String>,
        version_id: impl Into<String>,
        deployment_stage: DeploymentStage,
        config: DeploymentConfig,
        previous_version: Option<String>,
    ) -> Self {
        DeploymentRecord {
            model_id: model_id.into(),
            version_id: version_id.into(),
            deployment_stage,
            deployed_at: Utc::now(),
            config,
            previous_version,
        }
    }

    pub fn is_rollback(&self) -> bool {
        self.config.rollback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollback_flag_follows_config() {
        let plain = DeploymentRecord::new(
            "churn",
            "churn_v2",
            DeploymentStage::Production,
            DeploymentConfig::default(),
            Some("churn_v1".into()),
        );
        assert!(!plain.is_rollback());

        let rollback = DeploymentRecord::new(
            "churn",
            "churn_v1",
            DeploymentStage::Rollback,
            DeploymentConfig::rollback_of(DeploymentStage::Production),
            None,
        );
        assert!(rollback.is_rollback());
    }

    #[test]
    fn json_line_roundtrip() {
        let record = DeploymentRecord::new(
            "churn",
            "churn_v2",
            DeploymentStage::Canary,
            DeploymentConfig::default().with_setting("traffic", serde_json::json!(0.05)),
            Some("churn_v1".into()),
        );
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains('\n'));
        let back: DeploymentRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, record);
    }
}
