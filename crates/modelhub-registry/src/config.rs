//! Registry configuration.
//!
//! Every key is optional; a missing key takes its default. Example:
//!
//! ```toml
//! storage_path = "/var/lib/modelhub"
//! versioning_strategy = "incremental"
//! max_versions_per_model = 20
//! retention_days = 30
//!
//! [metric_directions]
//! latency_ms = "lower_is_better"
//! error_rate = "lower_is_better"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use modelhub_core::VersioningStrategy;
use serde::{Deserialize, Serialize};

use crate::comparator::MetricDirection;
use crate::error::{RegistryError, Result};

/// Settings shared by every registry component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Root directory for artifacts, metadata, and deployment history.
    pub storage_path: PathBuf,
    /// Root directory for pre-delete backups. Defaults to a sibling of
    /// `storage_path` named `<storage>_backups`.
    pub backup_path: Option<PathBuf>,
    pub versioning_strategy: VersioningStrategy,
    /// Cleanup trims each model down to this many versions.
    pub max_versions_per_model: usize,
    /// Versions older than this are eligible for cleanup.
    pub retention_days: u32,
    /// Whether `start()` spawns the periodic retention sweep.
    pub auto_cleanup: bool,
    pub cleanup_interval_secs: u64,
    /// Upper bound on parent hops followed by lineage queries.
    pub max_lineage_depth: usize,
    /// Metric polarity; metrics not listed are higher-is-better.
    pub metric_directions: BTreeMap<String, MetricDirection>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            storage_path: PathBuf::from("model_registry"),
            backup_path: None,
            versioning_strategy: VersioningStrategy::Semantic,
            max_versions_per_model: 10,
            retention_days: 90,
            auto_cleanup: true,
            cleanup_interval_secs: 3600,
            max_lineage_depth: 256,
            metric_directions: BTreeMap::new(),
        }
    }
}

impl RegistryConfig {
    /// Default configuration rooted at `storage_path`.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        RegistryConfig {
            storage_path: storage_path.into(),
            ..Default::default()
        }
    }

    /// Parse and validate a configuration from a TOML string.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: RegistryConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistryError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_versions_per_model == 0 {
            return Err(RegistryError::Config {
                detail: "max_versions_per_model must be at least 1".to_string(),
            });
        }
        if self.cleanup_interval_secs == 0 {
            return Err(RegistryError::Config {
                detail: "cleanup_interval_secs must be at least 1".to_string(),
            });
        }
        if self.storage_path.as_os_str().is_empty() {
            return Err(RegistryError::Config {
                detail: "storage_path must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Resolved backup root.
    pub fn backup_root(&self) -> PathBuf {
        if let Some(path) = &self.backup_path {
            return path.clone();
        }
        match self.storage_path.file_name() {
            Some(name) => {
                let mut sibling = name.to_os_string();
                sibling.push("_backups");
                self.storage_path.with_file_name(sibling)
            }
            None => self.storage_path.join("backups"),
        }
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    /// Polarity of a metric.
    pub fn direction_of(&self, metric: &str) -> MetricDirection {
        self.metric_directions
            .get(metric)
            .copied()
            .unwrap_or_default()
    }

    pub fn with_strategy(mut self, strategy: VersioningStrategy) -> Self {
        self.versioning_strategy = strategy;
        self
    }

    pub fn with_max_versions(mut self, max: usize) -> Self {
        self.max_versions_per_model = max;
        self
    }

    pub fn with_auto_cleanup(mut self, enabled: bool) -> Self {
        self.auto_cleanup = enabled;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_metric_direction(mut self, metric: impl Into<String>, direction: MetricDirection) -> Self {
        self.metric_directions.insert(metric.into(), direction);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.versioning_strategy, VersioningStrategy::Semantic);
        assert_eq!(config.max_versions_per_model, 10);
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(3600));
        assert!(config.auto_cleanup);
    }

    #[test]
    fn parse_partial_toml() {
        let input = r#"
storage_path = "/srv/models"
versioning_strategy = "incremental"
retention_days = 30

[metric_directions]
latency_ms = "lower_is_better"
"#;
        let config = RegistryConfig::from_toml_str(input).unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/srv/models"));
        assert_eq!(config.versioning_strategy, VersioningStrategy::Incremental);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.max_versions_per_model, 10);
        assert_eq!(config.direction_of("latency_ms"), MetricDirection::LowerIsBetter);
        assert_eq!(config.direction_of("accuracy"), MetricDirection::HigherIsBetter);
    }

    #[test]
    fn reject_zero_capacity() {
        let result = RegistryConfig::from_toml_str("max_versions_per_model = 0\n");
        assert!(matches!(result, Err(RegistryError::Config { .. })));
    }

    #[test]
    fn reject_unknown_strategy() {
        let result = RegistryConfig::from_toml_str("versioning_strategy = \"calendar\"\n");
        assert!(matches!(result, Err(RegistryError::Toml(_))));
    }

    #[test]
    fn backup_root_is_sibling_by_default() {
        let config = RegistryConfig::new("/data/registry");
        assert_eq!(config.backup_root(), PathBuf::from("/data/registry_backups"));

        let explicit = RegistryConfig {
            backup_path: Some(PathBuf::from("/mnt/backups")),
            ..RegistryConfig::new("/data/registry")
        };
        assert_eq!(explicit.backup_root(), PathBuf::from("/mnt/backups"));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.toml");
        std::fs::write(&path, "auto_cleanup = false\ncleanup_interval_secs = 60\n").unwrap();

        let config = RegistryConfig::load(&path).unwrap();
        assert!(!config.auto_cleanup);
        assert_eq!(config.cleanup_interval(), Duration::from_secs(60));

        let missing = RegistryConfig::load(&dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(RegistryError::ConfigRead { .. })));
    }
}
