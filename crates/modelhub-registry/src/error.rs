//! Registry error types.

use std::path::PathBuf;

use modelhub_core::{DeploymentStage, VersionStatus};

/// Errors that can occur during registry operations.
///
/// Storage I/O never surfaces here directly: the artifact store logs and
/// absorbs it. What remains are refusals (validation) and failures the
/// caller must act on.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Version not known to the catalog.
    #[error("version not found: {version_id}")]
    VersionNotFound { version_id: String },

    /// Model identifier unusable as a storage path component.
    #[error("invalid model id '{model_id}': {reason}")]
    InvalidModelId { model_id: String, reason: String },

    /// Declared parent version does not exist.
    #[error("parent version '{parent}' not found for model '{model_id}'")]
    ParentNotFound { model_id: String, parent: String },

    /// Only ready or deployed versions may be deployed.
    #[error("version '{version_id}' is {status} and cannot be deployed")]
    NotDeployable {
        version_id: String,
        status: VersionStatus,
    },

    /// The change is not allowed while the version serves a stage.
    #[error("version '{version_id}' is actively deployed")]
    ActiveVersion { version_id: String },

    /// Promotion source stage does not match the version's current stage.
    #[error("version '{version_id}' is at stage {actual}, not {expected}")]
    StageMismatch {
        version_id: String,
        expected: DeploymentStage,
        actual: DeploymentStage,
    },

    /// Rollback requires at least two deployments of the stage.
    #[error("no earlier deployment of '{model_id}' at stage {stage} to roll back to")]
    InsufficientHistory {
        model_id: String,
        stage: DeploymentStage,
    },

    /// Nothing deployed at the given slot.
    #[error("no active deployment of '{model_id}' at stage {stage}")]
    NoActiveDeployment {
        model_id: String,
        stage: DeploymentStage,
    },

    /// NaN and infinite metric values cannot be stored.
    #[error("metric '{metric}' must be a finite number, got {value}")]
    InvalidMetric { metric: String, value: f64 },

    /// The artifact store could not persist something essential.
    #[error("persistence failed for '{version_id}': {detail}")]
    PersistenceFailed { version_id: String, detail: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {detail}")]
    Config { detail: String },

    /// Configuration file could not be read.
    #[error("cannot read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;
