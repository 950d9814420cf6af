//! Core error types.

/// Errors raised while interpreting record fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// A status label that does not name a [`crate::VersionStatus`].
    #[error("unknown version status: {0}")]
    UnknownStatus(String),

    /// A stage label that does not name a [`crate::DeploymentStage`].
    #[error("unknown deployment stage: {0}")]
    UnknownStage(String),

    /// A versioning strategy label that is not recognised.
    #[error("unknown versioning strategy: {0}")]
    UnknownStrategy(String),
}
