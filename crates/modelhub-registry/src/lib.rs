//! Versioned model artifact registry.
//!
//! Persists immutable model artifacts as numbered versions, tracks which
//! version is live in each deployment stage, and reclaims storage under a
//! retention policy.
//!
//! # Architecture
//!
//! - **Artifact store**: filesystem persistence of artifacts, metadata
//!   documents, backups, and deployment history
//! - **Version catalog**: creation, lookup, deletion, and cleanup
//! - **Deployment controller**: per-(model, stage) slots with deploy,
//!   rollback, promote, and deactivate transitions
//! - **Comparator**: metric and metadata diffs, lineage
//! - **Model registry**: the facade composing the above, plus the
//!   periodic retention sweep and health reporting
//!
//! Disk is the source of truth: opening a registry rebuilds all in-memory
//! state from the store.

pub mod catalog;
pub mod comparator;
pub mod config;
pub mod controller;
pub mod error;
pub mod index;
pub mod registry;
pub mod store;
pub mod sweep;

// Re-exports for convenience.
pub use catalog::{validate_model_id, NewVersion, VersionCatalog, VersionFilter};
pub use comparator::{
    Comparator, ImprovementSummary, MetadataDiff, MetricDelta, MetricDirection, Recommendation,
    VersionComparison,
};
pub use config::RegistryConfig;
pub use controller::DeploymentController;
pub use error::{RegistryError, Result};
pub use index::VersionIndex;
pub use registry::{ModelRegistry, RegistryStatus};
pub use store::{ArtifactStore, FsArtifactStore};
pub use sweep::{RetentionSweeper, SweepReport};
