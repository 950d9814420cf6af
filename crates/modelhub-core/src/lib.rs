//! Core data model for the modelhub artifact registry.
//!
//! Defines the records the registry persists and reasons about:
//! - **Version records**: one immutable artifact plus its mutable
//!   lifecycle state (status, stage, activity)
//! - **Deployment records**: append-only history of slot occupancy
//! - **Version numbers**: per-model monotonic numbering under a
//!   configurable scheme
//!
//! Nothing in this crate performs I/O; persistence and concurrency live in
//! `modelhub-registry`.

pub mod deployment;
pub mod error;
pub mod integrity;
pub mod record;
pub mod version;

pub use deployment::DeploymentRecord;
pub use error::CoreError;
pub use integrity::ContentHash;
pub use record::{DeploymentConfig, DeploymentStage, VersionMetadata, VersionRecord, VersionStatus};
pub use version::{VersionNumber, VersioningStrategy};
