//! Version lifecycle: creation, lookup, deletion, and retention cleanup.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{Duration, Utc};
use modelhub_core::{
    DeploymentConfig, DeploymentStage, VersionMetadata, VersionRecord, VersionStatus,
    VersioningStrategy,
};
use tracing::{debug, error, info, warn};

use crate::error::{RegistryError, Result};
use crate::index::{Removal, VersionIndex};
use crate::store::ArtifactStore;

/// Input for [`VersionCatalog::create_version`].
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub model_id: String,
    pub artifact: Vec<u8>,
    pub metadata: VersionMetadata,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub parent_version: Option<String>,
}

impl NewVersion {
    pub fn new(model_id: impl Into<String>, artifact: impl Into<Vec<u8>>) -> Self {
        NewVersion {
            model_id: model_id.into(),
            artifact: artifact.into(),
            metadata: VersionMetadata::default(),
            description: String::new(),
            tags: BTreeSet::new(),
            parent_version: None,
        }
    }

    pub fn with_metadata(mut self, metadata: VersionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_version = Some(parent.into());
        self
    }
}

/// Filter for [`VersionCatalog::list_versions`]. All criteria are optional.
#[derive(Debug, Clone, Default)]
pub struct VersionFilter {
    pub model_id: Option<String>,
    pub status: Option<VersionStatus>,
    pub stage: Option<DeploymentStage>,
    pub limit: Option<usize>,
}

impl VersionFilter {
    pub fn model(model_id: impl Into<String>) -> Self {
        VersionFilter {
            model_id: Some(model_id.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stage(mut self, stage: DeploymentStage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &VersionRecord) -> bool {
        self.model_id.as_ref().map_or(true, |m| *m == record.model_id)
            && self.status.map_or(true, |s| s == record.status)
            && self.stage.map_or(true, |s| s == record.deployment_stage)
    }
}

/// Check that a model id is usable as a single path component.
pub fn validate_model_id(model_id: &str) -> Result<()> {
    let invalid = |reason: &str| RegistryError::InvalidModelId {
        model_id: model_id.to_string(),
        reason: reason.to_string(),
    };
    if model_id.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if model_id == "." || model_id.contains("..") {
        return Err(invalid("must not contain '..'"));
    }
    if !model_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(invalid("only ASCII letters, digits, '-', '_' and '.' are allowed"));
    }
    Ok(())
}

/// Metric values must be finite; JSON has no encoding for NaN or infinity.
fn check_metrics(metrics: &BTreeMap<String, f64>) -> Result<()> {
    match metrics.iter().find(|(_, value)| !value.is_finite()) {
        Some((metric, value)) => Err(RegistryError::InvalidMetric {
            metric: metric.clone(),
            value: *value,
        }),
        None => Ok(()),
    }
}

/// Authoritative index of version records.
pub struct VersionCatalog {
    index: Arc<VersionIndex>,
    store: Arc<dyn ArtifactStore>,
    strategy: VersioningStrategy,
    max_versions_per_model: usize,
    /// Serializes high-water mark writes so the last write is the highest.
    numbering: tokio::sync::Mutex<()>,
}

impl VersionCatalog {
    pub fn new(
        index: Arc<VersionIndex>,
        store: Arc<dyn ArtifactStore>,
        strategy: VersioningStrategy,
        max_versions_per_model: usize,
    ) -> Self {
        VersionCatalog {
            index,
            store,
            strategy,
            max_versions_per_model,
            numbering: tokio::sync::Mutex::new(()),
        }
    }

    pub fn index(&self) -> &Arc<VersionIndex> {
        &self.index
    }

    /// Rebuild the index from the store. Returns the number of versions
    /// loaded.
    pub async fn reconcile(&self) -> usize {
        let records = self.store.enumerate_all().await;
        let count = records.len();
        self.index.replace_all(records.into_values());
        for (model_id, number) in self.store.load_numbering().await {
            self.index.seed_issued(&model_id, &number);
        }
        info!(versions = count, models = self.index.model_ids().len(), "catalog reconciled from storage");
        count
    }

    /// Persist an artifact and register a new version for it.
    pub async fn create_version(&self, new: NewVersion) -> Result<String> {
        validate_model_id(&new.model_id)?;
        if let Err(e) = check_metrics(&new.metadata.metrics) {
            warn!(model_id = %new.model_id, "rejecting version: {e}");
            return Err(e);
        }
        if let Some(parent) = &new.parent_version {
            if !self.index.contains(parent) {
                warn!(model_id = %new.model_id, %parent, "rejecting version with unknown parent");
                return Err(RegistryError::ParentNotFound {
                    model_id: new.model_id.clone(),
                    parent: parent.clone(),
                });
            }
        }

        let now = Utc::now();
        let (version_id, version_number) = self.index.reserve(&new.model_id, self.strategy, now);
        if !self.record_numbering(&new.model_id).await {
            self.index.release(&version_id);
            return Err(RegistryError::PersistenceFailed {
                version_id,
                detail: "version number could not be recorded".to_string(),
            });
        }

        let Some((artifact_location, size_bytes)) = self
            .store
            .save_artifact(&new.model_id, &version_id, &new.artifact)
            .await
        else {
            self.index.release(&version_id);
            return Err(RegistryError::PersistenceFailed {
                version_id,
                detail: "artifact could not be written".to_string(),
            });
        };

        let record = VersionRecord {
            metadata_location: self.store.metadata_location(&new.model_id, &version_id),
            checksum: self.store.checksum(&artifact_location).await,
            version_id: version_id.clone(),
            model_id: new.model_id,
            version_number,
            status: VersionStatus::Ready,
            deployment_stage: DeploymentStage::Development,
            artifact_location,
            created_at: now,
            updated_at: now,
            creator: new.metadata.creator,
            description: new.description,
            tags: new.tags,
            metrics: new.metadata.metrics,
            dependencies: new.metadata.dependencies,
            configuration: new.metadata.configuration,
            deployment_config: DeploymentConfig::default(),
            parent_version: new.parent_version,
            size_bytes,
            is_active: false,
        };

        if !record.checksum.is_known() || !self.store.save_metadata(&record).await {
            self.store.delete_files(&record).await;
            self.index.release(&version_id);
            return Err(RegistryError::PersistenceFailed {
                version_id,
                detail: "checksum or metadata could not be recorded".to_string(),
            });
        }

        info!(
            model_id = %record.model_id,
            %version_id,
            version_number = %record.version_number,
            size_bytes,
            "version created"
        );
        self.index.insert(record);
        Ok(version_id)
    }

    pub fn get_version(&self, version_id: &str) -> Option<VersionRecord> {
        self.index.get(version_id)
    }

    /// Matching versions, newest first.
    pub fn list_versions(&self, filter: &VersionFilter) -> Vec<VersionRecord> {
        let mut records: Vec<VersionRecord> = match &filter.model_id {
            Some(model_id) => self.index.model_versions(model_id),
            None => self.index.all(),
        };
        records.retain(|record| filter.matches(record));
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.version_number.cmp(&a.version_number))
        });
        if let Some(limit) = filter.limit {
            records.truncate(limit);
        }
        records
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.index.model_ids()
    }

    /// The raw artifact of a servable version whose bytes still match the
    /// recorded checksum.
    pub async fn load_model(&self, version_id: &str) -> Option<Vec<u8>> {
        let record = self.index.get(version_id)?;
        if !record.status.is_servable() {
            warn!(%version_id, status = %record.status, "refusing to load non-servable version");
            return None;
        }

        let blob = self.store.load_artifact(&record.artifact_location).await?;
        if !record.checksum.verify(&blob) {
            error!(%version_id, expected = %record.checksum, "artifact checksum mismatch");
            return None;
        }
        Some(blob)
    }

    /// Whether the stored artifact still hashes to the recorded checksum.
    pub async fn verify_integrity(&self, version_id: &str) -> bool {
        let Some(record) = self.index.get(version_id) else {
            return false;
        };
        let actual = self.store.checksum(&record.artifact_location).await;
        let intact = actual.is_known() && actual == record.checksum;
        if !intact {
            warn!(%version_id, expected = %record.checksum, %actual, "integrity check failed");
        }
        intact
    }

    /// Delete a version. Active or deployed versions are refused unless
    /// `force` is set. A backup is written before any file is removed.
    pub async fn delete_version(&self, version_id: &str, force: bool) -> bool {
        let record = match self
            .index
            .remove_if(version_id, |record| force || record.is_deletable())
        {
            Removal::Removed(record) => record,
            Removal::Refused(record) => {
                warn!(
                    %version_id,
                    is_active = record.is_active,
                    status = %record.status,
                    "refusing to delete active or deployed version without force"
                );
                return false;
            }
            Removal::Missing => {
                warn!(%version_id, "cannot delete unknown version");
                return false;
            }
        };

        if !self.store.backup(&record).await {
            error!(%version_id, "backup failed, keeping version");
            self.index.insert(record);
            return false;
        }
        if !self.store.delete_files(&record).await {
            error!(%version_id, "file removal failed, keeping version");
            self.index.insert(record);
            return false;
        }

        info!(model_id = %record.model_id, %version_id, force, "version deleted");
        true
    }

    /// Remove versions of `model_id` that are past retention or beyond the
    /// per-model cap. Active and deployed versions are never touched.
    ///
    /// Returns the number of versions deleted.
    pub async fn cleanup_old_versions(&self, model_id: &str, retention_days: u32) -> usize {
        let mut versions = self.index.model_versions(model_id);
        versions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version_number.cmp(&b.version_number))
        });

        // A retention too long to represent has no age cutoff.
        let cutoff = Duration::try_days(i64::from(retention_days))
            .and_then(|retention| Utc::now().checked_sub_signed(retention));
        let excess = versions.len().saturating_sub(self.max_versions_per_model);

        let candidates: Vec<String> = versions
            .iter()
            .filter(|record| record.is_deletable())
            .enumerate()
            .filter(|(rank, record)| {
                *rank < excess || cutoff.is_some_and(|cutoff| record.created_at < cutoff)
            })
            .map(|(_, record)| record.version_id.clone())
            .collect();

        if candidates.is_empty() {
            debug!(%model_id, total = versions.len(), "nothing to clean up");
            return 0;
        }

        let mut deleted = 0;
        for version_id in &candidates {
            if self.delete_version(version_id, false).await {
                deleted += 1;
            }
        }
        info!(%model_id, deleted, candidates = candidates.len(), "cleanup finished");
        deleted
    }

    /// Set a version's status.
    ///
    /// An active version cannot be moved to a status that is not servable.
    pub async fn update_status(&self, version_id: &str, status: VersionStatus) -> Result<VersionRecord> {
        let record = self.index.update(version_id, |record| {
            if record.is_active && !status.is_servable() {
                return Err(RegistryError::ActiveVersion {
                    version_id: record.version_id.clone(),
                });
            }
            record.status = status;
            Ok(())
        });
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                warn!(%version_id, %status, "status update refused: {e}");
                return Err(e);
            }
        };
        self.persist(&record).await;
        info!(%version_id, %status, "status updated");
        Ok(record)
    }

    /// Merge metrics into a version's record.
    pub async fn log_metrics(
        &self,
        version_id: &str,
        metrics: BTreeMap<String, f64>,
    ) -> Result<VersionRecord> {
        if let Err(e) = check_metrics(&metrics) {
            warn!(%version_id, "metrics refused: {e}");
            return Err(e);
        }
        let record = self.index.update(version_id, |record| {
            record.metrics.extend(metrics);
            Ok(())
        })?;
        self.persist(&record).await;
        Ok(record)
    }

    /// Write the model's current high-water mark to the store.
    async fn record_numbering(&self, model_id: &str) -> bool {
        let _serial = self.numbering.lock().await;
        match self.index.last_issued(model_id) {
            Some(mark) => self.store.save_numbering(model_id, &mark).await,
            None => true,
        }
    }

    async fn persist(&self, record: &VersionRecord) -> bool {
        let saved = self.store.save_metadata(record).await;
        if !saved {
            error!(version_id = %record.version_id, "metadata not persisted; disk is behind memory");
        }
        saved
    }
}
