//! The registry facade.
//!
//! [`ModelRegistry`] wires the artifact store, catalog, deployment
//! controller, comparator, and retention sweeper around one shared index
//! and exposes them as a single API.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use modelhub_core::{
    DeploymentConfig, DeploymentRecord, DeploymentStage, VersionRecord, VersionStatus,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{NewVersion, VersionCatalog, VersionFilter};
use crate::comparator::{Comparator, VersionComparison};
use crate::config::RegistryConfig;
use crate::controller::DeploymentController;
use crate::error::Result;
use crate::index::VersionIndex;
use crate::store::{ArtifactStore, FsArtifactStore};
use crate::sweep::{RetentionSweeper, SweepReport};

/// Health and inventory snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStatus {
    pub healthy: bool,
    /// Per-component probe results.
    pub components: BTreeMap<String, bool>,
    pub total_versions: usize,
    pub total_models: usize,
    pub status_distribution: BTreeMap<VersionStatus, usize>,
    pub stage_distribution: BTreeMap<DeploymentStage, usize>,
    pub active_deployments: usize,
    pub storage_bytes: u64,
    pub sweep_running: bool,
    pub last_sweep: Option<SweepReport>,
}

/// Versioned model registry.
pub struct ModelRegistry {
    config: RegistryConfig,
    store: Arc<dyn ArtifactStore>,
    catalog: Arc<VersionCatalog>,
    controller: DeploymentController,
    comparator: Comparator,
    sweeper: RetentionSweeper,
}

impl ModelRegistry {
    /// Open a registry on the local filesystem described by `config`.
    pub async fn open(config: RegistryConfig) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(FsArtifactStore::new(config.storage_path.clone(), config.backup_root()));
        Self::with_store(config, store).await
    }

    /// Open a registry over an arbitrary store and rebuild its state from it.
    pub async fn with_store(config: RegistryConfig, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        config.validate()?;
        if !store.probe().await {
            warn!(path = %config.storage_path.display(), "artifact store failed its probe at open");
        }

        let index = Arc::new(VersionIndex::new());
        let catalog = Arc::new(VersionCatalog::new(
            index.clone(),
            store.clone(),
            config.versioning_strategy,
            config.max_versions_per_model,
        ));
        let controller = DeploymentController::new(index, store.clone());
        let comparator = Comparator::new(
            catalog.clone(),
            config.metric_directions.clone(),
            config.max_lineage_depth,
        );
        let sweeper = RetentionSweeper::new(catalog.clone(), config.retention_days, config.cleanup_interval());

        let versions = catalog.reconcile().await;
        controller.reconcile().await;
        info!(
            path = %config.storage_path.display(),
            strategy = %config.versioning_strategy,
            versions,
            "model registry opened"
        );

        Ok(ModelRegistry {
            config,
            store,
            catalog,
            controller,
            comparator,
            sweeper,
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Start background work. The retention sweep only runs when
    /// `auto_cleanup` is enabled.
    pub fn start(&self) {
        if self.config.auto_cleanup {
            self.sweeper.start();
        }
    }

    /// Stop background work, waiting for an in-flight sweep to finish.
    pub async fn stop(&self) {
        self.sweeper.stop().await;
    }

    // -- versions ---------------------------------------------------------

    pub async fn create_version(&self, new: NewVersion) -> Result<String> {
        self.catalog.create_version(new).await
    }

    pub fn get_version(&self, version_id: &str) -> Option<VersionRecord> {
        self.catalog.get_version(version_id)
    }

    pub fn list_versions(&self, filter: &VersionFilter) -> Vec<VersionRecord> {
        self.catalog.list_versions(filter)
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.catalog.model_ids()
    }

    pub async fn load_model(&self, version_id: &str) -> Option<Vec<u8>> {
        self.catalog.load_model(version_id).await
    }

    pub async fn verify_integrity(&self, version_id: &str) -> bool {
        self.catalog.verify_integrity(version_id).await
    }

    pub async fn update_status(&self, version_id: &str, status: VersionStatus) -> Result<VersionRecord> {
        self.catalog.update_status(version_id, status).await
    }

    pub async fn log_metrics(&self, version_id: &str, metrics: BTreeMap<String, f64>) -> Result<VersionRecord> {
        self.catalog.log_metrics(version_id, metrics).await
    }

    /// Delete a version and release any slot it held.
    pub async fn delete_version(&self, version_id: &str, force: bool) -> bool {
        let deleted = self.catalog.delete_version(version_id, force).await;
        if deleted {
            self.controller.forget_version(version_id);
        }
        deleted
    }

    /// Apply the configured retention policy to one model.
    pub async fn cleanup_old_versions(&self, model_id: &str) -> usize {
        self.catalog
            .cleanup_old_versions(model_id, self.config.retention_days)
            .await
    }

    /// Run one retention sweep over every model now.
    pub async fn run_retention_sweep(&self) -> SweepReport {
        self.sweeper.sweep_once().await
    }

    // -- deployments ------------------------------------------------------

    pub async fn deploy_version(
        &self,
        version_id: &str,
        stage: DeploymentStage,
        config: DeploymentConfig,
        auto_activate: bool,
    ) -> Result<DeploymentRecord> {
        self.controller
            .deploy_version(version_id, stage, config, auto_activate)
            .await
    }

    pub async fn rollback_deployment(
        &self,
        model_id: &str,
        stage: DeploymentStage,
        target: Option<&str>,
    ) -> Result<DeploymentRecord> {
        self.controller.rollback_deployment(model_id, stage, target).await
    }

    pub async fn promote_version(
        &self,
        version_id: &str,
        from_stage: DeploymentStage,
        to_stage: DeploymentStage,
    ) -> Result<DeploymentRecord> {
        self.controller
            .promote_version(version_id, from_stage, to_stage)
            .await
    }

    pub async fn deactivate_deployment(&self, model_id: &str, stage: DeploymentStage) -> Result<String> {
        self.controller.deactivate_deployment(model_id, stage).await
    }

    pub fn get_active_deployment(&self, model_id: &str, stage: DeploymentStage) -> Option<String> {
        self.controller.get_active_deployment(model_id, stage)
    }

    pub fn get_all_active_deployments(&self) -> BTreeMap<String, BTreeMap<DeploymentStage, String>> {
        self.controller.get_all_active_deployments()
    }

    pub fn deployment_history(&self, model_id: &str, stage: Option<DeploymentStage>) -> Vec<DeploymentRecord> {
        self.controller.deployment_history(model_id, stage)
    }

    // -- comparison -------------------------------------------------------

    pub fn compare(&self, version_a: &str, version_b: &str) -> Option<VersionComparison> {
        self.comparator.compare(version_a, version_b)
    }

    pub fn compare_to_baseline(&self, version_id: &str, baseline: Option<&str>) -> Option<VersionComparison> {
        self.comparator.compare_to_baseline(version_id, baseline)
    }

    pub fn lineage(&self, version_id: &str) -> Vec<VersionRecord> {
        self.comparator.lineage(version_id)
    }

    // -- health -----------------------------------------------------------

    pub async fn status(&self) -> RegistryStatus {
        let records = self.catalog.list_versions(&VersionFilter::default());

        let mut status_distribution: BTreeMap<VersionStatus, usize> =
            VersionStatus::ALL.into_iter().map(|s| (s, 0)).collect();
        let mut stage_distribution: BTreeMap<DeploymentStage, usize> =
            DeploymentStage::ALL.into_iter().map(|s| (s, 0)).collect();
        for record in &records {
            *status_distribution.entry(record.status).or_default() += 1;
            *stage_distribution.entry(record.deployment_stage).or_default() += 1;
        }

        let by_id: HashMap<&str, &VersionRecord> =
            records.iter().map(|r| (r.version_id.as_str(), r)).collect();
        let active = self.controller.get_all_active_deployments();
        let slots_consistent = active.iter().all(|(model_id, stages)| {
            stages.iter().all(|(stage, version_id)| {
                by_id.get(version_id.as_str()).is_some_and(|r| {
                    r.is_active && r.model_id == *model_id && r.deployment_stage == *stage
                })
            })
        });
        let sweep_running = self.sweeper.is_running();

        let mut components = BTreeMap::new();
        components.insert("store".to_string(), self.store.probe().await);
        components.insert("catalog".to_string(), self.catalog.index().is_consistent());
        components.insert("controller".to_string(), slots_consistent);
        components.insert(
            "sweeper".to_string(),
            !self.config.auto_cleanup || sweep_running || self.sweeper.last_report().is_some(),
        );
        let healthy = components.values().all(|ok| *ok);
        if !healthy {
            let failing: Vec<&String> = components.iter().filter(|(_, ok)| !**ok).map(|(n, _)| n).collect();
            warn!(?failing, "registry unhealthy");
        }

        RegistryStatus {
            healthy,
            components,
            total_versions: records.len(),
            total_models: self.catalog.model_ids().len(),
            status_distribution,
            stage_distribution,
            active_deployments: active.values().map(BTreeMap::len).sum(),
            storage_bytes: self.store.usage().await,
            sweep_running,
            last_sweep: self.sweeper.last_report(),
        }
    }
}
