//! Per-(model, stage) deployment state machine.
//!
//! The controller owns the active-deployment registry and the deployment
//! history. Both sit behind the controller's own lock. Version records are
//! changed through the shared index while that lock is held (controller
//! lock first, index lock second), so slots and records move together.
//! Everything that touches disk happens after the locks are released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use modelhub_core::{DeploymentConfig, DeploymentRecord, DeploymentStage, VersionRecord, VersionStatus};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{RegistryError, Result};
use crate::index::VersionIndex;
use crate::store::ArtifactStore;

type Slot = (String, DeploymentStage);

#[derive(Debug, Default)]
struct ControllerState {
    active: HashMap<Slot, String>,
    /// Append-only history per model.
    history: HashMap<String, Vec<DeploymentRecord>>,
}

/// Outcome of the locked part of a deploy, persisted afterwards.
struct Transition {
    incoming: VersionRecord,
    outgoing: Option<VersionRecord>,
    entry: DeploymentRecord,
    /// Whether `entry` was added to the history.
    appended: bool,
}

/// Active-deployment registry and transitions between slots.
pub struct DeploymentController {
    index: Arc<VersionIndex>,
    store: Arc<dyn ArtifactStore>,
    state: Mutex<ControllerState>,
}

impl DeploymentController {
    pub fn new(index: Arc<VersionIndex>, store: Arc<dyn ArtifactStore>) -> Self {
        DeploymentController {
            index,
            store,
            state: Mutex::new(ControllerState::default()),
        }
    }

    /// Rebuild the registry from active records in the index and the
    /// history from the store.
    pub async fn reconcile(&self) {
        let mut records: Vec<VersionRecord> = self.index.all().into_iter().filter(|r| r.is_active).collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        let mut active: HashMap<Slot, String> = HashMap::new();
        let mut displaced = Vec::new();
        for record in records {
            let slot = (record.model_id.clone(), record.deployment_stage);
            if let Some(winner) = active.get(&slot) {
                warn!(
                    model_id = %record.model_id,
                    stage = %record.deployment_stage,
                    kept = %winner,
                    dropped = %record.version_id,
                    "two active versions for one slot, keeping the newest"
                );
                displaced.push(record.version_id);
                continue;
            }
            active.insert(slot, record.version_id);
        }

        let mut history: HashMap<String, Vec<DeploymentRecord>> = HashMap::new();
        for entry in self.store.load_deployments().await {
            history.entry(entry.model_id.clone()).or_default().push(entry);
        }

        let slots = active.len();
        let entries: usize = history.values().map(Vec::len).sum();
        {
            let mut state = self.state.lock();
            state.active = active;
            state.history = history;
        }

        for version_id in displaced {
            if let Ok(record) = self.index.update(&version_id, |r| {
                r.is_active = false;
                Ok(())
            }) {
                self.persist(&record).await;
            }
        }
        info!(slots, history_entries = entries, "deployment state reconciled");
    }

    /// Deploy a ready or deployed version to `stage`.
    ///
    /// With `auto_activate` the version takes over the slot: the prior
    /// occupant is deactivated and a history entry is appended. Without
    /// it only the record's stage and config change.
    pub async fn deploy_version(
        &self,
        version_id: &str,
        stage: DeploymentStage,
        config: DeploymentConfig,
        auto_activate: bool,
    ) -> Result<DeploymentRecord> {
        let transition = {
            let mut state = self.state.lock();
            self.transition(&mut state, version_id, stage, config, auto_activate)
        };
        let transition = match transition {
            Ok(transition) => transition,
            Err(e) => {
                warn!(%version_id, %stage, "deploy refused: {e}");
                return Err(e);
            }
        };

        self.persist(&transition.incoming).await;
        if let Some(outgoing) = &transition.outgoing {
            self.persist(outgoing).await;
        }
        let entry = transition.entry;
        if !auto_activate {
            info!(model_id = %entry.model_id, %version_id, %stage, "version staged without activation");
            return Ok(entry);
        }
        if transition.appended && !self.store.append_deployment(&entry).await {
            error!(%version_id, %stage, "deployment history entry not persisted");
        }

        info!(
            model_id = %entry.model_id,
            %version_id,
            %stage,
            previous = ?entry.previous_version,
            rollback = entry.is_rollback(),
            "version deployed"
        );
        Ok(entry)
    }

    /// The in-memory half of a deploy. Runs under the controller lock so
    /// the slot map and the records it points at change together.
    fn transition(
        &self,
        state: &mut ControllerState,
        version_id: &str,
        stage: DeploymentStage,
        config: DeploymentConfig,
        auto_activate: bool,
    ) -> Result<Transition> {
        let incoming = self.index.update(version_id, |record| {
            if !record.status.is_servable() {
                return Err(RegistryError::NotDeployable {
                    version_id: record.version_id.clone(),
                    status: record.status,
                });
            }
            if !auto_activate && record.is_active && record.deployment_stage != stage {
                return Err(RegistryError::ActiveVersion {
                    version_id: record.version_id.clone(),
                });
            }
            record.deployment_stage = stage;
            record.deployment_config = config.clone();
            if auto_activate {
                record.status = VersionStatus::Deployed;
                record.is_active = true;
            }
            Ok(())
        })?;

        let slot = (incoming.model_id.clone(), stage);
        if !auto_activate {
            let previous = state.active.get(&slot).cloned();
            let entry = DeploymentRecord::new(incoming.model_id.clone(), version_id, stage, config, previous);
            return Ok(Transition {
                incoming,
                outgoing: None,
                entry,
                appended: false,
            });
        }

        state
            .active
            .retain(|(model, held), id| !(*model == slot.0 && *held != stage && id == version_id));
        let previous = state.active.insert(slot, version_id.to_string());
        let entry = DeploymentRecord::new(incoming.model_id.clone(), version_id, stage, config, previous.clone());
        let redeploy = previous.as_deref() == Some(version_id);
        if !redeploy {
            state
                .history
                .entry(incoming.model_id.clone())
                .or_default()
                .push(entry.clone());
        }

        let outgoing = previous
            .filter(|previous_id| previous_id != version_id)
            .and_then(|previous_id| {
                match self.index.update(&previous_id, |record| {
                    record.is_active = false;
                    Ok(())
                }) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(version_id = %previous_id, "cannot deactivate previous occupant: {e}");
                        None
                    }
                }
            });

        Ok(Transition {
            incoming,
            outgoing,
            entry,
            appended: !redeploy,
        })
    }

    /// Deploy an earlier version into the rollback slot.
    ///
    /// Without `target`, the version deployed to `stage` just before the
    /// latest one is chosen; that needs at least two history entries.
    pub async fn rollback_deployment(
        &self,
        model_id: &str,
        stage: DeploymentStage,
        target: Option<&str>,
    ) -> Result<DeploymentRecord> {
        let target = match target {
            Some(target) => target.to_string(),
            None => {
                let history = self.deployment_history(model_id, Some(stage));
                if history.len() < 2 {
                    warn!(%model_id, %stage, entries = history.len(), "rollback refused: not enough history");
                    return Err(RegistryError::InsufficientHistory {
                        model_id: model_id.to_string(),
                        stage,
                    });
                }
                history[history.len() - 2].version_id.clone()
            }
        };

        info!(%model_id, %stage, target = %target, "rolling back");
        self.deploy_version(&target, DeploymentStage::Rollback, DeploymentConfig::rollback_of(stage), true)
            .await
    }

    /// Move a version from `from_stage` to `to_stage`. Free-form deployment
    /// settings are carried over.
    pub async fn promote_version(
        &self,
        version_id: &str,
        from_stage: DeploymentStage,
        to_stage: DeploymentStage,
    ) -> Result<DeploymentRecord> {
        let record = self.index.get(version_id).ok_or_else(|| {
            warn!(%version_id, "cannot promote unknown version");
            RegistryError::VersionNotFound {
                version_id: version_id.to_string(),
            }
        })?;
        if record.deployment_stage != from_stage {
            warn!(
                %version_id,
                expected = %from_stage,
                actual = %record.deployment_stage,
                "promotion refused: stage mismatch"
            );
            return Err(RegistryError::StageMismatch {
                version_id: version_id.to_string(),
                expected: from_stage,
                actual: record.deployment_stage,
            });
        }

        let config = DeploymentConfig {
            extra: record.deployment_config.extra,
            ..Default::default()
        };
        let entry = self.deploy_version(version_id, to_stage, config, true).await?;
        info!(%version_id, from = %from_stage, to = %to_stage, "version promoted");
        Ok(entry)
    }

    /// Clear a slot. Returns the version that occupied it.
    pub async fn deactivate_deployment(&self, model_id: &str, stage: DeploymentStage) -> Result<String> {
        let deactivated = {
            let mut state = self.state.lock();
            state
                .active
                .remove(&(model_id.to_string(), stage))
                .map(|version_id| {
                    let record = self.index.update(&version_id, |record| {
                        record.is_active = false;
                        Ok(())
                    });
                    (version_id, record)
                })
        };
        let Some((version_id, record)) = deactivated else {
            warn!(%model_id, %stage, "nothing deployed to deactivate");
            return Err(RegistryError::NoActiveDeployment {
                model_id: model_id.to_string(),
                stage,
            });
        };

        match record {
            Ok(record) => self.persist(&record).await,
            Err(e) => warn!(%version_id, "deactivated slot pointed at missing record: {e}"),
        }
        info!(%model_id, %stage, %version_id, "deployment deactivated");
        Ok(version_id)
    }

    pub fn get_active_deployment(&self, model_id: &str, stage: DeploymentStage) -> Option<String> {
        self.state
            .lock()
            .active
            .get(&(model_id.to_string(), stage))
            .cloned()
    }

    /// Every occupied slot, grouped by model.
    pub fn get_all_active_deployments(&self) -> BTreeMap<String, BTreeMap<DeploymentStage, String>> {
        let state = self.state.lock();
        let mut all: BTreeMap<String, BTreeMap<DeploymentStage, String>> = BTreeMap::new();
        for ((model_id, stage), version_id) in &state.active {
            all.entry(model_id.clone())
                .or_default()
                .insert(*stage, version_id.clone());
        }
        all
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// History of a model, oldest first, optionally narrowed to one stage.
    pub fn deployment_history(&self, model_id: &str, stage: Option<DeploymentStage>) -> Vec<DeploymentRecord> {
        let state = self.state.lock();
        state
            .history
            .get(model_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| stage.map_or(true, |s| entry.deployment_stage == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop any slot held by a deleted version. History is kept.
    pub fn forget_version(&self, version_id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.active.len();
        state.active.retain(|_, id| id != version_id);
        let forgotten = state.active.len() != before;
        if forgotten {
            debug!(%version_id, "slot released for deleted version");
        }
        forgotten
    }

    /// Write a record changed by a transition. A record deleted in the
    /// meantime is not written back.
    async fn persist(&self, record: &VersionRecord) {
        if !self.index.contains(&record.version_id) {
            debug!(version_id = %record.version_id, "version deleted, skipping metadata write");
            return;
        }
        if !self.store.save_metadata(record).await {
            error!(version_id = %record.version_id, "metadata not persisted; disk is behind memory");
        }
    }
}
