//! Lock-guarded in-memory index of version records.
//!
//! The index is a rebuildable cache of what the artifact store holds on
//! disk. One instance is created per registry and handed explicitly to the
//! catalog and the deployment controller; there is no global state.
//!
//! Every method takes the lock for the duration of a pure in-memory step
//! and returns owned snapshots, so callers never hold the lock across I/O.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use modelhub_core::{VersionNumber, VersionRecord, VersioningStrategy};
use parking_lot::Mutex;

use crate::error::{RegistryError, Result};

/// Outcome of a conditional removal.
#[derive(Debug)]
pub enum Removal {
    /// The record was removed and is returned.
    Removed(VersionRecord),
    /// The predicate rejected removal; the record is unchanged.
    Refused(VersionRecord),
    /// No such version.
    Missing,
}

#[derive(Debug, Default)]
struct IndexState {
    versions: HashMap<String, VersionRecord>,
    /// Version ids per model, in insertion order.
    by_model: HashMap<String, Vec<String>>,
    /// Highest number ever issued per model, including reserved numbers
    /// whose version was never committed.
    last_issued: HashMap<String, VersionNumber>,
    /// Ids handed out by `reserve` but not yet inserted.
    pending: HashSet<String>,
}

impl IndexState {
    fn insert(&mut self, record: VersionRecord) {
        let ids = self.by_model.entry(record.model_id.clone()).or_default();
        if !ids.contains(&record.version_id) {
            ids.push(record.version_id.clone());
        }
        self.raise_issued(&record.model_id, &record.version_number);
        self.pending.remove(&record.version_id);
        self.versions.insert(record.version_id.clone(), record);
    }

    fn raise_issued(&mut self, model_id: &str, number: &VersionNumber) {
        match self.last_issued.get_mut(model_id) {
            Some(issued) if *issued >= *number => {}
            Some(issued) => *issued = number.clone(),
            None => {
                self.last_issued.insert(model_id.to_string(), number.clone());
            }
        }
    }

    fn remove(&mut self, version_id: &str) -> Option<VersionRecord> {
        let record = self.versions.remove(version_id)?;
        if let Some(ids) = self.by_model.get_mut(&record.model_id) {
            ids.retain(|id| id != version_id);
            if ids.is_empty() {
                self.by_model.remove(&record.model_id);
            }
        }
        Some(record)
    }
}

/// Shared version index.
#[derive(Debug, Default)]
pub struct VersionIndex {
    state: Mutex<IndexState>,
}

impl VersionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a unique version id and the next version number for a model.
    ///
    /// The id is `<model_id>_<UTC timestamp>`; a random suffix is added if
    /// that id is already taken or reserved.
    pub fn reserve(
        &self,
        model_id: &str,
        strategy: VersioningStrategy,
        now: DateTime<Utc>,
    ) -> (String, VersionNumber) {
        let mut state = self.state.lock();

        let mut version_id = format!("{model_id}_{}", now.format("%Y%m%d_%H%M%S_%6f"));
        if state.versions.contains_key(&version_id) || state.pending.contains(&version_id) {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            version_id = format!("{version_id}_{}", &suffix[..8]);
        }

        let existing = state.by_model.get(model_id).map_or(0, Vec::len);
        let number = strategy.next(state.last_issued.get(model_id), existing, now);
        state
            .last_issued
            .insert(model_id.to_string(), number.clone());
        state.pending.insert(version_id.clone());

        (version_id, number)
    }

    /// Give back a reserved id whose version was never committed. The
    /// number stays burned.
    pub fn release(&self, version_id: &str) {
        self.state.lock().pending.remove(version_id);
    }

    /// Highest number issued so far for a model.
    pub fn last_issued(&self, model_id: &str) -> Option<VersionNumber> {
        self.state.lock().last_issued.get(model_id).cloned()
    }

    /// Raise a model's high-water mark to `number`. Lower marks are ignored.
    pub fn seed_issued(&self, model_id: &str, number: &VersionNumber) {
        self.state.lock().raise_issued(model_id, number);
    }

    /// Add or replace a record.
    pub fn insert(&self, record: VersionRecord) {
        self.state.lock().insert(record);
    }

    pub fn get(&self, version_id: &str) -> Option<VersionRecord> {
        self.state.lock().versions.get(version_id).cloned()
    }

    pub fn contains(&self, version_id: &str) -> bool {
        self.state.lock().versions.contains_key(version_id)
    }

    /// Snapshot of one model's versions in insertion order.
    pub fn model_versions(&self, model_id: &str) -> Vec<VersionRecord> {
        let state = self.state.lock();
        state
            .by_model
            .get(model_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.versions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every record.
    pub fn all(&self) -> Vec<VersionRecord> {
        self.state.lock().versions.values().cloned().collect()
    }

    /// Known model ids, sorted.
    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.state.lock().by_model.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.lock().versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `change` to a copy of the record and commit it only if
    /// `change` succeeds. Returns the committed snapshot.
    pub fn update<F>(&self, version_id: &str, change: F) -> Result<VersionRecord>
    where
        F: FnOnce(&mut VersionRecord) -> Result<()>,
    {
        let mut state = self.state.lock();
        let current = state
            .versions
            .get(version_id)
            .ok_or_else(|| RegistryError::VersionNotFound {
                version_id: version_id.to_string(),
            })?;

        let mut updated = current.clone();
        change(&mut updated)?;
        updated.touch();
        state.versions.insert(version_id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Remove a record if `allow` accepts it. The check and the removal
    /// happen under one lock acquisition.
    pub fn remove_if<F>(&self, version_id: &str, allow: F) -> Removal
    where
        F: FnOnce(&VersionRecord) -> bool,
    {
        let mut state = self.state.lock();
        let Some(record) = state.versions.get(version_id) else {
            return Removal::Missing;
        };
        if !allow(record) {
            return Removal::Refused(record.clone());
        }
        match state.remove(version_id) {
            Some(record) => Removal::Removed(record),
            None => Removal::Missing,
        }
    }

    /// Whether the per-model listing and the record map agree: every listed
    /// id resolves to a record of that model, every record is listed
    /// exactly once, and no committed id is still marked pending.
    pub fn is_consistent(&self) -> bool {
        let state = self.state.lock();
        let mut listed = 0;
        for (model_id, ids) in &state.by_model {
            if ids.is_empty() {
                return false;
            }
            for id in ids {
                match state.versions.get(id) {
                    Some(record) if record.model_id == *model_id => listed += 1,
                    _ => return false,
                }
            }
        }
        listed == state.versions.len() && state.pending.iter().all(|id| !state.versions.contains_key(id))
    }

    /// Discard the current records and load `records` instead. Numbering
    /// high-water marks survive, so numbers of records that are gone are
    /// never issued again.
    pub fn replace_all(&self, records: impl IntoIterator<Item = VersionRecord>) {
        let mut sorted: Vec<VersionRecord> = records.into_iter().collect();
        sorted.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.version_number.cmp(&b.version_number))
        });

        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        let last_issued = std::mem::take(&mut state.last_issued);
        *state = IndexState::default();
        state.pending = pending;
        state.last_issued = last_issued;
        for record in sorted {
            state.insert(record);
        }
    }

    /// Drop a record from the record map only, leaving the per-model
    /// listing stale.
    #[cfg(test)]
    pub(crate) fn corrupt(&self, version_id: &str) {
        self.state.lock().versions.remove(version_id);
    }
}
