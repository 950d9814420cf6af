//! Artifact persistence.
//!
//! The [`ArtifactStore`] trait is the only place the registry touches
//! storage. Its contract is that it never fails loudly: every I/O error is
//! logged here and turned into an absent value, an empty hash, or `false`,
//! so bulk operations tolerate one bad entry without failing wholesale.
//!
//! [`FsArtifactStore`] layout:
//! ```text
//! <root>/
//!   models/
//!     <model_id>/
//!       <version_id>/
//!         artifact.bin     # opaque artifact blob
//!         metadata.json    # the VersionRecord
//!   deployments/
//!     <model_id>.jsonl     # append-only DeploymentRecord lines
//!   numbering/
//!     <model_id>.json      # highest VersionNumber ever issued
//! <backup_root>/
//!   models/<model_id>/<version_id>/...    # same layout
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use modelhub_core::{ContentHash, DeploymentRecord, VersionNumber, VersionRecord};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

const ARTIFACT_FILE: &str = "artifact.bin";
const METADATA_FILE: &str = "metadata.json";
const MODELS_DIR: &str = "models";
const DEPLOYMENTS_DIR: &str = "deployments";
const NUMBERING_DIR: &str = "numbering";

/// Persistence seam for artifacts, metadata documents, and deployment
/// history.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist an artifact blob. Returns its location and size.
    async fn save_artifact(
        &self,
        model_id: &str,
        version_id: &str,
        blob: &[u8],
    ) -> Option<(PathBuf, u64)>;

    /// Where the metadata document of a version lives.
    fn metadata_location(&self, model_id: &str, version_id: &str) -> PathBuf;

    async fn load_artifact(&self, location: &Path) -> Option<Vec<u8>>;

    /// Write the record to its `metadata_location`.
    async fn save_metadata(&self, record: &VersionRecord) -> bool;

    async fn load_metadata(&self, location: &Path) -> Option<VersionRecord>;

    /// SHA-256 of the artifact at `location`; empty when it cannot be read.
    async fn checksum(&self, location: &Path) -> ContentHash;

    /// Total bytes held by the store.
    async fn usage(&self) -> u64;

    /// Copy a version's artifact and metadata under the backup root.
    async fn backup(&self, record: &VersionRecord) -> bool;

    /// Remove a version's files.
    async fn delete_files(&self, record: &VersionRecord) -> bool;

    /// Load every readable metadata document, keyed by version id.
    async fn enumerate_all(&self) -> HashMap<String, VersionRecord>;

    async fn append_deployment(&self, record: &DeploymentRecord) -> bool;

    /// All recorded deployments, oldest first.
    async fn load_deployments(&self) -> Vec<DeploymentRecord>;

    /// Record the highest version number issued for a model.
    async fn save_numbering(&self, model_id: &str, number: &VersionNumber) -> bool;

    /// Every recorded high-water mark, keyed by model id.
    async fn load_numbering(&self) -> HashMap<String, VersionNumber>;

    /// Whether the store is currently usable.
    async fn probe(&self) -> bool;
}

/// Filesystem-backed [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    backup_root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, backup_root: impl Into<PathBuf>) -> Self {
        FsArtifactStore {
            root: root.into(),
            backup_root: backup_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    fn version_dir(&self, model_id: &str, version_id: &str) -> PathBuf {
        self.root.join(MODELS_DIR).join(model_id).join(version_id)
    }

    fn backup_dir(&self, model_id: &str, version_id: &str) -> PathBuf {
        self.backup_root
            .join(MODELS_DIR)
            .join(model_id)
            .join(version_id)
    }

    fn history_path(&self, model_id: &str) -> PathBuf {
        self.root
            .join(DEPLOYMENTS_DIR)
            .join(format!("{model_id}.jsonl"))
    }

    fn numbering_path(&self, model_id: &str) -> PathBuf {
        self.root.join(NUMBERING_DIR).join(format!("{model_id}.json"))
    }

    /// Directory names directly under `dir`. Missing directories yield an
    /// empty list.
    async fn subdirectories(dir: &Path) -> Vec<PathBuf> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %dir.display(), "listing directory: {e}");
                return Vec::new();
            }
        };

        let mut dirs = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => match entry.file_type().await {
                    Ok(kind) if kind.is_dir() => dirs.push(entry.path()),
                    Ok(_) => {}
                    Err(e) => warn!(path = %entry.path().display(), "reading entry type: {e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    error!(path = %dir.display(), "reading directory entry: {e}");
                    break;
                }
            }
        }
        dirs.sort();
        dirs
    }
}

/// Write `data` to `path` through a temporary sibling and a rename, so
/// readers never observe a partially written document.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    let tmp = PathBuf::from(tmp);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save_artifact(
        &self,
        model_id: &str,
        version_id: &str,
        blob: &[u8],
    ) -> Option<(PathBuf, u64)> {
        let location = self.version_dir(model_id, version_id).join(ARTIFACT_FILE);
        match write_atomic(&location, blob).await {
            Ok(()) => {
                debug!(%model_id, %version_id, size = blob.len(), "artifact saved");
                Some((location, blob.len() as u64))
            }
            Err(e) => {
                error!(%model_id, %version_id, path = %location.display(), "writing artifact: {e}");
                None
            }
        }
    }

    fn metadata_location(&self, model_id: &str, version_id: &str) -> PathBuf {
        self.version_dir(model_id, version_id).join(METADATA_FILE)
    }

    async fn load_artifact(&self, location: &Path) -> Option<Vec<u8>> {
        match tokio::fs::read(location).await {
            Ok(data) => Some(data),
            Err(e) => {
                error!(path = %location.display(), "reading artifact: {e}");
                None
            }
        }
    }

    async fn save_metadata(&self, record: &VersionRecord) -> bool {
        let document = match serde_json::to_vec_pretty(record) {
            Ok(document) => document,
            Err(e) => {
                error!(version_id = %record.version_id, "serializing metadata: {e}");
                return false;
            }
        };
        match write_atomic(&record.metadata_location, &document).await {
            Ok(()) => true,
            Err(e) => {
                error!(
                    version_id = %record.version_id,
                    path = %record.metadata_location.display(),
                    "writing metadata: {e}"
                );
                false
            }
        }
    }

    async fn load_metadata(&self, location: &Path) -> Option<VersionRecord> {
        let data = match tokio::fs::read(location).await {
            Ok(data) => data,
            Err(e) => {
                error!(path = %location.display(), "reading metadata: {e}");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                error!(path = %location.display(), "parsing metadata: {e}");
                None
            }
        }
    }

    async fn checksum(&self, location: &Path) -> ContentHash {
        let data = match tokio::fs::read(location).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %location.display(), "checksum unavailable: {e}");
                return ContentHash::empty();
            }
        };
        match tokio::task::spawn_blocking(move || ContentHash::compute(&data)).await {
            Ok(hash) => hash,
            Err(e) => {
                error!(path = %location.display(), "checksum task failed: {e}");
                ContentHash::empty()
            }
        }
    }

    async fn usage(&self) -> u64 {
        let mut total = 0u64;
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    error!(path = %dir.display(), "measuring usage: {e}");
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.metadata().await {
                    Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                    Ok(meta) => total += meta.len(),
                    Err(e) => warn!(path = %entry.path().display(), "reading file size: {e}"),
                }
            }
        }
        total
    }

    async fn backup(&self, record: &VersionRecord) -> bool {
        let dir = self.backup_dir(&record.model_id, &record.version_id);
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            error!(version_id = %record.version_id, path = %dir.display(), "creating backup dir: {e}");
            return false;
        }

        if let Err(e) = tokio::fs::copy(&record.artifact_location, dir.join(ARTIFACT_FILE)).await {
            error!(version_id = %record.version_id, "backing up artifact: {e}");
            return false;
        }

        let mut mirrored = record.clone();
        mirrored.artifact_location = dir.join(ARTIFACT_FILE);
        mirrored.metadata_location = dir.join(METADATA_FILE);
        let document = match serde_json::to_vec_pretty(&mirrored) {
            Ok(document) => document,
            Err(e) => {
                error!(version_id = %record.version_id, "serializing backup metadata: {e}");
                return false;
            }
        };
        match write_atomic(&mirrored.metadata_location, &document).await {
            Ok(()) => {
                debug!(version_id = %record.version_id, path = %dir.display(), "backup written");
                true
            }
            Err(e) => {
                error!(version_id = %record.version_id, "writing backup metadata: {e}");
                false
            }
        }
    }

    async fn delete_files(&self, record: &VersionRecord) -> bool {
        let dir = self.version_dir(&record.model_id, &record.version_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(version_id = %record.version_id, "version files already absent");
            }
            Err(e) => {
                error!(version_id = %record.version_id, path = %dir.display(), "deleting version files: {e}");
                return false;
            }
        }

        // Drop the model directory once its last version is gone.
        if let Some(model_dir) = dir.parent() {
            let _ = tokio::fs::remove_dir(model_dir).await;
        }
        true
    }

    async fn enumerate_all(&self) -> HashMap<String, VersionRecord> {
        let mut records = HashMap::new();
        for model_dir in Self::subdirectories(&self.root.join(MODELS_DIR)).await {
            for version_dir in Self::subdirectories(&model_dir).await {
                let metadata_path = version_dir.join(METADATA_FILE);
                let artifact_path = version_dir.join(ARTIFACT_FILE);

                if !tokio::fs::try_exists(&metadata_path).await.unwrap_or(false) {
                    warn!(path = %version_dir.display(), "skipping version without metadata");
                    continue;
                }
                let Some(mut record) = self.load_metadata(&metadata_path).await else {
                    warn!(path = %metadata_path.display(), "skipping unreadable metadata");
                    continue;
                };
                if !tokio::fs::try_exists(&artifact_path).await.unwrap_or(false) {
                    warn!(version_id = %record.version_id, "skipping version without artifact");
                    continue;
                }

                // The directory is authoritative for where the files live now.
                record.artifact_location = artifact_path;
                record.metadata_location = metadata_path;

                if let Some(previous) = records.insert(record.version_id.clone(), record) {
                    warn!(version_id = %previous.version_id, "duplicate version id on disk");
                }
            }
        }
        debug!(count = records.len(), "enumerated stored versions");
        records
    }

    async fn append_deployment(&self, record: &DeploymentRecord) -> bool {
        let path = self.history_path(&record.model_id);
        let mut line = match serde_json::to_vec(record) {
            Ok(line) => line,
            Err(e) => {
                error!(model_id = %record.model_id, "serializing deployment record: {e}");
                return false;
            }
        };
        line.push(b'\n');

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                error!(path = %parent.display(), "creating deployments dir: {e}");
                return false;
            }
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await;
        let result = match file {
            Ok(mut file) => match file.write_all(&line).await {
                Ok(()) => file.flush().await,
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(path = %path.display(), "appending deployment record: {e}");
                false
            }
        }
    }

    async fn load_deployments(&self) -> Vec<DeploymentRecord> {
        let dir = self.root.join(DEPLOYMENTS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                error!(path = %dir.display(), "listing deployment history: {e}");
                return Vec::new();
            }
        };

        let mut history = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
                continue;
            }
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) => {
                    error!(path = %path.display(), "reading deployment history: {e}");
                    continue;
                }
            };
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<DeploymentRecord>(line) {
                    Ok(record) => history.push(record),
                    Err(e) => warn!(
                        path = %path.display(),
                        line = lineno + 1,
                        "skipping malformed deployment record: {e}"
                    ),
                }
            }
        }
        history.sort_by_key(|record| record.deployed_at);
        history
    }

    async fn save_numbering(&self, model_id: &str, number: &VersionNumber) -> bool {
        let path = self.numbering_path(model_id);
        let document = match serde_json::to_vec(number) {
            Ok(document) => document,
            Err(e) => {
                error!(%model_id, "serializing version number: {e}");
                return false;
            }
        };
        match write_atomic(&path, &document).await {
            Ok(()) => true,
            Err(e) => {
                error!(%model_id, path = %path.display(), "writing numbering mark: {e}");
                false
            }
        }
    }

    async fn load_numbering(&self) -> HashMap<String, VersionNumber> {
        let dir = self.root.join(NUMBERING_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
            Err(e) => {
                error!(path = %dir.display(), "listing numbering marks: {e}");
                return HashMap::new();
            }
        };

        let mut marks = HashMap::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(model_id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let parsed = match tokio::fs::read(&path).await {
                Ok(data) => serde_json::from_slice::<VersionNumber>(&data).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(number) => {
                    marks.insert(model_id.to_string(), number);
                }
                Err(e) => warn!(path = %path.display(), "skipping unreadable numbering mark: {e}"),
            }
        }
        marks
    }

    async fn probe(&self) -> bool {
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            error!(path = %self.root.display(), "storage root unavailable: {e}");
            return false;
        }
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) => meta.is_dir() && !meta.permissions().readonly(),
            Err(e) => {
                error!(path = %self.root.display(), "probing storage root: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use modelhub_core::{DeploymentConfig, DeploymentStage, VersionNumber, VersionStatus};

    fn store_in(dir: &Path) -> FsArtifactStore {
        FsArtifactStore::new(dir.join("registry"), dir.join("backups"))
    }

    async fn stored_record(store: &FsArtifactStore, model_id: &str, version_id: &str, blob: &[u8]) -> VersionRecord {
        let (location, size) = store.save_artifact(model_id, version_id, blob).await.unwrap();
        let now = Utc::now();
        let record = VersionRecord {
            version_id: version_id.to_string(),
            model_id: model_id.to_string(),
            version_number: VersionNumber::Incremental(1),
            status: VersionStatus::Ready,
            deployment_stage: DeploymentStage::Development,
            checksum: store.checksum(&location).await,
            artifact_location: location,
            metadata_location: store.metadata_location(model_id, version_id),
            created_at: now,
            updated_at: now,
            creator: String::new(),
            description: String::new(),
            tags: Default::default(),
            metrics: Default::default(),
            dependencies: Default::default(),
            configuration: Default::default(),
            deployment_config: DeploymentConfig::default(),
            parent_version: None,
            size_bytes: size,
            is_active: false,
        };
        assert!(store.save_metadata(&record).await);
        record
    }

    #[tokio::test]
    async fn save_and_load_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let (location, size) = store.save_artifact("churn", "churn_v1", b"weights").await.unwrap();
        assert_eq!(size, 7);
        assert!(location.ends_with("models/churn/churn_v1/artifact.bin"));
        assert_eq!(store.load_artifact(&location).await.unwrap(), b"weights");
    }

    #[tokio::test]
    async fn checksum_matches_stored_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let record = stored_record(&store, "churn", "churn_v1", b"weights").await;
        assert_eq!(record.checksum, ContentHash::compute(b"weights"));
    }

    #[tokio::test]
    async fn missing_files_are_absent_not_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        let nowhere = dir.path().join("nope");

        assert!(store.load_artifact(&nowhere).await.is_none());
        assert!(store.load_metadata(&nowhere).await.is_none());
        assert!(!store.checksum(&nowhere).await.is_known());
        assert_eq!(store.usage().await, 0);
        assert!(store.enumerate_all().await.is_empty());
        assert!(store.load_deployments().await.is_empty());
    }

    #[tokio::test]
    async fn metadata_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let record = stored_record(&store, "churn", "churn_v1", b"w").await;
        let loaded = store.load_metadata(&record.metadata_location).await.unwrap();
        assert_eq!(loaded, record);
        let leftovers = std::fs::read_dir(record.metadata_location.parent().unwrap())
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().file_name().to_string_lossy().ends_with(".tmp")
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn usage_counts_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let record = stored_record(&store, "churn", "churn_v1", &[0u8; 100]).await;
        let metadata_len = std::fs::metadata(&record.metadata_location).unwrap().len();
        assert_eq!(store.usage().await, 100 + metadata_len);
    }

    #[tokio::test]
    async fn enumerate_skips_corrupt_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        stored_record(&store, "churn", "churn_v1", b"a").await;
        stored_record(&store, "churn", "churn_v2", b"b").await;
        stored_record(&store, "ltv", "ltv_v1", b"c").await;

        // Corrupt one document and orphan another directory.
        std::fs::write(store.metadata_location("churn", "churn_v2"), b"{ not json").unwrap();
        std::fs::create_dir_all(store.version_dir("ltv", "ltv_orphan")).unwrap();

        let records = store.enumerate_all().await;
        assert_eq!(records.len(), 2);
        assert!(records.contains_key("churn_v1"));
        assert!(records.contains_key("ltv_v1"));
    }

    #[tokio::test]
    async fn backup_mirrors_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let record = stored_record(&store, "churn", "churn_v1", b"weights").await;
        assert!(store.backup(&record).await);

        let backup_dir = dir.path().join("backups/models/churn/churn_v1");
        assert_eq!(std::fs::read(backup_dir.join(ARTIFACT_FILE)).unwrap(), b"weights");
        let doc: VersionRecord =
            serde_json::from_slice(&std::fs::read(backup_dir.join(METADATA_FILE)).unwrap()).unwrap();
        assert_eq!(doc.version_id, "churn_v1");
        assert_eq!(doc.artifact_location, backup_dir.join(ARTIFACT_FILE));
    }

    #[tokio::test]
    async fn delete_removes_version_and_empty_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let v1 = stored_record(&store, "churn", "churn_v1", b"a").await;
        let v2 = stored_record(&store, "churn", "churn_v2", b"b").await;

        assert!(store.delete_files(&v1).await);
        assert!(!v1.artifact_location.exists());
        assert!(v2.artifact_location.exists());

        assert!(store.delete_files(&v2).await);
        assert!(!dir.path().join("registry/models/churn").exists());

        // Deleting again is harmless.
        assert!(store.delete_files(&v2).await);
    }

    #[tokio::test]
    async fn deployment_history_appends_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        let first = DeploymentRecord::new(
            "churn",
            "churn_v1",
            DeploymentStage::Production,
            DeploymentConfig::default(),
            None,
        );
        let second = DeploymentRecord::new(
            "churn",
            "churn_v2",
            DeploymentStage::Production,
            DeploymentConfig::default(),
            Some("churn_v1".into()),
        );
        assert!(store.append_deployment(&first).await);
        assert!(store.append_deployment(&second).await);

        let path = store.history_path("churn");
        let mut content = std::fs::read_to_string(&path).unwrap();
        content.push_str("garbage line\n");
        std::fs::write(&path, content).unwrap();

        let history = store.load_deployments().await;
        assert_eq!(history, vec![first, second]);
    }

    #[tokio::test]
    async fn probe_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(store.probe().await);
        assert!(store.root().is_dir());
    }

    #[tokio::test]
    async fn numbering_marks_survive_and_skip_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());

        assert!(store.load_numbering().await.is_empty());
        let semantic = modelhub_core::VersioningStrategy::Semantic.next(None, 3, Utc::now());
        assert!(store.save_numbering("churn", &VersionNumber::Incremental(2)).await);
        assert!(store.save_numbering("churn", &semantic).await);
        assert!(store.save_numbering("ltv", &VersionNumber::Incremental(9)).await);
        std::fs::write(store.numbering_path("broken"), b"nope").unwrap();

        let marks = store.load_numbering().await;
        assert_eq!(marks.len(), 2);
        assert_eq!(marks["churn"], semantic);
        assert_eq!(marks["ltv"], VersionNumber::Incremental(9));
        // Marks live outside the models tree.
        assert!(store.enumerate_all().await.is_empty());
    }
}
