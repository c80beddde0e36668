//! Flat-file snapshot store.
//!
//! Every completed fetch is written to its own JSON file named
//! `child_publishers_<network_code>_<timestamp>.json`. Files are never
//! edited in place: a new snapshot is written under a private temporary
//! name and then linked into place, which fails instead of replacing an
//! existing file. A name already taken gets a `_<n>` suffix.
//!
//! [`MemorySnapshotStore`] implements the same trait with injected
//! modification times for tests.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::SystemTime;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;

use crate::model::Snapshot;

/// File name prefix shared by all snapshot files.
pub const SNAPSHOT_PREFIX: &str = "child_publishers_";

const SNAPSHOT_EXTENSION: &str = ".json";

/// Suffixes tried before a write gives up on finding a free name.
const MAX_NAME_ATTEMPTS: u32 = 100;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed snapshot {name}: {source}")]
    Malformed {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Inconsistent snapshot {name}: total_count is {total_count} but it holds {records} records")]
    Inconsistent {
        name: String,
        total_count: usize,
        records: usize,
    },

    #[error("Snapshot {0} not found")]
    NotFound(String),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// A persisted snapshot file and its modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub name: String,
    pub modified: SystemTime,
}

/// File name a snapshot for `network_code` is stored under.
pub fn snapshot_file_name(network_code: &str, snapshot: &Snapshot) -> String {
    let stamp = crate::cache::parse_fetched_at(&snapshot.fetched_at)
        .unwrap_or_else(|_| Utc::now())
        .format("%Y%m%d_%H%M%S_%3f");
    format!("{}{}_{}{}", SNAPSHOT_PREFIX, network_code, stamp, SNAPSHOT_EXTENSION)
}

/// `base` for the first attempt, then `<stem>_<attempt>.json`.
fn numbered_name(base: &str, attempt: u32) -> String {
    if attempt == 0 {
        return base.to_string();
    }
    let stem = base.strip_suffix(SNAPSHOT_EXTENSION).unwrap_or(base);
    format!("{}_{}{}", stem, attempt, SNAPSHOT_EXTENSION)
}

/// Reject snapshots whose `total_count` disagrees with their records.
fn check_consistent(name: &str, snapshot: Snapshot) -> Result<Snapshot, StoreError> {
    if snapshot.total_count != snapshot.records.len() {
        return Err(StoreError::Inconsistent {
            name: name.to_string(),
            total_count: snapshot.total_count,
            records: snapshot.records.len(),
        });
    }
    Ok(snapshot)
}

/// `true` when `name` is a snapshot file for exactly `network_code`.
pub fn matches_network_code(name: &str, network_code: &str) -> bool {
    name.strip_prefix(SNAPSHOT_PREFIX)
        .and_then(|rest| rest.strip_prefix(network_code))
        .map(|rest| rest.starts_with('_') && rest.ends_with(SNAPSHOT_EXTENSION))
        .unwrap_or(false)
}

/// Pick the most recently modified file.
///
/// Equal modification times are broken by file name, greatest wins, so the
/// result does not depend on the order the candidates were listed in.
pub fn select_latest<I>(files: I) -> Option<SnapshotFile>
where
    I: IntoIterator<Item = SnapshotFile>,
{
    files.into_iter().max_by(|a, b| {
        match a.modified.cmp(&b.modified) {
            Ordering::Equal => a.name.cmp(&b.name),
            other => other,
        }
    })
}

#[async_trait]
pub trait SnapshotStore {
    /// All snapshot files stored for `network_code`, in no particular order.
    async fn list(&self, network_code: &str) -> Result<Vec<SnapshotFile>, StoreError>;

    async fn read(&self, file: &SnapshotFile) -> Result<Snapshot, StoreError>;

    /// Persist `snapshot` as a new file and return a handle to it.
    async fn write(&self, snapshot: &Snapshot) -> Result<SnapshotFile, StoreError>;

    /// Most recent snapshot file for `network_code`, if any.
    async fn latest(&self, network_code: &str) -> Result<Option<SnapshotFile>, StoreError> {
        Ok(select_latest(self.list(network_code).await?))
    }
}

/// Snapshot store backed by a directory on disk.
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn list(&self, network_code: &str) -> Result<Vec<SnapshotFile>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::io(&self.dir, err)),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !matches_network_code(&name, network_code) {
                continue;
            }

            let metadata = entry
                .metadata()
                .await
                .map_err(|err| StoreError::io(&entry.path(), err))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|err| StoreError::io(&entry.path(), err))?;

            files.push(SnapshotFile { name, modified });
        }

        Ok(files)
    }

    async fn read(&self, file: &SnapshotFile) -> Result<Snapshot, StoreError> {
        let path = self.dir.join(&file.name);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|err| StoreError::io(&path, err))?;

        let snapshot = serde_json::from_slice(&bytes).map_err(|source| StoreError::Malformed {
            name: file.name.clone(),
            source,
        })?;
        check_consistent(&file.name, snapshot)
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<SnapshotFile, StoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|err| StoreError::io(&self.dir, err))?;

        let base = snapshot_file_name(&snapshot.network_code, snapshot);
        let tmp_path = self.dir.join(format!(
            ".{}.{}.{}.tmp",
            base,
            std::process::id(),
            TMP_COUNTER.fetch_add(1, AtomicOrdering::Relaxed)
        ));

        let body = serde_json::to_vec_pretty(snapshot).map_err(|source| StoreError::Malformed {
            name: base.clone(),
            source,
        })?;

        tokio::fs::write(&tmp_path, &body)
            .await
            .map_err(|err| StoreError::io(&tmp_path, err))?;

        // hard_link refuses an existing target, so a snapshot is never replaced.
        let mut attempt = 0;
        let linked = loop {
            let name = numbered_name(&base, attempt);
            let path = self.dir.join(&name);
            match tokio::fs::hard_link(&tmp_path, &path).await {
                Ok(()) => break Ok((name, path)),
                Err(err)
                    if err.kind() == std::io::ErrorKind::AlreadyExists
                        && attempt + 1 < MAX_NAME_ATTEMPTS =>
                {
                    attempt += 1;
                }
                Err(err) => break Err(StoreError::io(&path, err)),
            }
        };

        if let Err(err) = tokio::fs::remove_file(&tmp_path).await {
            tracing::warn!("Could not remove temporary file {}: {}", tmp_path.display(), err);
        }
        let (name, path) = linked?;

        let modified = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map_err(|err| StoreError::io(&path, err))?;

        tracing::info!("Snapshot for network {} saved to {}", snapshot.network_code, path.display());

        Ok(SnapshotFile { name, modified })
    }
}

/// In-memory snapshot store with caller-controlled modification times.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    entries: Mutex<Vec<(SnapshotFile, Snapshot)>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `snapshot` under `name` as if it had been modified at `modified`.
    pub fn insert(&self, name: impl Into<String>, modified: SystemTime, snapshot: Snapshot) {
        let file = SnapshotFile {
            name: name.into(),
            modified,
        };
        self.lock().push((file, snapshot));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(SnapshotFile, Snapshot)>> {
        // A panic while holding the lock cannot leave the Vec half-updated.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn list(&self, network_code: &str) -> Result<Vec<SnapshotFile>, StoreError> {
        Ok(self
            .lock()
            .iter()
            .filter(|(file, _)| matches_network_code(&file.name, network_code))
            .map(|(file, _)| file.clone())
            .collect())
    }

    async fn read(&self, file: &SnapshotFile) -> Result<Snapshot, StoreError> {
        let snapshot = self
            .lock()
            .iter()
            .find(|(stored, _)| stored.name == file.name)
            .map(|(_, snapshot)| snapshot.clone())
            .ok_or_else(|| StoreError::NotFound(file.name.clone()))?;
        check_consistent(&file.name, snapshot)
    }

    async fn write(&self, snapshot: &Snapshot) -> Result<SnapshotFile, StoreError> {
        let base = snapshot_file_name(&snapshot.network_code, snapshot);
        let mut entries = self.lock();

        let name = (0..MAX_NAME_ATTEMPTS)
            .map(|attempt| numbered_name(&base, attempt))
            .find(|name| entries.iter().all(|(stored, _)| &stored.name != name))
            .ok_or_else(|| StoreError::Io {
                path: base.clone(),
                source: std::io::ErrorKind::AlreadyExists.into(),
            })?;

        let file = SnapshotFile {
            name,
            modified: SystemTime::now(),
        };
        entries.push((file.clone(), snapshot.clone()));
        Ok(file)
    }
}
