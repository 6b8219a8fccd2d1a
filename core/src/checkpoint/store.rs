use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::error::CheckpointError;

/// Durable key/value storage for serialized checkpoints.
///
/// Entries are write-once: `put` on an existing id fails with
/// `AlreadyExists` and never overwrites.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    fn name(&self) -> &str;

    async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError>;

    /// `Ok(None)` when no such id exists.
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError>;

    /// Stored ids, sorted.
    async fn list(&self) -> Result<Vec<String>, CheckpointError>;
}

/// In-process store, mostly for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Overwrite raw bytes, bypassing the write-once rule. Test hook for
    /// simulating damaged entries.
    pub async fn insert_raw(&self, id: &str, bytes: Vec<u8>) {
        self.entries.write().await.insert(id.to_string(), bytes);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(id) {
            return Err(CheckpointError::AlreadyExists(id.to_string()));
        }
        entries.insert(id.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.entries.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}

const FILE_PREFIX: &str = "checkpoint_";
const FILE_SUFFIX: &str = ".json";

/// One JSON file per checkpoint under a directory:
/// `<dir>/checkpoint_<id>.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash never leaves a half-written checkpoint under its final name.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, CheckpointError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CheckpointError::Store(format!("invalid checkpoint id '{id}'")));
        }
        Ok(self.dir.join(format!("{FILE_PREFIX}{id}{FILE_SUFFIX}")))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn put(&self, id: &str, bytes: Vec<u8>) -> Result<(), CheckpointError> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            CheckpointError::Store(format!("create {}: {e}", self.dir.display()))
        })?;

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(CheckpointError::AlreadyExists(id.to_string()));
        }

        let tmp = self.dir.join(format!(".{FILE_PREFIX}{id}{FILE_SUFFIX}.tmp"));
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(CheckpointError::AlreadyExists(id.to_string()));
            }
            Err(e) => return Err(CheckpointError::Store(format!("create {}: {e}", tmp.display()))),
        };
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CheckpointError::Store(format!("rename to {}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CheckpointError::Store(format!("read {}: {e}", path.display()))),
        }
    }

    async fn list(&self) -> Result<Vec<String>, CheckpointError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(CheckpointError::Store(format!("list {}: {e}", self.dir.display())));
            }
        };

        let mut ids = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
            {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
