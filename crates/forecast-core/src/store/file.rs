//! JSON file store
//!
//! One document per record at `<root>/<kind>/<id>.json`. Writes go to a
//! temporary file first and are renamed into place, so a crash mid-write
//! leaves the previous version intact.

use super::{Record, RecordKind, Store};
use crate::error::StoreError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

const KINDS: [RecordKind; 3] = [
    RecordKind::Sensor,
    RecordKind::Manager,
    RecordKind::NetworkModel,
];

#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for kind in KINDS {
            fs::create_dir_all(root.join(kind.as_str())).await?;
        }
        Ok(Self { root })
    }

    fn path(&self, kind: RecordKind, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return Err(StoreError::Unavailable(format!("invalid record id '{}'", id)));
        }
        Ok(self.root.join(kind.as_str()).join(format!("{}.json", id)))
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, StoreError> {
        let path = self.path(kind, id)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, record: Record) -> Result<(), StoreError> {
        let path = self.path(record.kind(), &record.id())?;
        let bytes = serde_json::to_vec(&record)?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        debug!(path = ?path, bytes = bytes.len(), "Record written");
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<(), StoreError> {
        let path = self.path(kind, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
