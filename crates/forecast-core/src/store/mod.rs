//! Persistent key-value store for sensor, manager and model records
//!
//! The store is the source of truth; agents are a write-through cache in
//! front of it. Backends implement [`Store`]; [`open`] picks one from
//! configuration.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use crate::models::{ManagerRecord, NetworkModel, Sensor};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Table a record lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Sensor,
    Manager,
    NetworkModel,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Sensor => "sensor",
            RecordKind::Manager => "manager",
            RecordKind::NetworkModel => "network_model",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted record of any kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Record {
    Sensor(Sensor),
    Manager(ManagerRecord),
    NetworkModel(NetworkModel),
}

impl Record {
    pub fn kind(&self) -> RecordKind {
        match self {
            Record::Sensor(_) => RecordKind::Sensor,
            Record::Manager(_) => RecordKind::Manager,
            Record::NetworkModel(_) => RecordKind::NetworkModel,
        }
    }

    pub fn id(&self) -> String {
        match self {
            Record::Sensor(s) => s.id.to_string(),
            Record::Manager(m) => m.id.clone(),
            Record::NetworkModel(n) => n.id.clone(),
        }
    }
}

/// Trait for store backends
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a record, `None` when absent
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, StoreError>;

    /// Insert or replace a record
    async fn put(&self, record: Record) -> Result<(), StoreError>;

    /// Remove a record; removing an absent record is not an error
    async fn delete(&self, kind: RecordKind, id: &str) -> Result<(), StoreError>;
}

/// Create the store selected by configuration
pub async fn open(config: &StoreConfig) -> Result<Arc<dyn Store>, StoreError> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory store, data will not survive restarts");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::File => {
            tracing::info!(data_dir = ?config.data_dir, "Using file store");
            Ok(Arc::new(FileStore::open(&config.data_dir).await?))
        }
    }
}

pub async fn get_sensor(store: &dyn Store, id: &str) -> Result<Option<Sensor>, StoreError> {
    match store.get(RecordKind::Sensor, id).await? {
        Some(Record::Sensor(sensor)) => Ok(Some(sensor)),
        Some(other) => Err(unexpected(RecordKind::Sensor, &other)),
        None => Ok(None),
    }
}

pub async fn get_manager(store: &dyn Store) -> Result<Option<ManagerRecord>, StoreError> {
    match store.get(RecordKind::Manager, ManagerRecord::ID).await? {
        Some(Record::Manager(record)) => Ok(Some(record)),
        Some(other) => Err(unexpected(RecordKind::Manager, &other)),
        None => Ok(None),
    }
}

pub async fn get_model(store: &dyn Store, id: &str) -> Result<Option<NetworkModel>, StoreError> {
    match store.get(RecordKind::NetworkModel, id).await? {
        Some(Record::NetworkModel(model)) => Ok(Some(model)),
        Some(other) => Err(unexpected(RecordKind::NetworkModel, &other)),
        None => Ok(None),
    }
}

fn unexpected(expected: RecordKind, found: &Record) -> StoreError {
    StoreError::Unavailable(format!(
        "corrupt store entry: expected {} record, found {}",
        expected,
        found.kind()
    ))
}
