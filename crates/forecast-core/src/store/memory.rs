//! In-process store backed by a concurrent map

use super::{Record, RecordKind, Store};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;

/// Store that keeps every record in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<(RecordKind, String), Record>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, kind: RecordKind, id: &str) -> Result<Option<Record>, StoreError> {
        Ok(self
            .records
            .get(&(kind, id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn put(&self, record: Record) -> Result<(), StoreError> {
        self.records.insert((record.kind(), record.id()), record);
        Ok(())
    }

    async fn delete(&self, kind: RecordKind, id: &str) -> Result<(), StoreError> {
        self.records.remove(&(kind, id.to_string()));
        Ok(())
    }
}
