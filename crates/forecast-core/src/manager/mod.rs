//! Manager: registrar of sensors, training readiness and pool size
//!
//! All mutations go through one write lock, so the manager's state changes
//! as a single serialized sequence. Everything else reads snapshots.

mod scan;

pub use scan::{Scheduler, TimerHandles};

use crate::config::ForecastConfig;
use crate::error::{Result, StoreError};
use crate::models::{ManagerRecord, Tag};
use crate::sensor::SensorId;
use crate::store::{self, Record, Store};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct Manager {
    state: RwLock<ManagerRecord>,
    store: Arc<dyn Store>,
    store_timeout: Duration,
}

impl Manager {
    pub fn new(store: Arc<dyn Store>, config: &ForecastConfig) -> Self {
        Self {
            state: RwLock::new(ManagerRecord {
                id: ManagerRecord::ID.to_string(),
                finished: BTreeSet::new(),
                hash_table: BTreeMap::new(),
                sensor_agents: config.agent_count.max(1),
                metrics: BTreeMap::new(),
            }),
            store,
            store_timeout: config.store.timeout(),
        }
    }

    /// Load the persisted record, starting empty when there is none or the
    /// store cannot be reached
    ///
    /// The configured agent count replaces the persisted one.
    pub async fn restore(store: Arc<dyn Store>, config: &ForecastConfig) -> Self {
        let manager = Self::new(Arc::clone(&store), config);
        let lookup = store::get_manager(store.as_ref());
        let loaded = match tokio::time::timeout(manager.store_timeout, lookup).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        match loaded {
            Ok(Some(mut record)) => {
                record.sensor_agents = config.agent_count.max(1);
                let metrics = &record.metrics;
                record
                    .finished
                    .retain(|(id, _)| metrics.values().any(|ids| ids.contains(id)));
                info!(
                    nodes = record.metrics.len(),
                    finished = record.finished.len(),
                    "Manager state restored"
                );
                *manager.state.write().await = record;
            }
            Ok(None) => debug!("No persisted manager state, starting empty"),
            Err(e) => warn!(error = %e, "Could not load manager state, starting empty"),
        }
        manager
    }

    /// Add `sensor_id` to the node's set; returns whether it was new
    pub async fn register_metric(&self, node: &str, sensor_id: SensorId) -> bool {
        let mut state = self.state.write().await;
        state
            .metrics
            .entry(node.to_string())
            .or_default()
            .insert(sensor_id)
    }

    /// Sensors registered under `node`, empty when the node is unknown
    pub async fn get_metrics(&self, node: &str) -> BTreeSet<SensorId> {
        self.state
            .read()
            .await
            .metrics
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    /// Every registered sensor, across nodes
    pub async fn registered(&self) -> BTreeSet<SensorId> {
        self.state
            .read()
            .await
            .metrics
            .values()
            .flatten()
            .copied()
            .collect()
    }

    /// Record that a (sensor, tag) is ready to train; returns whether it was
    /// newly marked
    ///
    /// Sensors never registered under any node are refused.
    pub async fn mark(&self, sensor_id: SensorId, tag: Tag) -> bool {
        let mut state = self.state.write().await;
        if !state.metrics.values().any(|ids| ids.contains(&sensor_id)) {
            debug!(sensor_id = %sensor_id, tag = %tag, "Refusing to mark unregistered sensor");
            return false;
        }
        state.finished.insert((sensor_id, tag))
    }

    pub async fn unmark(&self, sensor_id: SensorId, tag: Tag) -> bool {
        self.state.write().await.finished.remove(&(sensor_id, tag))
    }

    pub async fn is_finished(&self, sensor_id: SensorId, tag: Tag) -> bool {
        self.state.read().await.finished.contains(&(sensor_id, tag))
    }

    /// Diagnostic snapshot
    pub async fn get_state(&self) -> ManagerRecord {
        self.state.read().await.clone()
    }

    pub async fn desired_agents(&self) -> usize {
        self.state.read().await.sensor_agents
    }

    /// Change the target pool size, applied by the next rebalance scan
    ///
    /// Lasts until restart; a restored manager takes the configured count.
    pub async fn set_desired_agents(&self, count: usize) {
        let count = count.max(1);
        let mut state = self.state.write().await;
        if state.sensor_agents != count {
            info!(from = state.sensor_agents, to = count, "Desired agent count changed");
            state.sensor_agents = count;
        }
    }

    /// Save the record with a fresh routing snapshot
    pub async fn persist(&self, hash_table: BTreeMap<SensorId, usize>) -> Result<()> {
        let record = {
            let mut state = self.state.write().await;
            state.hash_table = hash_table;
            state.clone()
        };

        let write = self.store.put(Record::Manager(record));
        match tokio::time::timeout(self.store_timeout, write).await {
            Ok(result) => result?,
            Err(_) => return Err(StoreError::Timeout.into()),
        }
        debug!("Manager state persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> (Manager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Manager::new(store.clone(), &ForecastConfig::default()), store)
    }

    #[tokio::test]
    async fn test_register_metric_is_idempotent() {
        let (manager, _) = manager();
        let id = SensorId::new("n1", "s1");

        assert!(manager.register_metric("n1", id).await);
        assert!(!manager.register_metric("n1", id).await);
        assert_eq!(manager.get_metrics("n1").await, BTreeSet::from([id]));
        assert!(manager.get_metrics("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_unmark() {
        let (manager, _) = manager();
        let id = SensorId::new("n1", "s1");
        manager.register_metric("n1", id).await;

        assert!(!manager.is_finished(id, Tag::Hourly).await);
        assert!(manager.mark(id, Tag::Hourly).await);
        assert!(!manager.mark(id, Tag::Hourly).await);
        assert!(manager.is_finished(id, Tag::Hourly).await);
        assert!(!manager.is_finished(id, Tag::Daily).await);

        assert!(manager.unmark(id, Tag::Hourly).await);
        assert!(!manager.is_finished(id, Tag::Hourly).await);
    }

    #[tokio::test]
    async fn test_mark_requires_registered_sensor() {
        let (manager, _) = manager();
        let id = SensorId::new("n1", "s1");

        assert!(!manager.mark(id, Tag::Hourly).await);
        assert!(!manager.is_finished(id, Tag::Hourly).await);
        assert!(manager.get_state().await.finished.is_empty());

        manager.register_metric("n2", id).await;
        assert!(manager.mark(id, Tag::Hourly).await);
        assert!(manager.is_finished(id, Tag::Hourly).await);
    }

    #[tokio::test]
    async fn test_registered_spans_nodes() {
        let (manager, _) = manager();
        manager.register_metric("n1", SensorId::new("n1", "a")).await;
        manager.register_metric("n2", SensorId::new("n2", "a")).await;
        assert_eq!(manager.registered().await.len(), 2);
    }

    #[tokio::test]
    async fn test_persist_and_restore() {
        let (manager, store) = manager();
        let id = SensorId::new("n1", "s1");
        manager.register_metric("n1", id).await;
        manager.mark(id, Tag::Weekly).await;
        manager.persist(BTreeMap::from([(id, 5)])).await.unwrap();

        let mut config = ForecastConfig::default();
        config.agent_count = 3;
        let restored = Manager::restore(store, &config).await;
        let state = restored.get_state().await;

        assert_eq!(state.id, ManagerRecord::ID);
        assert!(state.finished.contains(&(id, Tag::Weekly)));
        assert_eq!(state.hash_table.get(&id), Some(&5));
        assert_eq!(state.sensor_agents, 3);
        assert_eq!(restored.get_metrics("n1").await, BTreeSet::from([id]));
    }

    #[tokio::test]
    async fn test_restore_drops_marks_of_unregistered_sensors() {
        let (_, store) = manager();
        let kept = SensorId::new("n1", "s1");
        let stray = SensorId::new("n1", "s2");
        let record = ManagerRecord {
            id: ManagerRecord::ID.to_string(),
            finished: BTreeSet::from([(kept, Tag::Hourly), (stray, Tag::Daily)]),
            hash_table: BTreeMap::new(),
            sensor_agents: 2,
            metrics: BTreeMap::from([("n1".to_string(), BTreeSet::from([kept]))]),
        };
        store.put(Record::Manager(record)).await.unwrap();

        let restored = Manager::restore(store, &ForecastConfig::default()).await;
        assert!(restored.is_finished(kept, Tag::Hourly).await);
        assert!(!restored.is_finished(stray, Tag::Daily).await);
    }

    #[tokio::test]
    async fn test_desired_agents_never_zero() {
        let (manager, _) = manager();
        manager.set_desired_agents(0).await;
        assert_eq!(manager.desired_agents().await, 1);
        manager.set_desired_agents(8).await;
        assert_eq!(manager.desired_agents().await, 8);
    }
}
