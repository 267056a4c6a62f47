//! Sharded sensor pool
//!
//! This module provides:
//! - Deterministic routing of sensor ids to agent slots
//! - Agents owning disjoint partitions with fetch-through/write-through caching
//! - A supervisor restarting crashed agents and resizing the pool
//! - [`SensorPool`], the facade the service and manager talk to

pub mod agent;
pub mod balancer;
pub mod supervisor;


pub use agent::{AgentContext, AgentHandle};
pub use balancer::{agent_index, LoadBalancer};
pub use supervisor::{AgentExit, Supervisor};

use crate::config::ForecastConfig;
use crate::error::Result;
use crate::health::HealthRegistry;
use crate::models::{Prediction, Sensor, Tag};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::sensor::SensorId;
use crate::store::Store;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Entry point for sensor operations, routed to the owning agent
#[derive(Clone)]
pub struct SensorPool {
    supervisor: Arc<Supervisor>,
}

impl SensorPool {
    /// Start the agents and the supervisor watchdog
    ///
    /// The watchdog stops when `shutdown` fires.
    pub async fn start(
        config: &ForecastConfig,
        store: Arc<dyn Store>,
        health: Arc<HealthRegistry>,
        logger: StructuredLogger,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let context = AgentContext {
            store,
            windows: config.windows.clone(),
            store_timeout: config.store.timeout(),
            health,
            metrics: ForecastMetrics::new(),
            logger,
        };
        let (supervisor, exits) = Supervisor::start(config, context).await;
        tokio::spawn(Arc::clone(&supervisor).run(exits, shutdown));
        Self { supervisor }
    }

    pub fn supervisor(&self) -> &Arc<Supervisor> {
        &self.supervisor
    }

    pub async fn get(&self, id: SensorId) -> Result<Sensor> {
        self.supervisor.route(&id).await.get(id).await
    }

    /// Apply a sample, creating the sensor on first sight
    pub async fn put(&self, id: SensorId, timestamp: i64, value: f64) -> Result<Sensor> {
        self.supervisor
            .route(&id)
            .await
            .put(id, timestamp, value)
            .await
    }

    pub async fn delete(&self, id: SensorId) -> Result<()> {
        self.supervisor.route(&id).await.delete(id).await
    }

    pub async fn reset(&self, id: SensorId, tag: Tag) -> Result<()> {
        self.supervisor.route(&id).await.reset(id, tag).await
    }

    /// Cache a served prediction on the sensor
    pub async fn record_prediction(
        &self,
        id: SensorId,
        tag: Tag,
        prediction: Prediction,
    ) -> Result<()> {
        self.supervisor
            .route(&id)
            .await
            .store_prediction(id, tag, prediction)
            .await
    }

    /// Concatenated snapshot of every partition
    ///
    /// A slot that is mid-restart contributes nothing.
    pub async fn all(&self) -> Vec<Sensor> {
        let mut sensors = Vec::new();
        for handle in self.supervisor.handles().await {
            match handle.snapshot().await {
                Ok(partition) => sensors.extend(partition),
                Err(e) => warn!(slot = handle.slot(), error = %e, "Skipping partition in snapshot"),
            }
        }
        sensors
    }

    /// Persist deferred writes in every agent; returns how many remain
    pub async fn flush(&self) -> usize {
        let mut pending = 0;
        for handle in self.supervisor.handles().await {
            match handle.flush().await {
                Ok(n) => pending += n,
                Err(e) => warn!(slot = handle.slot(), error = %e, "Flush failed"),
            }
        }
        pending
    }

    pub async fn agent_count(&self) -> usize {
        self.supervisor.children().await
    }

    /// Current id-to-slot assignment for `ids`
    pub async fn hash_table<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SensorId>,
    ) -> BTreeMap<SensorId, usize> {
        self.supervisor.balancer().await.table(ids)
    }

    pub async fn shutdown(&self) -> usize {
        self.supervisor.shutdown().await
    }
}
