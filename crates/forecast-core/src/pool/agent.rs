//! Agent: single-owner worker for one partition of sensors
//!
//! An agent is a task draining a command queue. It owns its partition
//! outright, so operations on the same sensor are serialized by the queue
//! while different agents run in parallel. The store is authoritative; the
//! partition is a write-through cache that may be rebuilt from empty at any
//! time.

use super::balancer::LoadBalancer;
use crate::config::WindowsConfig;
use crate::error::{ForecastError, Result, StoreError};
use crate::health::{components, HealthRegistry};
use crate::models::{Prediction, Sensor, Tag};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::sensor::{self, SensorId};
use crate::store::{self, Record, RecordKind, Store};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Commands an agent buffers before senders wait
pub const QUEUE_SIZE: usize = 1024;

/// Shared dependencies handed to every agent the supervisor starts
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn Store>,
    pub windows: WindowsConfig,
    pub store_timeout: Duration,
    pub health: Arc<HealthRegistry>,
    pub metrics: ForecastMetrics,
    pub logger: StructuredLogger,
}

pub(crate) enum Command {
    Get {
        id: SensorId,
        reply: oneshot::Sender<Result<Sensor>>,
    },
    Put {
        id: SensorId,
        timestamp: i64,
        value: f64,
        reply: oneshot::Sender<Result<Sensor>>,
    },
    Delete {
        id: SensorId,
        reply: oneshot::Sender<Result<()>>,
    },
    Reset {
        id: SensorId,
        tag: Tag,
        reply: oneshot::Sender<Result<()>>,
    },
    StorePrediction {
        id: SensorId,
        tag: Tag,
        prediction: Prediction,
        reply: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Sensor>>,
    },
    Flush {
        reply: oneshot::Sender<usize>,
    },
    Drain {
        agent_count: usize,
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        reply: oneshot::Sender<usize>,
    },
}

/// Cloneable address of a running agent
#[derive(Clone)]
pub struct AgentHandle {
    slot: usize,
    commands: mpsc::Sender<Command>,
}

impl AgentHandle {
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Whether the agent behind this handle has stopped
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| ForecastError::AgentCrash { slot: self.slot })?;
        response
            .await
            .map_err(|_| ForecastError::AgentCrash { slot: self.slot })
    }

    pub async fn get(&self, id: SensorId) -> Result<Sensor> {
        self.request(|reply| Command::Get { id, reply }).await?
    }

    pub async fn put(&self, id: SensorId, timestamp: i64, value: f64) -> Result<Sensor> {
        self.request(|reply| Command::Put {
            id,
            timestamp,
            value,
            reply,
        })
        .await?
    }

    pub async fn delete(&self, id: SensorId) -> Result<()> {
        self.request(|reply| Command::Delete { id, reply }).await?
    }

    pub async fn reset(&self, id: SensorId, tag: Tag) -> Result<()> {
        self.request(|reply| Command::Reset { id, tag, reply }).await?
    }

    pub async fn store_prediction(
        &self,
        id: SensorId,
        tag: Tag,
        prediction: Prediction,
    ) -> Result<()> {
        self.request(|reply| Command::StorePrediction {
            id,
            tag,
            prediction,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<Vec<Sensor>> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Persist deferred writes; returns how many are still pending
    pub async fn flush(&self) -> Result<usize> {
        self.request(|reply| Command::Flush { reply }).await
    }

    /// Flush, then evict sensors this slot no longer owns under
    /// `agent_count`; returns how many were evicted
    pub async fn drain(&self, agent_count: usize) -> Result<usize> {
        self.request(|reply| Command::Drain { agent_count, reply }).await
    }

    /// Flush and stop; returns how many writes could not be persisted
    pub async fn shutdown(&self) -> Result<usize> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Start an agent task for `slot`
pub fn spawn(
    slot: usize,
    context: AgentContext,
    queue_size: usize,
) -> (AgentHandle, JoinHandle<()>) {
    let (commands, inbox) = mpsc::channel(queue_size.max(1));
    let agent = Agent::new(slot, context);
    let join = tokio::spawn(agent.run(inbox));
    (AgentHandle { slot, commands }, join)
}

struct Agent {
    slot: usize,
    context: AgentContext,
    sensors: HashMap<SensorId, Sensor>,
    dirty: HashSet<SensorId>,
    store_degraded: bool,
}

impl Agent {
    fn new(slot: usize, context: AgentContext) -> Self {
        Self {
            slot,
            context,
            sensors: HashMap::new(),
            dirty: HashSet::new(),
            store_degraded: false,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        debug!(slot = self.slot, "Agent started");

        while let Some(command) = inbox.recv().await {
            match command {
                Command::Get { id, reply } => {
                    let result = self.get(id).await;
                    let _ = reply.send(result);
                }
                Command::Put {
                    id,
                    timestamp,
                    value,
                    reply,
                } => {
                    let started = Instant::now();
                    let result = self.put(id, timestamp, value).await;
                    self.context
                        .metrics
                        .observe_feed_latency(started.elapsed().as_secs_f64());
                    let _ = reply.send(result);
                }
                Command::Delete { id, reply } => {
                    let result = self.delete(id).await;
                    let _ = reply.send(result);
                }
                Command::Reset { id, tag, reply } => {
                    let result = self
                        .modify(id, |entry| sensor::reset(entry, tag))
                        .await;
                    let _ = reply.send(result);
                }
                Command::StorePrediction {
                    id,
                    tag,
                    prediction,
                    reply,
                } => {
                    let result = self
                        .modify(id, |entry| {
                            entry.predictions.insert(tag, prediction);
                        })
                        .await;
                    let _ = reply.send(result);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.sensors.values().cloned().collect());
                }
                Command::Flush { reply } => {
                    let pending = self.flush().await;
                    let _ = reply.send(pending);
                }
                Command::Drain { agent_count, reply } => {
                    let evicted = self.drain(agent_count).await;
                    let _ = reply.send(evicted);
                }
                Command::Shutdown { reply } => {
                    let pending = self.flush().await;
                    let _ = reply.send(pending);
                    debug!(slot = self.slot, pending, "Agent stopped");
                    return;
                }
            }
        }

        // Every handle dropped
        let pending = self.flush().await;
        debug!(slot = self.slot, pending, "Agent stopped");
    }

    /// Run a store call under the configured timeout, tracking degradation
    async fn store_call<T>(
        &mut self,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> std::result::Result<T, StoreError> {
        let result = match tokio::time::timeout(self.context.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };

        match &result {
            Ok(_) if self.store_degraded => {
                self.store_degraded = false;
                self.context.logger.log_store_status(self.slot, true, "");
                self.context.health.set_healthy(components::STORE).await;
            }
            Err(e) => {
                self.context.metrics.inc_store_failures();
                if !self.store_degraded {
                    self.store_degraded = true;
                    let reason = e.to_string();
                    self.context.logger.log_store_status(self.slot, false, &reason);
                    self.context
                        .health
                        .set_degraded(components::STORE, reason)
                        .await;
                }
            }
            Ok(_) => {}
        }
        result
    }

    fn cache(&mut self, sensor: Sensor) {
        if self.sensors.insert(sensor.id, sensor).is_none() {
            self.context.metrics.add_cached_sensors(1);
        }
    }

    fn evict(&mut self, id: &SensorId) {
        if self.sensors.remove(id).is_some() {
            self.context.metrics.add_cached_sensors(-1);
        }
        self.dirty.remove(id);
    }

    /// Local partition first, then the store
    ///
    /// `Ok(None)` is a confirmed miss; `Err` means the store could not be
    /// asked.
    async fn lookup(&mut self, id: SensorId) -> std::result::Result<Option<Sensor>, StoreError> {
        if let Some(sensor) = self.sensors.get(&id) {
            return Ok(Some(sensor.clone()));
        }

        let backend = Arc::clone(&self.context.store);
        let key = id.to_string();
        let found = self.store_call(store::get_sensor(backend.as_ref(), &key)).await?;
        if let Some(sensor) = &found {
            self.cache(sensor.clone());
        }
        Ok(found)
    }

    async fn get(&mut self, id: SensorId) -> Result<Sensor> {
        match self.lookup(id).await {
            Ok(Some(sensor)) => Ok(sensor),
            Ok(None) => Err(ForecastError::NotFound(id.to_string())),
            Err(e) => Err(ForecastError::StoreUnavailable(e)),
        }
    }

    /// Write-through; on failure keep the sensor dirty for a later flush
    async fn persist(&mut self, sensor: &Sensor) {
        let backend = Arc::clone(&self.context.store);
        let record = Record::Sensor(sensor.clone());
        match self.store_call(backend.put(record)).await {
            Ok(()) => {
                self.dirty.remove(&sensor.id);
            }
            Err(e) => {
                warn!(
                    slot = self.slot,
                    sensor_id = %sensor.id,
                    error = %e,
                    "Write-through failed, persistence deferred"
                );
                self.dirty.insert(sensor.id);
            }
        }
    }

    async fn put(&mut self, id: SensorId, timestamp: i64, value: f64) -> Result<Sensor> {
        let windows = self.context.windows.clone();
        let sensor = match self.lookup(id).await {
            Ok(Some(mut existing)) => {
                sensor::update(&mut existing, timestamp, value, &windows);
                existing
            }
            Ok(None) => sensor::new(id, timestamp, value, &windows),
            Err(e) => {
                // Unknown whether the store holds a copy; start from memory
                // and let the flush merge both sides.
                debug!(
                    slot = self.slot,
                    sensor_id = %id,
                    error = %e,
                    "Store read failed during put"
                );
                let fresh = sensor::new(id, timestamp, value, &windows);
                self.dirty.insert(id);
                self.cache(fresh.clone());
                return Ok(fresh);
            }
        };

        self.persist(&sensor).await;
        self.cache(sensor.clone());
        Ok(sensor)
    }

    async fn modify(&mut self, id: SensorId, change: impl FnOnce(&mut Sensor)) -> Result<()> {
        let mut sensor = match self.lookup(id).await {
            Ok(Some(sensor)) => sensor,
            Ok(None) => return Ok(()),
            Err(e) => return Err(ForecastError::StoreUnavailable(e)),
        };
        change(&mut sensor);
        self.persist(&sensor).await;
        self.cache(sensor);
        Ok(())
    }

    async fn delete(&mut self, id: SensorId) -> Result<()> {
        self.evict(&id);
        let backend = Arc::clone(&self.context.store);
        let key = id.to_string();
        self.store_call(backend.delete(RecordKind::Sensor, &key))
            .await
            .map_err(ForecastError::StoreUnavailable)
    }

    /// Merge every dirty sensor with its store copy and write the union
    async fn flush(&mut self) -> usize {
        let mut ids: Vec<SensorId> = self.dirty.iter().copied().collect();
        ids.sort();

        for id in ids {
            let Some(local) = self.sensors.get(&id).cloned() else {
                self.dirty.remove(&id);
                continue;
            };

            let backend = Arc::clone(&self.context.store);
            let key = id.to_string();
            let stored = match self.store_call(store::get_sensor(backend.as_ref(), &key)).await {
                Ok(stored) => stored,
                Err(_) => break,
            };

            let merged = match stored {
                Some(stored) => sensor::merge_all(&local, &stored, &self.context.windows),
                None => local,
            };
            if self.store_call(backend.put(Record::Sensor(merged.clone()))).await.is_err() {
                break;
            }
            self.dirty.remove(&id);
            self.sensors.insert(id, merged);
        }

        if !self.dirty.is_empty() {
            warn!(slot = self.slot, pending = self.dirty.len(), "Deferred writes still pending");
        }
        self.dirty.len()
    }

    async fn drain(&mut self, agent_count: usize) -> usize {
        self.flush().await;

        let balancer = LoadBalancer::new(agent_count);
        let leaving: Vec<SensorId> = self
            .sensors
            .keys()
            .filter(|id| balancer.route(id) != self.slot && !self.dirty.contains(id))
            .copied()
            .collect();
        for id in &leaving {
            self.evict(id);
        }

        debug!(slot = self.slot, evicted = leaving.len(), "Partition drained");
        leaving.len()
    }
}

impl Drop for Agent {
    fn drop(&mut self) {
        self.context
            .metrics
            .add_cached_sensors(-(self.sensors.len() as i64));
    }
}
