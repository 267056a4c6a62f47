//! Training dispatch and the worker that consumes it
//!
//! The manager's promotion scan hands (sensor, tag) pairs to a
//! [`TrainingDispatch`]. The bundled [`TrainingWorker`] drains a bounded
//! channel, trains with the installed predictor off the async runtime,
//! saves the artifact and resets the consumed window.

use super::Predictor;
use crate::error::{ForecastError, Result, StoreError};
use crate::health::{components, HealthRegistry};
use crate::manager::Manager;
use crate::models::{NetworkModel, Tag};
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::pool::SensorPool;
use crate::sensor::SensorId;
use crate::store::{Record, Store};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingRequest {
    pub sensor_id: SensorId,
    pub tag: Tag,
}

/// Hook the promotion scan signals when a window is ready to train
pub trait TrainingDispatch: Send + Sync {
    /// Queue a request; `false` when it cannot be accepted right now
    fn dispatch(&self, request: TrainingRequest) -> bool;
}

/// Dispatch into a bounded channel, refusing when it is full
#[derive(Clone)]
pub struct ChannelDispatch {
    sender: mpsc::Sender<TrainingRequest>,
}

impl TrainingDispatch for ChannelDispatch {
    fn dispatch(&self, request: TrainingRequest) -> bool {
        match self.sender.try_send(request) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    sensor_id = %request.sensor_id,
                    tag = %request.tag,
                    error = %e,
                    "Training request refused"
                );
                false
            }
        }
    }
}

pub fn channel(capacity: usize) -> (ChannelDispatch, mpsc::Receiver<TrainingRequest>) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (ChannelDispatch { sender }, receiver)
}

pub struct TrainingWorker {
    pool: SensorPool,
    store: Arc<dyn Store>,
    manager: Arc<Manager>,
    predictor: Arc<dyn Predictor>,
    health: Arc<HealthRegistry>,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
    store_timeout: Duration,
}

impl TrainingWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SensorPool,
        store: Arc<dyn Store>,
        manager: Arc<Manager>,
        predictor: Arc<dyn Predictor>,
        health: Arc<HealthRegistry>,
        logger: StructuredLogger,
        store_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            manager,
            predictor,
            health,
            metrics: ForecastMetrics::new(),
            logger,
            store_timeout,
        }
    }

    /// Consume requests until the channel closes or shutdown fires
    pub async fn run(
        self,
        mut requests: mpsc::Receiver<TrainingRequest>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!(predictor = %self.predictor.name(), "Starting training worker");
        self.health.set_healthy(components::TRAINER).await;

        loop {
            tokio::select! {
                request = requests.recv() => {
                    let Some(request) = request else { break };
                    if let Err(e) = self.train(request).await {
                        debug!(
                            sensor_id = %request.sensor_id,
                            tag = %request.tag,
                            error = %e,
                            "Training request finished without a model"
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Training worker shutting down");
                    break;
                }
            }
        }
    }

    /// Train one (sensor, tag)
    ///
    /// `Ok(None)` means the window is constant and no model is needed; the
    /// pair stays marked. Any other failure unmarks the pair so a later scan
    /// can retry.
    pub async fn train(&self, request: TrainingRequest) -> Result<Option<NetworkModel>> {
        let TrainingRequest { sensor_id, tag } = request;

        let sensor = match self.pool.get(sensor_id).await {
            Ok(sensor) => sensor,
            Err(e) => {
                self.manager.unmark(sensor_id, tag).await;
                return Err(e);
            }
        };

        let predictor = Arc::clone(&self.predictor);
        let trained = tokio::task::spawn_blocking(move || predictor.train(&sensor, tag))
            .await
            .unwrap_or_else(|e| {
                Err(ForecastError::InvalidModel(format!(
                    "training task failed: {}",
                    e
                )))
            });

        let model = match trained {
            Ok(model) => model,
            Err(ForecastError::ConstantSeries) => {
                debug!(
                    sensor_id = %sensor_id,
                    tag = %tag,
                    "Constant window, simple prediction is exact"
                );
                return Ok(None);
            }
            Err(e) => {
                self.manager.unmark(sensor_id, tag).await;
                self.metrics.inc_training_failures();
                self.logger.log_training_failed(&sensor_id, tag, &e.to_string());
                return Err(e);
            }
        };

        let saved = match tokio::time::timeout(
            self.store_timeout,
            self.store.put(Record::NetworkModel(model.clone())),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout),
        };
        if let Err(e) = saved {
            self.manager.unmark(sensor_id, tag).await;
            self.metrics.inc_training_failures();
            self.health
                .set_degraded(components::TRAINER, format!("model save failed: {}", e))
                .await;
            return Err(e.into());
        }
        self.health.set_healthy(components::TRAINER).await;

        if let Err(e) = self.pool.reset(sensor_id, tag).await {
            warn!(
                sensor_id = %sensor_id,
                tag = %tag,
                error = %e,
                "Window reset after training failed"
            );
        }

        self.metrics.inc_models_trained();
        self.logger
            .log_model_trained(&sensor_id, tag, self.predictor.name(), &model.id);
        Ok(Some(model))
    }
}
