//! Periodic manager passes: promotion, rebalance and persistence
//!
//! Each pass runs on its own timer and only takes snapshots, so foreground
//! traffic is never blocked. Membership checks are idempotent, which makes
//! an interrupted scan safe to resume on the next tick.

use super::Manager;
use crate::config::ForecastConfig;
use crate::error::{ForecastError, Result};
use crate::health::{components, HealthRegistry};
use crate::models::Tag;
use crate::observability::{ForecastMetrics, StructuredLogger};
use crate::pool::SensorPool;
use crate::predictor::trainer::{TrainingDispatch, TrainingRequest};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct Scheduler {
    manager: Arc<Manager>,
    pool: SensorPool,
    dispatch: Arc<dyn TrainingDispatch>,
    config: ForecastConfig,
    health: Arc<HealthRegistry>,
    metrics: ForecastMetrics,
    logger: StructuredLogger,
}

impl Scheduler {
    pub fn new(
        manager: Arc<Manager>,
        pool: SensorPool,
        dispatch: Arc<dyn TrainingDispatch>,
        config: ForecastConfig,
        health: Arc<HealthRegistry>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            manager,
            pool,
            dispatch,
            config,
            health,
            metrics: ForecastMetrics::new(),
            logger,
        }
    }

    /// Mark and dispatch every (sensor, tag) whose window reached its
    /// promotion threshold; returns how many were dispatched
    ///
    /// A refused dispatch is unmarked again so a later scan retries it.
    pub async fn promotion_scan(&self) -> usize {
        let mut promoted = 0;

        for sensor_id in self.manager.registered().await {
            let sensor = match self.pool.get(sensor_id).await {
                Ok(sensor) => sensor,
                Err(ForecastError::NotFound(_)) => continue,
                Err(e) => {
                    warn!(sensor_id = %sensor_id, error = %e, "Skipping sensor in promotion scan");
                    continue;
                }
            };

            for tag in Tag::ALL {
                let samples = sensor.window(tag).len();
                if samples < self.config.promotion_threshold_for(tag) {
                    continue;
                }
                if !self.manager.mark(sensor_id, tag).await {
                    continue;
                }

                if self.dispatch.dispatch(TrainingRequest { sensor_id, tag }) {
                    promoted += 1;
                    self.metrics.inc_promotions();
                    self.logger.log_promotion(&sensor_id, tag, samples);
                } else {
                    self.manager.unmark(sensor_id, tag).await;
                }
            }
        }

        if promoted > 0 {
            debug!(promoted, "Promotion scan complete");
        }
        promoted
    }

    /// Resize the pool when its slot count differs from the desired count
    ///
    /// Returns the number of sensors evicted by the drain, `None` when the
    /// pool already matched.
    pub async fn rebalance_scan(&self) -> Option<usize> {
        let desired = self.manager.desired_agents().await;
        let supervisor = self.pool.supervisor();
        let configured = supervisor.children().await;

        if configured != desired {
            let evicted = supervisor.resize(desired).await;
            info!(from = configured, to = desired, evicted, "Pool rebalanced");
            return Some(evicted);
        }

        let live = supervisor.active_children().await;
        if live != desired {
            // Crashed slots are restarted by the watchdog
            debug!(live, desired, "Agent restarts pending");
        }
        None
    }

    /// Flush deferred writes and save the manager record
    pub async fn persist(&self) -> Result<()> {
        let pending = self.pool.flush().await;
        if pending > 0 {
            warn!(pending, "Sensors still awaiting persistence");
        }

        let registered = self.manager.registered().await;
        let hash_table = self.pool.hash_table(&registered).await;
        match self.manager.persist(hash_table).await {
            Ok(()) => {
                self.health.set_healthy(components::MANAGER).await;
                Ok(())
            }
            Err(e) => {
                self.health
                    .set_degraded(components::MANAGER, format!("persist failed: {}", e))
                    .await;
                Err(e)
            }
        }
    }

    /// Start the three timers; they stop when the returned handles are
    /// stopped
    pub fn start(self: Arc<Self>) -> TimerHandles {
        let (shutdown, _) = broadcast::channel(1);
        let mut tasks = Vec::with_capacity(3);

        let scheduler = Arc::clone(&self);
        tasks.push(spawn_timer(
            "promotion",
            self.config.promotion_interval(),
            shutdown.subscribe(),
            move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    scheduler.promotion_scan().await;
                }
            },
        ));

        let scheduler = Arc::clone(&self);
        tasks.push(spawn_timer(
            "rebalance",
            self.config.rebalance_interval(),
            shutdown.subscribe(),
            move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    scheduler.rebalance_scan().await;
                }
            },
        ));

        let scheduler = Arc::clone(&self);
        tasks.push(spawn_timer(
            "persist",
            self.config.persist_interval(),
            shutdown.subscribe(),
            move || {
                let scheduler = Arc::clone(&scheduler);
                async move {
                    if let Err(e) = scheduler.persist().await {
                        warn!(error = %e, "Periodic persist failed");
                    }
                }
            },
        ));

        TimerHandles { shutdown, tasks }
    }
}

fn spawn_timer<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut pass: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        info!(timer = name, interval_secs = period.as_secs(), "Starting manager timer");
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    pass().await;
                }
                _ = shutdown.recv() => {
                    debug!(timer = name, "Manager timer stopped");
                    break;
                }
            }
        }
    })
}

/// Running manager timers
pub struct TimerHandles {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl TimerHandles {
    /// Signal every timer and wait for in-flight passes to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Manager timer ended abnormally");
            }
        }
    }
}
