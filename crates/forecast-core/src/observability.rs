//! Observability infrastructure for the forecasting service
//!
//! Provides:
//! - Prometheus metrics (feed/prediction latency, pool and store counters)
//! - Structured JSON logging of domain events with tracing

use crate::models::Tag;
use crate::sensor::SensorId;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ForecastMetricsInner> = OnceLock::new();

struct ForecastMetricsInner {
    feed_latency_seconds: Histogram,
    prediction_latency_seconds: Histogram,
    samples_ingested: IntCounter,
    predictions_served: IntCounterVec,
    agent_restarts: IntCounter,
    store_failures: IntCounter,
    promotions: IntCounter,
    models_trained: IntCounter,
    training_failures: IntCounter,
    live_agents: IntGauge,
    cached_sensors: IntGauge,
}

impl ForecastMetricsInner {
    fn new() -> Self {
        Self {
            feed_latency_seconds: register_histogram!(
                "forecaster_feed_latency_seconds",
                "Time spent applying a sample to its sensor, including write-through",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register feed_latency_seconds"),

            prediction_latency_seconds: register_histogram!(
                "forecaster_prediction_latency_seconds",
                "Time spent producing a forecast",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register prediction_latency_seconds"),

            samples_ingested: register_int_counter!(
                "forecaster_samples_ingested_total",
                "Total number of samples fed to sensors"
            )
            .expect("Failed to register samples_ingested"),

            predictions_served: register_int_counter_vec!(
                "forecaster_predictions_served_total",
                "Total number of forecasts served, by method",
                &["method"]
            )
            .expect("Failed to register predictions_served"),

            agent_restarts: register_int_counter!(
                "forecaster_agent_restarts_total",
                "Total number of agent slots restarted after a crash"
            )
            .expect("Failed to register agent_restarts"),

            store_failures: register_int_counter!(
                "forecaster_store_failures_total",
                "Total number of store operations that failed or timed out"
            )
            .expect("Failed to register store_failures"),

            promotions: register_int_counter!(
                "forecaster_promotions_total",
                "Total number of (sensor, tag) pairs promoted for training"
            )
            .expect("Failed to register promotions"),

            models_trained: register_int_counter!(
                "forecaster_models_trained_total",
                "Total number of model artifacts saved"
            )
            .expect("Failed to register models_trained"),

            training_failures: register_int_counter!(
                "forecaster_training_failures_total",
                "Total number of training runs that diverged or failed"
            )
            .expect("Failed to register training_failures"),

            live_agents: register_int_gauge!(
                "forecaster_live_agents",
                "Number of agent slots currently running"
            )
            .expect("Failed to register live_agents"),

            cached_sensors: register_int_gauge!(
                "forecaster_cached_sensors",
                "Number of sensors held in agent memory"
            )
            .expect("Failed to register cached_sensors"),
        }
    }
}

/// Forecaster metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ForecastMetrics {
    _private: (),
}

impl Default for ForecastMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ForecastMetricsInner {
        GLOBAL_METRICS.get_or_init(ForecastMetricsInner::new)
    }

    pub fn observe_feed_latency(&self, duration_secs: f64) {
        self.inner().feed_latency_seconds.observe(duration_secs);
        self.inner().samples_ingested.inc();
    }

    pub fn observe_prediction_latency(&self, duration_secs: f64) {
        self.inner().prediction_latency_seconds.observe(duration_secs);
    }

    pub fn inc_predictions_served(&self, method: &str) {
        self.inner()
            .predictions_served
            .with_label_values(&[method])
            .inc();
    }

    pub fn inc_agent_restarts(&self) {
        self.inner().agent_restarts.inc();
    }

    pub fn inc_store_failures(&self) {
        self.inner().store_failures.inc();
    }

    pub fn inc_promotions(&self) {
        self.inner().promotions.inc();
    }

    pub fn inc_models_trained(&self) {
        self.inner().models_trained.inc();
    }

    pub fn inc_training_failures(&self) {
        self.inner().training_failures.inc();
    }

    pub fn set_live_agents(&self, count: i64) {
        self.inner().live_agents.set(count);
    }

    pub fn add_cached_sensors(&self, delta: i64) {
        self.inner().cached_sensors.add(delta);
    }
}

/// Structured logger for domain events
///
/// Every event carries a stable `event` field so log pipelines can filter
/// on it.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, agent_count: usize) {
        info!(
            event = "service_started",
            instance = %self.instance,
            version = %version,
            agent_count = agent_count,
            "Forecasting service started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Forecasting service shutting down"
        );
    }

    pub fn log_promotion(&self, sensor_id: &SensorId, tag: Tag, samples: usize) {
        info!(
            event = "sensor_promoted",
            instance = %self.instance,
            sensor_id = %sensor_id,
            tag = %tag,
            samples = samples,
            "Sensor window ready to train"
        );
    }

    pub fn log_model_trained(
        &self,
        sensor_id: &SensorId,
        tag: Tag,
        predictor: &str,
        model_id: &str,
    ) {
        info!(
            event = "model_trained",
            instance = %self.instance,
            sensor_id = %sensor_id,
            tag = %tag,
            predictor = %predictor,
            model_id = %model_id,
            "Model artifact saved"
        );
    }

    pub fn log_training_failed(&self, sensor_id: &SensorId, tag: Tag, reason: &str) {
        warn!(
            event = "training_failed",
            instance = %self.instance,
            sensor_id = %sensor_id,
            tag = %tag,
            reason = %reason,
            "Training failed, simple predictions remain in use"
        );
    }

    pub fn log_agent_restart(&self, slot: usize, generation: u64, panicked: bool) {
        warn!(
            event = "agent_restarted",
            instance = %self.instance,
            slot = slot,
            generation = generation,
            panicked = panicked,
            "Agent slot restarted with empty state"
        );
    }

    pub fn log_crash_loop(&self, slot: usize, restarts: usize, window_secs: u64) {
        error!(
            event = "agent_crash_loop",
            instance = %self.instance,
            slot = slot,
            restarts = restarts,
            window_secs = window_secs,
            "Agent slot keeps crashing"
        );
    }

    pub fn log_store_status(&self, slot: usize, available: bool, reason: &str) {
        if available {
            info!(
                event = "store_recovered",
                instance = %self.instance,
                slot = slot,
                "Store reachable again, deferred writes will be flushed"
            );
        } else {
            warn!(
                event = "store_degraded",
                instance = %self.instance,
                slot = slot,
                reason = %reason,
                "Store unavailable, continuing memory-only"
            );
        }
    }
}
