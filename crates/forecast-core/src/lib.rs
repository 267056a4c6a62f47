//! Sensor state management and forecasting
//!
//! This crate provides:
//! - Fixed-capacity per-sensor windows at three granularities
//! - A supervised pool of sharded agents caching sensors over a store
//! - A manager that promotes full windows to training and rebalances the pool
//! - Exponential smoothing forecasts with an uncertainty band
//! - Range alarms and cross-metric correlation
//! - Health checks and observability

pub mod config;
pub mod error;
pub mod health;
pub mod manager;
pub mod models;
pub mod observability;
pub mod pool;
pub mod predictor;
pub mod sensor;
pub mod service;
pub mod stats;
pub mod store;

pub use config::ForecastConfig;
pub use error::{ForecastError, Result, StoreError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ForecastMetrics, StructuredLogger};
pub use sensor::SensorId;
pub use service::ForecastService;
