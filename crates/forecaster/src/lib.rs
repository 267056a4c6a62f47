//! Process wiring for the forecasting service: configuration and the
//! health/metrics HTTP surface

pub mod api;
pub mod config;
