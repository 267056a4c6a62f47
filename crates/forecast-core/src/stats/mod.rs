//! Forecasting engine algorithms
//!
//! This module provides:
//! - Statistics primitives (moments, moving average, min-max scaling)
//! - Exponential smoothing (simple, double, triple)
//! - Multiplicative trend/seasonality/noise decomposition
//! - Pairwise correlation

pub mod correlation;
pub mod decomposition;
pub mod math;
pub mod smoothing;

pub use correlation::{correlate, pearson, Correlation, PairCorrelation};
pub use decomposition::{decompose, Decomposition};
pub use smoothing::{
    double, simple, triple, DoubleSmoothing, SimpleSmoothing, SmoothingFit, TripleSmoothing,
};
