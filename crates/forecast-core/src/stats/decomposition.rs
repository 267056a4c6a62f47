//! Multiplicative decomposition: `value = trend * seasonality * noise`
//!
//! Trend is a centered moving average over one seasonal period (a 2xp
//! average for even periods). Positions at the head and tail that the
//! average does not cover have no trend and therefore no noise.

use super::math::sma;
use crate::error::{ForecastError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub period: usize,
    pub trend: Vec<Option<f64>>,
    /// Seasonal factor at every input position
    pub seasonality: Vec<f64>,
    pub noise: Vec<Option<f64>>,
    /// One factor per position in the period, mean 1
    pub factors: Vec<f64>,
}

impl Decomposition {
    /// Seasonal factor for an arbitrary index, including future ones
    pub fn factor_at(&self, index: usize) -> f64 {
        self.factors[index % self.period]
    }
}

/// Minimum length for a centered moving average over `period`
pub fn min_samples(period: usize) -> usize {
    if period % 2 == 0 {
        period + 1
    } else {
        period
    }
}

/// Centered moving average aligned to the input index
pub fn trend(series: &[f64], period: usize) -> Result<Vec<Option<f64>>> {
    let period = period.max(1);
    let needed = min_samples(period);
    if series.len() < needed {
        return Err(ForecastError::insufficient(needed, series.len()));
    }

    let averaged = if period % 2 == 0 {
        sma(&sma(series, period)?, 2)?
    } else {
        sma(series, period)?
    };

    let offset = period / 2;
    let mut out = vec![None; series.len()];
    for (i, value) in averaged.into_iter().enumerate() {
        out[i + offset] = Some(value);
    }
    Ok(out)
}

pub fn decompose(series: &[f64], period: usize) -> Result<Decomposition> {
    let period = period.max(1);
    let trend = trend(series, period)?;

    let mut sums = vec![0.0; period];
    let mut counts = vec![0usize; period];
    for (i, (x, t)) in series.iter().zip(&trend).enumerate() {
        if let Some(t) = t.filter(|t| *t != 0.0) {
            sums[i % period] += x / t;
            counts[i % period] += 1;
        }
    }

    let mut factors: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(sum, &count)| if count == 0 { 1.0 } else { sum / count as f64 })
        .collect();

    let mean_factor = factors.iter().sum::<f64>() / period as f64;
    if mean_factor.is_finite() && mean_factor != 0.0 {
        for f in factors.iter_mut() {
            *f /= mean_factor;
        }
    }

    let seasonality: Vec<f64> = (0..series.len()).map(|i| factors[i % period]).collect();
    let noise = series
        .iter()
        .zip(&trend)
        .zip(&seasonality)
        .map(|((x, t), s)| match t {
            Some(t) if t * s != 0.0 => Some(x / (t * s)),
            _ => None,
        })
        .collect();

    Ok(Decomposition {
        period,
        trend,
        seasonality,
        noise,
        factors,
    })
}
