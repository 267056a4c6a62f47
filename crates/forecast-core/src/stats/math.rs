//! Statistics primitives
//!
//! Pure functions over finite ordered sequences. Everything the smoothing
//! and decomposition code needs is built from these.

use crate::error::{ForecastError, Result};

fn require(xs: &[f64], needed: usize) -> Result<()> {
    if xs.len() < needed {
        return Err(ForecastError::insufficient(needed, xs.len()));
    }
    Ok(())
}

pub fn mean(xs: &[f64]) -> Result<f64> {
    require(xs, 1)?;
    Ok(xs.iter().sum::<f64>() / xs.len() as f64)
}

/// Sum of squared deviations from the mean, without dividing by N
pub fn devsq(xs: &[f64]) -> Result<f64> {
    let m = mean(xs)?;
    Ok(xs.iter().map(|x| (x - m).powi(2)).sum())
}

/// Population variance (divides by N)
pub fn variance(xs: &[f64]) -> Result<f64> {
    Ok(devsq(xs)? / xs.len() as f64)
}

pub fn std(xs: &[f64]) -> Result<f64> {
    Ok(variance(xs)?.sqrt())
}

/// Simple moving average
///
/// Returns `len - window + 1` means of contiguous windows.
pub fn sma(xs: &[f64], window: usize) -> Result<Vec<f64>> {
    if window == 0 {
        return Err(ForecastError::insufficient(1, 0));
    }
    require(xs, window)?;

    let mut out = Vec::with_capacity(xs.len() - window + 1);
    let mut sum: f64 = xs[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..xs.len() {
        sum += xs[i] - xs[i - window];
        out.push(sum / window as f64);
    }
    Ok(out)
}

fn bounds(xs: &[f64]) -> Result<(f64, f64)> {
    require(xs, 1)?;
    let min = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok((min, max))
}

/// Min-max scales a series to [0, 1], returning the scaled series with
/// the bounds needed to invert it
pub fn normalize(xs: &[f64]) -> Result<(Vec<f64>, f64, f64)> {
    let (min, max) = bounds(xs)?;
    let scaled = xs
        .iter()
        .map(|&x| normalize_value(x, min, max))
        .collect::<Result<Vec<_>>>()?;
    Ok((scaled, min, max))
}

pub fn normalize_value(x: f64, min: f64, max: f64) -> Result<f64> {
    if min == max {
        return Err(ForecastError::ConstantSeries);
    }
    Ok((x - min) / (max - min))
}

/// Inverse of [`normalize_value`]
pub fn denormalize(x: f64, min: f64, max: f64) -> f64 {
    x * (max - min) + min
}

/// Ratio of the smaller to the larger of `x` and `y`
///
/// Two zeros are a perfect match (1.0).
pub fn percentage(x: f64, y: f64) -> Result<f64> {
    let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
    if hi == 0.0 {
        if lo == 0.0 {
            return Ok(1.0);
        }
        return Err(ForecastError::DivisionByZero);
    }
    Ok(lo / hi)
}

/// Finite difference `x[i] - x[i - lag]`, applied `order` times
pub fn difference(xs: &[f64], lag: usize, order: usize) -> Result<Vec<f64>> {
    let lag = lag.max(1);
    require(xs, lag * order + 1)?;

    let mut current = xs.to_vec();
    for _ in 0..order {
        current = current
            .iter()
            .skip(lag)
            .zip(current.iter())
            .map(|(later, earlier)| later - earlier)
            .collect();
    }
    Ok(current)
}
