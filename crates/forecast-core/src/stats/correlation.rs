//! Pairwise Pearson correlation between aligned sample series

use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};

/// Default |r| above which two series count as correlated
pub const DEFAULT_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Correlation {
    Positive,
    Negative,
    Uncorrelated,
}

impl Correlation {
    pub fn classify(coefficient: f64, threshold: f64) -> Self {
        if coefficient > threshold {
            Correlation::Positive
        } else if coefficient < -threshold {
            Correlation::Negative
        } else {
            Correlation::Uncorrelated
        }
    }

    pub fn is_correlated(&self) -> bool {
        !matches!(self, Correlation::Uncorrelated)
    }
}

/// Correlation between series `left` and `right` of the input
#[derive(Debug, Clone, PartialEq)]
pub struct PairCorrelation {
    pub left: usize,
    pub right: usize,
    pub coefficient: f64,
    pub classification: Correlation,
}

/// Pearson coefficient of two equal-length series
///
/// A series with no variance correlates with nothing (0.0).
pub fn pearson(a: &[f64], b: &[f64]) -> Result<f64> {
    if a.len() != b.len() {
        return Err(ForecastError::LengthMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    if a.len() < 2 {
        return Err(ForecastError::insufficient(2, a.len()));
    }

    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    let denom = (var_a * var_b).sqrt();
    if denom < 1e-12 {
        return Ok(0.0);
    }
    Ok((cov / denom).clamp(-1.0, 1.0))
}

/// Correlates every pair of the given aligned series
pub fn correlate(series: &[Vec<f64>], threshold: f64) -> Result<Vec<PairCorrelation>> {
    if series.len() < 2 {
        return Err(ForecastError::insufficient(2, series.len()));
    }

    let mut pairs = Vec::with_capacity(series.len() * (series.len() - 1) / 2);
    for i in 0..series.len() {
        for j in (i + 1)..series.len() {
            let coefficient = pearson(&series[i], &series[j])?;
            pairs.push(PairCorrelation {
                left: i,
                right: j,
                coefficient,
                classification: Correlation::classify(coefficient, threshold),
            });
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// xorshift64*, enough for reproducible noise
    fn noise(seed: u64, len: usize) -> Vec<f64> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state ^= state >> 12;
                state ^= state << 25;
                state ^= state >> 27;
                let bits = state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
                bits as f64 / (1u64 << 53) as f64 - 0.5
            })
            .collect()
    }

    #[test]
    fn test_identical_series_positive() {
        let a = noise(7, 200);
        let pairs = correlate(&[a.clone(), a], DEFAULT_THRESHOLD).unwrap();
        assert_eq!(pairs.len(), 1);
        assert!((pairs[0].coefficient - 1.0).abs() < 1e-12);
        assert_eq!(pairs[0].classification, Correlation::Positive);
    }

    #[test]
    fn test_negated_series_negative() {
        let a = noise(11, 200);
        let b: Vec<f64> = a.iter().map(|x| -x).collect();
        let pairs = correlate(&[a, b], DEFAULT_THRESHOLD).unwrap();
        assert_eq!(pairs[0].classification, Correlation::Negative);
    }

    #[test]
    fn test_independent_series_uncorrelated() {
        for seed in 1..=10u64 {
            let a = noise(seed, 2_000);
            let b = noise(seed * 7_919 + 13, 2_000);
            let r = pearson(&a, &b).unwrap();
            assert_eq!(
                Correlation::classify(r, DEFAULT_THRESHOLD),
                Correlation::Uncorrelated,
                "seed {} gave r = {}",
                seed,
                r
            );
        }
    }

    #[test]
    fn test_all_pairs_enumerated() {
        let base = noise(3, 50);
        let series = vec![base.clone(), base.clone(), base.iter().map(|x| x * 2.0).collect()];
        let pairs = correlate(&series, 0.7).unwrap();
        let indices: Vec<(usize, usize)> = pairs.iter().map(|p| (p.left, p.right)).collect();
        assert_eq!(indices, vec![(0, 1), (0, 2), (1, 2)]);
    }

    #[test]
    fn test_constant_series_uncorrelated() {
        let r = pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(matches!(
            pearson(&[1.0, 2.0], &[1.0]),
            Err(ForecastError::LengthMismatch { expected: 2, got: 1 })
        ));
        assert!(correlate(&[vec![1.0, 2.0]], 0.7).is_err());
    }
}
