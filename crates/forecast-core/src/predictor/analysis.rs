//! Range alarms and cross-metric correlation for a node's sensors

use crate::error::{ForecastError, Result};
use crate::models::{Prediction, Sample, Tag};
use crate::sensor::SensorId;
use crate::stats::{correlate, math, Correlation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Where the latest observed value sits against the expected band
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeStatus {
    Above,
    Below,
    Within,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeCheck {
    pub status: RangeStatus,
    pub value: f64,
    pub upper: f64,
    pub lower: f64,
    /// `1 - percentage(|value|, |bound|)` for the crossed bound, 0 within
    pub deviation: f64,
}

impl RangeCheck {
    pub fn message(&self) -> String {
        match self.status {
            RangeStatus::Above => format!(
                "Current value is higher than expected prediction range by {:.2}%",
                self.deviation * 100.0
            ),
            RangeStatus::Below => format!(
                "Current value is lower than expected prediction range by {:.2}%",
                self.deviation * 100.0
            ),
            RangeStatus::Within => "Current value is within expected prediction range".to_string(),
        }
    }
}

/// Compare `value` with the first step of a prediction's band
///
/// `None` when the prediction holds no points.
pub fn check_range(value: f64, prediction: &Prediction) -> Result<Option<RangeCheck>> {
    let (Some(&upper), Some(&lower)) = (prediction.upper.first(), prediction.lower.first()) else {
        return Ok(None);
    };

    let (status, bound) = if value > upper {
        (RangeStatus::Above, upper)
    } else if value < lower {
        (RangeStatus::Below, lower)
    } else {
        (RangeStatus::Within, value)
    };
    let deviation = 1.0 - math::percentage(value.abs(), bound.abs())?;

    Ok(Some(RangeCheck {
        status,
        value,
        upper,
        lower,
        deviation,
    }))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAnalysis {
    pub left: SensorId,
    pub right: SensorId,
    pub coefficient: f64,
    pub classification: Correlation,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub sensor_id: SensorId,
    pub tag: Tag,
    pub range: Option<RangeCheck>,
    pub pairs: Vec<PairAnalysis>,
}

fn explain(classification: Correlation, status: Option<RangeStatus>) -> &'static str {
    match (classification, status) {
        (Correlation::Uncorrelated, _) => "uncorrelated",
        (Correlation::Positive, Some(RangeStatus::Above)) => {
            "current value exceeds expected range, correlated metric rises with it"
        }
        (Correlation::Positive, Some(RangeStatus::Below)) => {
            "current value below expected range, correlated metric falls with it"
        }
        (Correlation::Negative, Some(RangeStatus::Above)) => {
            "current value exceeds expected range, inversely correlated metric falls"
        }
        (Correlation::Negative, Some(RangeStatus::Below)) => {
            "current value below expected range, inversely correlated metric rises"
        }
        (Correlation::Positive, _) => "positively correlated",
        (Correlation::Negative, _) => "negatively correlated",
    }
}

/// Values at the timestamps every window shares, oldest first
///
/// Windows are stored newest first; the output is chronological so the
/// series line up position by position.
pub fn align(windows: &[&[Sample]]) -> Vec<Vec<f64>> {
    let Some(first) = windows.first() else {
        return Vec::new();
    };

    let mut shared: BTreeSet<i64> = first.iter().map(|(t, _)| *t).collect();
    for samples in &windows[1..] {
        let present: BTreeSet<i64> = samples.iter().map(|(t, _)| *t).collect();
        shared = shared.intersection(&present).copied().collect();
    }

    windows
        .iter()
        .map(|samples| {
            let mut aligned: Vec<Sample> = samples
                .iter()
                .filter(|(t, _)| shared.contains(t))
                .copied()
                .collect();
            aligned.sort_by_key(|(t, _)| *t);
            aligned.dedup_by_key(|(t, _)| *t);
            aligned.into_iter().map(|(_, v)| v).collect()
        })
        .collect()
}

/// Correlation of two windows over the timestamps they share
///
/// Fewer than two shared points carry no signal and classify as
/// uncorrelated.
fn correlate_pair(
    left: &[Sample],
    right: &[Sample],
    threshold: f64,
) -> Result<(f64, Correlation)> {
    let aligned = align(&[left, right]);
    if aligned[0].len() < 2 {
        return Ok((0.0, Correlation::Uncorrelated));
    }
    let pair = correlate(&aligned, threshold)?
        .into_iter()
        .next()
        .map(|pair| (pair.coefficient, pair.classification))
        .unwrap_or((0.0, Correlation::Uncorrelated));
    Ok(pair)
}

/// Correlate every pair in `bundle` and check the subject's latest value
/// against its cached band
pub fn analyse(
    sensor_id: SensorId,
    tag: Tag,
    bundle: &[(SensorId, Vec<Sample>)],
    latest: Option<f64>,
    prediction: Option<&Prediction>,
    threshold: f64,
) -> Result<Analysis> {
    if bundle.len() < 2 {
        return Err(ForecastError::insufficient(2, bundle.len()));
    }

    let range = match (latest, prediction) {
        (Some(value), Some(prediction)) => check_range(value, prediction)?,
        _ => None,
    };
    let status = range.as_ref().map(|r| r.status);

    let mut pairs = Vec::with_capacity(bundle.len() * (bundle.len() - 1) / 2);
    for (i, (left, left_window)) in bundle.iter().enumerate() {
        for (right, right_window) in &bundle[i + 1..] {
            let (coefficient, classification) =
                correlate_pair(left_window, right_window, threshold)?;
            pairs.push(PairAnalysis {
                left: *left,
                right: *right,
                coefficient,
                classification,
                explanation: explain(classification, status).to_string(),
            });
        }
    }

    Ok(Analysis {
        sensor_id,
        tag,
        range,
        pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn band(value: f64, spread: f64) -> Prediction {
        Prediction {
            timestamps: vec![60],
            values: vec![value],
            upper: vec![value + spread],
            lower: vec![value - spread],
        }
    }

    fn series(values: &[f64]) -> Vec<Sample> {
        // newest first, like a window
        values
            .iter()
            .enumerate()
            .rev()
            .map(|(i, v)| (i as i64 * 60, *v))
            .collect()
    }

    #[test]
    fn test_range_above_reports_ratio() {
        let check = check_range(12.0, &band(8.0, 2.0)).unwrap().unwrap();
        assert_eq!(check.status, RangeStatus::Above);
        assert!((check.deviation - (1.0 - 10.0 / 12.0)).abs() < 1e-12);
        assert_eq!(
            check.message(),
            "Current value is higher than expected prediction range by 16.67%"
        );
    }

    #[test]
    fn test_range_below_and_within() {
        let below = check_range(4.0, &band(8.0, 2.0)).unwrap().unwrap();
        assert_eq!(below.status, RangeStatus::Below);
        assert!((below.deviation - (1.0 - 4.0 / 6.0)).abs() < 1e-12);

        let within = check_range(9.0, &band(8.0, 2.0)).unwrap().unwrap();
        assert_eq!(within.status, RangeStatus::Within);
        assert_eq!(within.deviation, 0.0);

        assert!(check_range(1.0, &Prediction::default()).unwrap().is_none());
    }

    #[test]
    fn test_align_intersects_and_orders() {
        let a = [(180, 4.0), (120, 3.0), (60, 2.0)];
        let b = [(240, 9.0), (120, 30.0), (60, 20.0)];
        assert_eq!(align(&[&a[..], &b[..]]), vec![vec![2.0, 3.0], vec![20.0, 30.0]]);
    }

    #[test]
    fn test_analyse_classifies_pairs_and_explains() {
        let cpu = SensorId::new("n1", "cpu");
        let load = SensorId::new("n1", "load");
        let idle = SensorId::new("n1", "idle");
        let base = [1.0, 4.0, 2.0, 8.0, 5.0, 7.0, 3.0, 6.0];
        let bundle = vec![
            (cpu, series(&base)),
            (load, series(&base.map(|x| x * 2.0 + 1.0))),
            (idle, series(&base.map(|x| 10.0 - x))),
        ];

        let analysis = analyse(cpu, Tag::Hourly, &bundle, Some(12.0), Some(&band(8.0, 2.0)), 0.7)
            .unwrap();
        assert_eq!(analysis.range.as_ref().unwrap().status, RangeStatus::Above);
        assert_eq!(analysis.pairs.len(), 3);

        let cpu_load = &analysis.pairs[0];
        assert_eq!((cpu_load.left, cpu_load.right), (cpu, load));
        assert_eq!(cpu_load.classification, Correlation::Positive);
        assert!(cpu_load.explanation.starts_with("current value exceeds expected range"));

        let cpu_idle = &analysis.pairs[1];
        assert_eq!(cpu_idle.classification, Correlation::Negative);
    }

    #[test]
    fn test_pairs_align_independently() {
        let cpu = SensorId::new("n1", "cpu");
        let load = SensorId::new("n1", "load");
        let disk = SensorId::new("n1", "disk");
        let base = [1.0, 4.0, 2.0, 8.0, 5.0, 7.0];
        let bundle = vec![
            (cpu, series(&base)),
            (load, series(&base.map(|x| x * 3.0))),
            // Scraped at an offset, shares no timestamp with the others
            (disk, vec![(330, 1.0)]),
        ];

        let analysis = analyse(cpu, Tag::Hourly, &bundle, None, None, 0.7).unwrap();
        assert_eq!(analysis.pairs.len(), 3);
        assert_eq!(analysis.pairs[0].classification, Correlation::Positive);
        for pair in &analysis.pairs[1..] {
            assert_eq!(pair.right, disk);
            assert_eq!(pair.classification, Correlation::Uncorrelated);
            assert_eq!(pair.coefficient, 0.0);
        }
    }

    #[test]
    fn test_analyse_needs_two_series() {
        let cpu = SensorId::new("n1", "cpu");
        let result = analyse(cpu, Tag::Daily, &[(cpu, series(&[1.0, 2.0]))], None, None, 0.7);
        assert!(matches!(result, Err(ForecastError::InsufficientData { needed: 2, have: 1 })));
    }
}
