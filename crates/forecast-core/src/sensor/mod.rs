//! Sensor entity logic
//!
//! Pure functions over [`Sensor`] records. Each tag only accepts a sample
//! once its spacing has elapsed since the window's newest sample, so a
//! feed every minute fills the hourly window and every fifth one the daily
//! window.

mod id;

pub use id::SensorId;

use crate::config::{WindowConfig, WindowsConfig};
use crate::models::{Sample, Sensor, Tag};
use std::collections::BTreeMap;

/// Whether a window takes a sample at `timestamp`
pub fn accepts(window: &[Sample], timestamp: i64, config: &WindowConfig) -> bool {
    match window.first() {
        None => true,
        Some((head, _)) => timestamp - head >= config.spacing_secs,
    }
}

/// Builds a sensor from its first sample
pub fn new(id: SensorId, timestamp: i64, value: f64, windows: &WindowsConfig) -> Sensor {
    let mut sensor = Sensor::empty(id);
    update(&mut sensor, timestamp, value, windows);
    sensor
}

/// Prepends the sample to every window whose cadence it satisfies and
/// truncates to capacity. Returns the tags that took the sample.
pub fn update(
    sensor: &mut Sensor,
    timestamp: i64,
    value: f64,
    windows: &WindowsConfig,
) -> Vec<Tag> {
    let mut accepted = Vec::with_capacity(Tag::ALL.len());
    for tag in Tag::ALL {
        let config = windows.get(tag);
        let window = sensor.window_mut(tag);
        if !accepts(window, timestamp, config) {
            continue;
        }
        window.insert(0, (timestamp, value));
        window.truncate(config.capacity);
        accepted.push(tag);
    }
    accepted
}

/// Empties one window, typically after its data was consumed by training
pub fn reset(sensor: &mut Sensor, tag: Tag) {
    sensor.window_mut(tag).clear();
}

/// Union of two copies of the same window, newest first, truncated to
/// `capacity`
///
/// On a duplicate timestamp the value from the copy holding more samples
/// for that tag wins; `a` wins ties.
pub fn merge(a: &Sensor, b: &Sensor, tag: Tag, capacity: usize) -> Vec<Sample> {
    let (primary, secondary) = if b.window(tag).len() > a.window(tag).len() {
        (b, a)
    } else {
        (a, b)
    };

    let mut by_timestamp: BTreeMap<i64, f64> = secondary.window(tag).iter().copied().collect();
    by_timestamp.extend(primary.window(tag).iter().copied());

    by_timestamp
        .into_iter()
        .rev()
        .take(capacity)
        .collect()
}

/// Merges every window and the prediction cache of two diverged copies
///
/// `a` is the authoritative copy for predictions.
pub fn merge_all(a: &Sensor, b: &Sensor, windows: &WindowsConfig) -> Sensor {
    let mut merged = Sensor::empty(a.id);
    for tag in Tag::ALL {
        *merged.window_mut(tag) = merge(a, b, tag, windows.get(tag).capacity);
    }
    merged.predictions = b.predictions.clone();
    merged.predictions.extend(a.predictions.clone());
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Prediction;

    fn windows() -> WindowsConfig {
        WindowsConfig::default()
    }

    fn id() -> SensorId {
        SensorId::new("n1", "s1")
    }

    #[test]
    fn test_new_fills_every_empty_window() {
        let sensor = new(id(), 1_000, 5.0, &windows());
        assert_eq!(sensor.hourly, vec![(1_000, 5.0)]);
        assert_eq!(sensor.daily, vec![(1_000, 5.0)]);
        assert_eq!(sensor.weekly, vec![(1_000, 5.0)]);
        assert!(sensor.predictions.is_empty());
    }

    #[test]
    fn test_update_prepends_newest_first() {
        let t = 1_642_433_780;
        let mut sensor = new(id(), t, 5.0, &windows());
        let accepted = update(&mut sensor, t + 60, 7.0, &windows());

        assert_eq!(accepted, vec![Tag::Hourly]);
        assert_eq!(sensor.hourly, vec![(t + 60, 7.0), (t, 5.0)]);
        assert_eq!(sensor.daily, vec![(t, 5.0)]);
    }

    #[test]
    fn test_update_respects_cadence() {
        let mut sensor = new(id(), 0, 1.0, &windows());
        for minute in 1..=15 {
            update(&mut sensor, minute * 60, minute as f64, &windows());
        }
        assert_eq!(sensor.hourly.len(), 16);
        // 0, 300, 600, 900
        assert_eq!(sensor.daily.len(), 4);
        // 0, 900
        assert_eq!(sensor.weekly.len(), 2);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let mut sensor = new(id(), 600, 1.0, &windows());
        let accepted = update(&mut sensor, 540, 2.0, &windows());
        assert!(accepted.is_empty());
        assert_eq!(sensor.hourly.len(), 1);
    }

    #[test]
    fn test_update_never_exceeds_capacity() {
        let config = windows();
        let mut sensor = new(id(), 0, 0.0, &config);
        for i in 1..2_000i64 {
            update(&mut sensor, i * 60, i as f64, &config);
            for tag in Tag::ALL {
                assert!(sensor.window(tag).len() <= config.get(tag).capacity);
            }
        }
        assert_eq!(sensor.hourly.len(), 60);
        assert_eq!(sensor.daily.len(), 96);
        assert_eq!(sensor.weekly.len(), 134);
    }

    #[test]
    fn test_sixty_one_samples_evict_oldest() {
        let config = windows();
        let mut sensor = new(id(), 0, 0.0, &config);
        for i in 1..61i64 {
            update(&mut sensor, i * 60, i as f64, &config);
        }
        assert_eq!(sensor.hourly.len(), 60);
        assert_eq!(sensor.hourly.first(), Some(&(3_600, 60.0)));
        assert_eq!(sensor.hourly.last(), Some(&(60, 1.0)));
    }

    #[test]
    fn test_reset_empties_only_that_tag() {
        let mut sensor = new(id(), 0, 1.0, &windows());
        reset(&mut sensor, Tag::Daily);
        assert!(sensor.daily.is_empty());
        assert_eq!(sensor.hourly.len(), 1);
    }

    #[test]
    fn test_merge_unions_and_prefers_longer_side() {
        let mut a = Sensor::empty(id());
        a.hourly = vec![(300, 3.0), (240, 2.0)];
        let mut b = Sensor::empty(id());
        b.hourly = vec![(240, 20.0), (180, 1.0), (120, 0.5)];

        let merged = merge(&a, &b, Tag::Hourly, 60);
        assert_eq!(merged, vec![(300, 3.0), (240, 20.0), (180, 1.0), (120, 0.5)]);

        let capped = merge(&a, &b, Tag::Hourly, 2);
        assert_eq!(capped, vec![(300, 3.0), (240, 20.0)]);
    }

    #[test]
    fn test_merge_all_keeps_primary_predictions() {
        let mut a = Sensor::empty(id());
        a.predictions.insert(
            Tag::Hourly,
            Prediction {
                values: vec![1.0],
                ..Default::default()
            },
        );
        let mut b = Sensor::empty(id());
        b.predictions.insert(Tag::Hourly, Prediction::default());
        b.predictions.insert(Tag::Weekly, Prediction::default());
        b.weekly = vec![(900, 4.0)];

        let merged = merge_all(&a, &b, &windows());
        assert_eq!(merged.predictions[&Tag::Hourly].values, vec![1.0]);
        assert!(merged.predictions.contains_key(&Tag::Weekly));
        assert_eq!(merged.weekly, vec![(900, 4.0)]);
    }
}
