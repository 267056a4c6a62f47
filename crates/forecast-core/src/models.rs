//! Core data models shared by the pool, the manager and the store

use crate::sensor::SensorId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// A `(timestamp, value)` pair as held in a sensor window
pub type Sample = (i64, f64);

/// Granularity selector for sensor windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tag {
    Hourly,
    Daily,
    Weekly,
}

impl Tag {
    pub const ALL: [Tag; 3] = [Tag::Hourly, Tag::Daily, Tag::Weekly];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tag::Hourly => "hourly",
            Tag::Daily => "daily",
            Tag::Weekly => "weekly",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(Tag::Hourly),
            "daily" => Ok(Tag::Daily),
            "weekly" => Ok(Tag::Weekly),
            other => Err(format!(
                "unknown tag '{}', expected one of: hourly, daily, weekly",
                other
            )),
        }
    }
}

/// Forecast output: equal-length timestamps, point forecast and band
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub timestamps: Vec<i64>,
    pub values: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

impl Prediction {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Per-(node, metric) time series entity
///
/// Each window is newest-first with strictly decreasing timestamps and is
/// capped at the configured capacity for its tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    pub id: SensorId,
    #[serde(default)]
    pub hourly: Vec<Sample>,
    #[serde(default)]
    pub daily: Vec<Sample>,
    #[serde(default)]
    pub weekly: Vec<Sample>,
    #[serde(default)]
    pub predictions: BTreeMap<Tag, Prediction>,
}

impl Sensor {
    /// Sensor with empty windows and no predictions
    pub fn empty(id: SensorId) -> Self {
        Self {
            id,
            hourly: Vec::new(),
            daily: Vec::new(),
            weekly: Vec::new(),
            predictions: BTreeMap::new(),
        }
    }

    pub fn window(&self, tag: Tag) -> &[Sample] {
        match tag {
            Tag::Hourly => &self.hourly,
            Tag::Daily => &self.daily,
            Tag::Weekly => &self.weekly,
        }
    }

    pub fn window_mut(&mut self, tag: Tag) -> &mut Vec<Sample> {
        match tag {
            Tag::Hourly => &mut self.hourly,
            Tag::Daily => &mut self.daily,
            Tag::Weekly => &mut self.weekly,
        }
    }

    /// Window values in chronological order (oldest first)
    pub fn values(&self, tag: Tag) -> Vec<f64> {
        self.window(tag).iter().rev().map(|(_, v)| *v).collect()
    }

    /// Most recent sample of a window
    pub fn latest(&self, tag: Tag) -> Option<Sample> {
        self.window(tag).first().copied()
    }
}

/// Persisted coordinator state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub id: String,
    pub finished: BTreeSet<(SensorId, Tag)>,
    /// Sensor id to agent slot, as routed at the time of the snapshot
    pub hash_table: BTreeMap<SensorId, usize>,
    pub sensor_agents: usize,
    #[serde(default)]
    pub metrics: BTreeMap<String, BTreeSet<SensorId>>,
}

impl ManagerRecord {
    pub const ID: &'static str = "manager";
}

/// Trained predictor artifact for a (sensor, tag)
///
/// The core never looks inside `dataset`, `model` or `model_state`; those
/// belong to whichever predictor produced the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkModel {
    pub id: String,
    pub sensor_id: SensorId,
    pub tag: Tag,
    pub dataset: serde_json::Value,
    pub model: serde_json::Value,
    pub model_state: serde_json::Value,
    /// Hex SHA-256 over the serialized model and state
    #[serde(default)]
    pub checksum: String,
    pub trained_at: i64,
}

impl NetworkModel {
    /// Store key of the model trained for a (sensor, tag)
    pub fn model_id(sensor_id: &SensorId, tag: Tag) -> String {
        format!("{}-{}", sensor_id, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_parse_roundtrip() {
        for tag in Tag::ALL {
            assert_eq!(tag.as_str().parse::<Tag>().unwrap(), tag);
        }
        assert!("monthly".parse::<Tag>().is_err());
    }

    #[test]
    fn test_sensor_values_are_chronological() {
        let mut sensor = Sensor::empty(SensorId::new("node", "cpu"));
        sensor.hourly = vec![(180, 3.0), (120, 2.0), (60, 1.0)];

        assert_eq!(sensor.values(Tag::Hourly), vec![1.0, 2.0, 3.0]);
        assert_eq!(sensor.latest(Tag::Hourly), Some((180, 3.0)));
        assert!(sensor.values(Tag::Daily).is_empty());
    }

    #[test]
    fn test_sensor_record_json_shape() {
        let mut sensor = Sensor::empty(SensorId::new("node", "cpu"));
        sensor.hourly.push((60, 1.5));
        sensor.predictions.insert(Tag::Daily, Prediction::default());

        let json = serde_json::to_value(&sensor).unwrap();
        assert_eq!(json["hourly"][0][0], 60);
        assert!(json["predictions"]["daily"].is_object());

        let back: Sensor = serde_json::from_value(json).unwrap();
        assert_eq!(back, sensor);
    }
}
