//! Stable sensor identity

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of a (node, metric) pair
///
/// A UUID v5, so the same pair maps to the same id across restarts. The id
/// is also the store's primary key for the sensor record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorId(Uuid);

impl SensorId {
    pub fn new(node: &str, metric: &str) -> Self {
        // Length prefix keeps ("ab", "c") and ("a", "bc") apart
        let name = format!("{}:{}{}", node.len(), node, metric);
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SensorId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_deterministic() {
        assert_eq!(SensorId::new("node", "sensor"), SensorId::new("node", "sensor"));
        assert_ne!(SensorId::new("node", "sensor"), SensorId::new("node", "other"));
        assert_ne!(SensorId::new("ab", "c"), SensorId::new("a", "bc"));
    }

    #[test]
    fn test_id_string_roundtrip() {
        let id = SensorId::new("n1", "s1");
        let parsed: SensorId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_string().len(), 36);
    }
}
