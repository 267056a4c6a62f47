//! Deterministic routing from sensor id to agent slot

use crate::sensor::SensorId;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Slot owning `id` when `agent_count` agents are running
///
/// Total and pure: the same `(id, agent_count)` always yields the same slot,
/// and a count of zero is treated as one.
pub fn agent_index(id: &SensorId, agent_count: usize) -> usize {
    let digest = Sha256::digest(id.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % agent_count.max(1) as u64) as usize
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadBalancer {
    agent_count: usize,
}

impl LoadBalancer {
    pub fn new(agent_count: usize) -> Self {
        Self {
            agent_count: agent_count.max(1),
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agent_count
    }

    pub fn route(&self, id: &SensorId) -> usize {
        agent_index(id, self.agent_count)
    }

    /// Assignment of every id under the current count
    pub fn table<'a>(
        &self,
        ids: impl IntoIterator<Item = &'a SensorId>,
    ) -> BTreeMap<SensorId, usize> {
        ids.into_iter().map(|id| (*id, self.route(id))).collect()
    }
}
