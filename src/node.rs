//! Node identity, network address, and resource totals/available counters
//! for a compute host (spec §3). The registry itself lives on
//! `InMemoryRepository`; this module only defines the per-node record and
//! the cluster-wide summary shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-dimension totals. The same shape serves both `total` and `available`
/// counters on a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCapacity {
    pub gpus: u64,
    pub cpu_cores: u64,
    pub memory_mb: u64,
}

/// A compute node in the cluster. GPUs belonging to a node are addressed
/// independently by `node_id` (see `crate::gpu::Gpu`) rather than embedded
/// here, so the node/GPU relationship is an id reference in both directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub total: NodeCapacity,
    pub available: NodeCapacity,
    pub online: bool,
    pub schedulable: bool,
    pub draining: bool,
    pub last_heartbeat: DateTime<Utc>,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>, total: NodeCapacity) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            total,
            available: total,
            online: true,
            schedulable: true,
            draining: false,
            last_heartbeat: Utc::now(),
        }
    }

    /// Spec §3: schedulable iff online ∧ schedulable ∧ ¬draining.
    pub fn is_schedulable(&self) -> bool {
        self.online && self.schedulable && !self.draining
    }

    pub fn is_stale(&self, now: DateTime<Utc>, heartbeat_timeout_secs: i64) -> bool {
        (now - self.last_heartbeat).num_seconds() > heartbeat_timeout_secs
    }

    pub fn heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = at;
    }

    /// Checks the coarse fit spec §4.2's node filter requires, ahead of the
    /// per-GPU scan the allocator performs afterward.
    pub fn satisfies(&self, gpus: u64, cpu_cores: u64, memory_mb: u64) -> bool {
        self.available.gpus >= gpus
            && self.available.cpu_cores >= cpu_cores
            && self.available.memory_mb >= memory_mb
    }

    /// Decrement available counters on allocation commit (spec §4.2 step 3).
    pub fn reserve(&mut self, gpus: u64, cpu_cores: u64, memory_mb: u64) {
        self.available.gpus = self.available.gpus.saturating_sub(gpus);
        self.available.cpu_cores = self.available.cpu_cores.saturating_sub(cpu_cores);
        self.available.memory_mb = self.available.memory_mb.saturating_sub(memory_mb);
    }

    /// Restore available counters on release (spec §4.2 "Release").
    pub fn restore(&mut self, gpus: u64, cpu_cores: u64, memory_mb: u64) {
        self.available.gpus = (self.available.gpus + gpus).min(self.total.gpus);
        self.available.cpu_cores = (self.available.cpu_cores + cpu_cores).min(self.total.cpu_cores);
        self.available.memory_mb = (self.available.memory_mb + memory_mb).min(self.total.memory_mb);
    }
}

/// Cluster-wide view returned by `Scheduler::cluster_summary` (spec §6).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub online_nodes: usize,
    pub total_gpus: u64,
    pub available_gpus: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> Node {
        Node::new(
            "n1",
            "10.0.0.1:50051",
            NodeCapacity {
                gpus: 4,
                cpu_cores: 64,
                memory_mb: 256_000,
            },
        )
    }

    #[test]
    fn fresh_node_is_schedulable_with_full_availability() {
        let n = node();
        assert!(n.is_schedulable());
        assert_eq!(n.available, n.total);
    }

    #[test]
    fn draining_node_is_not_schedulable() {
        let mut n = node();
        n.draining = true;
        assert!(!n.is_schedulable());
    }

    #[test]
    fn reserve_then_restore_round_trips_availability() {
        let mut n = node();
        n.reserve(2, 8, 16_000);
        assert_eq!(n.available.gpus, 2);
        assert!(!n.satisfies(4, 0, 0));
        n.restore(2, 8, 16_000);
        assert_eq!(n.available, n.total);
    }

    #[test]
    fn stale_node_is_detected_past_heartbeat_timeout() {
        let mut stale = node();
        stale.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        assert!(stale.is_stale(Utc::now(), 30));
        assert!(!node().is_stale(Utc::now(), 30));
    }

    #[test]
    fn heartbeat_refreshes_staleness() {
        let mut n = node();
        n.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        assert!(n.is_stale(Utc::now(), 30));
        n.heartbeat(Utc::now());
        assert!(!n.is_stale(Utc::now(), 30));
    }
}
