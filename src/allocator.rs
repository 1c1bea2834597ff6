//! Best-fit single-node allocation and atomic gang allocation (spec §4.2).
//!
//! Generalizes the teacher's `Scheduler::gang_schedule`/`spread_schedule`
//! (`zenith-scheduler/src/scheduler.rs`) into a standalone allocator with an
//! explicit best-fit waste metric and a `Repository`-backed atomic commit.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::allocation::Allocation;
use crate::error::{Error, Result};
use crate::gpu::Gpu;
use crate::node::Node;
use crate::repository::{ReleaseOutcome, Repository};

/// Node-selection hints (spec §4.2). `required_labels` and affinity/
/// anti-affinity are accepted for forward compatibility but are not backed
/// by a node label model in this engine's data model (spec §3's `Node` has
/// no label set) and are therefore not evaluated.
#[derive(Debug, Clone, Default)]
pub struct PlacementHints {
    pub preferred_nodes: Vec<String>,
    pub gpu_model: Option<String>,
}

/// A single allocation attempt, built by the scheduler from a `Job`.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub job_id: String,
    pub tenant_id: String,
    pub gpu_count: u64,
    pub gpu_memory_mb: u64,
    pub cpu_cores: u64,
    pub memory_mb: u64,
    pub gang: bool,
    pub hints: PlacementHints,
}

/// Best-fit (non-gang) and atomic gang allocation over a `Repository`
/// (spec §4.2).
pub struct Allocator {
    repo: Arc<dyn Repository>,
    /// Spec §6 `enable_thermal_aware`: when false, GPU availability ignores
    /// `thermal_throttled`/`cooling_until` (but never `health`).
    thermal_aware: bool,
}

impl Allocator {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self::with_thermal_awareness(repo, true)
    }

    pub fn with_thermal_awareness(repo: Arc<dyn Repository>, thermal_aware: bool) -> Self {
        Self { repo, thermal_aware }
    }

    /// Filters nodes to those whose coarse `available` counters can satisfy
    /// the request, ordering `hints.preferred_nodes` first so both the
    /// best-fit and gang scans see them before the stable node-id order.
    fn candidate_nodes(&self, req: &AllocationRequest) -> Vec<Node> {
        let now = Utc::now();
        let mut nodes: Vec<Node> = self
            .repo
            .schedulable_nodes(now)
            .into_iter()
            .filter(|n| n.satisfies(req.gpu_count, req.cpu_cores, req.memory_mb))
            .collect();
        if !req.hints.preferred_nodes.is_empty() {
            nodes.sort_by_key(|n| {
                (
                    !req.hints.preferred_nodes.contains(&n.id),
                    n.id.clone(),
                )
            });
        }
        nodes
    }

    fn available_gpus_on(&self, node_id: &str, hints: &PlacementHints) -> Vec<Gpu> {
        let now = Utc::now();
        let mut gpus: Vec<Gpu> = self
            .repo
            .list_gpus_by_node(node_id)
            .into_iter()
            .filter(|g| g.is_available(now, self.thermal_aware))
            .filter(|g| hints.gpu_model.as_deref().map(|m| m == g.model).unwrap_or(true))
            .collect();
        gpus.sort_by(|a, b| a.id.cmp(&b.id));
        gpus
    }

    /// Allocates a request, choosing the best-fit or gang path per
    /// `req.gang` (spec §4.2), and commits atomically via the repository.
    pub fn allocate(&self, req: &AllocationRequest) -> Result<Allocation> {
        let candidates = self.candidate_nodes(req);
        if candidates.is_empty() {
            return Err(Error::InsufficientResources);
        }

        let (node, gpu_ids) = if req.gang {
            self.select_gang(req, &candidates)?
        } else {
            self.select_best_fit(req, &candidates)?
        };

        let allocation = Allocation::new(
            Uuid::new_v4().to_string(),
            req.job_id.clone(),
            req.tenant_id.clone(),
            node.id.clone(),
            gpu_ids,
            req.cpu_cores,
            req.memory_mb,
        );

        match self.repo.commit_allocation(allocation.clone()) {
            Ok(()) => Ok(allocation),
            Err(err @ Error::StaleNode { .. }) => {
                warn!(node_id = %node.id, "allocation commit found stale node, will retry next cycle");
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Best-fit (spec §4.2): among nodes with enough available GPUs, pick
    /// the one minimizing `available_gpus - requested_gpus`; ties break by
    /// node id (candidates are already in ascending-id order).
    fn select_best_fit(
        &self,
        req: &AllocationRequest,
        candidates: &[Node],
    ) -> Result<(Node, Vec<String>)> {
        let mut best: Option<(Node, Vec<Gpu>, u64)> = None;
        for node in candidates {
            let available = self.available_gpus_on(&node.id, &req.hints);
            if (available.len() as u64) < req.gpu_count {
                continue;
            }
            let waste = available.len() as u64 - req.gpu_count;
            let better = match &best {
                None => true,
                Some((best_node, _, best_waste)) => {
                    waste < *best_waste || (waste == *best_waste && node.id < best_node.id)
                }
            };
            if better {
                best = Some((node.clone(), available, waste));
            }
        }

        match best {
            Some((node, gpus, _)) => {
                let gpu_ids = gpus
                    .into_iter()
                    .take(req.gpu_count as usize)
                    .map(|g| g.id)
                    .collect();
                Ok((node, gpu_ids))
            }
            None => {
                debug!(job_id = %req.job_id, "no node has enough available GPUs");
                Err(Error::InsufficientResources)
            }
        }
    }

    /// Gang (spec §4.2): first node in stable order whose available-GPU
    /// count covers the whole request wins; no partial allocation is ever
    /// constructed.
    fn select_gang(&self, req: &AllocationRequest, candidates: &[Node]) -> Result<(Node, Vec<String>)> {
        for node in candidates {
            let available = self.available_gpus_on(&node.id, &req.hints);
            if (available.len() as u64) >= req.gpu_count {
                let gpu_ids = available
                    .into_iter()
                    .take(req.gpu_count as usize)
                    .map(|g| g.id)
                    .collect();
                return Ok((node.clone(), gpu_ids));
            }
        }
        Err(Error::GangImpossible)
    }

    /// Releases an allocation back to the pool (spec §4.2 "Release").
    /// Idempotent on an already-released allocation.
    pub fn free(&self, allocation_id: &str) -> Result<Allocation> {
        self.repo.release_allocation(allocation_id, ReleaseOutcome::Completed)
    }
}
