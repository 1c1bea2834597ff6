//! Repository: the abstract persistence boundary (spec §6, §9).
//!
//! The core treats durable storage as an external collaborator. This module
//! defines the `Repository` trait the scheduler, allocator, and preemptor
//! depend on, plus an in-memory implementation used by every test in this
//! crate and suitable as a starting point for a real backend. The trait is
//! the generalization of the teacher's single concrete `StateStore`
//! (`zenith-scheduler/src/state.rs`) into "polymorphism over repository
//! backends" (spec §9): any backend implements the same surface.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::allocation::{Allocation, AllocationState};
use crate::error::{EntityKind, Error, Result};
use crate::gpu::Gpu;
use crate::job::{Job, JobState};
use crate::node::Node;
use crate::tenant::Tenant;

/// The terminal state a released allocation moves to, and the extra fields
/// that state carries (spec §4.2 "Release", §4.3 "Preempt(victim)").
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    Completed,
    Failed,
    Preempted { preempted_by: String },
}

/// Durable CRUD, listing, and the two atomic composite operations the core
/// requires (spec §6). Implementations must distinguish not-found from other
/// errors and must make `commit_allocation`/`release_allocation` atomic: a
/// reader must never observe a partially-applied commit or release.
pub trait Repository: Send + Sync {
    fn put_job(&self, job: Job) -> Result<()>;
    fn get_job(&self, id: &str) -> Result<Job>;
    fn delete_job(&self, id: &str) -> Result<()>;
    fn list_jobs_by_state(&self, state: JobState) -> Vec<Job>;
    fn list_jobs_by_tenant(&self, tenant_id: &str) -> Vec<Job>;
    fn list_all_jobs(&self) -> Vec<Job>;

    fn put_tenant(&self, tenant: Tenant) -> Result<()>;
    fn get_tenant(&self, id: &str) -> Result<Tenant>;
    fn list_tenants(&self) -> Vec<Tenant>;

    fn put_gpu(&self, gpu: Gpu) -> Result<()>;
    fn get_gpu(&self, id: &str) -> Result<Gpu>;
    fn list_gpus_by_node(&self, node_id: &str) -> Vec<Gpu>;
    /// Spec §6 `enable_thermal_aware`: when false, ignore
    /// `thermal_throttled`/`cooling_until` in the availability predicate.
    fn list_available_gpus(&self, now: DateTime<Utc>, thermal_aware: bool) -> Vec<Gpu>;

    fn put_node(&self, node: Node) -> Result<()>;
    fn get_node(&self, id: &str) -> Result<Node>;
    fn list_nodes(&self) -> Vec<Node>;
    /// Schedulable, non-stale nodes, stably ordered (spec §4.2 tie-break).
    fn schedulable_nodes(&self, now: DateTime<Utc>) -> Vec<Node>;

    fn get_allocation(&self, id: &str) -> Result<Allocation>;
    fn list_active_allocations(&self) -> Vec<Allocation>;
    fn list_allocations_by_job(&self, job_id: &str) -> Vec<Allocation>;

    /// Atomic composite commit (spec §4.2 "Commit"): persists `allocation` as
    /// Active, binds every GPU it names, and reserves its node's available
    /// counters. All three steps succeed together or none are applied.
    fn commit_allocation(&self, allocation: Allocation) -> Result<()>;

    /// Atomic reversal (spec §4.2 "Release", §4.3 "Preempt"): moves the
    /// allocation to the given terminal state, unbinds its GPUs, and
    /// restores the node's available counters. Idempotent: releasing an
    /// already-terminal allocation is a no-op that returns its current
    /// record.
    fn release_allocation(&self, allocation_id: &str, outcome: ReleaseOutcome) -> Result<Allocation>;

    fn ping(&self) -> Result<()>;
    fn close(&self) -> Result<()>;
}

#[derive(Default)]
struct Tables {
    jobs: HashMap<String, Job>,
    tenants: HashMap<String, Tenant>,
    gpus: HashMap<String, Gpu>,
    nodes: HashMap<String, Node>,
    allocations: HashMap<String, Allocation>,
}

/// In-memory `Repository`, used by every test in this crate and by the
/// reconciliation example in `Scheduler::reconcile`. A SQL-backed
/// implementation would swap this struct out behind the same trait without
/// the scheduler, allocator, or preemptor changing at all (spec §9).
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
    heartbeat_timeout_secs: i64,
    closed: RwLock<bool>,
}

impl InMemoryRepository {
    pub fn new(heartbeat_timeout_secs: i64) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            heartbeat_timeout_secs,
            closed: RwLock::new(false),
        }
    }

    fn check_open(&self) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Repository("repository is closed".into()));
        }
        Ok(())
    }
}

impl Repository for InMemoryRepository {
    fn put_job(&self, job: Job) -> Result<()> {
        self.check_open()?;
        self.tables.write().jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Job> {
        self.tables
            .read()
            .jobs
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Job, id))
    }

    fn delete_job(&self, id: &str) -> Result<()> {
        self.tables.write().jobs.remove(id);
        Ok(())
    }

    fn list_jobs_by_state(&self, state: JobState) -> Vec<Job> {
        self.tables
            .read()
            .jobs
            .values()
            .filter(|j| j.state == state)
            .cloned()
            .collect()
    }

    fn list_jobs_by_tenant(&self, tenant_id: &str) -> Vec<Job> {
        self.tables
            .read()
            .jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    fn list_all_jobs(&self) -> Vec<Job> {
        self.tables.read().jobs.values().cloned().collect()
    }

    fn put_tenant(&self, tenant: Tenant) -> Result<()> {
        self.check_open()?;
        self.tables.write().tenants.insert(tenant.id.clone(), tenant);
        Ok(())
    }

    fn get_tenant(&self, id: &str) -> Result<Tenant> {
        self.tables
            .read()
            .tenants
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Tenant, id))
    }

    fn list_tenants(&self) -> Vec<Tenant> {
        self.tables.read().tenants.values().cloned().collect()
    }

    fn put_gpu(&self, gpu: Gpu) -> Result<()> {
        self.check_open()?;
        self.tables.write().gpus.insert(gpu.id.clone(), gpu);
        Ok(())
    }

    fn get_gpu(&self, id: &str) -> Result<Gpu> {
        self.tables
            .read()
            .gpus
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Gpu, id))
    }

    fn list_gpus_by_node(&self, node_id: &str) -> Vec<Gpu> {
        self.tables
            .read()
            .gpus
            .values()
            .filter(|g| g.node_id == node_id)
            .cloned()
            .collect()
    }

    fn list_available_gpus(&self, now: DateTime<Utc>, thermal_aware: bool) -> Vec<Gpu> {
        self.tables
            .read()
            .gpus
            .values()
            .filter(|g| g.is_available(now, thermal_aware))
            .cloned()
            .collect()
    }

    fn put_node(&self, node: Node) -> Result<()> {
        self.check_open()?;
        self.tables.write().nodes.insert(node.id.clone(), node);
        Ok(())
    }

    fn get_node(&self, id: &str) -> Result<Node> {
        self.tables
            .read()
            .nodes
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Node, id))
    }

    fn list_nodes(&self) -> Vec<Node> {
        self.tables.read().nodes.values().cloned().collect()
    }

    fn schedulable_nodes(&self, now: DateTime<Utc>) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .tables
            .read()
            .nodes
            .values()
            .filter(|n| n.is_schedulable() && !n.is_stale(now, self.heartbeat_timeout_secs))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    fn get_allocation(&self, id: &str) -> Result<Allocation> {
        self.tables
            .read()
            .allocations
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Allocation, id))
    }

    fn list_active_allocations(&self) -> Vec<Allocation> {
        self.tables
            .read()
            .allocations
            .values()
            .filter(|a| a.state == AllocationState::Active)
            .cloned()
            .collect()
    }

    fn list_allocations_by_job(&self, job_id: &str) -> Vec<Allocation> {
        self.tables
            .read()
            .allocations
            .values()
            .filter(|a| a.job_id == job_id)
            .cloned()
            .collect()
    }

    fn commit_allocation(&self, allocation: Allocation) -> Result<()> {
        self.check_open()?;
        let mut tables = self.tables.write();

        let node = tables
            .nodes
            .get(&allocation.node_id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Node, &allocation.node_id))?;
        if !node.satisfies(allocation.gpu_count(), allocation.cpu_cores, allocation.memory_mb) {
            return Err(Error::StaleNode {
                node_id: allocation.node_id.clone(),
            });
        }
        for gpu_id in &allocation.gpu_ids {
            let gpu = tables
                .gpus
                .get(gpu_id)
                .ok_or_else(|| Error::not_found(EntityKind::Gpu, gpu_id))?;
            if gpu.allocation_id.is_some() {
                return Err(Error::StaleNode {
                    node_id: allocation.node_id.clone(),
                });
            }
        }

        // All preconditions hold; apply the composite mutation. GPUs are
        // allocated as exclusive whole units (spec §3's `allocated ⇔
        // allocation_id ≠ ∅` invariant admits no fractional sharing), so a
        // claimed GPU reports its full memory as used.
        for gpu_id in &allocation.gpu_ids {
            if let Some(gpu) = tables.gpus.get_mut(gpu_id) {
                let total = gpu.total_memory_mb;
                gpu.claim(allocation.id.clone(), total);
            }
        }
        if let Some(node) = tables.nodes.get_mut(&allocation.node_id) {
            node.reserve(allocation.gpu_count(), allocation.cpu_cores, allocation.memory_mb);
        }
        tables.allocations.insert(allocation.id.clone(), allocation);
        Ok(())
    }

    fn release_allocation(&self, allocation_id: &str, outcome: ReleaseOutcome) -> Result<Allocation> {
        self.check_open()?;
        let mut tables = self.tables.write();
        let mut allocation = tables
            .allocations
            .get(allocation_id)
            .cloned()
            .ok_or_else(|| Error::not_found(EntityKind::Allocation, allocation_id))?;

        if allocation.state.is_terminal() {
            return Ok(allocation);
        }

        for gpu_id in &allocation.gpu_ids {
            if let Some(gpu) = tables.gpus.get_mut(gpu_id) {
                gpu.release();
            }
        }
        if let Some(node) = tables.nodes.get_mut(&allocation.node_id) {
            node.restore(allocation.gpu_count(), allocation.cpu_cores, allocation.memory_mb);
        }

        match outcome {
            ReleaseOutcome::Completed => allocation.complete(),
            ReleaseOutcome::Failed => allocation.fail(),
            ReleaseOutcome::Preempted { preempted_by } => allocation.preempt(preempted_by),
        }
        tables.allocations.insert(allocation.id.clone(), allocation.clone());
        Ok(allocation)
    }

    fn ping(&self) -> Result<()> {
        self.check_open()
    }

    fn close(&self) -> Result<()> {
        *self.closed.write() = true;
        Ok(())
    }
}
