//! Allocation: the binding between a Running job and the GPUs/node that
//! satisfy it (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationState {
    Active,
    Preempted,
    Completed,
    Failed,
}

impl AllocationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AllocationState::Preempted | AllocationState::Completed | AllocationState::Failed
        )
    }
}

/// Running totals the (out-of-scope) node agent reports back against an
/// allocation; the core never computes these itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct UtilizationAggregate {
    pub avg_gpu_utilization_pct: f32,
    pub peak_memory_mb: u64,
    pub samples: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub id: String,
    pub job_id: String,
    pub tenant_id: String,
    pub node_id: String,

    /// Owning side of the GPU relationship (spec §9): this list is the
    /// source of truth for which GPUs are bound; `Gpu::allocation_id` is a
    /// denormalized back-pointer that must agree with it.
    pub gpu_ids: Vec<String>,
    pub cpu_cores: u64,
    pub memory_mb: u64,

    pub state: AllocationState,
    pub allocated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub preempted_at: Option<DateTime<Utc>>,
    /// The id of the admitting job that caused this allocation to be
    /// preempted, if any (spec §3).
    pub preempted_by: Option<String>,

    pub utilization: UtilizationAggregate,
}

impl Allocation {
    pub fn new(
        id: impl Into<String>,
        job_id: impl Into<String>,
        tenant_id: impl Into<String>,
        node_id: impl Into<String>,
        gpu_ids: Vec<String>,
        cpu_cores: u64,
        memory_mb: u64,
    ) -> Self {
        Self {
            id: id.into(),
            job_id: job_id.into(),
            tenant_id: tenant_id.into(),
            node_id: node_id.into(),
            gpu_ids,
            cpu_cores,
            memory_mb,
            state: AllocationState::Active,
            allocated_at: Utc::now(),
            completed_at: None,
            preempted_at: None,
            preempted_by: None,
            utilization: UtilizationAggregate::default(),
        }
    }

    pub fn gpu_count(&self) -> u64 {
        self.gpu_ids.len() as u64
    }

    /// Spec §4.2 "Release": normal completion path. Idempotent on an
    /// already-terminal allocation.
    pub fn complete(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = AllocationState::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        self.state = AllocationState::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Spec §4.3 "Preempt(victim)" step 2.
    pub fn preempt(&mut self, preempted_by: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = AllocationState::Preempted;
        let now = Utc::now();
        self.preempted_at = Some(now);
        self.completed_at = Some(now);
        self.preempted_by = Some(preempted_by.into());
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.allocated_at).num_seconds().max(0))
    }
}
