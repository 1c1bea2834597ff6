//! Job definition, resource requests, and the job state machine (spec §3, §4.5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a job (spec §4.5).
///
/// `Completed`, `Failed`, and `Cancelled` are sinks: no transition leaves
/// them. `Preempted` is deliberately non-terminal but this engine does not
/// auto-re-enqueue it (see DESIGN.md, Open Question 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Preempted,
    Cancelled,
}

impl JobState {
    /// Terminal states admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Declared resource footprint of a job (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub gpu_count: u32,
    pub gpu_memory_mb: u64,
    pub cpu_cores: u32,
    pub memory_mb: u64,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            gpu_count: 1,
            gpu_memory_mb: 0,
            cpu_cores: 1,
            memory_mb: 1024,
        }
    }
}

/// Opaque execution payload. The core never interprets this; it is carried
/// through for the (out-of-scope) downstream executor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub image: Option<String>,
    pub command: Option<String>,
    pub env: HashMap<String, String>,
}

/// A unit of work submitted by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub resources: ResourceRequest,
    pub priority: i64,
    pub gang: bool,
    pub max_runtime_secs: Option<u64>,
    pub payload: ExecutionPayload,

    pub state: JobState,
    pub submitted_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub preempted_count: u32,

    /// Active allocation for this job, if Running. At most one, per the
    /// spec §3 invariant "a job in Running has exactly one active
    /// allocation".
    pub active_allocation_id: Option<String>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        name: impl Into<String>,
        resources: ResourceRequest,
        priority: i64,
        gang: bool,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            resources,
            priority,
            gang,
            max_runtime_secs: None,
            payload: ExecutionPayload::default(),
            state: JobState::Pending,
            submitted_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            completed_at: None,
            preempted_count: 0,
            active_allocation_id: None,
        }
    }

    /// Apply a state transition, stamping the timestamps spec §3 calls out.
    /// Callers are responsible for checking the transition is legal (see
    /// `Scheduler`/`Allocator`/`Preemptor`, which own the transition rules);
    /// this method only records the resulting state and clock.
    pub fn transition(&mut self, new_state: JobState) {
        self.state = new_state;
        match new_state {
            JobState::Running => {
                let now = Utc::now();
                self.scheduled_at.get_or_insert(now);
                self.started_at = Some(now);
            }
            JobState::Completed | JobState::Failed | JobState::Cancelled => {
                self.completed_at = Some(Utc::now());
                self.active_allocation_id = None;
            }
            JobState::Preempted => {
                self.preempted_count += 1;
                self.active_allocation_id = None;
            }
            JobState::Pending => {}
        }
    }

    pub fn wait_time_seconds(&self) -> i64 {
        let until = self.scheduled_at.unwrap_or_else(Utc::now);
        (until - self.submitted_at).num_seconds().max(0)
    }
}
