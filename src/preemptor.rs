//! Victim selection and cascading resource reclamation (spec §4.3).
//!
//! New module; grounded in the victim-selection shape of
//! `other_examples/.../claw-preemption/lib.rs` (priority comparison, a
//! tenant-level preemption policy bit, single-victim selection per request),
//! adapted to this engine's exact rule: lowest priority, tie broken by
//! earliest `started_at`.

use std::sync::Arc;

use tracing::info;

use crate::error::Result;
use crate::job::{Job, JobState};
use crate::repository::{ReleaseOutcome, Repository};

/// Selects and reclaims resources from a single running victim per
/// requesting job, per scheduling cycle (spec §4.3).
pub struct Preemptor {
    repo: Arc<dyn Repository>,
}

impl Preemptor {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Among Running jobs whose priority is strictly lower than
    /// `requesting.priority` and whose tenant allows preemption, returns the
    /// one with the lowest priority, breaking ties by earliest `started_at`
    /// (the job that has run longest). Returns `None` if no candidate
    /// exists.
    pub fn select_victim(&self, requesting: &Job) -> Result<Option<Job>> {
        let running = self.repo.list_jobs_by_state(JobState::Running);
        let mut best: Option<Job> = None;
        for candidate in running {
            if candidate.id == requesting.id || candidate.priority >= requesting.priority {
                continue;
            }
            let tenant = match self.repo.get_tenant(&candidate.tenant_id) {
                Ok(t) => t,
                Err(_) => continue,
            };
            if !tenant.policy.allow_preemption {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    candidate.priority < current.priority
                        || (candidate.priority == current.priority
                            && candidate.started_at < current.started_at)
                }
            };
            if better {
                best = Some(candidate);
            }
        }
        Ok(best)
    }

    /// Atomically (spec §4.3 "Preempt(victim)"):
    /// 1. victim → Preempted, `preempted_count` += 1.
    /// 2. Every Active allocation of victim → Preempted, GPUs released, node
    ///    counters restored.
    /// 3. Victim's tenant usage decremented by victim's declared resources.
    ///
    /// The requesting job is never placed here; the scheduling cycle
    /// re-runs the allocator on its next iteration (spec §4.3, §4.4).
    pub fn preempt(&self, victim: &Job, admitting_job_id: &str) -> Result<()> {
        let mut victim = victim.clone();
        victim.transition(JobState::Preempted);
        self.repo.put_job(victim.clone())?;

        for allocation in self.repo.list_allocations_by_job(&victim.id) {
            if allocation.state == crate::allocation::AllocationState::Active {
                self.repo.release_allocation(
                    &allocation.id,
                    ReleaseOutcome::Preempted {
                        preempted_by: admitting_job_id.to_string(),
                    },
                )?;
            }
        }

        let mut tenant = self.repo.get_tenant(&victim.tenant_id)?;
        tenant.release(
            victim.resources.gpu_count as u64,
            victim.resources.gpu_memory_mb,
            victim.resources.cpu_cores as u64,
            victim.resources.memory_mb,
        );
        self.repo.put_tenant(tenant)?;

        info!(
            victim_job_id = %victim.id,
            admitting_job_id,
            preempted_count = victim.preempted_count,
            "preempted job to admit higher-priority request"
        );
        Ok(())
    }
}
