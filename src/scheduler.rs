//! Scheduler orchestrator: submission, the periodic scheduling cycle,
//! cancellation, and status (spec §4.4).
//!
//! Generalizes the teacher's `Scheduler::submit`/`cancel`/`schedule_cycle`
//! (`zenith-scheduler/src/scheduler.rs`) to add quota admission, the
//! preemption branch, startup replay, and the status/queue-position/
//! estimated-wait surface spec §4.4/§6 require.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::allocation::AllocationState;
use crate::allocator::{Allocator, AllocationRequest, PlacementHints};
use crate::error::{EntityKind, Error, Result};
use crate::job::{Job, JobState, ResourceRequest};
use crate::node::ClusterSummary;
use crate::preemptor::Preemptor;
use crate::queue::PendingQueue;
use crate::repository::Repository;

/// Configuration keys spec §6 lists, plus the engine's resolutions of the
/// open questions in spec §9 (a configurable `max_gpu_count` replacing the
/// fixed cap, and a saturating `max_aging_boost`, both recorded in
/// DESIGN.md).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub scheduling_interval_ms: u64,
    pub max_queue_size: usize,
    pub enable_preemption: bool,
    pub enable_gang_scheduling: bool,
    pub enable_thermal_aware: bool,
    pub thermal_threshold_c: f32,
    pub aging_boost: i64,
    pub aging_threshold_ms: i64,
    pub default_priority: i64,
    /// Open Question 4: the fixed `gpu_count ≤ 8` cap is a configuration
    /// option here, not a constant (default preserves the source's cap).
    pub max_gpu_count: u32,
    /// Open Question 5: aging boost saturates at this ceiling rather than
    /// accumulating without bound.
    pub max_aging_boost: i64,
    /// Advisory `k` in `status()`'s `(position - 1) * k` wait estimate.
    pub wait_estimate_ms_per_position: i64,
    pub heartbeat_timeout_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            scheduling_interval_ms: 1_000,
            max_queue_size: 10_000,
            enable_preemption: true,
            enable_gang_scheduling: true,
            enable_thermal_aware: true,
            thermal_threshold_c: 85.0,
            aging_boost: 50,
            aging_threshold_ms: 30_000,
            default_priority: 500,
            max_gpu_count: 8,
            max_aging_boost: 100_000,
            wait_estimate_ms_per_position: 5_000,
            heartbeat_timeout_secs: 60,
        }
    }
}

/// Input to `Scheduler::submit`, mirroring spec §3's `Job` fields the caller
/// controls; lifecycle fields are assigned by the scheduler.
#[derive(Debug, Clone)]
pub struct JobSubmission {
    pub tenant_id: String,
    pub name: String,
    pub resources: ResourceRequest,
    pub priority: Option<i64>,
    pub gang: bool,
    pub max_runtime_secs: Option<u64>,
    pub hints: PlacementHints,
}

/// The `status()` surface (spec §4.4, §6).
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub state: JobState,
    pub allocated_gpu_ids: Vec<String>,
    pub node_id: Option<String>,
    pub queue_position: Option<i64>,
    pub estimated_wait_ms: Option<i64>,
}

/// Summary of one scheduling-cycle iteration, useful for tests and metrics.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub admitted: Vec<String>,
    pub preempted: Vec<String>,
    pub stopped_reason: Option<String>,
}

/// Orchestrates submission, the periodic cycle, cancellation, and status
/// (spec §4.4). Composed explicitly from a `Repository`, `Allocator`, and
/// `Preemptor`; no package-level mutable state (spec §9).
pub struct Scheduler {
    repo: Arc<dyn Repository>,
    queue: PendingQueue,
    allocator: Allocator,
    preemptor: Preemptor,
    config: SchedulerConfig,
    /// Per-tenant locks serializing admission-check + charge (spec §5, §9
    /// Open Question 2): a naive read-then-write interleaving across
    /// concurrent submits can over-admit.
    tenant_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn Repository>, config: SchedulerConfig) -> Self {
        let allocator = Allocator::with_thermal_awareness(repo.clone(), config.enable_thermal_aware);
        let preemptor = Preemptor::new(repo.clone());
        Self {
            repo,
            queue: PendingQueue::new(config.max_queue_size),
            allocator,
            preemptor,
            config,
            tenant_locks: Mutex::new(HashMap::new()),
        }
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .lock()
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Loads all Pending jobs from the repository, in `submitted_at`-
    /// ascending order, and enqueues them so a restart replays the pending
    /// backlog (spec §4.4 "Startup").
    pub fn startup_replay(&self) -> Result<()> {
        let mut pending = self.repo.list_jobs_by_state(JobState::Pending);
        pending.sort_by_key(|j| j.submitted_at);
        for job in pending {
            if let Err(err) = self.queue.enqueue(job.id.clone(), job.priority) {
                warn!(job_id = %job.id, error = %err, "failed to re-enqueue pending job on startup");
            }
        }
        Ok(())
    }

    /// Recomputes node/GPU availability from Active allocations, healing the
    /// "crash mid-preemption may leave partially released GPUs" scenario
    /// (spec §5). Kept from the teacher's `cleanup_zombie_jobs` sweep idea,
    /// generalized to the new data model.
    pub fn reconcile(&self) -> Result<()> {
        let active = self.repo.list_active_allocations();
        let bound_gpu_ids: std::collections::HashSet<String> =
            active.iter().flat_map(|a| a.gpu_ids.iter().cloned()).collect();

        // Per-node reserved cpu/memory, summed from every Active allocation
        // on that node (commit's `node.reserve` decrements all three
        // dimensions together, §4.2, so reconciliation must restore all
        // three together too — not just the GPU count).
        let mut reserved_cpu: HashMap<String, u64> = HashMap::new();
        let mut reserved_memory: HashMap<String, u64> = HashMap::new();
        for alloc in &active {
            *reserved_cpu.entry(alloc.node_id.clone()).or_insert(0) += alloc.cpu_cores;
            *reserved_memory.entry(alloc.node_id.clone()).or_insert(0) += alloc.memory_mb;
        }

        for node in self.repo.list_nodes() {
            let gpus = self.repo.list_gpus_by_node(&node.id);
            let bound_here = gpus.iter().filter(|g| bound_gpu_ids.contains(&g.id)).count() as u64;
            let mut node = node;
            node.available.gpus = node.total.gpus.saturating_sub(bound_here);
            node.available.cpu_cores = node
                .total
                .cpu_cores
                .saturating_sub(reserved_cpu.get(&node.id).copied().unwrap_or(0));
            node.available.memory_mb = node
                .total
                .memory_mb
                .saturating_sub(reserved_memory.get(&node.id).copied().unwrap_or(0));
            self.repo.put_node(node)?;
        }
        for mut gpu in self
            .repo
            .list_nodes()
            .iter()
            .flat_map(|n| self.repo.list_gpus_by_node(&n.id))
        {
            let bound = bound_gpu_ids.contains(&gpu.id);
            if bound && gpu.allocation_id.is_none() {
                // Back-pointer disagrees with the Allocation's owning list;
                // rebuild it from the allocation that claims this GPU.
                if let Some(alloc) = active.iter().find(|a| a.gpu_ids.contains(&gpu.id)) {
                    gpu.claim(alloc.id.clone(), gpu.total_memory_mb);
                    self.repo.put_gpu(gpu)?;
                }
            } else if !bound && gpu.allocation_id.is_some() {
                gpu.release();
                self.repo.put_gpu(gpu)?;
            }
        }
        Ok(())
    }

    /// Validates and admits a job (spec §4.4 "submit"). Charges no usage;
    /// usage is charged at Running-start (§9 Open Question 2).
    pub fn submit(&self, request: JobSubmission) -> Result<String> {
        if request.tenant_id.is_empty() {
            return Err(Error::Validation {
                field: "tenant_id".into(),
                reason: "must not be empty".into(),
            });
        }
        if request.resources.gpu_count < 1 || request.resources.gpu_count > self.config.max_gpu_count {
            return Err(Error::Validation {
                field: "gpu_count".into(),
                reason: format!("must be in [1, {}]", self.config.max_gpu_count),
            });
        }
        if request.gang && !self.config.enable_gang_scheduling {
            return Err(Error::Validation {
                field: "gang".into(),
                reason: "gang scheduling is disabled".into(),
            });
        }

        let lock = self.tenant_lock(&request.tenant_id);
        let _guard = lock.lock();

        let tenant = self.repo.get_tenant(&request.tenant_id)?;
        tenant.check_admission(
            request.resources.gpu_count as u64,
            request.resources.gpu_memory_mb,
            request.resources.cpu_cores as u64,
            request.resources.memory_mb,
        )?;

        let priority = request.priority.unwrap_or(self.config.default_priority);
        let mut job = Job::new(
            Uuid::new_v4().to_string(),
            request.tenant_id,
            request.name,
            request.resources,
            priority,
            request.gang,
        );
        job.max_runtime_secs = request.max_runtime_secs;
        job.state = JobState::Pending;

        self.repo.put_job(job.clone())?;
        self.queue.enqueue(job.id.clone(), priority)?;

        info!(job_id = %job.id, tenant_id = %job.tenant_id, priority, "job submitted");
        Ok(job.id)
    }

    /// Cancel semantics (spec §4.4 "cancel"): Pending → dequeue + Cancelled;
    /// Running → release allocations, decrement usage, Cancelled; any other
    /// state is an invalid transition.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let mut job = self.repo.get_job(job_id)?;
        match job.state {
            JobState::Pending => {
                self.queue.remove(job_id);
                job.transition(JobState::Cancelled);
                self.repo.put_job(job)?;
            }
            JobState::Running => {
                for allocation in self.repo.list_allocations_by_job(job_id) {
                    if allocation.state == AllocationState::Active {
                        self.allocator.free(&allocation.id)?;
                    }
                }
                let lock = self.tenant_lock(&job.tenant_id);
                let _guard = lock.lock();
                let mut tenant = self.repo.get_tenant(&job.tenant_id)?;
                tenant.release(
                    job.resources.gpu_count as u64,
                    job.resources.gpu_memory_mb,
                    job.resources.cpu_cores as u64,
                    job.resources.memory_mb,
                );
                self.repo.put_tenant(tenant)?;

                job.transition(JobState::Cancelled);
                self.repo.put_job(job)?;
            }
            other => {
                return Err(Error::InvalidTransition {
                    entity: EntityKind::Job,
                    current: other.to_string(),
                    target: JobState::Cancelled.to_string(),
                });
            }
        }
        info!(job_id, "job cancelled");
        Ok(())
    }

    /// Status surface (spec §4.4 "status", §6).
    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        let job = self.repo.get_job(job_id)?;
        match job.state {
            JobState::Running => {
                let active = self
                    .repo
                    .list_allocations_by_job(job_id)
                    .into_iter()
                    .find(|a| a.state == AllocationState::Active);
                Ok(JobStatus {
                    state: job.state,
                    allocated_gpu_ids: active.as_ref().map(|a| a.gpu_ids.clone()).unwrap_or_default(),
                    node_id: active.map(|a| a.node_id),
                    queue_position: None,
                    estimated_wait_ms: None,
                })
            }
            JobState::Pending => {
                let position = self.queue.position(job_id);
                let wait = if position > 0 {
                    Some((position - 1) * self.config.wait_estimate_ms_per_position)
                } else {
                    None
                };
                Ok(JobStatus {
                    state: job.state,
                    allocated_gpu_ids: Vec::new(),
                    node_id: None,
                    queue_position: if position > 0 { Some(position) } else { None },
                    estimated_wait_ms: wait,
                })
            }
            _ => Ok(JobStatus {
                state: job.state,
                allocated_gpu_ids: Vec::new(),
                node_id: None,
                queue_position: None,
                estimated_wait_ms: None,
            }),
        }
    }

    pub fn cluster_summary(&self) -> ClusterSummary {
        let mut summary = ClusterSummary::default();
        let nodes = self.repo.list_nodes();
        summary.total_nodes = nodes.len();
        summary.online_nodes = nodes.iter().filter(|n| n.online).count();
        summary.total_gpus = nodes.iter().map(|n| n.total.gpus).sum();
        summary.available_gpus = nodes.iter().map(|n| n.available.gpus).sum();
        summary
    }

    /// Interprets one GPU temperature reading against `thermal_threshold_c`
    /// (spec §6): crossing it throttles the GPU until `cooling_until`. The
    /// core never collects telemetry itself (spec §1); this is the seam the
    /// (out-of-scope) node agent calls into with each reading.
    pub fn observe_gpu_temperature(
        &self,
        gpu_id: &str,
        temperature_c: f32,
        cooling_until: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let mut gpu = self.repo.get_gpu(gpu_id)?;
        gpu.observe_temperature(temperature_c, self.config.thermal_threshold_c, Utc::now(), cooling_until);
        self.repo.put_gpu(gpu)
    }

    fn charge_tenant_on_start(&self, job: &Job) -> Result<()> {
        let lock = self.tenant_lock(&job.tenant_id);
        let _guard = lock.lock();
        let mut tenant = self.repo.get_tenant(&job.tenant_id)?;
        tenant.charge(
            job.resources.gpu_count as u64,
            job.resources.gpu_memory_mb,
            job.resources.cpu_cores as u64,
            job.resources.memory_mb,
        );
        self.repo.put_tenant(tenant)
    }

    fn build_request(&self, job: &Job) -> AllocationRequest {
        AllocationRequest {
            job_id: job.id.clone(),
            tenant_id: job.tenant_id.clone(),
            gpu_count: job.resources.gpu_count as u64,
            gpu_memory_mb: job.resources.gpu_memory_mb,
            cpu_cores: job.resources.cpu_cores as u64,
            memory_mb: job.resources.memory_mb,
            gang: job.gang,
            hints: PlacementHints::default(),
        }
    }

    /// One scheduling cycle (spec §4.4): age the queue, then repeatedly
    /// attempt to place the head job. Head-of-line blocking is intentional:
    /// the cycle never skips the head (spec §9).
    pub fn run_cycle(&self) -> CycleReport {
        self.queue.apply_aging_capped(
            self.config.aging_boost,
            chrono::Duration::milliseconds(self.config.aging_threshold_ms),
            self.config.max_aging_boost,
        );

        let mut report = CycleReport::default();
        loop {
            let job_id = match self.queue.peek() {
                Some(id) => id,
                None => break,
            };
            let job = match self.repo.get_job(&job_id) {
                Ok(job) => job,
                Err(_) => {
                    // Per-job error: log-and-continue without poisoning the
                    // cycle (spec §7); drop the dangling queue entry.
                    warn!(job_id, "queued job missing from repository, dropping");
                    self.queue.remove(&job_id);
                    continue;
                }
            };

            let request = self.build_request(&job);
            match self.allocator.allocate(&request) {
                Ok(allocation) => {
                    self.queue.dequeue();
                    let mut job = job;
                    job.transition(JobState::Running);
                    job.active_allocation_id = Some(allocation.id.clone());
                    if let Err(err) = self.repo.put_job(job.clone()) {
                        warn!(job_id = %job.id, error = %err, "failed to persist Running transition");
                    }
                    if let Err(err) = self.charge_tenant_on_start(&job) {
                        warn!(job_id = %job.id, error = %err, "failed to charge tenant usage on start");
                    }
                    info!(job_id = %job.id, "job admitted to Running");
                    report.admitted.push(job.id);
                }
                Err(Error::InsufficientResources) | Err(Error::GangImpossible) if self.config.enable_preemption => {
                    match self.preemptor.select_victim(&job) {
                        Ok(Some(victim)) => {
                            if let Err(err) = self.preemptor.preempt(&victim, &job.id) {
                                warn!(error = %err, "preemption attempt failed");
                                report.stopped_reason = Some("preemption-error".into());
                                break;
                            }
                            report.preempted.push(victim.id);
                            // Do not dequeue; retry the head next iteration
                            // now that resources have freed (spec §4.4c).
                            continue;
                        }
                        Ok(None) => {
                            debug!(job_id = %job.id, "no preemption victim available; stopping cycle");
                            report.stopped_reason = Some("head-of-line-blocked".into());
                            break;
                        }
                        Err(err) => {
                            warn!(error = %err, "victim selection failed");
                            report.stopped_reason = Some("preemption-error".into());
                            break;
                        }
                    }
                }
                Err(Error::InsufficientResources) | Err(Error::GangImpossible) | Err(Error::StaleNode { .. }) => {
                    debug!(job_id = %job.id, "transient allocation failure; stopping cycle");
                    report.stopped_reason = Some("transient-resource-failure".into());
                    break;
                }
                Err(err) => {
                    warn!(job_id = %job.id, error = %err, "cycle-internal error, stopping this iteration");
                    report.stopped_reason = Some("internal-error".into());
                    break;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::Gpu;
    use crate::node::{Node, NodeCapacity};
    use crate::repository::InMemoryRepository;
    use crate::tenant::{ResourceTotals, Tenant};

    fn scheduler_with_tenant(ceiling: ResourceTotals) -> (Arc<InMemoryRepository>, Scheduler) {
        let repo = Arc::new(InMemoryRepository::new(60));
        repo.put_tenant(Tenant::new("t1", "Acme", ceiling)).unwrap();
        let scheduler = Scheduler::new(repo.clone(), SchedulerConfig::default());
        (repo, scheduler)
    }

    fn register_node(repo: &InMemoryRepository, id: &str, gpus: u64) {
        repo.put_node(Node::new(
            id,
            format!("{id}:50051"),
            NodeCapacity {
                gpus,
                cpu_cores: 64,
                memory_mb: 256_000,
            },
        ))
        .unwrap();
        for i in 0..gpus {
            repo.put_gpu(Gpu::new(format!("{id}-g{i}"), id, i as u32, "H100", 80_000))
                .unwrap();
        }
    }

    fn submission(priority: i64, gpu_count: u32) -> JobSubmission {
        JobSubmission {
            tenant_id: "t1".into(),
            name: "job".into(),
            resources: ResourceRequest {
                gpu_count,
                gpu_memory_mb: 0,
                cpu_cores: 2,
                memory_mb: 4_000,
            },
            priority: Some(priority),
            gang: false,
            max_runtime_secs: None,
            hints: PlacementHints::default(),
        }
    }

    #[test]
    fn submit_rejects_empty_tenant_and_out_of_range_gpu_count() {
        let (_, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 16,
            memory_mb: 32_000,
            concurrent_jobs: 4,
        });
        let mut bad_tenant = submission(100, 1);
        bad_tenant.tenant_id = String::new();
        assert!(matches!(
            scheduler.submit(bad_tenant).unwrap_err(),
            Error::Validation { .. }
        ));

        let mut bad_gpu = submission(100, 0);
        bad_gpu.tenant_id = "t1".into();
        assert!(matches!(scheduler.submit(bad_gpu).unwrap_err(), Error::Validation { .. }));
    }

    #[test]
    fn submit_enforces_quota_and_does_not_charge_usage() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 2,
            gpu_memory_mb: 0,
            cpu_cores: 16,
            memory_mb: 32_000,
            concurrent_jobs: 4,
        });
        scheduler.submit(submission(100, 2)).unwrap();
        let err = scheduler.submit(submission(100, 1)).unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));

        // Submit-time check passed but usage is unaffected until Running.
        let tenant = repo.get_tenant("t1").unwrap();
        assert_eq!(tenant.usage.gpus, 0);
    }

    #[test]
    fn scenario_s1_higher_priority_admitted_first_once_node_appears() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        let j1 = scheduler.submit(submission(100, 2)).unwrap();
        let j2 = scheduler.submit(submission(500, 2)).unwrap();

        // No nodes yet: both pending, J2 ranked ahead of J1 by priority.
        let s1 = scheduler.status(&j1).unwrap();
        let s2 = scheduler.status(&j2).unwrap();
        assert_eq!(s1.queue_position, Some(2));
        assert_eq!(s2.queue_position, Some(1));

        register_node(&repo, "n1", 4);
        let report = scheduler.run_cycle();
        assert_eq!(report.admitted, vec![j2.clone(), j1.clone()]);

        let tenant = repo.get_tenant("t1").unwrap();
        assert_eq!(tenant.usage.gpus, 4);

        // Spec §3: a job in Running has exactly one active allocation; the
        // denormalized pointer on the job record must agree.
        for job_id in [&j1, &j2] {
            let job = repo.get_job(job_id).unwrap();
            let allocation_id = job.active_allocation_id.clone().expect("running job has an allocation id");
            let allocation = repo.get_allocation(&allocation_id).unwrap();
            assert_eq!(allocation.state, AllocationState::Active);
            assert_eq!(allocation.job_id, *job_id);
        }
    }

    #[test]
    fn scenario_s2_preemption_admits_higher_priority_job() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        register_node(&repo, "n1", 2);

        let j1 = scheduler.submit(submission(100, 2)).unwrap();
        scheduler.run_cycle();
        assert_eq!(scheduler.status(&j1).unwrap().state, JobState::Running);

        let j2 = scheduler.submit(submission(1000, 2)).unwrap();
        let report = scheduler.run_cycle();

        assert_eq!(report.preempted, vec![j1.clone()]);
        assert_eq!(report.admitted, vec![j2.clone()]);
        assert_eq!(scheduler.status(&j1).unwrap().state, JobState::Preempted);
        assert_eq!(scheduler.status(&j2).unwrap().state, JobState::Running);

        let j1_job = repo.get_job(&j1).unwrap();
        assert_eq!(j1_job.preempted_count, 1);

        let node = repo.get_node("n1").unwrap();
        assert_eq!(node.available.gpus, 0);
    }

    #[test]
    fn scenario_s10_head_of_line_blocks_later_jobs() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        register_node(&repo, "n1", 1);

        // Head needs 2 GPUs (unschedulable on a 1-GPU node, no preemption
        // target exists), second needs only 1 and could otherwise fit.
        let head = scheduler.submit(submission(900, 2)).unwrap();
        let behind = scheduler.submit(submission(100, 1)).unwrap();

        let report = scheduler.run_cycle();
        assert!(report.admitted.is_empty());
        assert_eq!(scheduler.status(&head).unwrap().state, JobState::Pending);
        assert_eq!(scheduler.status(&behind).unwrap().state, JobState::Pending);
    }

    #[test]
    fn cancel_pending_removes_from_queue() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        let _ = repo;
        let job_id = scheduler.submit(submission(100, 1)).unwrap();
        scheduler.cancel(&job_id).unwrap();
        assert_eq!(scheduler.status(&job_id).unwrap().state, JobState::Cancelled);
        assert_eq!(scheduler.queue.position(&job_id), -1);
    }

    #[test]
    fn cancel_running_releases_allocation_and_usage() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        register_node(&repo, "n1", 2);
        let job_id = scheduler.submit(submission(100, 2)).unwrap();
        scheduler.run_cycle();
        assert_eq!(scheduler.status(&job_id).unwrap().state, JobState::Running);

        scheduler.cancel(&job_id).unwrap();
        assert_eq!(scheduler.status(&job_id).unwrap().state, JobState::Cancelled);
        let node = repo.get_node("n1").unwrap();
        assert_eq!(node.available.gpus, 2);
        let tenant = repo.get_tenant("t1").unwrap();
        assert_eq!(tenant.usage.gpus, 0);
    }

    #[test]
    fn cancel_terminal_job_is_invalid_transition() {
        let (_, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        let job_id = scheduler.submit(submission(100, 1)).unwrap();
        scheduler.cancel(&job_id).unwrap();
        let err = scheduler.cancel(&job_id).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[test]
    fn startup_replay_reloads_pending_jobs_in_submission_order() {
        let (repo, _) = scheduler_with_tenant(ResourceTotals {
            gpus: 8,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 8,
        });
        let mut first = Job::new("j1", "t1", "first", ResourceRequest::default(), 100, false);
        first.submitted_at = Utc::now() - chrono::Duration::seconds(10);
        let mut second = Job::new("j2", "t1", "second", ResourceRequest::default(), 100, false);
        second.submitted_at = Utc::now();
        repo.put_job(second).unwrap();
        repo.put_job(first).unwrap();

        let restarted = Scheduler::new(repo.clone(), SchedulerConfig::default());
        restarted.startup_replay().unwrap();
        assert_eq!(restarted.queue.position("j1"), 1);
        assert_eq!(restarted.queue.position("j2"), 2);
    }

    /// Spec §5: a crash mid-preemption can leave node counters stale.
    /// `reconcile` must recompute gpus *and* cpu_cores/memory_mb from the
    /// surviving Active allocations, not just the GPU count.
    #[test]
    fn reconcile_restores_cpu_and_memory_counters_alongside_gpus() {
        let (repo, scheduler) = scheduler_with_tenant(ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        });
        register_node(&repo, "n1", 4);
        let job_id = scheduler.submit(submission(100, 2)).unwrap();
        scheduler.run_cycle();
        assert_eq!(scheduler.status(&job_id).unwrap().state, JobState::Running);

        // Simulate the crash: node counters drift out of sync with the
        // surviving Active allocation (only GPUs happened to get healed by
        // some partial write; cpu/memory were left fully available).
        let mut node = repo.get_node("n1").unwrap();
        node.available.cpu_cores = node.total.cpu_cores;
        node.available.memory_mb = node.total.memory_mb;
        repo.put_node(node).unwrap();

        scheduler.reconcile().unwrap();

        let node = repo.get_node("n1").unwrap();
        assert_eq!(node.available.gpus, 2);
        assert_eq!(node.available.cpu_cores, 62);
        assert_eq!(node.available.memory_mb, 124_000);
    }
}
