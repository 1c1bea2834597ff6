//! Cross-module end-to-end scenarios (spec §8 S1-S6), exercised through the
//! public `Scheduler` surface rather than any single module's internals.

use std::sync::Arc;

use zenith_scheduler::allocator::PlacementHints;
use zenith_scheduler::gpu::Gpu;
use zenith_scheduler::job::{Job, JobState, ResourceRequest};
use zenith_scheduler::node::{Node, NodeCapacity};
use zenith_scheduler::repository::{InMemoryRepository, Repository};
use zenith_scheduler::tenant::{ResourceTotals, Tenant};
use zenith_scheduler::{JobSubmission, Scheduler, SchedulerConfig};

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

fn submission(priority: i64, gpu_count: u32, gang: bool) -> JobSubmission {
    JobSubmission {
        tenant_id: "t1".into(),
        name: "job".into(),
        resources: ResourceRequest {
            gpu_count,
            gpu_memory_mb: 0,
            cpu_cores: 4,
            memory_mb: 8_000,
        },
        priority: Some(priority),
        gang,
        max_runtime_secs: None,
        hints: PlacementHints::default(),
    }
}

/// S3: a gang allocation binds all requested GPUs atomically; taking one of
/// those GPUs offline afterward must not let node availability double-count
/// or let the allocation appear partial.
#[test]
fn s3_gang_allocation_is_atomic_and_survives_gpu_going_offline() {
    let repo = Arc::new(InMemoryRepository::new(60));
    repo.put_tenant(Tenant::new(
        "t1",
        "Acme",
        ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        },
    ))
    .unwrap();
    register_node(&repo, "n1", 4);

    let scheduler = Scheduler::new(repo.clone(), SchedulerConfig::default());
    let job_id = scheduler.submit(submission(500, 4, true)).unwrap();
    let report = scheduler.run_cycle();
    assert_eq!(report.admitted, vec![job_id.clone()]);

    let status = scheduler.status(&job_id).unwrap();
    assert_eq!(status.state, JobState::Running);
    assert_eq!(status.allocated_gpu_ids.len(), 4);

    // Take one bound GPU offline (health degraded) mid-test: it stays bound
    // to the allocation; node availability counters are untouched by this,
    // since they were already decremented at commit time, not derived from
    // live GPU health.
    let mut gpu = repo.get_gpu("n1-g0").unwrap();
    gpu.health = zenith_scheduler::gpu::GpuHealth::Unhealthy;
    repo.put_gpu(gpu).unwrap();

    let node = repo.get_node("n1").unwrap();
    assert_eq!(node.available.gpus, 0);
    assert!(repo.get_gpu("n1-g0").unwrap().allocation_id.is_some());
}

/// S4: aging lets a long-waiting low-priority job overtake a fresher
/// higher-priority one once its effective priority crosses over.
#[test]
fn s4_aging_overtakes_higher_priority_job() {
    let repo = Arc::new(InMemoryRepository::new(60));
    repo.put_tenant(Tenant::new(
        "t1",
        "Acme",
        ResourceTotals {
            gpus: 8,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 8,
        },
    ))
    .unwrap();
    // No nodes: both jobs stay pending so we can observe pure ordering.
    let mut config = SchedulerConfig::default();
    config.aging_boost = 150;
    config.aging_threshold_ms = 15;
    let scheduler = Scheduler::new(repo.clone(), config);

    let low = scheduler.submit(submission(100, 1, false)).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(20));
    let high = scheduler.submit(submission(200, 1, false)).unwrap();

    // Aging pass runs immediately: low has waited past the threshold, high
    // has barely been enqueued and has not, so only low's effective
    // priority (250) overtakes high's untouched 200.
    scheduler.run_cycle();

    let low_status = scheduler.status(&low).unwrap();
    let high_status = scheduler.status(&high).unwrap();
    assert_eq!(low_status.queue_position, Some(1));
    assert_eq!(high_status.queue_position, Some(2));
}

/// S5: submit fails with quota-exceeded carrying the structured fields the
/// spec requires, without mutating tenant usage.
#[test]
fn s5_quota_exceeded_carries_structured_fields() {
    let repo = Arc::new(InMemoryRepository::new(60));
    let mut tenant = Tenant::new(
        "t1",
        "Acme",
        ResourceTotals {
            gpus: 2,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 8,
        },
    );
    tenant.usage.gpus = 2;
    repo.put_tenant(tenant).unwrap();

    let scheduler = Scheduler::new(repo.clone(), SchedulerConfig::default());
    let err = scheduler.submit(submission(100, 1, false)).unwrap_err();
    match err {
        zenith_scheduler::Error::QuotaExceeded {
            tenant_id,
            requested,
            ceiling,
            current,
            ..
        } => {
            assert_eq!(tenant_id, "t1");
            assert_eq!(requested, 1);
            assert_eq!(ceiling, 2);
            assert_eq!(current, 2);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

/// S6: a crash between "persist job Pending" and "enqueue" leaves an orphan
/// Pending row; a fresh scheduler's startup replay recovers it and
/// scheduling proceeds normally.
#[test]
fn s6_startup_replay_recovers_orphaned_pending_job() {
    let repo = Arc::new(InMemoryRepository::new(60));
    repo.put_tenant(Tenant::new(
        "t1",
        "Acme",
        ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        },
    ))
    .unwrap();
    // Simulate the crash window: job persisted as Pending, never enqueued
    // (no scheduler instance existed to enqueue it).
    let orphan = Job::new("orphan", "t1", "orphan-job", ResourceRequest::default(), 100, false);
    repo.put_job(orphan).unwrap();

    register_node(&repo, "n1", 4);
    let scheduler = Scheduler::new(repo.clone(), SchedulerConfig::default());
    scheduler.startup_replay().unwrap();

    let report = scheduler.run_cycle();
    assert_eq!(report.admitted, vec!["orphan".to_string()]);
    assert_eq!(scheduler.status("orphan").unwrap().state, JobState::Running);
}

/// S2, restated end-to-end through the public surface: a higher-priority
/// submission preempts a lower-priority running job on a saturated node.
#[test]
fn s2_preemption_frees_capacity_for_higher_priority_submission() {
    let repo = Arc::new(InMemoryRepository::new(60));
    repo.put_tenant(Tenant::new(
        "t1",
        "Acme",
        ResourceTotals {
            gpus: 4,
            gpu_memory_mb: 0,
            cpu_cores: 64,
            memory_mb: 128_000,
            concurrent_jobs: 4,
        },
    ))
    .unwrap();
    register_node(&repo, "n1", 2);

    let scheduler = Scheduler::new(repo.clone(), SchedulerConfig::default());
    let low = scheduler.submit(submission(100, 2, false)).unwrap();
    scheduler.run_cycle();
    assert_eq!(scheduler.status(&low).unwrap().state, JobState::Running);

    let high = scheduler.submit(submission(1000, 2, false)).unwrap();
    scheduler.run_cycle();

    assert_eq!(scheduler.status(&low).unwrap().state, JobState::Preempted);
    assert_eq!(scheduler.status(&high).unwrap().state, JobState::Running);
    assert_eq!(repo.get_job(&low).unwrap().preempted_count, 1);
}
