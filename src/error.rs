//! Error kinds produced by the scheduling engine.

use thiserror::Error;

/// The kind of entity a not-found or invalid-transition error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Job,
    Tenant,
    Gpu,
    Node,
    Allocation,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Job => "job",
            EntityKind::Tenant => "tenant",
            EntityKind::Gpu => "gpu",
            EntityKind::Node => "node",
            EntityKind::Allocation => "allocation",
        };
        f.write_str(s)
    }
}

/// A single tenant quota dimension, used by `Error::QuotaExceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDimension {
    Gpus,
    GpuMemoryMb,
    CpuCores,
    MemoryMb,
    ConcurrentJobs,
}

impl std::fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QuotaDimension::Gpus => "gpus",
            QuotaDimension::GpuMemoryMb => "gpu_memory_mb",
            QuotaDimension::CpuCores => "cpu_cores",
            QuotaDimension::MemoryMb => "memory_mb",
            QuotaDimension::ConcurrentJobs => "concurrent_jobs",
        };
        f.write_str(s)
    }
}

/// Errors the core scheduling engine can produce (spec §7).
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error(
        "quota exceeded for tenant {tenant_id}: {dimension} requested {requested}, \
         current {current}, ceiling {ceiling}"
    )]
    QuotaExceeded {
        tenant_id: String,
        dimension: QuotaDimension,
        requested: u64,
        ceiling: u64,
        current: u64,
    },

    #[error("validation failed for field {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("invalid transition for {entity}: {current} -> {target}")]
    InvalidTransition {
        entity: EntityKind,
        current: String,
        target: String,
    },

    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("job {job_id} is already queued")]
    DuplicateInQueue { job_id: String },

    /// Transient: no schedulable node satisfies the request right now.
    #[error("insufficient resources for this request")]
    InsufficientResources,

    /// Transient: gang-scheduling requires a single node that can fit the
    /// whole request; none currently can.
    #[error("no single node can satisfy this gang request")]
    GangImpossible,

    /// The node selected during placement drifted (counters changed)
    /// before commit could complete. Treat as transient; retry next cycle.
    #[error("node {node_id} state changed before allocation could commit")]
    StaleNode { node_id: String },

    #[error("repository error: {0}")]
    Repository(String),
}

/// Convenience alias used throughout the crate, mirroring the convention the
/// teacher crate exposes as `crate::Result`.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }
}
