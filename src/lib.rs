//! Zenith Scheduler: a multi-tenant GPU job scheduling engine.
//!
//! This crate is the scheduling core only: the priority queue with aging,
//! the best-fit and gang allocators, the preemption policy, the job/
//! allocation state machines, and tenant quota accounting. Persistence, the
//! HTTP/CLI surface, configuration loading, metrics export, node-agent
//! telemetry collection, and the downstream container runtime are treated
//! as external collaborators behind the [`repository::Repository`] trait;
//! the scheduler never executes user code.

pub mod allocation;
pub mod allocator;
pub mod error;
pub mod gpu;
pub mod job;
pub mod node;
pub mod preemptor;
pub mod queue;
pub mod repository;
pub mod scheduler;
pub mod tenant;

pub use error::{Error, Result};
pub use scheduler::{JobStatus, JobSubmission, Scheduler, SchedulerConfig};
