//! Tenant quota ceilings, current usage, and priority tier (spec §3, §6).

use serde::{Deserialize, Serialize};

use crate::error::{Error, QuotaDimension, Result};

/// Named priority tiers map to the fixed integers spec §6 lists. Jobs carry
/// their own free-form integer priority independent of the tenant's tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorityTier {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityTier {
    pub fn value(self) -> i64 {
        match self {
            PriorityTier::Low => 100,
            PriorityTier::Medium => 500,
            PriorityTier::High => 1000,
            PriorityTier::Critical => 5000,
        }
    }
}

/// A quota ceiling or current-usage snapshot; the same shape serves both
/// roles (spec §3: "current usage mirroring the same shape").
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    pub gpus: u64,
    pub gpu_memory_mb: u64,
    pub cpu_cores: u64,
    pub memory_mb: u64,
    pub concurrent_jobs: u64,
}

/// Bits controlling whether this tenant's running jobs may be preempted,
/// and whether its jobs may preempt others (spec §3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PreemptionPolicy {
    pub allow_preemption: bool,
    pub can_preempt_others: bool,
}

impl Default for PreemptionPolicy {
    fn default() -> Self {
        Self {
            allow_preemption: true,
            can_preempt_others: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub ceiling: ResourceTotals,
    pub usage: ResourceTotals,
    pub priority_tier: PriorityTier,
    pub policy: PreemptionPolicy,
}

impl Tenant {
    pub fn new(id: impl Into<String>, name: impl Into<String>, ceiling: ResourceTotals) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ceiling,
            usage: ResourceTotals::default(),
            priority_tier: PriorityTier::Medium,
            policy: PreemptionPolicy::default(),
        }
    }

    /// Spec §4.4: submit only checks admissibility; it never mutates usage.
    /// `requested_gpus`/`requested_gpu_memory_mb`/`requested_cpu_cores`/
    /// `requested_memory_mb` are the job's declared resources.
    pub fn check_admission(
        &self,
        requested_gpus: u64,
        requested_gpu_memory_mb: u64,
        requested_cpu_cores: u64,
        requested_memory_mb: u64,
    ) -> Result<()> {
        let checks = [
            (QuotaDimension::Gpus, requested_gpus, self.usage.gpus, self.ceiling.gpus),
            (
                QuotaDimension::GpuMemoryMb,
                requested_gpu_memory_mb,
                self.usage.gpu_memory_mb,
                self.ceiling.gpu_memory_mb,
            ),
            (
                QuotaDimension::CpuCores,
                requested_cpu_cores,
                self.usage.cpu_cores,
                self.ceiling.cpu_cores,
            ),
            (
                QuotaDimension::MemoryMb,
                requested_memory_mb,
                self.usage.memory_mb,
                self.ceiling.memory_mb,
            ),
            (
                QuotaDimension::ConcurrentJobs,
                1,
                self.usage.concurrent_jobs,
                self.ceiling.concurrent_jobs,
            ),
        ];

        for (dimension, requested, current, ceiling) in checks {
            if current + requested > ceiling {
                return Err(Error::QuotaExceeded {
                    tenant_id: self.id.clone(),
                    dimension,
                    requested,
                    ceiling,
                    current,
                });
            }
        }
        Ok(())
    }

    /// Charge usage at Running-start, per spec §4.4/§9 Open Question 2.
    /// Callers must have already confirmed admission via `check_admission`;
    /// this never fails on its own.
    pub fn charge(&mut self, gpus: u64, gpu_memory_mb: u64, cpu_cores: u64, memory_mb: u64) {
        self.usage.gpus += gpus;
        self.usage.gpu_memory_mb += gpu_memory_mb;
        self.usage.cpu_cores += cpu_cores;
        self.usage.memory_mb += memory_mb;
        self.usage.concurrent_jobs += 1;
    }

    /// Release usage on any exit from Running (spec §3 invariant).
    pub fn release(&mut self, gpus: u64, gpu_memory_mb: u64, cpu_cores: u64, memory_mb: u64) {
        self.usage.gpus = self.usage.gpus.saturating_sub(gpus);
        self.usage.gpu_memory_mb = self.usage.gpu_memory_mb.saturating_sub(gpu_memory_mb);
        self.usage.cpu_cores = self.usage.cpu_cores.saturating_sub(cpu_cores);
        self.usage.memory_mb = self.usage.memory_mb.saturating_sub(memory_mb);
        self.usage.concurrent_jobs = self.usage.concurrent_jobs.saturating_sub(1);
    }
}
