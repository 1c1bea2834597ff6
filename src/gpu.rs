//! First-class GPU entity: per-device memory accounting, health, and the
//! denormalized allocation back-pointer (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GpuHealth {
    Healthy,
    Warning,
    Degraded,
    Unhealthy,
}

/// Live telemetry snapshot. The core never computes these; they arrive from
/// the (out-of-scope) node agent and are stored opaquely.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct GpuTelemetry {
    pub utilization_pct: f32,
    pub temperature_c: f32,
    pub power_draw_w: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gpu {
    pub id: String,
    pub node_id: String,
    pub index: u32,
    pub model: String,
    pub total_memory_mb: u64,
    pub used_memory_mb: u64,

    /// Denormalized back-pointer to the allocation currently holding this
    /// GPU, if any. `Allocation` owns the authoritative GPU id list (spec §3
    /// cyclic-reference design note); this field is just a fast lookup and
    /// must stay in sync with it.
    pub allocation_id: Option<String>,

    pub health: GpuHealth,
    pub thermal_throttled: bool,
    pub cooling_until: Option<DateTime<Utc>>,
    pub telemetry: GpuTelemetry,
}

impl Gpu {
    pub fn new(
        id: impl Into<String>,
        node_id: impl Into<String>,
        index: u32,
        model: impl Into<String>,
        total_memory_mb: u64,
    ) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            index,
            model: model.into(),
            total_memory_mb,
            used_memory_mb: 0,
            allocation_id: None,
            health: GpuHealth::Healthy,
            thermal_throttled: false,
            cooling_until: None,
            telemetry: GpuTelemetry::default(),
        }
    }

    pub fn free_memory_mb(&self) -> u64 {
        self.total_memory_mb.saturating_sub(self.used_memory_mb)
    }

    /// A GPU is available for a new allocation only when unclaimed and
    /// healthy; when `thermal_aware` is set, it must also be outside its
    /// post-throttle cooling window (spec §3, §4.2). Spec §6's
    /// `enable_thermal_aware = false` ignores `thermal_throttled` and
    /// `cooling_until` entirely, but never overrides `health`.
    pub fn is_available(&self, now: DateTime<Utc>, thermal_aware: bool) -> bool {
        self.allocation_id.is_none()
            && self.health == GpuHealth::Healthy
            && (!thermal_aware
                || (!self.thermal_throttled
                    && self.cooling_until.map(|until| now >= until).unwrap_or(true)))
    }

    pub fn claim(&mut self, allocation_id: impl Into<String>, memory_mb: u64) {
        self.allocation_id = Some(allocation_id.into());
        self.used_memory_mb = memory_mb;
    }

    pub fn release(&mut self) {
        self.allocation_id = None;
        self.used_memory_mb = 0;
    }

    pub fn enter_thermal_throttle(&mut self, cooling_until: DateTime<Utc>) {
        self.thermal_throttled = true;
        self.health = GpuHealth::Degraded;
        self.cooling_until = Some(cooling_until);
    }

    pub fn clear_thermal_throttle(&mut self) {
        self.thermal_throttled = false;
        self.cooling_until = None;
        if self.health == GpuHealth::Degraded {
            self.health = GpuHealth::Healthy;
        }
    }

    /// Interprets one telemetry temperature reading against `threshold_c`
    /// (spec §6 `thermal_threshold`: "°C above which a GPU is marked
    /// throttled"). Crossing it throttles the GPU until `cooling_until`;
    /// dropping back under it while already past the cooling window clears
    /// the throttle. The core never samples temperature itself — this is
    /// invoked with readings handed in by the (out-of-scope) node agent.
    pub fn observe_temperature(
        &mut self,
        temperature_c: f32,
        threshold_c: f32,
        now: DateTime<Utc>,
        cooling_until: DateTime<Utc>,
    ) {
        self.telemetry.temperature_c = temperature_c;
        if temperature_c > threshold_c {
            self.enter_thermal_throttle(cooling_until);
        } else if self.thermal_throttled && self.cooling_until.map(|u| now >= u).unwrap_or(true) {
            self.clear_thermal_throttle();
        }
    }
}
