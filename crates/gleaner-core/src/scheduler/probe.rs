//! Machine load probes used for pool sizing and record snapshots.

use std::sync::{Mutex, PoisonError};

use sysinfo::System;

use crate::engine::ResourceSnapshot;

/// Source of the current CPU and memory utilisation.
pub trait SystemProbe: Send + Sync {
    /// `None` when the probe cannot read the system.
    fn snapshot(&self) -> Option<ResourceSnapshot>;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }
}

impl SystemProbe for SysinfoProbe {
    fn snapshot(&self) -> Option<ResourceSnapshot> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return None;
        }
        let memory_percent = (system.used_memory() as f64 / total as f64 * 100.0) as f32;
        let cpu_percent = system.global_cpu_usage();
        if !cpu_percent.is_finite() {
            return None;
        }
        Some(ResourceSnapshot {
            cpu_percent: cpu_percent.clamp(0.0, 100.0),
            memory_percent: memory_percent.clamp(0.0, 100.0),
        })
    }
}

/// Fixed answer, for tests and for machines where probing is unwanted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticProbe(pub Option<ResourceSnapshot>);

impl StaticProbe {
    pub fn new(cpu_percent: f32, memory_percent: f32) -> Self {
        Self(Some(ResourceSnapshot {
            cpu_percent,
            memory_percent,
        }))
    }

    /// 0% CPU and memory.
    pub fn idle() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Always reports that the system could not be read.
    pub fn unavailable() -> Self {
        Self(None)
    }
}

impl SystemProbe for StaticProbe {
    fn snapshot(&self) -> Option<ResourceSnapshot> {
        self.0
    }
}
