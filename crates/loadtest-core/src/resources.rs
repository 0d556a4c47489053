//! System resource sampling
//!
//! The monitoring loop samples system-wide CPU and memory utilisation
//! synchronously once per tick.

use serde::Serialize;
use sysinfo::System;

/// One utilisation sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ResourceSample {
    /// Global CPU utilisation, 0-100
    pub cpu_percent: f32,
    /// Memory in use, 0-100
    pub memory_percent: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
}

impl ResourceSample {
    pub fn memory_used_gb(&self) -> f64 {
        self.memory_used_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    pub fn memory_total_gb(&self) -> f64 {
        self.memory_total_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Resource sampling failure
#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Resource information unavailable: {0}")]
    Unavailable(String),
}

/// Source of utilisation samples
pub trait ResourceMonitor: Send + Sync {
    fn sample(&mut self) -> Result<ResourceSample, ResourceError>;
}

/// Samples the host through `sysinfo`.
///
/// CPU usage is measured between consecutive refreshes, so the first sample
/// after construction reads close to zero.
pub struct SystemResourceMonitor {
    system: System,
}

impl SystemResourceMonitor {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SystemResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn sample(&mut self) -> Result<ResourceSample, ResourceError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        if total == 0 {
            return Err(ResourceError::Unavailable(
                "total memory reported as zero".to_string(),
            ));
        }

        let available = self.system.available_memory();
        let used = total.saturating_sub(available);

        Ok(ResourceSample {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            memory_percent: (used as f64 / total as f64 * 100.0) as f32,
            memory_used_bytes: used,
            memory_total_bytes: total,
        })
    }
}
