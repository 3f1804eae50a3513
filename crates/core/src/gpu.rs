//! GPU selection policy.
//!
//! Pure part of the allocator: given a snapshot of every device, pick one
//! that is idle enough. Probing and retrying live in `brainns-gpu`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Point-in-time reading of one device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub index: u32,
    /// Utilization in `0.0..=1.0`.
    pub load: f64,
    /// Used fraction of device memory in `0.0..=1.0`.
    pub memory_used: f64,
}

/// Order in which qualifying devices are preferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuOrder {
    /// Least used memory first.
    #[default]
    FreeMemory,
    /// Lowest utilization first.
    Load,
    /// Lowest index first.
    First,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquirePolicy {
    pub order: GpuOrder,
    pub max_load: f64,
    pub max_memory: f64,
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for AcquirePolicy {
    fn default() -> Self {
        Self {
            order: GpuOrder::FreeMemory,
            max_load: 0.5,
            max_memory: 0.5,
            attempts: 100,
            interval: Duration::from_secs(5),
        }
    }
}

impl AcquirePolicy {
    pub fn qualifies(&self, gpu: &GpuSnapshot) -> bool {
        gpu.load <= self.max_load && gpu.memory_used <= self.max_memory
    }

    /// Index of the preferred qualifying device, if any.
    pub fn select_device(&self, gpus: &[GpuSnapshot]) -> Option<u32> {
        let mut candidates: Vec<&GpuSnapshot> =
            gpus.iter().filter(|gpu| self.qualifies(gpu)).collect();
        match self.order {
            GpuOrder::FreeMemory => candidates.sort_by(|a, b| {
                a.memory_used
                    .total_cmp(&b.memory_used)
                    .then(a.index.cmp(&b.index))
            }),
            GpuOrder::Load => {
                candidates.sort_by(|a, b| a.load.total_cmp(&b.load).then(a.index.cmp(&b.index)))
            }
            GpuOrder::First => candidates.sort_by_key(|gpu| gpu.index),
        }
        candidates.first().map(|gpu| gpu.index)
    }
}
