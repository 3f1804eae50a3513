//! Blocking, best-effort GPU allocation.

use std::sync::Arc;

use brainns_core::gpu::AcquirePolicy;

use crate::error::GpuError;
use crate::probe::DeviceProbe;

/// Polls a [`DeviceProbe`] until a device satisfies an [`AcquirePolicy`].
///
/// There is no allocation ledger: two jobs polling at the same moment may
/// pick the same device.
#[derive(Clone)]
pub struct GpuAllocator {
    probe: Arc<dyn DeviceProbe>,
}

impl GpuAllocator {
    pub fn new(probe: Arc<dyn DeviceProbe>) -> Self {
        Self { probe }
    }

    /// Index of a device that qualifies under `policy`.
    ///
    /// Probes at most `policy.attempts` times (at least once), sleeping
    /// `policy.interval` between probes. A failing probe counts as an
    /// attempt that saw no devices.
    pub async fn acquire(&self, policy: &AcquirePolicy) -> Result<u32, GpuError> {
        let attempts = policy.attempts.max(1);

        for attempt in 1..=attempts {
            let gpus = match self.probe.snapshot().await {
                Ok(gpus) => gpus,
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "GPU probe failed");
                    Vec::new()
                }
            };

            if let Some(index) = policy.select_device(&gpus) {
                tracing::info!(gpu_index = index, attempt, "GPU acquired");
                return Ok(index);
            }

            tracing::debug!(attempt, attempts, devices = gpus.len(), "No GPU free enough");
            if attempt < attempts {
                tokio::time::sleep(policy.interval).await;
            }
        }

        Err(GpuError::ResourceUnavailable { attempts })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use brainns_core::gpu::{GpuOrder, GpuSnapshot};

    use super::*;
    use crate::probe::StaticProbe;

    fn policy(attempts: u32) -> AcquirePolicy {
        AcquirePolicy {
            attempts,
            interval: Duration::ZERO,
            ..Default::default()
        }
    }

    fn gpu(index: u32, load: f64, memory_used: f64) -> GpuSnapshot {
        GpuSnapshot {
            index,
            load,
            memory_used,
        }
    }

    #[tokio::test]
    async fn gives_up_after_exactly_the_configured_attempts() {
        let probe = Arc::new(StaticProbe::default());
        let allocator = GpuAllocator::new(probe.clone());

        let result = allocator.acquire(&policy(3)).await;

        assert_matches!(result, Err(GpuError::ResourceUnavailable { attempts: 3 }));
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn waits_for_a_busy_device_to_free_up() {
        let probe = Arc::new(StaticProbe::new(vec![
            vec![gpu(0, 0.95, 0.9)],
            vec![gpu(0, 0.95, 0.9)],
            vec![gpu(0, 0.2, 0.3)],
        ]));
        let allocator = GpuAllocator::new(probe.clone());

        assert_eq!(allocator.acquire(&policy(5)).await.unwrap(), 0);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn prefers_device_with_most_free_memory() {
        let probe = Arc::new(StaticProbe::fixed(vec![
            gpu(0, 0.1, 0.4),
            gpu(1, 0.3, 0.05),
            gpu(2, 0.0, 0.9),
        ]));
        let allocator = GpuAllocator::new(probe);

        assert_eq!(allocator.acquire(&policy(1)).await.unwrap(), 1);

        let by_load = AcquirePolicy {
            order: GpuOrder::Load,
            ..policy(1)
        };
        assert_eq!(allocator.acquire(&by_load).await.unwrap(), 0);
    }
}
