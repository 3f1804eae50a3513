//! Device probes.
//!
//! [`NvmlProbe`] reads live devices through the NVIDIA Management Library.
//! NVML is optional: on a host without NVIDIA drivers the probe logs a
//! warning once and reports zero devices. [`StaticProbe`] returns scripted
//! snapshots for tests and CPU-only deployments.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use brainns_core::gpu::GpuSnapshot;
use nvml_wrapper::Nvml;

use crate::error::GpuError;

#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// Current load and memory use of every visible device.
    async fn snapshot(&self) -> Result<Vec<GpuSnapshot>, GpuError>;
}

// ---------------------------------------------------------------------------
// NVML
// ---------------------------------------------------------------------------

pub struct NvmlProbe {
    /// `None` when NVML could not be initialised (no drivers / no GPU).
    nvml: Option<Nvml>,
}

impl Default for NvmlProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NvmlProbe {
    pub fn new() -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => {
                tracing::info!("NVML initialised");
                Some(nvml)
            }
            Err(e) => {
                tracing::warn!(error = %e, "NVML unavailable -- no GPU will ever be allocated");
                None
            }
        };
        Self { nvml }
    }

    pub fn is_available(&self) -> bool {
        self.nvml.is_some()
    }

    fn read_device(nvml: &Nvml, index: u32) -> Result<GpuSnapshot, GpuError> {
        let device = nvml.device_by_index(index)?;
        let memory = device.memory_info()?;
        let utilization = device.utilization_rates()?;

        let memory_used = if memory.total == 0 {
            1.0
        } else {
            memory.used as f64 / memory.total as f64
        };
        Ok(GpuSnapshot {
            index,
            load: f64::from(utilization.gpu) / 100.0,
            memory_used,
        })
    }
}

#[async_trait]
impl DeviceProbe for NvmlProbe {
    async fn snapshot(&self) -> Result<Vec<GpuSnapshot>, GpuError> {
        let Some(nvml) = self.nvml.as_ref() else {
            return Ok(Vec::new());
        };

        let count = nvml.device_count()?;
        let mut gpus = Vec::with_capacity(count as usize);
        for index in 0..count {
            match Self::read_device(nvml, index) {
                Ok(gpu) => gpus.push(gpu),
                Err(e) => {
                    tracing::warn!(gpu_index = index, error = %e, "Skipping GPU -- probe failed");
                }
            }
        }
        Ok(gpus)
    }
}

// ---------------------------------------------------------------------------
// Static
// ---------------------------------------------------------------------------

/// Probe returning a fixed sequence of readings.
///
/// Each call returns the next scripted reading; the last one repeats.
/// With no readings every call reports zero devices.
#[derive(Default)]
pub struct StaticProbe {
    readings: Mutex<Vec<Vec<GpuSnapshot>>>,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn new(readings: Vec<Vec<GpuSnapshot>>) -> Self {
        Self {
            readings: Mutex::new(readings),
            calls: AtomicUsize::new(0),
        }
    }

    /// Always report the same devices.
    pub fn fixed(gpus: Vec<GpuSnapshot>) -> Self {
        Self::new(vec![gpus])
    }

    /// Number of `snapshot` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceProbe for StaticProbe {
    async fn snapshot(&self) -> Result<Vec<GpuSnapshot>, GpuError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let readings = self
            .readings
            .lock()
            .map_err(|_| GpuError::Probe("static probe lock poisoned".into()))?;
        Ok(readings
            .get(call)
            .or_else(|| readings.last())
            .cloned()
            .unwrap_or_default())
    }
}
