//! The bounded device fan-out: parallel workers across devices, serialized
//! per device.

use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use log::warn;
use rayon::prelude::*;

use dnaas_api::error::{ConcurrencyError, DnaasError, InternalError, ReportError};
use dnaas_api::status::{DeviceOutcome, DeviceReport};

/// Per-device mutex registry. Two operations targeting the same device never
/// run concurrently; the second queues on the device's mutex.
#[derive(Debug, Default)]
pub struct DeviceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DeviceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock for `device`, created on first use.
    pub fn for_device(&self, device: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(device.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Runs `worker` once per device on a bounded pool and returns the keyed
/// result map. Worker panics are contained and reported as errors on the
/// affected device only.
pub fn fan_out<F>(
    devices: &[String],
    max_parallel: usize,
    worker: F,
) -> Result<BTreeMap<String, DeviceReport>, DnaasError>
where
    F: Fn(&str) -> DeviceReport + Sync,
{
    let threads = max_parallel.min(devices.len()).max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .structured(InternalError::Internal("failed to build worker pool"))?;

    Ok(pool.install(|| {
        devices
            .par_iter()
            .map(|device| {
                let report = catch_unwind(AssertUnwindSafe(|| worker(device)))
                    .unwrap_or_else(|_| {
                        warn!("Worker for device '{device}' panicked");
                        DeviceReport {
                            device: device.clone(),
                            outcome: DeviceOutcome::Error {
                                category: "concurrency".to_string(),
                                detail: ConcurrencyError::WorkerPanic {
                                    device: device.clone(),
                                }
                                .to_string(),
                            },
                            captures: Vec::new(),
                        }
                    });
                (device.clone(), report)
            })
            .collect()
    }))
}
