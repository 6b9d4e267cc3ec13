//! FleetScheduler - bounded parallel scans over a device list
//!
//! ```text
//! devices ─► semaphore (concurrency) ─► JoinSet task per device ─► results channel
//!                                         └─ timeout(retry(scan))
//! ```
//!
//! A device never escapes as an error: timeouts, panics and exhausted
//! retries all come back as a failed `ScanResult`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, warn};

use crate::analyzer::DeviceScanner;
use crate::config::{RetryConfig, ScanConfig};
use crate::{Device, ScanError, ScanResult};

/// Retries for transient transport failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            multiplier: 1.0,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        self.initial_backoff.mul_f64(factor)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            multiplier: config.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanPolicy {
    pub concurrency: usize,
    pub per_device_timeout: Duration,
    pub retry: RetryPolicy,
}

impl From<&ScanConfig> for ScanPolicy {
    fn from(config: &ScanConfig) -> Self {
        Self {
            concurrency: config.concurrency,
            per_device_timeout: Duration::from_secs(config.per_device_timeout_secs),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

pub struct FleetScheduler {
    scanner: Arc<dyn DeviceScanner>,
    policy: ScanPolicy,
}

impl FleetScheduler {
    pub fn new(scanner: Arc<dyn DeviceScanner>, policy: ScanPolicy) -> Self {
        Self { scanner, policy }
    }

    pub fn policy(&self) -> &ScanPolicy {
        &self.policy
    }

    /// Starts scanning `devices` and streams `(index, result)` pairs in
    /// completion order, `index` pointing into `devices`.
    ///
    /// At most `concurrency` scans run at once. A slow consumer holds back
    /// new scans rather than letting results pile up. Dropping the receiver
    /// cancels the remaining scans.
    pub fn scan_each(&self, devices: Vec<Device>) -> mpsc::Receiver<(usize, ScanResult)> {
        let concurrency = self.policy.concurrency.max(1);
        let (tx, rx) = mpsc::channel(concurrency);
        let scanner = Arc::clone(&self.scanner);
        let policy = self.policy.clone();

        tokio::spawn(async move {
            let permits = Arc::new(Semaphore::new(concurrency));
            let mut tasks = JoinSet::new();

            for (index, device) in devices.into_iter().enumerate() {
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };
                if tx.is_closed() {
                    debug!("result receiver dropped, not starting remaining scans");
                    break;
                }

                let scanner = Arc::clone(&scanner);
                let policy = policy.clone();
                let tx = tx.clone();

                tasks.spawn(async move {
                    let result = scan_device(scanner.as_ref(), &device, &policy).await;
                    let _ = tx.send((index, result)).await;
                    drop(permit);
                });
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("scan task ended abnormally: {e}");
                }
            }
        });

        rx
    }

    /// Scans every device and returns one result per device, in input order.
    pub async fn scan_all(&self, devices: Vec<Device>) -> Vec<ScanResult> {
        let ids: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        let mut slots: Vec<Option<ScanResult>> = vec![None; ids.len()];

        let mut results = self.scan_each(devices);
        while let Some((index, result)) = results.recv().await {
            if let Some(slot) = slots.get_mut(index) {
                *slot = Some(result);
            }
        }

        slots
            .into_iter()
            .zip(ids)
            .map(|(slot, id)| {
                slot.unwrap_or_else(|| {
                    ScanResult::failed(id, ScanError::Internal("scan never reported".to_string()))
                })
            })
            .collect()
    }
}

/// One device, bounded by the per-device timeout and shielded from panics.
#[instrument(skip(scanner, device, policy), fields(device = %device.id))]
async fn scan_device(scanner: &dyn DeviceScanner, device: &Device, policy: &ScanPolicy) -> ScanResult {
    let attempt = AssertUnwindSafe(scan_with_retry(scanner, device, &policy.retry)).catch_unwind();

    match tokio::time::timeout(policy.per_device_timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            error!("scan panicked");
            ScanResult::failed(&device.id, ScanError::Internal("scan task panicked".to_string()))
        }
        Err(_) => {
            warn!("scan exceeded {}s, cancelled", policy.per_device_timeout.as_secs());
            ScanResult::failed(&device.id, ScanError::Timeout(policy.per_device_timeout))
        }
    }
}

async fn scan_with_retry(scanner: &dyn DeviceScanner, device: &Device, retry: &RetryPolicy) -> ScanResult {
    let mut attempt = 1;
    loop {
        let mut result = scanner.scan(device).await;
        result.attempts = attempt;

        if !result.is_retryable() || attempt > retry.max_retries {
            return result;
        }

        let delay = retry.backoff(attempt);
        debug!(
            "attempt {attempt} failed ({}), retrying in {}ms",
            result.error.as_deref().unwrap_or("unknown error"),
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
