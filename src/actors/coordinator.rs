//! ScanCoordinator - owns the fleet scan schedule
//!
//! ```text
//! interval tick ─┐
//! TriggerScan ───┼─► fleet scan task ─► FleetScheduler ─► per result:
//!                │                        report status ─► device_status_update
//!                │                        reconcile     ─► alert_update
//!                │                        collect logs (optional, own task)
//! daily tick ────┴─► delete old resolved alerts
//! ```
//!
//! Only one fleet scan runs at a time. It runs in its own task so the actor
//! keeps answering commands while devices are being scanned. Log collection
//! is spawned per device and bounded by the per-device timeout, so a slow log
//! service never holds up the results of other devices.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, instrument, warn};

use crate::alerts::AlertReconciler;
use crate::Device;
use crate::devices::DeviceRegistry;
use crate::log_collector::LogCollector;
use crate::realtime::RealtimeEvent;

use super::messages::{CoordinatorCommand, FleetScanSummary, TriggerResponse};
use super::notifier::NotifierHandle;
use super::scheduler::FleetScheduler;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Everything a fleet scan needs, shared with the scan task.
#[derive(Clone)]
pub struct FleetPipeline {
    pub registry: Arc<dyn DeviceRegistry>,
    pub scheduler: Arc<FleetScheduler>,
    pub reconciler: AlertReconciler,
    pub notifier: NotifierHandle,
    /// Collects event logs after each successful hardware fetch when set
    pub log_collector: Option<Arc<LogCollector>>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Periodic scans; `None` means manual triggers only
    pub scan_interval: Option<Duration>,
    pub min_trigger_interval: Duration,
    pub resolved_retention_days: u32,
}

pub struct ScanCoordinator {
    pipeline: FleetPipeline,
    settings: CoordinatorSettings,
    command_rx: mpsc::Receiver<CoordinatorCommand>,
    done_tx: mpsc::Sender<FleetScanSummary>,
    done_rx: mpsc::Receiver<FleetScanSummary>,
    running: Option<JoinHandle<()>>,
    last_completed: Option<Instant>,
    last_summary: Option<FleetScanSummary>,
}

impl ScanCoordinator {
    pub fn new(
        pipeline: FleetPipeline,
        settings: CoordinatorSettings,
        command_rx: mpsc::Receiver<CoordinatorCommand>,
    ) -> Self {
        let (done_tx, done_rx) = mpsc::channel(1);
        Self {
            pipeline,
            settings,
            command_rx,
            done_tx,
            done_rx,
            running: None,
            last_completed: None,
            last_summary: None,
        }
    }

    pub async fn run(mut self) {
        debug!("starting scan coordinator");

        let periodic = self.settings.scan_interval.is_some();
        let mut scan_ticker = interval(self.settings.scan_interval.unwrap_or(CLEANUP_INTERVAL));
        scan_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cleanup_ticker = interval(CLEANUP_INTERVAL);

        loop {
            tokio::select! {
                _ = scan_ticker.tick(), if periodic => {
                    if self.running.is_some() {
                        debug!("previous fleet scan still running, skipping tick");
                    } else {
                        self.start_scan(false);
                    }
                }

                _ = cleanup_ticker.tick() => {
                    self.cleanup_resolved().await;
                }

                Some(summary) = self.done_rx.recv() => {
                    self.running = None;
                    self.last_completed = Some(Instant::now());
                    self.last_summary = Some(summary);
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        CoordinatorCommand::TriggerScan { force, respond_to } => {
                            let response = self.trigger(force);
                            let _ = respond_to.send(response);
                        }

                        CoordinatorCommand::GetLastSummary { respond_to } => {
                            let _ = respond_to.send(self.last_summary.clone());
                        }

                        CoordinatorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        if let Some(scan) = self.running.take() {
            info!("cancelling fleet scan in progress");
            scan.abort();
        }
        debug!("scan coordinator stopped");
    }

    fn trigger(&mut self, force: bool) -> TriggerResponse {
        if self.running.is_some() {
            return TriggerResponse::rejected("a fleet scan is already running");
        }

        if !force
            && let Some(completed) = self.last_completed
        {
            let since = completed.elapsed();
            if since < self.settings.min_trigger_interval {
                let wait = self.settings.min_trigger_interval - since;
                return TriggerResponse::rejected(format!(
                    "last scan finished {}s ago, retry in {}s or force the scan",
                    since.as_secs(),
                    wait.as_secs().max(1)
                ));
            }
        }

        self.start_scan(force);
        TriggerResponse::accepted()
    }

    fn start_scan(&mut self, forced: bool) {
        let pipeline = self.pipeline.clone();
        let done_tx = self.done_tx.clone();

        self.running = Some(tokio::spawn(async move {
            let summary = run_fleet_scan(&pipeline, forced).await;
            let _ = done_tx.send(summary).await;
        }));
    }

    async fn cleanup_resolved(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.settings.resolved_retention_days));
        match self.pipeline.reconciler.store().cleanup_resolved_alerts(cutoff).await {
            Ok(0) => debug!("no resolved alerts past retention"),
            Ok(removed) => info!("deleted {removed} resolved alerts older than {cutoff}"),
            Err(e) => error!("resolved alert cleanup failed: {e}"),
        }
    }
}

/// Scans every monitored device once and pushes what changed.
#[instrument(skip(pipeline))]
pub async fn run_fleet_scan(pipeline: &FleetPipeline, forced: bool) -> FleetScanSummary {
    let started_at = Utc::now();
    let devices = pipeline.registry.monitored_devices().await;
    info!("fleet scan started for {} devices", devices.len());

    publish(
        &pipeline.notifier,
        RealtimeEvent::ScanStarted {
            device_count: devices.len(),
            forced,
            timestamp: started_at,
        },
    )
    .await;

    let mut summary = FleetScanSummary {
        started_at,
        finished_at: started_at,
        forced,
        device_count: devices.len(),
        succeeded: 0,
        failed: 0,
        alert_changes: 0,
        failed_devices: Vec::new(),
    };

    let mut log_tasks = JoinSet::new();
    let log_timeout = pipeline.scheduler.policy().per_device_timeout;

    let mut results = pipeline.scheduler.scan_each(devices.clone());
    while let Some((index, result)) = results.recv().await {
        let Some(device) = devices.get(index) else {
            continue;
        };

        if result.success {
            summary.succeeded += 1;
        } else {
            summary.failed += 1;
            summary.failed_devices.push(device.id.clone());
        }

        let (previous, current) = pipeline.registry.report_status(&result).await;
        if previous.differs_visibly(&current) {
            publish(
                &pipeline.notifier,
                RealtimeEvent::device_status_update(&device.id, &current),
            )
            .await;
        }

        let deltas = pipeline.reconciler.reconcile(device, &result).await;
        summary.alert_changes += deltas.len();
        for delta in &deltas {
            publish(&pipeline.notifier, RealtimeEvent::alert_update(delta)).await;
        }

        if let Some(collector) = &pipeline.log_collector
            && result.hardware_fetched()
        {
            log_tasks.spawn(collect_logs(collector.clone(), device.clone(), log_timeout));
        }
    }

    while let Some(joined) = log_tasks.join_next().await {
        if let Err(e) = joined {
            error!("log collection task failed: {e}");
        }
    }

    summary.finished_at = Utc::now();
    let duration = summary.finished_at - summary.started_at;
    info!(
        "fleet scan finished in {}ms: {} ok, {} failed, {} alert changes",
        duration.num_milliseconds(),
        summary.succeeded,
        summary.failed,
        summary.alert_changes
    );

    publish(
        &pipeline.notifier,
        RealtimeEvent::ScanCompleted {
            device_count: summary.device_count,
            succeeded: summary.succeeded,
            failed: summary.failed,
            alert_changes: summary.alert_changes,
            duration_ms: u64::try_from(duration.num_milliseconds()).unwrap_or(0),
            timestamp: summary.finished_at,
        },
    )
    .await;

    summary
}

async fn collect_logs(collector: Arc<LogCollector>, device: Device, limit: Duration) {
    match tokio::time::timeout(limit, collector.collect(&device, false)).await {
        Ok(Ok(summary)) => debug!("collected {} log entries for {}", summary.total, device.id),
        Ok(Err(e)) => warn!("log collection for {} failed: {e:#}", device.id),
        Err(_) => warn!(
            "log collection for {} exceeded {}s, cancelled",
            device.id,
            limit.as_secs()
        ),
    }
}

async fn publish(notifier: &NotifierHandle, event: RealtimeEvent) {
    if let Err(e) = notifier.publish(event).await {
        warn!("dropping realtime event: {e:#}");
    }
}

/// Handle for the scan coordinator
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    pub fn spawn(pipeline: FleetPipeline, settings: CoordinatorSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        tokio::spawn(ScanCoordinator::new(pipeline, settings, cmd_rx).run());
        Self { sender: cmd_tx }
    }

    /// Asks for an out-of-cycle fleet scan.
    pub async fn trigger_scan(&self, force: bool) -> Result<TriggerResponse> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::TriggerScan {
                force,
                respond_to: tx,
            })
            .await
            .context("failed to send TriggerScan command")?;
        rx.await.context("failed to receive trigger response")
    }

    pub async fn last_summary(&self) -> Result<Option<FleetScanSummary>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::GetLastSummary { respond_to: tx })
            .await
            .context("failed to send GetLastSummary command")?;
        rx.await.context("failed to receive last summary")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CoordinatorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")
    }
}
