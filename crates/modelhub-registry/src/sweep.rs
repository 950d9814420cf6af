//! Periodic retention sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::catalog::VersionCatalog;

/// Outcome of one sweep iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub models_scanned: usize,
    pub versions_deleted: usize,
    pub finished_at: DateTime<Utc>,
}

struct SweepTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Owns the background sweep task.
pub struct RetentionSweeper {
    catalog: Arc<VersionCatalog>,
    retention_days: u32,
    period: Duration,
    last_report: Arc<Mutex<Option<SweepReport>>>,
    task: Mutex<Option<SweepTask>>,
}

impl RetentionSweeper {
    pub fn new(catalog: Arc<VersionCatalog>, retention_days: u32, period: Duration) -> Self {
        RetentionSweeper {
            catalog,
            retention_days,
            period,
            last_report: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Run one iteration now.
    pub async fn sweep_once(&self) -> SweepReport {
        let report = run_sweep(&self.catalog, self.retention_days).await;
        *self.last_report.lock() = Some(report.clone());
        report
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.last_report.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Spawn the periodic task. The first iteration runs one period after
    /// the call. Does nothing if the task is already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("retention sweep already running");
            return;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let catalog = self.catalog.clone();
        let last_report = self.last_report.clone();
        let retention_days = self.retention_days;
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }
                // Not raced against shutdown: an iteration that has started
                // always finishes.
                let report = run_sweep(&catalog, retention_days).await;
                *last_report.lock() = Some(report);
            }
            debug!("retention sweep loop exited");
        });

        info!(period_secs = period.as_secs_f64(), retention_days, "retention sweep started");
        *task = Some(SweepTask { shutdown, handle });
    }

    /// Signal the task and wait for it, including any iteration in flight.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };
        let _ = task.shutdown.send(true);
        match task.handle.await {
            Ok(()) => info!("retention sweep stopped"),
            Err(e) if e.is_panic() => error!("retention sweep panicked: {e}"),
            Err(e) => error!("retention sweep did not shut down cleanly: {e}"),
        }
    }
}

impl Drop for RetentionSweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            let _ = task.shutdown.send(true);
        }
    }
}

async fn run_sweep(catalog: &VersionCatalog, retention_days: u32) -> SweepReport {
    let models = catalog.model_ids();
    let mut versions_deleted = 0;
    for model_id in &models {
        versions_deleted += catalog.cleanup_old_versions(model_id, retention_days).await;
    }
    let report = SweepReport {
        models_scanned: models.len(),
        versions_deleted,
        finished_at: Utc::now(),
    };
    info!(models = report.models_scanned, deleted = report.versions_deleted, "retention sweep finished");
    report
}
