//! The due-check scheduler: a fixed-cadence scan that asks the runner to
//! check every monitor whose interval has elapsed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::Mutex;
use tokio::time::interval;
use tracing::{error, info, warn};

use crate::db::entities::monitor;
use crate::db::services::monitor_service;
use crate::monitoring::clock::Clock;
use crate::monitoring::runner::CheckRunner;

/// A monitor is due when it has never been checked, or when at least its
/// interval has passed since the last check. The boundary instant counts
/// as due.
pub fn is_due(monitor: &monitor::Model, now: DateTime<Utc>) -> bool {
    match monitor.last_checked_at {
        None => true,
        Some(last) => now >= last + chrono::Duration::minutes(i64::from(monitor.interval_minutes)),
    }
}

pub struct Scheduler {
    db: DatabaseConnection,
    runner: Arc<CheckRunner>,
    clock: Arc<dyn Clock>,
    cadence: Duration,
    cycle_lock: Mutex<()>,
}

impl Scheduler {
    pub fn new(
        db: DatabaseConnection,
        runner: Arc<CheckRunner>,
        clock: Arc<dyn Clock>,
        cadence: Duration,
    ) -> Self {
        Self {
            db,
            runner,
            clock,
            cadence,
            cycle_lock: Mutex::new(()),
        }
    }

    /// Runs scheduling cycles forever. Meant to be spawned once at startup;
    /// a failed cycle is logged and the cadence simply continues.
    pub async fn start(self: Arc<Self>) {
        info!(
            cadence_seconds = self.cadence.as_secs(),
            "due-check scheduler started"
        );
        let mut ticker = interval(self.cadence);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run_once().await {
                error!(error = %err, "scheduling cycle failed");
            }
        }
    }

    /// One scheduling cycle over a snapshot of all non-paused monitors.
    /// Cycles are single-flight: if a previous cycle is somehow still
    /// running, this one skips instead of piling up.
    pub async fn run_once(&self) -> Result<usize, DbErr> {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!("previous scheduling cycle still running, skipping this one");
            return Ok(0);
        };

        let now = self.clock.now();
        let monitors = monitor_service::list_schedulable(&self.db).await?;

        let mut dispatched = 0;
        for monitor in &monitors {
            if is_due(monitor, now) && self.runner.spawn_check(monitor.id) {
                dispatched += 1;
            }
        }

        if dispatched > 0 {
            info!(
                dispatched,
                scanned = monitors.len(),
                "dispatched due monitor checks"
            );
        }
        Ok(dispatched)
    }
}
