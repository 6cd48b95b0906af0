//! The check task runner: one spawned task per due monitor, bounded by a
//! worker pool, with per-monitor exclusivity so the same monitor is never
//! probed twice concurrently.
//!
//! The pipeline inside each task is strictly sequential: re-fetch, probe,
//! record, refresh stats, reconcile the incident, dispatch notifications.
//! Infrastructure writes get a few bounded retries; the notification
//! dispatch is attempted exactly once. Whatever happens, the task finishes
//! within its timeout envelope and releases the monitor's slot.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::db::enums::MonitorStatus;
use crate::db::services::{check_service, monitor_service, statistics_service};
use crate::monitoring::clock::Clock;
use crate::monitoring::incident::{self, IncidentTransition};
use crate::monitoring::probe::{CheckConfig, HttpProber, ProbeSpec};
use crate::notifications::content::NotificationKind;
use crate::notifications::dispatcher::Dispatcher;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Size of the worker pool.
    pub max_concurrent_checks: usize,
    /// Hard envelope for one whole check task.
    pub task_timeout: Duration,
    /// Attempts for each infrastructure stage (record, reconcile).
    pub stage_attempts: u32,
    pub stage_retry_delay: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            max_concurrent_checks: 16,
            task_timeout: Duration::from_secs(60),
            stage_attempts: 3,
            stage_retry_delay: Duration::from_millis(150),
        }
    }
}

pub struct CheckRunner {
    db: DatabaseConnection,
    prober: HttpProber,
    check_config: CheckConfig,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    settings: RunnerSettings,
    permits: Semaphore,
    in_flight: DashSet<i32>,
}

impl CheckRunner {
    pub fn new(
        db: DatabaseConnection,
        prober: HttpProber,
        check_config: CheckConfig,
        dispatcher: Dispatcher,
        clock: Arc<dyn Clock>,
        settings: RunnerSettings,
    ) -> Self {
        let permits = Semaphore::new(settings.max_concurrent_checks);
        Self {
            db,
            prober,
            check_config,
            dispatcher,
            clock,
            settings,
            permits,
            in_flight: DashSet::new(),
        }
    }

    /// Claims the monitor's in-flight slot and spawns its check task.
    /// Returns false when a task for this monitor is already running; the
    /// duplicate is dropped silently and the monitor is re-picked at a
    /// later cycle.
    pub fn spawn_check(self: &Arc<Self>, monitor_id: i32) -> bool {
        if !self.in_flight.insert(monitor_id) {
            debug!(monitor_id, "check already in flight, skipping");
            return false;
        }

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.run_guarded(monitor_id).await;
        });
        true
    }

    async fn run_guarded(&self, monitor_id: i32) {
        // The slot is released on every exit path, unwinding included; a
        // panicking task must not leave its monitor permanently claimed.
        let _slot = InFlightSlot {
            runner: self,
            monitor_id,
        };
        match self.permits.acquire().await {
            Ok(_permit) => {
                let envelope =
                    tokio::time::timeout(self.settings.task_timeout, self.run_pipeline(monitor_id));
                match envelope.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => {
                        error!(monitor_id, error = %err, "check task failed");
                    }
                    Err(_) => {
                        error!(
                            monitor_id,
                            timeout_seconds = self.settings.task_timeout.as_secs(),
                            "check task timed out"
                        );
                    }
                }
            }
            Err(_) => {
                error!(monitor_id, "worker pool closed, dropping check");
            }
        }
    }

    async fn run_pipeline(&self, monitor_id: i32) -> Result<(), DbErr> {
        // The monitor may have been deleted or paused between scheduling
        // and execution; the snapshot the scheduler saw is not trusted.
        let Some(monitor) = monitor_service::find_by_id(&self.db, monitor_id).await? else {
            debug!(monitor_id, "monitor vanished before its check ran");
            return Ok(());
        };
        if monitor.status == MonitorStatus::Paused {
            debug!(monitor_id, "monitor paused after being scheduled, skipping");
            return Ok(());
        }

        let spec = ProbeSpec::from_monitor(&monitor, &self.check_config);
        let outcome = self.prober.probe(&spec).await;
        let checked_at = self.clock.now();

        let data = outcome.into_check(checked_at);
        let (recorded, refreshed) = self
            .with_retries("record check", monitor_id, || {
                check_service::record_check(&self.db, &monitor, data.clone(), checked_at)
            })
            .await?;

        // Stats are derived data; a failed refresh is worth a warning but
        // never blocks incident handling.
        let refreshed = match statistics_service::refresh_monitor_stats(
            &self.db, &refreshed, checked_at,
        )
        .await
        {
            Ok(model) => model,
            Err(err) => {
                warn!(monitor_id, error = %err, "uptime stats refresh failed");
                refreshed
            }
        };

        let transition = self
            .with_retries("reconcile incident", monitor_id, || {
                incident::reconcile(&self.db, &refreshed, &recorded, checked_at)
            })
            .await?;

        match transition {
            Some(IncidentTransition::Opened(opened)) => {
                self.dispatcher
                    .dispatch(
                        &self.db,
                        &refreshed,
                        &opened,
                        NotificationKind::Down,
                        self.clock.now(),
                    )
                    .await?;
            }
            Some(IncidentTransition::Resolved(resolved)) => {
                self.dispatcher
                    .dispatch(
                        &self.db,
                        &refreshed,
                        &resolved,
                        NotificationKind::Recovered,
                        self.clock.now(),
                    )
                    .await?;
            }
            Some(IncidentTransition::Continued(_)) | None => {}
        }

        Ok(())
    }

    async fn with_retries<T, F, Fut>(
        &self,
        stage: &'static str,
        monitor_id: i32,
        mut operation: F,
    ) -> Result<T, DbErr>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DbErr>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.settings.stage_attempts => {
                    warn!(monitor_id, stage, attempt, error = %err, "stage failed, retrying");
                    tokio::time::sleep(self.settings.stage_retry_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

/// Releases a monitor's in-flight claim when dropped.
struct InFlightSlot<'a> {
    runner: &'a CheckRunner,
    monitor_id: i32,
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.runner.in_flight.remove(&self.monitor_id);
    }
}
