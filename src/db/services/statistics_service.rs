//! Uptime and latency aggregates over the check history, plus the refresh
//! of the cached percentage columns on the monitor row.

use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::{Alias, Expr, Func};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, FromQueryResult,
    PaginatorTrait, QueryFilter, QuerySelect, Set,
};

use crate::db::entities::{check, incident, monitor, prelude::*};

#[derive(Debug, FromQueryResult)]
struct AvgRow {
    value: Option<f64>,
}

/// Reporting read-model over one trailing window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowStats {
    pub total_checks: u64,
    pub failed_checks: u64,
    /// Mean latency of successful checks, None when there were none.
    pub avg_response_time_ms: Option<f64>,
    /// Incidents that started inside the window.
    pub incidents: u64,
}

/// Share of successful checks over the trailing window, in percent with
/// two decimals. A monitor with no checks in the window counts as fully
/// up rather than fully down.
pub async fn uptime_percentage(
    db: &DatabaseConnection,
    monitor_id: i32,
    window_days: i64,
    now: DateTime<Utc>,
) -> Result<f64, DbErr> {
    let since = now - Duration::days(window_days);
    let in_window = Check::find()
        .filter(check::Column::MonitorId.eq(monitor_id))
        .filter(check::Column::CheckedAt.gte(since));

    let (total, up) = futures::try_join!(
        in_window.clone().count(db),
        in_window.filter(check::Column::IsUp.eq(true)).count(db),
    )?;

    if total == 0 {
        return Ok(100.0);
    }
    Ok((up as f64 / total as f64 * 10000.0).round() / 100.0)
}

pub async fn average_response_time(
    db: &DatabaseConnection,
    monitor_id: i32,
    window_days: i64,
    now: DateTime<Utc>,
) -> Result<Option<f64>, DbErr> {
    let since = now - Duration::days(window_days);
    let row = Check::find()
        .select_only()
        .column_as(
            Expr::expr(Func::avg(Expr::col(check::Column::ResponseTimeMs)))
                .cast_as(Alias::new("double precision")),
            "value",
        )
        .filter(check::Column::MonitorId.eq(monitor_id))
        .filter(check::Column::CheckedAt.gte(since))
        .filter(check::Column::ResponseTimeMs.is_not_null())
        .into_model::<AvgRow>()
        .one(db)
        .await?;

    Ok(row.and_then(|row| row.value))
}

/// Aggregates one trailing window for the reporting read-model consumed by
/// dashboards.
pub async fn window_stats(
    db: &DatabaseConnection,
    monitor_id: i32,
    window_days: i64,
    now: DateTime<Utc>,
) -> Result<WindowStats, DbErr> {
    let since = now - Duration::days(window_days);
    let in_window = Check::find()
        .filter(check::Column::MonitorId.eq(monitor_id))
        .filter(check::Column::CheckedAt.gte(since));

    let (total_checks, failed_checks, incidents, avg_response_time_ms) = futures::try_join!(
        in_window.clone().count(db),
        in_window.filter(check::Column::IsUp.eq(false)).count(db),
        Incident::find()
            .filter(incident::Column::MonitorId.eq(monitor_id))
            .filter(incident::Column::StartedAt.gte(since))
            .count(db),
        average_response_time(db, monitor_id, window_days, now),
    )?;

    Ok(WindowStats {
        total_checks,
        failed_checks,
        avg_response_time_ms,
        incidents,
    })
}

/// Recomputes the 7 and 30 day uptime caches on the monitor row.
pub async fn refresh_monitor_stats(
    db: &DatabaseConnection,
    monitor: &monitor::Model,
    now: DateTime<Utc>,
) -> Result<monitor::Model, DbErr> {
    let (uptime_7d, uptime_30d) = futures::try_join!(
        uptime_percentage(db, monitor.id, 7, now),
        uptime_percentage(db, monitor.id, 30, now),
    )?;

    let mut active: monitor::ActiveModel = monitor.clone().into();
    active.uptime_7d = Set(uptime_7d);
    active.uptime_30d = Set(uptime_30d);
    active.updated_at = Set(now);
    active.update(db).await
}
