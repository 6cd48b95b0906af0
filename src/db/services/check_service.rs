//! Append-only check history plus the denormalized cache columns on the
//! monitor row. Both writes happen in one transaction so dashboards never
//! see a check without its matching cache state.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

use crate::db::entities::{check, monitor, prelude::*};
use crate::db::enums::{CheckErrorType, MonitorStatus};

/// Data for one check row, produced by a finished probe.
#[derive(Debug, Clone, Default)]
pub struct NewCheck {
    pub is_up: bool,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i32>,
    pub ssl_valid: Option<bool>,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub keyword_found: Option<bool>,
    pub error_message: Option<String>,
    pub error_type: Option<CheckErrorType>,
    pub checked_at: DateTime<Utc>,
}

/// Inserts the check and refreshes the monitor's cached result columns.
/// The cache always mirrors the latest check, including `None` values, so
/// a transport failure clears the previous status code instead of leaving
/// a stale one behind.
pub async fn record_check(
    db: &DatabaseConnection,
    monitor: &monitor::Model,
    data: NewCheck,
    now: DateTime<Utc>,
) -> Result<(check::Model, monitor::Model), DbErr> {
    let txn = db.begin().await?;

    let new_check = check::ActiveModel {
        monitor_id: Set(monitor.id),
        is_up: Set(data.is_up),
        status_code: Set(data.status_code),
        response_time_ms: Set(data.response_time_ms),
        ssl_valid: Set(data.ssl_valid),
        ssl_expires_at: Set(data.ssl_expires_at),
        keyword_found: Set(data.keyword_found),
        error_message: Set(data.error_message),
        error_type: Set(data.error_type),
        checked_at: Set(data.checked_at),
        ..Default::default()
    };
    let saved_check = new_check.insert(&txn).await?;

    let mut cached: monitor::ActiveModel = monitor.clone().into();
    cached.status = Set(if saved_check.is_up {
        MonitorStatus::Up
    } else {
        MonitorStatus::Down
    });
    cached.last_checked_at = Set(Some(saved_check.checked_at));
    cached.last_status_code = Set(saved_check.status_code);
    cached.last_response_time_ms = Set(saved_check.response_time_ms);
    cached.updated_at = Set(now);
    let refreshed = cached.update(&txn).await?;

    txn.commit().await?;
    Ok((saved_check, refreshed))
}

pub async fn recent_checks(
    db: &DatabaseConnection,
    monitor_id: i32,
    limit: u64,
) -> Result<Vec<check::Model>, DbErr> {
    Check::find()
        .filter(check::Column::MonitorId.eq(monitor_id))
        .order_by_desc(check::Column::CheckedAt)
        .limit(limit)
        .all(db)
        .await
}
