//! Monitor lifecycle operations and the snapshot reads used by the
//! scheduler. Creation is gated by the caller-supplied plan limit; billing
//! bookkeeping itself lives outside the engine.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set,
};
use thiserror::Error;
use tracing::info;

use crate::db::entities::{monitor, prelude::*};
use crate::db::enums::{MonitorProtocol, MonitorStatus};
use crate::notifications::models::{normalize_channels, AlertChannel};

#[derive(Error, Debug)]
pub enum MonitorServiceError {
    #[error("monitor limit reached for {slug}: {current_usage}/{limit}")]
    LimitExceeded {
        slug: String,
        current_usage: i64,
        limit: i64,
    },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Plan entitlement snapshot for one feature, as reported by the billing
/// side. The engine only consults it at the creation decision point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLimit {
    pub slug: String,
    pub is_unlimited: bool,
    pub limit: i64,
    pub current_usage: i64,
}

impl FeatureLimit {
    pub fn allows(&self, additional: i64) -> bool {
        self.is_unlimited || self.current_usage + additional <= self.limit
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewMonitor {
    pub user_id: i32,
    pub name: String,
    pub url: String,
    pub protocol: Option<MonitorProtocol>,
    pub interval_minutes: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub notifications_enabled: Option<bool>,
    pub alert_channels: Option<serde_json::Value>,
    pub probe_config: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMonitor {
    pub name: Option<String>,
    pub url: Option<String>,
    pub protocol: Option<MonitorProtocol>,
    pub interval_minutes: Option<i32>,
    pub timeout_seconds: Option<i32>,
    pub notifications_enabled: Option<bool>,
    pub probe_config: Option<serde_json::Value>,
}

pub async fn create_monitor(
    db: &DatabaseConnection,
    data: NewMonitor,
    limit: &FeatureLimit,
    now: DateTime<Utc>,
) -> Result<monitor::Model, MonitorServiceError> {
    if !limit.allows(1) {
        return Err(MonitorServiceError::LimitExceeded {
            slug: limit.slug.clone(),
            current_usage: limit.current_usage,
            limit: limit.limit,
        });
    }

    let channels = data
        .alert_channels
        .as_ref()
        .map(|raw| channels_to_json(normalize_channels(raw)))
        .transpose()?;

    let new_monitor = monitor::ActiveModel {
        user_id: Set(data.user_id),
        name: Set(data.name),
        url: Set(data.url),
        protocol: Set(data.protocol.unwrap_or(MonitorProtocol::Https)),
        interval_minutes: Set(data.interval_minutes.unwrap_or(5)),
        timeout_seconds: Set(data.timeout_seconds.unwrap_or(30)),
        status: Set(MonitorStatus::Up),
        uptime_7d: Set(100.0),
        uptime_30d: Set(100.0),
        total_incidents: Set(0),
        notifications_enabled: Set(data.notifications_enabled.unwrap_or(true)),
        alert_channels: Set(channels),
        probe_config: Set(data.probe_config),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };

    let saved = new_monitor.insert(db).await?;
    info!(monitor_id = saved.id, user_id = saved.user_id, "monitor created");
    Ok(saved)
}

pub async fn update_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
    payload: UpdateMonitor,
    now: DateTime<Utc>,
) -> Result<monitor::Model, MonitorServiceError> {
    let current = require_monitor(db, monitor_id).await?;
    let mut active: monitor::ActiveModel = current.into();

    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(url) = payload.url {
        active.url = Set(url);
    }
    if let Some(protocol) = payload.protocol {
        active.protocol = Set(protocol);
    }
    if let Some(interval) = payload.interval_minutes {
        active.interval_minutes = Set(interval);
    }
    if let Some(timeout) = payload.timeout_seconds {
        active.timeout_seconds = Set(timeout);
    }
    if let Some(enabled) = payload.notifications_enabled {
        active.notifications_enabled = Set(enabled);
    }
    if let Some(config) = payload.probe_config {
        active.probe_config = Set(Some(config));
    }
    active.updated_at = Set(now);

    Ok(active.update(db).await?)
}

/// Replaces the monitor's channel list with the normalized form of `raw`.
/// Malformed entries are dropped during normalization.
pub async fn update_alert_channels(
    db: &DatabaseConnection,
    monitor_id: i32,
    raw: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<monitor::Model, MonitorServiceError> {
    let channels = channels_to_json(normalize_channels(raw))?;
    let current = require_monitor(db, monitor_id).await?;
    let mut active: monitor::ActiveModel = current.into();
    active.alert_channels = Set(Some(channels));
    active.updated_at = Set(now);
    Ok(active.update(db).await?)
}

pub async fn pause_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
    now: DateTime<Utc>,
) -> Result<monitor::Model, MonitorServiceError> {
    set_status(db, monitor_id, MonitorStatus::Paused, now).await
}

/// Resuming reports the monitor as up; the next due check corrects the
/// status if the site is actually down.
pub async fn resume_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
    now: DateTime<Utc>,
) -> Result<monitor::Model, MonitorServiceError> {
    set_status(db, monitor_id, MonitorStatus::Up, now).await
}

pub async fn delete_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<sea_orm::DeleteResult, DbErr> {
    let result = Monitor::delete_by_id(monitor_id).exec(db).await?;
    if result.rows_affected > 0 {
        info!(monitor_id, "monitor deleted");
    }
    Ok(result)
}

pub async fn find_by_id(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Option<monitor::Model>, DbErr> {
    Monitor::find_by_id(monitor_id).one(db).await
}

/// Snapshot of every monitor that participates in scheduling, paused ones
/// excluded.
pub async fn list_schedulable(db: &DatabaseConnection) -> Result<Vec<monitor::Model>, DbErr> {
    Monitor::find()
        .filter(monitor::Column::Status.ne(MonitorStatus::Paused))
        .all(db)
        .await
}

pub fn alert_channels(monitor: &monitor::Model) -> Vec<AlertChannel> {
    AlertChannel::list_from_json(monitor.alert_channels.as_ref())
}

async fn require_monitor(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<monitor::Model, DbErr> {
    Monitor::find_by_id(monitor_id)
        .one(db)
        .await?
        .ok_or_else(|| DbErr::RecordNotFound(format!("Monitor with ID {monitor_id} not found")))
}

async fn set_status(
    db: &DatabaseConnection,
    monitor_id: i32,
    status: MonitorStatus,
    now: DateTime<Utc>,
) -> Result<monitor::Model, MonitorServiceError> {
    let current = require_monitor(db, monitor_id).await?;
    let mut active: monitor::ActiveModel = current.into();
    active.status = Set(status);
    active.updated_at = Set(now);
    Ok(active.update(db).await?)
}

fn channels_to_json(channels: Vec<AlertChannel>) -> Result<serde_json::Value, DbErr> {
    serde_json::to_value(channels)
        .map_err(|err| DbErr::Custom(format!("failed to encode alert channels: {err}")))
}
