use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::{MonitorProtocol, MonitorStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "monitors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub user_id: i32,
    pub name: String,
    pub url: String,
    pub protocol: MonitorProtocol,
    pub interval_minutes: i32,
    pub timeout_seconds: i32,
    pub status: MonitorStatus,
    pub last_checked_at: Option<ChronoDateTimeUtc>,
    pub last_status_code: Option<i32>,
    pub last_response_time_ms: Option<i32>,
    // Cached statistics, refreshed after every completed check.
    pub uptime_7d: f64,
    pub uptime_30d: f64,
    pub total_incidents: i32,
    pub notifications_enabled: bool,
    #[sea_orm(column_type = "Json", nullable)]
    pub alert_channels: Option<Json>,
    #[sea_orm(column_type = "Json", nullable)]
    pub probe_config: Option<Json>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,

    #[sea_orm(has_many = "super::check::Entity")]
    Checks,

    #[sea_orm(has_many = "super::incident::Entity")]
    Incidents,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::check::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Checks.def()
    }
}

impl Related<super::incident::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Incidents.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
