//! Shared fixtures for database-backed tests: an in-memory sqlite schema
//! created from the entities, plus minimal row seeding helpers.

use chrono::{TimeZone, Utc};
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Schema, Set,
};

use crate::db::entities::{check, incident, monitor, user};
use crate::db::enums::{IncidentStatus, MonitorProtocol, MonitorStatus};

pub async fn connect_memory() -> DatabaseConnection {
    // A single pooled connection keeps every query on the same in-memory
    // database; extra pool members would each see their own empty one.
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.expect("in-memory sqlite");
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    db.execute(backend.build(&schema.create_table_from_entity(user::Entity)))
        .await
        .expect("create users table");
    db.execute(backend.build(&schema.create_table_from_entity(monitor::Entity)))
        .await
        .expect("create monitors table");
    db.execute(backend.build(&schema.create_table_from_entity(check::Entity)))
        .await
        .expect("create checks table");
    db.execute(backend.build(&schema.create_table_from_entity(incident::Entity)))
        .await
        .expect("create incidents table");

    db
}

pub fn fixed_instant() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap()
}

pub async fn insert_user(db: &DatabaseConnection, email: &str) -> user::Model {
    let now = fixed_instant();
    user::ActiveModel {
        email: Set(email.to_string()),
        name: Set("Test Owner".to_string()),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert user")
}

pub async fn insert_monitor(db: &DatabaseConnection, user_id: i32, url: &str) -> monitor::Model {
    let now = fixed_instant();
    let protocol = if url.starts_with("https") {
        MonitorProtocol::Https
    } else {
        MonitorProtocol::Http
    };
    monitor::ActiveModel {
        user_id: Set(user_id),
        name: Set("Example".to_string()),
        url: Set(url.to_string()),
        protocol: Set(protocol),
        interval_minutes: Set(5),
        timeout_seconds: Set(30),
        status: Set(MonitorStatus::Up),
        uptime_7d: Set(100.0),
        uptime_30d: Set(100.0),
        total_incidents: Set(0),
        notifications_enabled: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert monitor")
}

pub async fn insert_ongoing_incident(
    db: &DatabaseConnection,
    monitor_id: i32,
    started_at: chrono::DateTime<Utc>,
) -> incident::Model {
    incident::ActiveModel {
        monitor_id: Set(monitor_id),
        status: Set(IncidentStatus::Ongoing),
        started_at: Set(started_at),
        failed_checks_count: Set(1),
        email_sent: Set(false),
        messaging_sent: Set(false),
        created_at: Set(started_at),
        updated_at: Set(started_at),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert incident")
}
