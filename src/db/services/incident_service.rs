//! Row-level incident operations. The open/continue/resolve decisions are
//! made by the monitoring layer; this module only persists them.

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use tracing::error;

use crate::db::entities::{check, incident, monitor, prelude::*};
use crate::db::enums::IncidentStatus;

/// Returns the monitor's ongoing incident, if any. Should the table ever
/// hold more than one, the newest wins and the rest are reported loudly so
/// the inconsistency gets investigated instead of silently papered over.
pub async fn find_ongoing(
    db: &DatabaseConnection,
    monitor_id: i32,
) -> Result<Option<incident::Model>, DbErr> {
    let mut ongoing = Incident::find()
        .filter(incident::Column::MonitorId.eq(monitor_id))
        .filter(incident::Column::Status.eq(IncidentStatus::Ongoing))
        .order_by_desc(incident::Column::StartedAt)
        .all(db)
        .await?;

    if ongoing.len() > 1 {
        error!(
            monitor_id,
            count = ongoing.len(),
            "found multiple ongoing incidents for one monitor"
        );
    }
    Ok(if ongoing.is_empty() {
        None
    } else {
        Some(ongoing.remove(0))
    })
}

/// Opens a new incident seeded from the failing check and bumps the
/// monitor's lifetime incident counter in the same transaction.
pub async fn open_incident(
    db: &DatabaseConnection,
    monitor: &monitor::Model,
    failing_check: &check::Model,
    now: DateTime<Utc>,
) -> Result<(incident::Model, monitor::Model), DbErr> {
    let txn = db.begin().await?;

    let new_incident = incident::ActiveModel {
        monitor_id: Set(monitor.id),
        status: Set(IncidentStatus::Ongoing),
        started_at: Set(now),
        status_code: Set(failing_check.status_code),
        error_message: Set(failing_check.error_message.clone()),
        error_type: Set(failing_check.error_type),
        failed_checks_count: Set(1),
        email_sent: Set(false),
        messaging_sent: Set(false),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    let saved = new_incident.insert(&txn).await?;

    let mut counted: monitor::ActiveModel = monitor.clone().into();
    counted.total_incidents = Set(monitor.total_incidents + 1);
    counted.updated_at = Set(now);
    let refreshed = counted.update(&txn).await?;

    txn.commit().await?;
    Ok((saved, refreshed))
}

pub async fn record_continued_failure(
    db: &DatabaseConnection,
    incident: &incident::Model,
    now: DateTime<Utc>,
) -> Result<incident::Model, DbErr> {
    let mut active: incident::ActiveModel = incident.clone().into();
    active.failed_checks_count = Set(incident.failed_checks_count + 1);
    active.updated_at = Set(now);
    active.update(db).await
}

pub async fn resolve_incident(
    db: &DatabaseConnection,
    incident: &incident::Model,
    now: DateTime<Utc>,
) -> Result<incident::Model, DbErr> {
    let duration = (now - incident.started_at).num_seconds().abs() as i32;
    let mut active: incident::ActiveModel = incident.clone().into();
    active.status = Set(IncidentStatus::Resolved);
    active.resolved_at = Set(Some(now));
    active.duration_seconds = Set(Some(duration));
    active.updated_at = Set(now);
    active.update(db).await
}

/// Records one dispatch attempt: `notifications_sent_at` is always
/// stamped, even when nothing was delivered, while the per-type flags only
/// ever go from false to true so a retried dispatch cannot unmark a kind
/// that already went out.
pub async fn mark_notified(
    db: &DatabaseConnection,
    incident: &incident::Model,
    email_delivered: bool,
    messaging_delivered: bool,
    now: DateTime<Utc>,
) -> Result<incident::Model, DbErr> {
    let mut active: incident::ActiveModel = incident.clone().into();
    active.email_sent = Set(incident.email_sent || email_delivered);
    active.messaging_sent = Set(incident.messaging_sent || messaging_delivered);
    active.notifications_sent_at = Set(Some(now));
    active.updated_at = Set(now);
    active.update(db).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{
        connect_memory, fixed_instant, insert_monitor, insert_ongoing_incident, insert_user,
    };
    use crate::db::services::check_service::{self, NewCheck};
    use crate::db::enums::CheckErrorType;
    use chrono::Duration;

    async fn failing_check(
        db: &DatabaseConnection,
        monitor: &monitor::Model,
        at: DateTime<Utc>,
    ) -> (check::Model, monitor::Model) {
        let data = NewCheck {
            is_up: false,
            status_code: Some(503),
            error_message: Some("HTTP status 503".to_string()),
            error_type: Some(CheckErrorType::Unknown),
            checked_at: at,
            ..Default::default()
        };
        check_service::record_check(db, monitor, data, at).await.unwrap()
    }

    #[tokio::test]
    async fn opening_seeds_from_the_check_and_counts_the_incident() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;

        let now = fixed_instant();
        let (check, monitor) = failing_check(&db, &monitor, now).await;
        let (incident, refreshed) = open_incident(&db, &monitor, &check, now).await.unwrap();

        assert_eq!(incident.status, IncidentStatus::Ongoing);
        assert_eq!(incident.started_at, now);
        assert_eq!(incident.status_code, Some(503));
        assert_eq!(incident.error_type, Some(CheckErrorType::Unknown));
        assert_eq!(incident.failed_checks_count, 1);
        assert!(!incident.email_sent);
        assert_eq!(refreshed.total_incidents, 1);
    }

    #[tokio::test]
    async fn continued_failures_only_bump_the_counter() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let later = fixed_instant() + Duration::minutes(5);
        let updated = record_continued_failure(&db, &incident, later).await.unwrap();

        assert_eq!(updated.failed_checks_count, incident.failed_checks_count + 1);
        assert_eq!(updated.status, IncidentStatus::Ongoing);
        assert_eq!(Incident::find().all(&db).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn resolving_stamps_the_duration() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let later = fixed_instant() + Duration::seconds(754);
        let resolved = resolve_incident(&db, &incident, later).await.unwrap();

        assert_eq!(resolved.status, IncidentStatus::Resolved);
        assert_eq!(resolved.resolved_at, Some(later));
        assert_eq!(resolved.duration_seconds, Some(754));
    }

    #[tokio::test]
    async fn delivery_flags_never_revert() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let first = mark_notified(&db, &incident, true, false, fixed_instant())
            .await
            .unwrap();
        assert!(first.email_sent);
        assert!(!first.messaging_sent);
        assert!(first.notifications_sent_at.is_some());

        let later = fixed_instant() + Duration::minutes(1);
        let second = mark_notified(&db, &first, false, true, later).await.unwrap();
        assert!(second.email_sent);
        assert!(second.messaging_sent);
        assert_eq!(second.notifications_sent_at, Some(later));
    }

    #[tokio::test]
    async fn mark_notified_without_deliveries_still_stamps_the_attempt() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let attempted = mark_notified(&db, &incident, false, false, fixed_instant())
            .await
            .unwrap();

        assert!(!attempted.email_sent);
        assert!(!attempted.messaging_sent);
        assert_eq!(attempted.notifications_sent_at, Some(fixed_instant()));
    }

    #[tokio::test]
    async fn newest_ongoing_incident_wins_when_duplicates_exist() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;

        let older = fixed_instant() - Duration::hours(2);
        insert_ongoing_incident(&db, monitor.id, older).await;
        let newer = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let found = find_ongoing(&db, monitor.id).await.unwrap().unwrap();
        assert_eq!(found.id, newer.id);
    }
}
