//! Incident transitions driven by recorded checks. Exactly one of four
//! things can happen per check: nothing, open, continue, or resolve.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr};
use tracing::info;

use crate::db::entities::{check, incident, monitor};
use crate::db::services::incident_service;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    None,
    Open,
    Continue,
    Resolve,
}

/// The transition a check demands given whether an ongoing incident exists.
pub fn classify(is_up: bool, has_ongoing: bool) -> TransitionKind {
    match (is_up, has_ongoing) {
        (true, false) => TransitionKind::None,
        (false, false) => TransitionKind::Open,
        (false, true) => TransitionKind::Continue,
        (true, true) => TransitionKind::Resolve,
    }
}

/// A performed transition, carrying the incident row it produced.
#[derive(Debug, Clone, PartialEq)]
pub enum IncidentTransition {
    Opened(incident::Model),
    Continued(incident::Model),
    Resolved(incident::Model),
}

/// Applies the transition the given check demands. Returns `None` when the
/// monitor is up with nothing ongoing; a resolved incident is never touched
/// again.
pub async fn reconcile(
    db: &DatabaseConnection,
    monitor: &monitor::Model,
    recorded: &check::Model,
    now: DateTime<Utc>,
) -> Result<Option<IncidentTransition>, DbErr> {
    let ongoing = incident_service::find_ongoing(db, monitor.id).await?;

    let transition = match classify(recorded.is_up, ongoing.is_some()) {
        TransitionKind::None => None,
        TransitionKind::Open => {
            let (opened, _) = incident_service::open_incident(db, monitor, recorded, now).await?;
            info!(
                monitor_id = monitor.id,
                incident_id = opened.id,
                status_code = opened.status_code,
                "incident opened"
            );
            Some(IncidentTransition::Opened(opened))
        }
        TransitionKind::Continue => match ongoing {
            Some(incident) => {
                let continued =
                    incident_service::record_continued_failure(db, &incident, now).await?;
                Some(IncidentTransition::Continued(continued))
            }
            None => None,
        },
        TransitionKind::Resolve => match ongoing {
            Some(incident) => {
                let resolved = incident_service::resolve_incident(db, &incident, now).await?;
                info!(
                    monitor_id = monitor.id,
                    incident_id = resolved.id,
                    duration_seconds = resolved.duration_seconds,
                    "incident resolved"
                );
                Some(IncidentTransition::Resolved(resolved))
            }
            None => None,
        },
    };

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::enums::{CheckErrorType, IncidentStatus, MonitorStatus};
    use crate::db::services::check_service::{self, NewCheck};
    use crate::db::services::monitor_service;
    use crate::db::test_support::{connect_memory, fixed_instant, insert_monitor, insert_user};
    use chrono::Duration;

    #[test]
    fn transition_table_is_complete() {
        assert_eq!(classify(true, false), TransitionKind::None);
        assert_eq!(classify(false, false), TransitionKind::Open);
        assert_eq!(classify(false, true), TransitionKind::Continue);
        assert_eq!(classify(true, true), TransitionKind::Resolve);
    }

    async fn record(
        db: &DatabaseConnection,
        monitor: &monitor::Model,
        is_up: bool,
        at: DateTime<Utc>,
    ) -> (check::Model, monitor::Model) {
        let data = if is_up {
            NewCheck {
                is_up: true,
                status_code: Some(200),
                response_time_ms: Some(120),
                checked_at: at,
                ..Default::default()
            }
        } else {
            NewCheck {
                is_up: false,
                error_message: Some("connection refused".to_string()),
                error_type: Some(CheckErrorType::Connection),
                checked_at: at,
                ..Default::default()
            }
        };
        check_service::record_check(db, monitor, data, at).await.unwrap()
    }

    #[tokio::test]
    async fn down_up_cycle_walks_open_continue_resolve() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let monitor = insert_monitor(&db, user.id, "https://example.com").await;

        // First failure opens.
        let t0 = fixed_instant();
        let (check, monitor) = record(&db, &monitor, false, t0).await;
        let opened = reconcile(&db, &monitor, &check, t0).await.unwrap();
        let Some(IncidentTransition::Opened(incident)) = opened else {
            panic!("expected an opened incident, got {opened:?}");
        };
        assert_eq!(incident.failed_checks_count, 1);
        assert_eq!(incident.error_type, Some(CheckErrorType::Connection));
        assert_eq!(monitor.status, MonitorStatus::Down);
        assert_eq!(
            monitor_service::find_by_id(&db, monitor.id)
                .await
                .unwrap()
                .unwrap()
                .total_incidents,
            1
        );

        // Second failure continues the same incident.
        let t1 = t0 + Duration::minutes(5);
        let (check, monitor) = record(&db, &monitor, false, t1).await;
        let continued = reconcile(&db, &monitor, &check, t1).await.unwrap();
        let Some(IncidentTransition::Continued(same)) = continued else {
            panic!("expected a continued incident, got {continued:?}");
        };
        assert_eq!(same.id, incident.id);
        assert_eq!(same.failed_checks_count, 2);

        // Recovery resolves it with the elapsed duration.
        let t2 = t0 + Duration::minutes(10);
        let (check, monitor) = record(&db, &monitor, true, t2).await;
        let resolved = reconcile(&db, &monitor, &check, t2).await.unwrap();
        let Some(IncidentTransition::Resolved(closed)) = resolved else {
            panic!("expected a resolved incident, got {resolved:?}");
        };
        assert_eq!(closed.id, incident.id);
        assert_eq!(closed.status, IncidentStatus::Resolved);
        assert_eq!(closed.duration_seconds, Some(600));
        assert_eq!(monitor.status, MonitorStatus::Up);

        // A healthy follow-up check touches nothing.
        let t3 = t0 + Duration::minutes(15);
        let (check, monitor) = record(&db, &monitor, true, t3).await;
        assert_eq!(reconcile(&db, &monitor, &check, t3).await.unwrap(), None);
        assert_eq!(
            incident_service::find_ongoing(&db, monitor.id).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn repeated_failures_never_open_a_second_incident() {
        let db = connect_memory().await;
        let user = insert_user(&db, "owner@example.com").await;
        let mut monitor = insert_monitor(&db, user.id, "https://example.com").await;

        let mut at = fixed_instant();
        for _ in 0..4 {
            let (check, refreshed) = record(&db, &monitor, false, at).await;
            reconcile(&db, &refreshed, &check, at).await.unwrap();
            monitor = refreshed;
            at += Duration::minutes(5);
        }

        use sea_orm::{EntityTrait, PaginatorTrait};
        let count = crate::db::entities::prelude::Incident::find()
            .count(&db)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let ongoing = incident_service::find_ongoing(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ongoing.failed_checks_count, 4);
        assert_eq!(
            monitor_service::find_by_id(&db, monitor.id)
                .await
                .unwrap()
                .unwrap()
                .total_incidents,
            1
        );
    }
}
