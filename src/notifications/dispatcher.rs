//! Fan-out of incident notifications across a monitor's channels, plus the
//! single bookkeeping write that records what was delivered.
//!
//! Every configured channel is attempted exactly once per transition. A
//! failing channel is logged and skipped; it neither blocks the remaining
//! channels nor fails the check task. After the fan-out one incident update
//! records, per channel type, whether at least one delivery went through.

use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, DbErr, EntityTrait};
use tracing::{debug, error, info, warn};

use crate::db::entities::{incident, monitor, prelude::User};
use crate::db::services::{incident_service, monitor_service};
use crate::notifications::content::{self, NotificationKind};
use crate::notifications::models::AlertChannel;
use crate::notifications::senders::email::EmailSender;
use crate::notifications::senders::telegram::TelegramSender;
use crate::notifications::senders::{NotificationSender, SenderError};

/// What one dispatch round actually delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub email_delivered: bool,
    pub messaging_delivered: bool,
    pub failed_channels: usize,
}

pub struct Dispatcher {
    email: Option<EmailSender>,
    telegram: TelegramSender,
    action_base_url: Option<String>,
}

impl Dispatcher {
    pub fn new(
        email: Option<EmailSender>,
        telegram: TelegramSender,
        action_base_url: Option<String>,
    ) -> Self {
        Self {
            email,
            telegram,
            action_base_url,
        }
    }

    /// Sends the notification for one incident transition. No-op when the
    /// monitor has notifications disabled or no channels configured; once
    /// a dispatch is attempted the incident is stamped exactly once, even
    /// when every channel failed. Only the bookkeeping write can error.
    pub async fn dispatch(
        &self,
        db: &DatabaseConnection,
        monitor: &monitor::Model,
        incident: &incident::Model,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Result<DeliveryReport, DbErr> {
        if !monitor.notifications_enabled {
            debug!(monitor_id = monitor.id, "notifications disabled, skipping dispatch");
            return Ok(DeliveryReport::default());
        }
        let channels = monitor_service::alert_channels(monitor);
        if channels.is_empty() {
            debug!(monitor_id = monitor.id, "no alert channels configured, skipping dispatch");
            return Ok(DeliveryReport::default());
        }

        let greeting = User::find_by_id(monitor.user_id)
            .one(db)
            .await?
            .map(|user| user.name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "there".to_string());

        let content = match content::render(
            kind,
            monitor,
            incident,
            &greeting,
            self.action_base_url.as_deref(),
        ) {
            Ok(content) => content,
            Err(err) => {
                error!(
                    monitor_id = monitor.id,
                    incident_id = incident.id,
                    error = %err,
                    "failed to render notification content"
                );
                incident_service::mark_notified(db, incident, false, false, now).await?;
                return Ok(DeliveryReport::default());
            }
        };

        let mut report = DeliveryReport::default();
        for channel in &channels {
            let result = match channel {
                AlertChannel::Email { .. } => match &self.email {
                    Some(sender) => sender.send(channel, &content).await,
                    None => Err(SenderError::InvalidConfiguration(
                        "smtp transport is not configured".to_string(),
                    )),
                },
                AlertChannel::Telegram { .. } => self.telegram.send(channel, &content).await,
            };

            match result {
                Ok(()) => {
                    info!(
                        monitor_id = monitor.id,
                        incident_id = incident.id,
                        channel = channel.kind_name(),
                        "notification delivered"
                    );
                    match channel {
                        AlertChannel::Email { .. } => report.email_delivered = true,
                        AlertChannel::Telegram { .. } => report.messaging_delivered = true,
                    }
                }
                Err(err) => {
                    warn!(
                        monitor_id = monitor.id,
                        incident_id = incident.id,
                        channel = channel.kind_name(),
                        error = %err,
                        "notification delivery failed"
                    );
                    report.failed_channels += 1;
                }
            }
        }

        incident_service::mark_notified(
            db,
            incident,
            report.email_delivered,
            report.messaging_delivered,
            now,
        )
        .await?;

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::services::monitor_service::UpdateMonitor;
    use crate::db::test_support::{
        connect_memory, fixed_instant, insert_monitor, insert_ongoing_incident, insert_user,
    };
    use serde_json::json;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn telegram_monitor(
        db: &DatabaseConnection,
        notifications_enabled: bool,
    ) -> monitor::Model {
        let user = insert_user(db, "owner@example.com").await;
        let monitor = insert_monitor(db, user.id, "https://example.com").await;
        let monitor = monitor_service::update_monitor(
            db,
            monitor.id,
            UpdateMonitor {
                notifications_enabled: Some(notifications_enabled),
                ..Default::default()
            },
            fixed_instant(),
        )
        .await
        .unwrap();
        monitor_service::update_alert_channels(
            db,
            monitor.id,
            &json!([{ "type": "telegram", "bot_token": "12345:ABC", "chat_id": "42" }]),
            fixed_instant(),
        )
        .await
        .unwrap()
    }

    fn dispatcher_for(server: &MockServer) -> Dispatcher {
        Dispatcher::new(None, TelegramSender::with_api_base(&server.uri()), None)
    }

    #[tokio::test]
    async fn disabled_monitors_are_never_dispatched() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let db = connect_memory().await;
        let monitor = telegram_monitor(&db, false).await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let report = dispatcher_for(&server)
            .dispatch(&db, &monitor, &incident, NotificationKind::Down, fixed_instant())
            .await
            .unwrap();

        assert_eq!(report, DeliveryReport::default());
        let stored = incident_service::find_ongoing(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.messaging_sent);
        assert!(stored.notifications_sent_at.is_none());
    }

    #[tokio::test]
    async fn delivered_channels_are_recorded_on_the_incident() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/bot.*/sendMessage$"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let db = connect_memory().await;
        let monitor = telegram_monitor(&db, true).await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let report = dispatcher_for(&server)
            .dispatch(&db, &monitor, &incident, NotificationKind::Down, fixed_instant())
            .await
            .unwrap();

        assert!(report.messaging_delivered);
        assert!(!report.email_delivered);
        assert_eq!(report.failed_channels, 0);

        let stored = incident_service::find_ongoing(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.messaging_sent);
        assert!(!stored.email_sent);
        assert_eq!(stored.notifications_sent_at, Some(fixed_instant()));
    }

    #[tokio::test]
    async fn failed_deliveries_leave_the_flags_unset_but_stamp_the_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let db = connect_memory().await;
        let monitor = telegram_monitor(&db, true).await;
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let report = dispatcher_for(&server)
            .dispatch(&db, &monitor, &incident, NotificationKind::Down, fixed_instant())
            .await
            .unwrap();

        assert!(!report.messaging_delivered);
        assert_eq!(report.failed_channels, 1);

        // The attempt itself is recorded; only the delivery flags stay unset.
        let stored = incident_service::find_ongoing(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.messaging_sent);
        assert!(!stored.email_sent);
        assert_eq!(stored.notifications_sent_at, Some(fixed_instant()));
    }

    #[tokio::test]
    async fn email_channels_without_smtp_count_as_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let db = connect_memory().await;
        let monitor = telegram_monitor(&db, true).await;
        let monitor = monitor_service::update_alert_channels(
            &db,
            monitor.id,
            &json!([
                { "type": "email", "address": "owner@example.com" },
                { "type": "telegram", "bot_token": "12345:ABC", "chat_id": "42" },
            ]),
            fixed_instant(),
        )
        .await
        .unwrap();
        let incident = insert_ongoing_incident(&db, monitor.id, fixed_instant()).await;

        let report = dispatcher_for(&server)
            .dispatch(&db, &monitor, &incident, NotificationKind::Down, fixed_instant())
            .await
            .unwrap();

        assert!(!report.email_delivered);
        assert!(report.messaging_delivered);
        assert_eq!(report.failed_channels, 1);

        let stored = incident_service::find_ongoing(&db, monitor.id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.email_sent);
        assert!(stored.messaging_sent);
    }
}
