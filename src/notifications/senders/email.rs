use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::{NotificationSender, SenderError};
use crate::notifications::content::NotificationContent;
use crate::notifications::models::AlertChannel;

/// SMTP connection settings, taken from the engine configuration.
#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

/// A sender that delivers notifications over SMTP with STARTTLS.
#[derive(Debug)]
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailSender {
    pub fn new(settings: &SmtpSettings) -> Result<Self, SenderError> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
                .port(settings.port);
        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }
        let from: Mailbox = settings.from.parse()?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    /// Builds the multipart message with both HTML and plain text.
    fn build_message(
        &self,
        address: &str,
        content: &NotificationContent,
    ) -> Result<Message, SenderError> {
        let to: Mailbox = address.parse()?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(content.subject.clone())
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(content.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(content.html_body.clone()),
                    ),
            )?;

        Ok(message)
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        channel: &AlertChannel,
        content: &NotificationContent,
    ) -> Result<(), SenderError> {
        let AlertChannel::Email { address } = channel else {
            return Err(SenderError::InvalidConfiguration(
                "Expected an email channel, but found a different type.".to_string(),
            ));
        };

        let message = self.build_message(address, content)?;
        self.transport.send(message).await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: Some("mailer".to_string()),
            password: Some("secret".to_string()),
            from: "SitePulse <alerts@example.com>".to_string(),
        }
    }

    fn content() -> NotificationContent {
        NotificationContent {
            subject: "🔴 Example is down".to_string(),
            text_body: "Example is down".to_string(),
            html_body: "<p>Example is down</p>".to_string(),
            chat_text: "🔴 *Example* is down".to_string(),
        }
    }

    #[test]
    fn message_carries_both_body_parts() {
        let sender = EmailSender::new(&settings()).unwrap();
        let message = sender.build_message("owner@example.com", &content()).unwrap();

        let formatted = String::from_utf8(message.formatted()).unwrap();
        assert!(formatted.contains("owner@example.com"));
        assert!(formatted.contains("alerts@example.com"));
        assert!(formatted.contains("multipart/alternative"));
        assert!(formatted.contains("text/plain"));
        assert!(formatted.contains("text/html"));
        assert!(formatted.contains("<p>Example is down</p>"));
    }

    #[test]
    fn invalid_from_address_is_rejected_up_front() {
        let mut bad = settings();
        bad.from = "not an address".to_string();

        let err = EmailSender::new(&bad).unwrap_err();
        assert!(matches!(err, SenderError::Address(_)));
    }

    #[tokio::test]
    async fn rejects_non_email_channels() {
        let sender = EmailSender::new(&settings()).unwrap();
        let telegram = AlertChannel::Telegram {
            bot_token: "12345:ABC".to_string(),
            chat_id: "42".to_string(),
        };

        let err = sender.send(&telegram, &content()).await.unwrap_err();
        assert!(matches!(err, SenderError::InvalidConfiguration(_)));
    }
}
