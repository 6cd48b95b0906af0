use async_trait::async_trait;
use thiserror::Error;

use super::content::NotificationContent;
use super::models::AlertChannel;

pub mod email;
pub mod telegram;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("Message build error: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("Address error: {0}")]
    Address(#[from] lettre::address::AddressError),
}

/// A trait for delivering one rendered notification over a specific channel
/// type. Concrete sender implementations (email, Telegram) must implement
/// this trait.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Sends the rendered content to the given channel. The channel variant
    /// must match the sender's type.
    async fn send(
        &self,
        channel: &AlertChannel,
        content: &NotificationContent,
    ) -> Result<(), SenderError>;
}
