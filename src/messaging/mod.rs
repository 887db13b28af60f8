//! Boundary to the chat backend.
//!
//! Everything the moderation core needs from the messenger goes through
//! [`MessagingClient`]; inbound updates are classified once into
//! [`InboundEvent`] before they reach the coordinator.

pub mod bot_api;

use async_trait::async_trait;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat: ChatId,
    pub id: MessageId,
    pub sender: UserId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    NewMessage(IncomingMessage),
    StatusChange { user: UserId },
    Other(String),
}

/// Handle to a message the bot posted, used to remove it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentMessage {
    pub chat: ChatId,
    pub id: MessageId,
}

#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{method} failed: {description}")]
    Api { method: String, description: String },
    #[error("call did not finish within {0:?}")]
    Timeout(Duration),
    #[error("unexpected response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn list_admins(&self, chat: ChatId) -> Result<HashSet<UserId>, MessagingError>;

    /// Number of messages the sender has posted in the chat.
    async fn count_recent_messages(
        &self,
        chat: ChatId,
        sender: UserId,
    ) -> Result<u64, MessagingError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), MessagingError>;

    async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        silent: bool,
    ) -> Result<SentMessage, MessagingError>;
}

/// Bound a collaborator call; expiry is reported like any other failure.
pub async fn within<T, F>(limit: Duration, call: F) -> Result<T, MessagingError>
where
    F: Future<Output = Result<T, MessagingError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(MessagingError::Timeout(limit)),
    }
}
