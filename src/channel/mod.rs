use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

pub mod telegram;

pub use telegram::TelegramClient;

/// Chat identifier as used by the Bot API
pub type ChatId = i64;

/// Handle to a message that was sent and may later be edited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Failures reported by the delivery channel
#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("Rate limited, retry after {0:?}")]
    RetryAfter(Duration),

    #[error("Request timed out")]
    TimedOut,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("API error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Explicit wait requested by the channel, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ChannelError::RetryAfter(wait) => Some(*wait),
            _ => None,
        }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, ChannelError::BadRequest(_))
    }
}

/// Messaging transport used to report status and hand files to the user
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send a plain text message
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageRef, ChannelError>;

    /// Replace the text of a previously sent message
    async fn edit_message(&self, message: MessageRef, text: &str) -> Result<(), ChannelError>;

    /// Upload a local file as a document
    async fn send_document(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<(), ChannelError>;
}
