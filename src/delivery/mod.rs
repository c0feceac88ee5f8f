//! Upload of finished files with an open-ended retry loop.
//!
//! Oversized files are rejected before any network call. Everything else is
//! retried: rate limits wait for the duration the channel asks for, other
//! failures wait a fixed short delay. Attempts are unbounded unless the
//! [`RetryPolicy`] caps them.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::channel::{ChatId, DeliveryChannel, MessageRef};
use crate::utils::format_file_size;

/// Default payload ceiling: just under 2 GiB
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024 - 4096;

pub const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

pub const SENT_TEXT: &str = "Sent.";

/// How the delivery loop reacts to failed uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait after a failure that carries no explicit retry-after
    pub transient_delay: Duration,
    /// Give up after this many attempts; `None` retries forever
    pub max_attempts: Option<u32>,
    /// Treat malformed-request rejections as final instead of transient
    pub bad_request_is_terminal: bool,
    /// Refresh period of the "sending" status message
    pub tick_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_delay: Duration::from_secs(3),
            max_attempts: None,
            bad_request_is_terminal: false,
            tick_interval: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    TooLarge { size: u64 },
    GaveUp { attempts: u32, reason: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Uploads files to a chat
pub struct DeliveryEngine {
    channel: Arc<dyn DeliveryChannel>,
    max_bytes: u64,
    policy: RetryPolicy,
}

impl DeliveryEngine {
    pub fn new(channel: Arc<dyn DeliveryChannel>, max_bytes: u64) -> Self {
        Self {
            channel,
            max_bytes,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// `true` if the file reached the chat, `false` if it was rejected for good
    pub async fn deliver(&self, chat_id: ChatId, path: &Path) -> bool {
        self.deliver_with_outcome(chat_id, path).await.is_delivered()
    }

    pub async fn deliver_with_outcome(&self, chat_id: ChatId, path: &Path) -> DeliveryOutcome {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let size = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata.len(),
            Err(e) => {
                tracing::warn!("Cannot stat {}: {}", path.display(), e);
                return DeliveryOutcome::GaveUp {
                    attempts: 0,
                    reason: e.to_string(),
                };
            }
        };

        if size > self.max_bytes {
            tracing::warn!("{} is {} bytes, over the {} byte limit", name, size, self.max_bytes);
            let text = format!(
                "File {} is {}, which exceeds the {} upload limit.",
                name,
                format_file_size(size),
                format_file_size(self.max_bytes)
            );
            if let Err(e) = self.channel.send_message(chat_id, &text).await {
                tracing::warn!("Failed to report oversized file: {}", e);
            }
            return DeliveryOutcome::TooLarge { size };
        }

        let ticker = UploadTicker::start(
            self.channel.clone(),
            chat_id,
            &format!("Preparing to send: {} • {}", name, format_file_size(size)),
            self.policy.tick_interval,
        )
        .await;

        let mut attempt: u32 = 1;
        loop {
            let error = match self.channel.send_document(chat_id, path, &name).await {
                Ok(()) => {
                    tracing::info!("Delivered {} after {} attempt(s)", name, attempt);
                    ticker.stop(SENT_TEXT).await;
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => e,
            };

            let out_of_attempts = self.policy.max_attempts.is_some_and(|max| attempt >= max);
            if out_of_attempts || (error.is_bad_request() && self.policy.bad_request_is_terminal) {
                tracing::error!("Giving up on {} after {} attempt(s): {}", name, attempt, error);
                ticker.stop(&format!("Failed to send {}: {}", name, error)).await;
                return DeliveryOutcome::GaveUp {
                    attempts: attempt,
                    reason: error.to_string(),
                };
            }

            let wait = error.retry_after().unwrap_or(self.policy.transient_delay);
            tracing::warn!("Upload of {} failed (attempt {}): {}; retrying in {:?}", name, attempt, error, wait);
            tokio::time::sleep(wait).await;

            attempt += 1;
            ticker.next_attempt(attempt);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TickState {
    attempt: u32,
    started: Instant,
}

/// Periodically edits one status message while an upload is in flight
pub struct UploadTicker {
    channel: Arc<dyn DeliveryChannel>,
    message: Option<MessageRef>,
    state: watch::Sender<TickState>,
    handle: Option<JoinHandle<()>>,
}

impl UploadTicker {
    /// Post `head` and start refreshing it every `interval`.
    ///
    /// If the status message cannot be sent the ticker stays silent.
    pub async fn start(channel: Arc<dyn DeliveryChannel>, chat_id: ChatId, head: &str, interval: Duration) -> Self {
        let (state, updates) = watch::channel(TickState {
            attempt: 1,
            started: Instant::now(),
        });

        let message = match channel.send_message(chat_id, head).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::debug!("Ticker message not sent: {}", e);
                None
            }
        };

        let handle = message.map(|message| tokio::spawn(tick(channel.clone(), message, updates, interval)));

        Self {
            channel,
            message,
            state,
            handle,
        }
    }

    /// Record a new attempt; the elapsed counter restarts
    pub fn next_attempt(&self, attempt: u32) {
        self.state.send_replace(TickState {
            attempt,
            started: Instant::now(),
        });
    }

    /// Stop ticking and leave `tail` as the final text
    pub async fn stop(self, tail: &str) {
        let Self {
            channel,
            message,
            state,
            handle,
        } = self;

        // Closing the watch channel ends the tick loop
        drop(state);
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        if let Some(message) = message {
            if let Err(e) = channel.edit_message(message, tail).await {
                tracing::debug!("Final ticker edit failed: {}", e);
            }
        }
    }
}

async fn tick(
    channel: Arc<dyn DeliveryChannel>,
    message: MessageRef,
    mut updates: watch::Receiver<TickState>,
    interval: Duration,
) {
    let mut frame = 0usize;
    loop {
        let state = *updates.borrow_and_update();
        let elapsed = state.started.elapsed().as_secs();
        let text = format!(
            "{} Sending file… {}s • attempt {}",
            SPINNER_FRAMES[frame % SPINNER_FRAMES.len()],
            elapsed,
            state.attempt
        );
        if let Err(e) = channel.edit_message(message, &text).await {
            tracing::trace!("Ticker edit failed: {}", e);
        }
        frame += 1;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
