//! Throttled translation of fetch progress into chat status edits.
//!
//! The fetch worker pushes events into a bounded channel without waiting;
//! the reporter task drains it and decides what reaches the chat.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::channel::{DeliveryChannel, MessageRef};
use crate::utils::{format_duration, format_file_size};

/// Events buffered between the fetch worker and the reporter
pub const PROGRESS_BUFFER: usize = 64;

/// Minimum spacing between two "downloading" edits
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(1);

pub const PROCESSING_TEXT: &str = "Download finished. Processing…";

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Downloading {
        downloaded: u64,
        total: Option<u64>,
        /// Bytes per second
        speed: Option<f64>,
        /// Seconds remaining
        eta: Option<u64>,
    },
    Finished,
}

/// Sending half handed to the fetch worker; never blocks
#[derive(Debug, Clone)]
pub struct ProgressSink {
    tx: mpsc::Sender<ProgressEvent>,
}

impl ProgressSink {
    /// Queue an event, dropping it if the reporter is behind or gone
    pub fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.tx.try_send(event) {
            tracing::trace!("Progress event dropped: {}", e);
        }
    }
}

/// Create a connected sink/receiver pair
pub fn progress_channel() -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
    (ProgressSink { tx }, rx)
}

/// Status line shown while downloading
pub fn render_status(downloaded: u64, total: Option<u64>, speed: Option<f64>, eta: Option<u64>) -> String {
    let percent = match total {
        Some(total) if total > 0 => format!("{:.1}%", downloaded as f64 / total as f64 * 100.0),
        _ => "unknown".to_string(),
    };
    let total = total.map(format_file_size).unwrap_or_else(|| "?".to_string());
    let speed = speed
        .map(|s| format!("{}/s", format_file_size(s as u64)))
        .unwrap_or_else(|| "-".to_string());
    let eta = eta.map(format_duration).unwrap_or_else(|| "-".to_string());

    format!(
        "Downloading… {} • {}/{} • {} • ETA {}",
        percent,
        format_file_size(downloaded),
        total,
        speed,
        eta
    )
}

/// Edits one status message as progress events arrive
pub struct ProgressReporter {
    channel: Arc<dyn DeliveryChannel>,
    message: MessageRef,
    throttle: Duration,
}

impl ProgressReporter {
    pub fn new(channel: Arc<dyn DeliveryChannel>, message: MessageRef) -> Self {
        Self {
            channel,
            message,
            throttle: DEFAULT_THROTTLE,
        }
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Drain events until every sink is dropped. Returns the number of edits sent.
    pub async fn run(self, mut events: mpsc::Receiver<ProgressEvent>) -> usize {
        let mut last_edit: Option<Instant> = None;
        let mut edits = 0;

        while let Some(event) = events.recv().await {
            let text = match event {
                ProgressEvent::Downloading {
                    downloaded,
                    total,
                    speed,
                    eta,
                } => {
                    let now = Instant::now();
                    if last_edit.is_some_and(|at| now.duration_since(at) < self.throttle) {
                        continue;
                    }
                    last_edit = Some(now);
                    render_status(downloaded, total, speed, eta)
                }
                ProgressEvent::Finished => PROCESSING_TEXT.to_string(),
            };

            if let Err(e) = self.channel.edit_message(self.message, &text).await {
                tracing::debug!("Progress edit failed: {}", e);
            }
            edits += 1;
        }

        edits
    }
}
