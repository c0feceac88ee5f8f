//! Media Courier - a Telegram bot that turns media URLs into delivered files
//!
//! URLs submitted to the bot are fetched by yt-dlp, post-processed with ffmpeg
//! (audio stripping, fast-start remux, filename repair) and uploaded back to
//! the chat with a retry loop that survives rate limits and flaky networks.

pub mod acquire;
pub mod bot;
pub mod channel;
pub mod cli;
pub mod config;
pub mod delivery;
pub mod orchestrator;
pub mod postprocess;
pub mod progress;
pub mod session;
pub mod snapshot;
pub mod utils;

pub use acquire::{AcquisitionEngine, DeliveryMode, FetchJob, FetchOutcome, FormatOptions, Platform, Quality};
pub use channel::{ChannelError, DeliveryChannel, MessageRef};
pub use cli::Cli;
pub use config::Config;
pub use delivery::{DeliveryEngine, DeliveryOutcome, RetryPolicy};
pub use orchestrator::{JobOrchestrator, JobReport};
pub use postprocess::{MediaClass, MediaTransform};
pub use session::{Session, SessionStore};

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;

/// Error types specific to the courier
#[derive(thiserror::Error, Debug)]
pub enum CourierError {
    #[error("No URL found in message")]
    NoUrl,

    #[error("Acquisition failed for {url}: {reason}")]
    AcquisitionFailed { url: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),
}
