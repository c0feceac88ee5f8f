use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Cli;
use crate::delivery::{RetryPolicy, DEFAULT_MAX_UPLOAD_BYTES};
use crate::CourierError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Telegram connection settings
    pub telegram: TelegramConfig,

    /// External tool locations
    pub tools: ToolsConfig,

    /// Upload behaviour
    pub delivery: DeliveryConfig,

    /// Application settings
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot API token
    pub bot_token: String,

    /// Bot API server
    pub api_base_url: String,

    /// Long-poll timeout for getUpdates
    pub poll_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub yt_dlp_path: String,
    pub ffmpeg_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// Files above this size are rejected without an upload attempt
    pub max_upload_bytes: u64,

    /// Wait after a failure without an explicit retry-after
    pub retry_delay_secs: u64,

    /// Give up after this many attempts (unlimited when absent)
    pub max_attempts: Option<u32>,

    /// Stop retrying on malformed-request rejections
    pub bad_request_is_terminal: bool,

    /// Refresh period of the "sending" status message
    pub ticker_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the per-user download directories
    pub downloads_dir: PathBuf,

    /// Minimum spacing between download progress edits
    pub progress_interval_ms: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 50,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            yt_dlp_path: "yt-dlp".to_string(),
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            retry_delay_secs: 3,
            max_attempts: None,
            bad_request_is_terminal: false,
            ticker_interval_secs: 2,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("Downloads"),
            progress_interval_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from `path`, the default location, or built-in defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_path().filter(|p| p.exists()),
        };

        let Some(config_path) = config_path else {
            return Ok(Self::default());
        };

        let content = fs_err::read_to_string(&config_path)
            .context("Failed to read config file")?;

        let config: Config = serde_yaml::from_str(&content)
            .context("Failed to parse config file")?;

        tracing::debug!("Loaded configuration from {}", config_path.display());
        Ok(config)
    }

    /// Get configuration file path
    pub fn config_path() -> Option<PathBuf> {
        // First try current directory for easy testing
        let local_config = PathBuf::from("config.yaml");
        if local_config.exists() {
            return Some(local_config);
        }

        dirs::config_dir().map(|dir| dir.join("media-courier").join("config.yaml"))
    }

    /// Command line and environment values take precedence over the file
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(token) = &cli.token {
            self.telegram.bot_token = token.clone();
        }
        if let Some(max_bytes) = cli.max_bytes {
            self.delivery.max_upload_bytes = max_bytes;
        }
        if let Some(dir) = &cli.downloads_dir {
            self.app.downloads_dir = dir.clone();
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            return Err(CourierError::ConfigError(
                "bot token is not set (use --token or BOT_TOKEN)".to_string(),
            )
            .into());
        }

        if self.delivery.max_upload_bytes == 0 {
            return Err(CourierError::ConfigError("max_upload_bytes must be positive".to_string()).into());
        }

        if self.delivery.max_attempts == Some(0) {
            return Err(CourierError::ConfigError("max_attempts must be at least 1".to_string()).into());
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            transient_delay: Duration::from_secs(self.delivery.retry_delay_secs),
            max_attempts: self.delivery.max_attempts,
            bad_request_is_terminal: self.delivery.bad_request_is_terminal,
            tick_interval: Duration::from_secs(self.delivery.ticker_interval_secs.max(1)),
        }
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.app.progress_interval_ms)
    }

    /// Display current configuration
    pub fn display(&self) {
        let token = if self.telegram.bot_token.is_empty() { "(not set)" } else { "(set)" };
        println!("Current Configuration:");
        println!("  Bot Token: {}", token);
        println!("  API Server: {}", self.telegram.api_base_url);
        println!("  yt-dlp: {}", self.tools.yt_dlp_path);
        println!("  ffmpeg: {}", self.tools.ffmpeg_path);
        println!("  Max Upload: {} bytes", self.delivery.max_upload_bytes);
        match self.delivery.max_attempts {
            Some(max) => println!("  Max Attempts: {}", max),
            None => println!("  Max Attempts: unlimited"),
        }
        println!("  Downloads: {}", self.app.downloads_dir.display());
    }

    /// Serialize with the token redacted
    pub fn to_redacted_yaml(&self) -> Result<String> {
        let mut redacted = self.clone();
        if !redacted.telegram.bot_token.is_empty() {
            redacted.telegram.bot_token = "<redacted>".to_string();
        }
        serde_yaml::to_string(&redacted).context("Failed to serialize config")
    }
}
