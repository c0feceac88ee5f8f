use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "courier",
    about = "Media Courier - fetch media from YouTube, TikTok, Facebook and more, delivered through a Telegram bot",
    version,
    long_about = "A Telegram bot that fetches media URLs with yt-dlp, post-processes the results with ffmpeg and delivers the files back to the chat, retrying through rate limits and network failures."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to ./config.yaml or the user config directory)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Telegram bot token
    #[arg(long, global = true, env = "BOT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Largest file the bot will try to upload, in bytes
    #[arg(long, global = true, env = "TG_MAX_BYTES", value_name = "BYTES")]
    pub max_bytes: Option<u64>,

    /// Root directory for per-user downloads
    #[arg(long, global = true, env = "COURIER_DOWNLOADS", value_name = "DIR")]
    pub downloads_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the bot and poll for updates
    Run,

    /// Show the effective configuration
    Config {
        /// Print the configuration as YAML instead of a summary
        #[arg(long)]
        yaml: bool,
    },

    /// List supported platforms
    Platforms,
}
