use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_courier::acquire::{Platform, YtDlpEngine};
use media_courier::bot::Bot;
use media_courier::channel::{DeliveryChannel, TelegramClient};
use media_courier::cli::{Cli, Commands};
use media_courier::config::Config;
use media_courier::delivery::DeliveryEngine;
use media_courier::orchestrator::JobOrchestrator;
use media_courier::postprocess::{FfmpegTransform, PostProcessor};
use media_courier::session::SessionStore;
use media_courier::utils;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose { "media_courier=debug" } else { "media_courier=info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_cli(&cli);

    match cli.command {
        Commands::Run => run(config).await?,
        Commands::Config { yaml } => {
            if yaml {
                print!("{}", config.to_redacted_yaml()?);
            } else {
                config.display();
                if let Some(path) = Config::config_path() {
                    println!("  Config File: {}", path.display());
                }
            }
        }
        Commands::Platforms => {
            println!("Supported platforms:");
            for platform in Platform::ALL {
                if platform.domains().is_empty() {
                    println!("  • {} (any site yt-dlp understands)", platform.name());
                } else {
                    println!("  • {} ({})", platform.name(), platform.domains().join(", "));
                }
            }
        }
    }

    Ok(())
}

async fn run(config: Config) -> Result<()> {
    config.validate()?;

    // Check for required external dependencies (non-fatal)
    let missing_deps = utils::check_dependencies(&config.tools.yt_dlp_path, &config.tools.ffmpeg_path).await;
    for dep in missing_deps {
        tracing::warn!("Missing dependency: {}", dep);
    }

    let client = TelegramClient::new(config.telegram.bot_token.clone())?
        .with_base_url(config.telegram.api_base_url.clone());
    let channel: Arc<dyn DeliveryChannel> = Arc::new(client.clone());

    let postprocessor = Arc::new(PostProcessor::new(Arc::new(FfmpegTransform::new(
        config.tools.ffmpeg_path.clone(),
    ))));
    let delivery = DeliveryEngine::new(channel.clone(), config.delivery.max_upload_bytes)
        .with_policy(config.retry_policy());
    let orchestrator = JobOrchestrator::new(
        Arc::new(YtDlpEngine::new(config.tools.yt_dlp_path.clone())),
        postprocessor,
        delivery,
        channel,
    )
    .with_progress_throttle(config.progress_interval());

    let downloads_dir = std::path::absolute(&config.app.downloads_dir)?;
    fs_err::create_dir_all(&downloads_dir)?;
    tracing::info!("Storing downloads under {}", downloads_dir.display());

    let bot = Bot::new(client, SessionStore::new(downloads_dir), Arc::new(orchestrator))
        .with_poll_timeout(config.telegram.poll_timeout_secs);

    tokio::select! {
        result = bot.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down");
            Ok(())
        }
    }
}
