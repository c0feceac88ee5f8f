use async_trait::async_trait;
use std::io::{BufRead, BufReader};
use std::process::{Command, Stdio};

use super::{
    AcquisitionEngine, DeliveryMode, FetchJob, FetchOutcome, AUDIO_BITRATE_KBPS, AUDIO_CODEC,
    CONCURRENT_FRAGMENTS, ENGINE_RETRIES, OUTPUT_TEMPLATE,
};
use crate::progress::{ProgressEvent, ProgressSink};

/// Prefix marking machine-readable progress lines
const PROGRESS_MARKER: &str = "[courier]";

/// Fetch engine backed by the yt-dlp command line tool
pub struct YtDlpEngine {
    yt_dlp_path: String,
}

impl YtDlpEngine {
    pub fn new(yt_dlp_path: impl Into<String>) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
        }
    }
}

impl Default for YtDlpEngine {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

#[async_trait]
impl AcquisitionEngine for YtDlpEngine {
    async fn fetch(&self, job: FetchJob, progress: ProgressSink) -> FetchOutcome {
        let binary = self.yt_dlp_path.clone();
        let args = build_args(&job);
        tracing::info!("Fetching {} into {}", job.url, job.output_dir.display());
        tracing::debug!("yt-dlp arguments: {:?}", args);

        // The fetch may run for hours; keep it off the async workers
        let handle = tokio::task::spawn_blocking(move || run_with_progress(&binary, &args, &progress));

        match handle.await {
            Ok(outcome) => outcome,
            Err(e) => FetchOutcome::Failed {
                reason: format!("fetch worker failed: {}", e),
            },
        }
    }
}

/// Render the engine configuration for a job as command line arguments
pub fn build_args(job: &FetchJob) -> Vec<String> {
    let output = job.output_dir.join(OUTPUT_TEMPLATE);
    let mut args = vec![
        "--format".to_string(),
        job.format_selector(),
        "--output".to_string(),
        output.to_string_lossy().into_owned(),
        "--retries".to_string(),
        ENGINE_RETRIES.to_string(),
        "--fragment-retries".to_string(),
        ENGINE_RETRIES.to_string(),
        "--concurrent-fragments".to_string(),
        CONCURRENT_FRAGMENTS.to_string(),
        "--ignore-errors".to_string(),
        "--yes-playlist".to_string(),
        "--quiet".to_string(),
        "--no-warnings".to_string(),
        "--progress".to_string(),
        "--newline".to_string(),
        "--progress-template".to_string(),
        format!(
            "download:{} %(progress.status)s %(progress.downloaded_bytes)s %(progress.total_bytes)s \
             %(progress.total_bytes_estimate)s %(progress.speed)s %(progress.eta)s",
            PROGRESS_MARKER
        ),
    ];

    if let Some(container) = job.options.mode.merge_container() {
        args.push("--merge-output-format".to_string());
        args.push(container.to_string());
    }

    if job.options.mode == DeliveryMode::AudioOnly {
        args.extend([
            "--extract-audio".to_string(),
            "--audio-format".to_string(),
            AUDIO_CODEC.to_string(),
            "--audio-quality".to_string(),
            format!("{}K", AUDIO_BITRATE_KBPS),
        ]);
    }

    if let Some(cookies) = &job.cookies {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().into_owned());
    }

    if let Some(proxy) = &job.proxy {
        args.push("--proxy".to_string());
        args.push(proxy.clone());
    }

    args.push("--".to_string());
    args.push(job.url.clone());
    args
}

/// Parse one progress line produced by the progress template
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let number = |idx: usize| -> Option<f64> { fields.get(idx).and_then(|v| v.parse::<f64>().ok()) };

    match *fields.first()? {
        "downloading" => Some(ProgressEvent::Downloading {
            downloaded: number(1).map(|v| v as u64).unwrap_or(0),
            total: number(2).or_else(|| number(3)).map(|v| v as u64).filter(|&t| t > 0),
            speed: number(4),
            eta: number(5).map(|v| v as u64),
        }),
        "finished" => Some(ProgressEvent::Finished),
        _ => None,
    }
}

fn run_with_progress(binary: &str, args: &[String], progress: &ProgressSink) -> FetchOutcome {
    let mut child = match Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to spawn {}: {}", binary, e);
            return FetchOutcome::Failed {
                reason: format!("failed to spawn {}: {}", binary, e),
            };
        }
    };

    // Progress may land on either stream depending on verbosity flags
    let stderr_reader = child.stderr.take().map(|stderr| {
        let sink = progress.clone();
        std::thread::spawn(move || {
            let mut last_error = None;
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                if let Some(event) = parse_progress_line(&line) {
                    sink.emit(event);
                } else if !line.trim().is_empty() {
                    tracing::debug!("yt-dlp stderr: {}", line);
                    last_error = Some(line);
                }
            }
            last_error
        })
    });

    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines().map_while(Result::ok) {
            match parse_progress_line(&line) {
                Some(event) => progress.emit(event),
                None => tracing::debug!("yt-dlp stdout: {}", line),
            }
        }
    }

    let last_error = stderr_reader.and_then(|reader| reader.join().ok().flatten());

    match child.wait() {
        Ok(status) if status.success() => FetchOutcome::Completed,
        Ok(status) => FetchOutcome::Failed {
            reason: last_error.unwrap_or_else(|| format!("yt-dlp exited with {}", status)),
        },
        Err(e) => FetchOutcome::Failed {
            reason: format!("failed to wait for yt-dlp: {}", e),
        },
    }
}
