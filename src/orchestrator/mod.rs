//! Runs one user's job: for each submitted URL, fetch, find what was
//! produced, post-process it and deliver it, then report the count.
//!
//! URLs are processed strictly one after another so the before/after
//! snapshots around each fetch can only see that fetch's output.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::acquire::{AcquisitionEngine, FetchOutcome};
use crate::channel::{ChatId, DeliveryChannel};
use crate::delivery::{DeliveryEngine, DeliveryOutcome};
use crate::postprocess::{MediaClass, PostProcessor};
use crate::progress::{progress_channel, ProgressReporter, DEFAULT_THROTTLE};
use crate::session::Session;
use crate::snapshot::{diff, snapshot};
use crate::CourierError;

pub const STARTING_TEXT: &str = "Starting download…";

/// Suffixes yt-dlp leaves behind for interrupted or in-flight downloads
const IN_PROGRESS_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];

/// Totals for one finished job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub urls: usize,
    pub failed_urls: usize,
    pub produced: usize,
    pub delivered: usize,
    pub rejected: usize,
    pub undelivered: usize,
}

pub struct JobOrchestrator {
    engine: Arc<dyn AcquisitionEngine>,
    postprocessor: Arc<PostProcessor>,
    delivery: DeliveryEngine,
    channel: Arc<dyn DeliveryChannel>,
    progress_throttle: Duration,
}

impl JobOrchestrator {
    pub fn new(
        engine: Arc<dyn AcquisitionEngine>,
        postprocessor: Arc<PostProcessor>,
        delivery: DeliveryEngine,
        channel: Arc<dyn DeliveryChannel>,
    ) -> Self {
        Self {
            engine,
            postprocessor,
            delivery,
            channel,
            progress_throttle: DEFAULT_THROTTLE,
        }
    }

    pub fn with_progress_throttle(mut self, throttle: Duration) -> Self {
        self.progress_throttle = throttle;
        self
    }

    /// Process every URL of the session in order and report the total
    pub async fn run(&self, chat_id: ChatId, session: &Session) -> JobReport {
        let mut report = JobReport {
            urls: session.urls.len(),
            ..JobReport::default()
        };

        for url in &session.urls {
            let produced = self.acquire(chat_id, session, url, &mut report).await;
            report.produced += produced.len();

            if produced.is_empty() {
                tracing::info!("{} produced no files", url);
                continue;
            }

            for (path, class) in produced {
                let Some(path) = self.finish(path, class, session).await else {
                    continue;
                };

                match self.delivery.deliver_with_outcome(chat_id, &path).await {
                    DeliveryOutcome::Delivered { .. } => report.delivered += 1,
                    DeliveryOutcome::TooLarge { .. } => report.rejected += 1,
                    DeliveryOutcome::GaveUp { .. } => report.undelivered += 1,
                }
            }
        }

        tracing::info!(
            "Job finished for chat {}: {} of {} URL(s) failed, {} file(s) delivered",
            chat_id,
            report.failed_urls,
            report.urls,
            report.delivered
        );

        let summary = format!("Done ({} files).", report.delivered);
        if let Err(e) = self.channel.send_message(chat_id, &summary).await {
            tracing::warn!("Failed to send job summary: {}", e);
        }

        report
    }

    /// Fetch one URL and return the files it produced, video before audio
    async fn acquire(
        &self,
        chat_id: ChatId,
        session: &Session,
        url: &str,
        report: &mut JobReport,
    ) -> Vec<(PathBuf, MediaClass)> {
        let status = match self.channel.send_message(chat_id, STARTING_TEXT).await {
            Ok(message) => Some(message),
            Err(e) => {
                tracing::warn!("Failed to send status message: {}", e);
                None
            }
        };

        let before = snapshot_pair(session).await;

        let (sink, events) = progress_channel();
        let reporter = status.map(|message| {
            let reporter = ProgressReporter::new(self.channel.clone(), message).with_throttle(self.progress_throttle);
            tokio::spawn(reporter.run(events))
        });

        let outcome = self.engine.fetch(session.fetch_job(url), sink).await;
        if let Some(reporter) = reporter {
            let _ = reporter.await;
        }

        if let FetchOutcome::Failed { reason } = outcome {
            let error = CourierError::AcquisitionFailed {
                url: url.to_string(),
                reason,
            };
            tracing::warn!("{}", error);
            report.failed_urls += 1;
        }

        let after = snapshot_pair(session).await;

        diff(&before.0, &after.0)
            .into_iter()
            .map(|name| (name, MediaClass::Video))
            .chain(diff(&before.1, &after.1).into_iter().map(|name| (name, MediaClass::Audio)))
            .filter(|(name, _)| {
                let partial = is_in_progress(name);
                if partial {
                    tracing::debug!("Ignoring unfinished download {}", name);
                }
                !partial
            })
            .map(|(name, class)| (session.output_dir(class).join(name), class))
            .collect()
    }

    /// Post-process a produced file; `None` if nothing deliverable remains
    async fn finish(&self, path: PathBuf, class: MediaClass, session: &Session) -> Option<PathBuf> {
        let postprocessor = self.postprocessor.clone();
        let mode = session.mode;
        let original = path.clone();

        let path = tokio::task::spawn_blocking(move || postprocessor.process(&path, class, mode))
            .await
            .unwrap_or(original);

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() && metadata.len() > 0 => Some(path),
            _ => {
                tracing::debug!("Skipping empty or missing {}", path.display());
                None
            }
        }
    }
}

/// Whether `name` is one of the engine's partial or bookkeeping files
pub fn is_in_progress(name: &str) -> bool {
    IN_PROGRESS_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) || name.contains(".part-Frag")
}

async fn snapshot_pair(session: &Session) -> (BTreeSet<String>, BTreeSet<String>) {
    let video = session.video_dir.clone();
    let audio = session.audio_dir.clone();
    tokio::task::spawn_blocking(move || (snapshot(&video), snapshot(&audio)))
        .await
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_progress_files_are_recognized() {
        assert!(is_in_progress("clip [x]-youtube.mp4.part"));
        assert!(is_in_progress("clip [x]-youtube.mp4.ytdl"));
        assert!(is_in_progress("clip [x]-youtube.f137.mp4.part-Frag12"));
        assert!(is_in_progress("clip [x]-youtube.temp"));
        assert!(!is_in_progress("clip [x]-youtube.mp4"));
        assert!(!is_in_progress("party time [p]-tiktok.mp4"));
    }
}
