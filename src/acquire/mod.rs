use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod ytdlp;

pub use ytdlp::YtDlpEngine;

use crate::postprocess::MediaClass;
use crate::progress::ProgressSink;
use crate::utils::extract_domain;

/// Output filename template handed to the engine
pub const OUTPUT_TEMPLATE: &str = "%(title).80s [%(id)s]-%(extractor)s.%(ext)s";

/// Retry count for the engine's own internal retries (requests and fragments)
pub const ENGINE_RETRIES: u32 = 20;

pub const CONCURRENT_FRAGMENTS: u32 = 5;

/// Codec and bitrate audio-only fetches are transcoded to
pub const AUDIO_CODEC: &str = "mp3";
pub const AUDIO_BITRATE_KBPS: u32 = 320;

/// Source platform filter chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    Auto,
    YouTube,
    TikTok,
    Facebook,
}

impl Platform {
    pub const ALL: [Platform; 4] = [Platform::Auto, Platform::YouTube, Platform::TikTok, Platform::Facebook];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn name(&self) -> &'static str {
        match self {
            Platform::Auto => "Auto",
            Platform::YouTube => "YouTube",
            Platform::TikTok => "TikTok",
            Platform::Facebook => "Facebook",
        }
    }

    /// Host fragments belonging to the platform; empty for `Auto`
    pub fn domains(&self) -> &'static [&'static str] {
        match self {
            Platform::Auto => &[],
            Platform::YouTube => &["youtube.com", "youtu.be"],
            Platform::TikTok => &["tiktok.com", "vm.tiktok.com"],
            Platform::Facebook => &["facebook.com", "fb.watch", "m.facebook.com"],
        }
    }

    /// Whether MP4 streams should be preferred when available
    pub fn prefers_mp4(&self) -> bool {
        matches!(self, Platform::YouTube | Platform::Facebook)
    }

    pub fn matches_url(&self, url: &str) -> bool {
        if *self == Platform::Auto {
            return true;
        }
        extract_domain(url)
            .map(|host| self.domains().iter().any(|d| host.contains(d)))
            .unwrap_or(false)
    }

    /// Keep URLs belonging to this platform, or all of them if none match
    pub fn filter_urls(&self, urls: Vec<String>) -> Vec<String> {
        let matching: Vec<String> = urls.iter().filter(|u| self.matches_url(u)).cloned().collect();
        if matching.is_empty() {
            urls
        } else {
            matching
        }
    }
}

/// What the user wants delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeliveryMode {
    /// Video with its audio track
    #[default]
    Muxed,
    /// Video with the audio track removed
    VideoOnly,
    /// Audio transcoded to MP3
    AudioOnly,
}

impl DeliveryMode {
    pub const ALL: [DeliveryMode; 3] = [DeliveryMode::Muxed, DeliveryMode::VideoOnly, DeliveryMode::AudioOnly];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryMode::Muxed => "Video+Audio",
            DeliveryMode::VideoOnly => "Video without audio",
            DeliveryMode::AudioOnly => "MP3",
        }
    }

    /// Container the engine merges separate streams into
    pub fn merge_container(&self) -> Option<&'static str> {
        match self {
            DeliveryMode::Muxed => Some("mp4"),
            DeliveryMode::VideoOnly => Some("mkv"),
            DeliveryMode::AudioOnly => None,
        }
    }

    /// Which output directory this mode writes into
    pub fn output_class(&self) -> MediaClass {
        match self {
            DeliveryMode::AudioOnly => MediaClass::Audio,
            _ => MediaClass::Video,
        }
    }
}

/// Height ceiling for video streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    MaxHeight(u32),
    #[default]
    Best,
}

impl Quality {
    pub const ALL: [Quality; 8] = [
        Quality::MaxHeight(240),
        Quality::MaxHeight(360),
        Quality::MaxHeight(480),
        Quality::MaxHeight(720),
        Quality::MaxHeight(1080),
        Quality::MaxHeight(1440),
        Quality::MaxHeight(2160),
        Quality::Best,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn height(&self) -> Option<u32> {
        match self {
            Quality::MaxHeight(h) => Some(*h),
            Quality::Best => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Quality::MaxHeight(h) => format!("≤{}p", h),
            Quality::Best => "Best".to_string(),
        }
    }
}

/// Typed inputs of the format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatOptions {
    pub platform: Platform,
    pub mode: DeliveryMode,
    pub quality: Quality,
}

/// Build the engine's format selector expression
pub fn build_format_selector(options: &FormatOptions) -> String {
    let cap = |expr: &str| match options.quality.height() {
        Some(h) => format!("{}[height<={}]", expr, h),
        None => expr.to_string(),
    };
    let prefer_mp4 = options.platform.prefers_mp4();

    match options.mode {
        DeliveryMode::Muxed if prefer_mp4 => format!(
            "({}/{})+bestaudio[ext=m4a]/bestaudio/best[ext=mp4]/best",
            cap("bestvideo[ext=mp4]"),
            cap("bestvideo")
        ),
        DeliveryMode::Muxed => format!("{}+bestaudio/best", cap("bestvideo")),
        DeliveryMode::VideoOnly if prefer_mp4 => {
            format!("{}/{}/best", cap("bestvideo[ext=mp4]"), cap("bestvideo"))
        }
        DeliveryMode::VideoOnly => cap("bestvideo"),
        DeliveryMode::AudioOnly => "bestaudio/best".to_string(),
    }
}

/// One fetch of one URL into one output directory
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub url: String,
    pub options: FormatOptions,
    pub output_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub proxy: Option<String>,
}

impl FetchJob {
    pub fn format_selector(&self) -> String {
        build_format_selector(&self.options)
    }
}

/// Result of one fetch; failures never escape as errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Completed,
    Failed { reason: String },
}

/// External engine that fetches media for a URL into the job's output directory
#[async_trait]
pub trait AcquisitionEngine: Send + Sync {
    /// Run the fetch off the async executor, reporting progress into `progress`
    async fn fetch(&self, job: FetchJob, progress: ProgressSink) -> FetchOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(platform: Platform, mode: DeliveryMode, quality: Quality) -> FormatOptions {
        FormatOptions { platform, mode, quality }
    }

    #[test]
    fn test_muxed_with_mp4_preference_and_ceiling() {
        let selector = build_format_selector(&options(Platform::YouTube, DeliveryMode::Muxed, Quality::MaxHeight(720)));
        assert_eq!(
            selector,
            "(bestvideo[ext=mp4][height<=720]/bestvideo[height<=720])+bestaudio[ext=m4a]/bestaudio/best[ext=mp4]/best"
        );
    }

    #[test]
    fn test_muxed_generic_best() {
        let selector = build_format_selector(&options(Platform::TikTok, DeliveryMode::Muxed, Quality::Best));
        assert_eq!(selector, "bestvideo+bestaudio/best");
    }

    #[test]
    fn test_video_only_selectors() {
        assert_eq!(
            build_format_selector(&options(Platform::Facebook, DeliveryMode::VideoOnly, Quality::MaxHeight(480))),
            "bestvideo[ext=mp4][height<=480]/bestvideo[height<=480]/best"
        );
        assert_eq!(
            build_format_selector(&options(Platform::Auto, DeliveryMode::VideoOnly, Quality::MaxHeight(1080))),
            "bestvideo[height<=1080]"
        );
    }

    #[test]
    fn test_audio_only_ignores_quality_and_platform() {
        for platform in Platform::ALL {
            let selector = build_format_selector(&options(platform, DeliveryMode::AudioOnly, Quality::MaxHeight(240)));
            assert_eq!(selector, "bestaudio/best");
        }
    }

    #[test]
    fn test_platform_url_filter_falls_back_to_all() {
        let urls = vec![
            "https://www.youtube.com/watch?v=1".to_string(),
            "https://vimeo.com/2".to_string(),
        ];
        assert_eq!(Platform::YouTube.filter_urls(urls.clone()), vec!["https://www.youtube.com/watch?v=1"]);
        assert_eq!(Platform::TikTok.filter_urls(urls.clone()), urls);
        assert_eq!(Platform::Auto.filter_urls(urls.clone()), urls);
    }

    #[test]
    fn test_menu_indices() {
        assert_eq!(Platform::from_index(1), Some(Platform::YouTube));
        assert_eq!(Platform::from_index(9), None);
        assert_eq!(DeliveryMode::from_index(2), Some(DeliveryMode::AudioOnly));
        assert_eq!(Quality::from_index(3), Some(Quality::MaxHeight(720)));
        assert_eq!(Quality::from_index(7), Some(Quality::Best));
        assert_eq!(Quality::MaxHeight(720).label(), "≤720p");
    }
}
