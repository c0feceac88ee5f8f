//! Per-file transforms that turn raw fetch output into delivery-ready files.
//!
//! Every step here is an optimization or a cosmetic repair: a failure is
//! logged and the file moves on unchanged, it is never dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use unicode_normalization::UnicodeNormalization;

pub mod transform;

pub use transform::{FfmpegTransform, MediaTransform};

use crate::acquire::DeliveryMode;

/// Maximum filename length in bytes after normalization
pub const DEFAULT_MAX_NAME_LEN: usize = 100;

/// Container and audio extensions that are delivered as-is
pub const KNOWN_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "webm", "mov", "m4v", "mp3", "m4a", "ogg", "opus", "flac", "wav",
];

const DEFAULT_VIDEO_EXTENSION: &str = "mp4";

/// MP4-family containers that benefit from a fast-start remux
const FASTSTART_EXTENSIONS: &[&str] = &["mp4", "m4v"];

/// Longest suffix still treated as an extension when truncating
const MAX_EXTENSION_LEN: usize = 10;

/// Which output directory a produced file came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaClass {
    Video,
    Audio,
}

/// Applies the per-class post-processing steps to produced files
pub struct PostProcessor {
    transform: Arc<dyn MediaTransform>,
}

impl PostProcessor {
    pub fn new(transform: Arc<dyn MediaTransform>) -> Self {
        Self { transform }
    }

    /// Run every applicable step and return the file's final path.
    ///
    /// Video files are optionally stripped of audio, remuxed for fast start
    /// when in an MP4-family container, given a playable extension and
    /// renamed to a normalized name. Audio files only get the rename.
    /// Blocking: call from a worker thread.
    pub fn process(&self, path: &Path, class: MediaClass, mode: DeliveryMode) -> PathBuf {
        match class {
            MediaClass::Video => {
                if mode == DeliveryMode::VideoOnly && !self.transform.strip_audio(path) {
                    tracing::warn!("Audio strip failed for {}, delivering as fetched", path.display());
                }

                if is_faststart_candidate(path) && !self.transform.faststart(path) {
                    tracing::debug!("Fast-start remux skipped for {}", path.display());
                }

                let repaired = repair_extension(path);
                apply_normalized_name(&repaired, DEFAULT_MAX_NAME_LEN)
            }
            MediaClass::Audio => apply_normalized_name(path, DEFAULT_MAX_NAME_LEN),
        }
    }
}

fn extension_lowercase(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}

pub fn has_known_extension(path: &Path) -> bool {
    extension_lowercase(path)
        .map(|ext| KNOWN_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

fn is_faststart_candidate(path: &Path) -> bool {
    extension_lowercase(path)
        .map(|ext| FASTSTART_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Give a file without a recognized extension a playable one by appending
/// `.mp4`. Files with a known extension are returned untouched.
pub fn repair_extension(path: &Path) -> PathBuf {
    if has_known_extension(path) {
        return path.to_path_buf();
    }

    let Some(name) = path.file_name() else {
        return path.to_path_buf();
    };
    let mut repaired = name.to_os_string();
    repaired.push(".");
    repaired.push(DEFAULT_VIDEO_EXTENSION);
    let target = path.with_file_name(repaired);

    rename_without_clobber(path, &target)
}

/// Rename a file to its normalized name in the same directory
pub fn apply_normalized_name(path: &Path, max_len: usize) -> PathBuf {
    let Some(name) = path.file_name() else {
        return path.to_path_buf();
    };
    let normalized = normalize_filename(&name.to_string_lossy(), max_len);
    let target = path.with_file_name(normalized);

    if target == path {
        return path.to_path_buf();
    }
    rename_without_clobber(path, &target)
}

/// Rename `from` to `to`, keeping `from` if the target exists or the rename fails
fn rename_without_clobber(from: &Path, to: &Path) -> PathBuf {
    if to.exists() {
        tracing::warn!("Not renaming {}: {} already exists", from.display(), to.display());
        return from.to_path_buf();
    }

    match fs_err::rename(from, to) {
        Ok(()) => to.to_path_buf(),
        Err(e) => {
            tracing::warn!("Rename failed, keeping original name: {}", e);
            from.to_path_buf()
        }
    }
}

/// Produce a filesystem- and chat-safe filename.
///
/// Decomposes to NFKD, replaces path separators with `_`, turns line breaks
/// and tabs into spaces, drops other control characters and truncates to
/// `max_len` bytes while keeping the extension.
pub fn normalize_filename(name: &str, max_len: usize) -> String {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.nfkd() {
        match c {
            '/' | '\\' => cleaned.push('_'),
            '\n' | '\r' | '\t' => cleaned.push(' '),
            c if c.is_control() => {}
            c => cleaned.push(c),
        }
    }

    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return "_".to_string();
    }
    truncate_preserving_extension(cleaned, max_len)
}

fn truncate_preserving_extension(name: &str, max_len: usize) -> String {
    if name.len() <= max_len {
        return name.to_string();
    }

    let extension = name
        .rfind('.')
        .filter(|&idx| idx > 0)
        .map(|idx| &name[idx..])
        .filter(|ext| ext.len() <= MAX_EXTENSION_LEN && !ext.contains(' '));

    match extension {
        Some(ext) if ext.len() < max_len => {
            let stem = &name[..name.len() - ext.len()];
            let stem = truncate_at_char_boundary(stem, max_len - ext.len()).trim_end();
            format!("{stem}{ext}")
        }
        _ => truncate_at_char_boundary(name, max_len).to_string(),
    }
}

fn truncate_at_char_boundary(s: &str, max_len: usize) -> &str {
    if s.len() <= max_len {
        return s;
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
