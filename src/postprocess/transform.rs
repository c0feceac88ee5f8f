use std::path::Path;
use std::process::{Command, Stdio};

/// Stream-copy transforms applied to a produced file in place.
///
/// Both operations return `true` only when the original was replaced by the
/// transformed output; on any failure the original file is left untouched.
#[cfg_attr(test, mockall::automock)]
pub trait MediaTransform: Send + Sync {
    /// Copy every stream except audio into a new fast-start container
    fn strip_audio(&self, path: &Path) -> bool;

    /// Relocate container metadata to the front for progressive playback
    fn faststart(&self, path: &Path) -> bool;
}

/// ffmpeg-backed transform
pub struct FfmpegTransform {
    ffmpeg_path: String,
}

impl FfmpegTransform {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    /// Check if ffmpeg can be found
    pub fn is_available(&self) -> bool {
        which::which(&self.ffmpeg_path).is_ok()
    }

    fn remux(&self, path: &Path, drop_audio: bool) -> bool {
        if !self.is_available() {
            tracing::debug!("{} not found, skipping remux of {}", self.ffmpeg_path, path.display());
            return false;
        }

        let Some(dir) = path.parent() else {
            return false;
        };
        let suffix = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();

        // The temporary output lives next to the original so the final replace is a rename
        let tmp = match tempfile::Builder::new()
            .prefix(".remux-")
            .suffix(&suffix)
            .tempfile_in(dir)
        {
            Ok(tmp) => tmp,
            Err(e) => {
                tracing::warn!("Cannot create temporary file in {}: {}", dir.display(), e);
                return false;
            }
        };

        let mut command = Command::new(&self.ffmpeg_path);
        command.args(["-y", "-v", "error", "-i"]).arg(path).args(["-c", "copy"]);
        if drop_audio {
            command.arg("-an");
        }
        command
            .args(["-movflags", "+faststart"])
            .arg(tmp.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        match command.output() {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                tracing::warn!(
                    "ffmpeg exited with {} for {}: {}",
                    output.status,
                    path.display(),
                    stderr.lines().last().unwrap_or_default()
                );
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to run ffmpeg for {}: {}", path.display(), e);
                return false;
            }
        }

        if let Ok(metadata) = fs_err::metadata(path) {
            let _ = fs_err::set_permissions(tmp.path(), metadata.permissions());
        }

        match tmp.persist(path) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Failed to replace {} with remuxed output: {}", path.display(), e);
                false
            }
        }
    }
}

impl MediaTransform for FfmpegTransform {
    fn strip_audio(&self, path: &Path) -> bool {
        self.remux(path, true)
    }

    fn faststart(&self, path: &Path) -> bool {
        self.remux(path, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        fs_err::write(&file, b"original").unwrap();

        let transform = FfmpegTransform::new("definitely-not-a-real-ffmpeg-binary");
        assert!(!transform.is_available());
        assert!(!transform.strip_audio(&file));
        assert!(!transform.faststart(&file));
        assert_eq!(fs_err::read(&file).unwrap(), b"original");
    }

    #[cfg(unix)]
    fn fake_tool(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("fake-ffmpeg");
        fs_err::write(&script, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs_err::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[test]
    fn test_successful_remux_replaces_original() {
        let tools = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let file = media.path().join("clip.mp4");
        fs_err::write(&file, b"original").unwrap();

        // Writes to the last argument, which is the output path
        let tool = fake_tool(tools.path(), "for last; do :; done\nprintf remuxed > \"$last\"");
        let transform = FfmpegTransform::new(tool);

        assert!(transform.faststart(&file));
        assert_eq!(fs_err::read(&file).unwrap(), b"remuxed");
        assert_eq!(crate::snapshot::snapshot(media.path()).len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_remux_keeps_original_and_cleans_up() {
        let tools = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let file = media.path().join("clip.mp4");
        fs_err::write(&file, b"original").unwrap();

        let transform = FfmpegTransform::new(fake_tool(tools.path(), "exit 1"));

        assert!(!transform.strip_audio(&file));
        assert_eq!(fs_err::read(&file).unwrap(), b"original");
        assert_eq!(crate::snapshot::snapshot(media.path()).len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_repeated_faststart_is_stable() {
        let tools = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let file = media.path().join("clip.mp4");
        fs_err::write(&file, b"already fast-start").unwrap();

        // Copies the `-i` input to the output, like a remux of an already remuxed file
        let tool = fake_tool(
            tools.path(),
            "prev=''\nfor arg; do\n  [ \"$prev\" = -i ] && input=\"$arg\"\n  prev=\"$arg\"\ndone\ncp \"$input\" \"$prev\"",
        );
        let transform = FfmpegTransform::new(tool);

        assert!(transform.faststart(&file));
        let first = fs_err::read(&file).unwrap();
        assert!(transform.faststart(&file));
        let second = fs_err::read(&file).unwrap();

        assert_eq!(first, b"already fast-start");
        assert_eq!(first, second);
        assert_eq!(crate::snapshot::snapshot(media.path()).len(), 1);
    }

    #[test]
    fn test_real_ffmpeg_faststart_twice_gives_same_file() {
        if which::which("ffmpeg").is_err() {
            return;
        }
        let media = tempfile::tempdir().unwrap();
        let file = media.path().join("clip.mp4");

        let generated = Command::new("ffmpeg")
            .args(["-y", "-v", "error", "-f", "lavfi", "-i", "color=c=black:s=32x32:d=1", "-c:v", "mpeg4"])
            .arg(&file)
            .status()
            .unwrap();
        assert!(generated.success());

        let transform = FfmpegTransform::new("ffmpeg");
        assert!(transform.faststart(&file));
        let first = fs_err::read(&file).unwrap();
        assert!(transform.faststart(&file));
        let second = fs_err::read(&file).unwrap();

        assert_eq!(first, second);
        assert_eq!(crate::snapshot::snapshot(media.path()).len(), 1);
    }
}
