use anyhow::{anyhow, Context};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::acquire::{DeliveryMode, FetchJob, FormatOptions, Platform, Quality};
use crate::postprocess::MediaClass;
use crate::Result;

pub type UserId = i64;

/// Where the user is in the menu flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Step {
    #[default]
    Idle,
    AwaitLink,
    AwaitMode,
    AwaitQuality,
    Running,
}

/// Per-user choices and output locations
#[derive(Debug, Clone)]
pub struct Session {
    pub step: Step,
    pub platform: Platform,
    pub mode: DeliveryMode,
    pub quality: Quality,
    pub urls: Vec<String>,
    pub base_dir: PathBuf,
    pub video_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub cookies: Option<PathBuf>,
    pub proxy: Option<String>,
    /// Sequence number of the user's most recent job
    pub job_id: u64,
}

impl Session {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            step: Step::Idle,
            platform: Platform::Auto,
            mode: DeliveryMode::Muxed,
            quality: Quality::Best,
            urls: Vec::new(),
            video_dir: base_dir.join("Videos"),
            audio_dir: base_dir.join("Audio"),
            base_dir,
            cookies: None,
            proxy: None,
            job_id: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.step == Step::Running
    }

    /// Forget the menu choices; user settings and directories stay
    pub fn clear_choices(&mut self) {
        self.step = Step::Idle;
        self.platform = Platform::Auto;
        self.mode = DeliveryMode::Muxed;
        self.quality = Quality::Best;
        self.urls.clear();
    }

    /// Create the per-class output directories
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.video_dir, &self.audio_dir] {
            fs_err::create_dir_all(dir).context("Failed to create output directory")?;
        }
        Ok(())
    }

    pub fn output_dir(&self, class: MediaClass) -> &Path {
        match class {
            MediaClass::Video => &self.video_dir,
            MediaClass::Audio => &self.audio_dir,
        }
    }

    pub fn format_options(&self) -> FormatOptions {
        FormatOptions {
            platform: self.platform,
            mode: self.mode,
            quality: self.quality,
        }
    }

    /// Describe the fetch of one submitted URL
    pub fn fetch_job(&self, url: &str) -> FetchJob {
        FetchJob {
            url: url.to_string(),
            options: self.format_options(),
            output_dir: self.output_dir(self.mode.output_class()).to_path_buf(),
            cookies: self.cookies.clone(),
            proxy: self.proxy.clone(),
        }
    }
}

/// Concurrency-safe table of sessions keyed by user.
///
/// Cheap to clone; every clone shares the same table.
#[derive(Clone)]
pub struct SessionStore {
    root: PathBuf,
    sessions: Arc<RwLock<HashMap<UserId, Session>>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn user_dir(&self, user: UserId) -> PathBuf {
        self.root.join(format!("user_{}", user))
    }

    fn fresh(&self, user: UserId) -> Result<Session> {
        let session = Session::new(self.user_dir(user));
        session.ensure_dirs()?;
        Ok(session)
    }

    /// Snapshot of the user's session, created on first contact
    pub fn get_or_create(&self, user: UserId) -> Result<Session> {
        self.update(user, |session| session.clone())
    }

    /// Mutate the user's session in place
    pub fn update<F, R>(&self, user: UserId, f: F) -> Result<R>
    where
        F: FnOnce(&mut Session) -> R,
    {
        let mut sessions = self.sessions.write().map_err(|_| anyhow!("session table lock poisoned"))?;
        let session = match sessions.entry(user) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => entry.insert(self.fresh(user)?),
        };
        Ok(f(session))
    }

    /// Clear the user's menu choices.
    ///
    /// The credential file and proxy are user settings and survive the reset.
    /// Returns `None` while a job is in flight: the session belongs to that job
    /// until [`SessionStore::finish_job`].
    pub fn reset(&self, user: UserId) -> Result<Option<Session>> {
        self.update(user, |session| {
            if session.is_running() {
                return None;
            }
            session.clear_choices();
            Some(session.clone())
        })
    }

    /// Mark the user's job as started and return the session it runs with.
    ///
    /// Returns `None` if another job of the same user is still running, so a
    /// user's output directories only ever see one job at a time.
    pub fn begin_job(&self, user: UserId) -> Result<Option<Session>> {
        self.update(user, |session| {
            if session.is_running() {
                return None;
            }
            session.step = Step::Running;
            session.job_id += 1;
            Some(session.clone())
        })
    }

    /// Release the session held by job `job_id`; stale ids are ignored
    pub fn finish_job(&self, user: UserId, job_id: u64) -> Result<bool> {
        self.update(user, |session| {
            if !session.is_running() || session.job_id != job_id {
                return false;
            }
            session.clear_choices();
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_creates_user_directories() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(root.path());

        let session = store.get_or_create(42).unwrap();
        assert_eq!(session.base_dir, root.path().join("user_42"));
        assert!(session.video_dir.is_dir());
        assert!(session.audio_dir.is_dir());
    }

    #[test]
    fn test_update_and_reset_keep_user_settings() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(root.path());

        store
            .update(1, |s| {
                s.step = Step::AwaitQuality;
                s.urls = vec!["https://youtu.be/x".to_string()];
                s.proxy = Some("http://proxy:8080".to_string());
            })
            .unwrap();

        let reset = store.reset(1).unwrap().unwrap();
        assert_eq!(reset.step, Step::Idle);
        assert!(reset.urls.is_empty());
        assert_eq!(reset.proxy.as_deref(), Some("http://proxy:8080"));
    }

    #[test]
    fn test_sessions_are_isolated_per_user() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(root.path());

        let handles: Vec<_> = (0..8)
            .map(|user| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.update(user, |s| s.urls.push(format!("https://example.com/{user}"))).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for user in 0..8 {
            let session = store.get_or_create(user).unwrap();
            assert_eq!(session.urls, vec![format!("https://example.com/{user}")]);
        }
    }

    #[test]
    fn test_fetch_job_targets_mode_directory() {
        let mut session = Session::new("/data/user_1");
        session.platform = Platform::YouTube;
        session.mode = DeliveryMode::AudioOnly;
        session.cookies = Some(PathBuf::from("/data/user_1/cookies.txt"));

        let job = session.fetch_job("https://youtu.be/x");
        assert_eq!(job.output_dir, PathBuf::from("/data/user_1/Audio"));
        assert_eq!(job.options.mode, DeliveryMode::AudioOnly);
        assert_eq!(job.cookies, session.cookies);

        session.mode = DeliveryMode::VideoOnly;
        assert_eq!(session.fetch_job("u").output_dir, PathBuf::from("/data/user_1/Videos"));
    }

    #[test]
    fn test_reset_is_refused_while_a_job_runs() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(root.path());
        store
            .update(7, |s| {
                s.step = Step::AwaitQuality;
                s.urls = vec!["https://youtu.be/a".to_string()];
            })
            .unwrap();

        let job = store.begin_job(7).unwrap().unwrap();
        assert_eq!(job.job_id, 1);
        assert!(store.begin_job(7).unwrap().is_none());
        assert!(store.reset(7).unwrap().is_none());

        let session = store.get_or_create(7).unwrap();
        assert_eq!(session.step, Step::Running);
        assert_eq!(session.urls, job.urls);
    }

    #[test]
    fn test_finish_job_releases_only_its_own_session() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(root.path());

        let first = store.begin_job(3).unwrap().unwrap();
        assert!(store.finish_job(3, first.job_id).unwrap());
        assert_eq!(store.get_or_create(3).unwrap().step, Step::Idle);

        // The user has moved on to the next job's menu; a late finish must not wipe it
        store
            .update(3, |s| {
                s.step = Step::AwaitLink;
                s.platform = Platform::TikTok;
            })
            .unwrap();
        assert!(!store.finish_job(3, first.job_id).unwrap());

        let second = store.begin_job(3).unwrap().unwrap();
        assert_eq!(second.job_id, 2);
        assert!(!store.finish_job(3, first.job_id).unwrap());
        assert!(store.get_or_create(3).unwrap().is_running());
        assert!(store.finish_job(3, second.job_id).unwrap());
    }
}
