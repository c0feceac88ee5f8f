//! Conversational front-end: a long-polling Telegram bot that walks the user
//! through platform, link, mode and quality choices and then hands the
//! session to the [`JobOrchestrator`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::acquire::{DeliveryMode, Platform, Quality};
use crate::channel::telegram::{CallbackQuery, InlineKeyboardMarkup, Message, TelegramClient};
use crate::channel::{ChannelError, ChatId, DeliveryChannel};
use crate::orchestrator::JobOrchestrator;
use crate::postprocess::{normalize_filename, DEFAULT_MAX_NAME_LEN};
use crate::session::{Session, SessionStore, Step, UserId};
use crate::utils::extract_urls;
use crate::{CourierError, Result};

const POLL_ERROR_DELAY: Duration = Duration::from_secs(3);

const HELP_TEXT: &str = "Use /menu to begin.";

const STARTING_JOB_TEXT: &str = "Starting…";

const BUSY_TEXT: &str = "A job is still running. Wait for it to finish.";

/// A parsed inline keyboard choice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Platform(Platform),
    Mode(DeliveryMode),
    Quality(Quality),
}

/// Parse callback data of the form `wiz:<kind>:<index>`
pub fn parse_callback(data: &str) -> Option<Choice> {
    let mut parts = data.split(':');
    if parts.next()? != "wiz" {
        return None;
    }
    let kind = parts.next()?;
    let index: usize = parts.next()?.parse().ok()?;

    match kind {
        "p" => Platform::from_index(index).map(Choice::Platform),
        "m" => DeliveryMode::from_index(index).map(Choice::Mode),
        "q" => Quality::from_index(index).map(Choice::Quality),
        _ => None,
    }
}

/// Split `/command@bot argument` into the bare command and its argument
pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let (head, argument) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
    let command = head.split('@').next().unwrap_or(head);
    Some((command, argument.trim()))
}

/// Extract the URLs of a link submission, preferring the selected platform's
pub fn parse_submission(text: &str, platform: Platform) -> std::result::Result<Vec<String>, CourierError> {
    let urls = extract_urls(text);
    if urls.is_empty() {
        return Err(CourierError::NoUrl);
    }
    Ok(platform.filter_urls(urls))
}

/// What a plain text message did to the sender's session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// URLs were stored and the mode question comes next
    Accepted(usize),
    /// Nothing usable was sent; the session was cleared and this is the reply
    Rejected(String),
    /// The session was not waiting for a link
    Ignored,
}

/// Apply a link submission to a session waiting for one
pub fn apply_submission(session: &mut Session, text: &str) -> Submission {
    if session.step != Step::AwaitLink {
        return Submission::Ignored;
    }

    match parse_submission(text, session.platform) {
        Ok(urls) => {
            let count = urls.len();
            session.urls = urls;
            session.step = Step::AwaitMode;
            Submission::Accepted(count)
        }
        Err(e) => {
            session.clear_choices();
            Submission::Rejected(format!("{}. Use /menu to start again.", e))
        }
    }
}

/// Where an uploaded document is stored, and whether it is a cookie file.
///
/// Uploads land in the user's base directory, outside the output
/// directories a running job snapshots.
pub fn upload_destination(base_dir: &Path, file_name: Option<&str>) -> (PathBuf, bool) {
    let name = normalize_filename(&file_name.unwrap_or("file.bin").to_lowercase(), DEFAULT_MAX_NAME_LEN);
    let is_cookies = name.contains("cookie");
    (base_dir.join(name), is_cookies)
}

pub fn platform_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::single_column(
        Platform::ALL
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("{} {}", i, p.name()), format!("wiz:p:{}", i))),
    )
}

pub fn mode_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::single_column(
        DeliveryMode::ALL
            .iter()
            .enumerate()
            .map(|(i, m)| (format!("{} {}", i + 1, m.label()), format!("wiz:m:{}", i))),
    )
}

pub fn quality_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::single_column(
        Quality::ALL
            .iter()
            .enumerate()
            .map(|(i, q)| (format!("{} {}", i + 1, q.label()), format!("wiz:q:{}", i))),
    )
}

pub struct Bot {
    client: TelegramClient,
    sessions: SessionStore,
    orchestrator: Arc<JobOrchestrator>,
    poll_timeout_secs: u64,
}

impl Bot {
    pub fn new(client: TelegramClient, sessions: SessionStore, orchestrator: Arc<JobOrchestrator>) -> Self {
        Self {
            client,
            sessions,
            orchestrator,
            poll_timeout_secs: 50,
        }
    }

    pub fn with_poll_timeout(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    /// Poll for updates forever
    pub async fn run(self) -> Result<()> {
        let bot = Arc::new(self);
        let mut offset = 0;
        tracing::info!("Polling for updates");

        loop {
            let updates = match bot.client.get_updates(offset, bot.poll_timeout_secs).await {
                Ok(updates) => updates,
                Err(ChannelError::RetryAfter(wait)) => {
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("getUpdates failed: {}", e);
                    tokio::time::sleep(POLL_ERROR_DELAY).await;
                    continue;
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                let result = if let Some(callback) = update.callback_query {
                    bot.on_callback(callback).await
                } else if let Some(message) = update.message {
                    bot.on_message(message).await
                } else {
                    Ok(())
                };

                if let Err(e) = result {
                    tracing::warn!("Failed to handle update {}: {:#}", update.update_id, e);
                }
            }
        }
    }

    async fn reply(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.client.send_message(chat_id, text).await?;
        Ok(())
    }

    async fn on_message(self: &Arc<Self>, message: Message) -> Result<()> {
        let chat_id = message.chat.id;
        let Some(user) = message.from.as_ref().map(|u| u.id) else {
            return Ok(());
        };

        if let Some(document) = message.document {
            // Uploads can be large; keep polling while they stream to disk
            let bot = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = bot
                    .on_document(chat_id, user, &document.file_id, document.file_name.as_deref())
                    .await
                {
                    tracing::warn!("Failed to store upload from user {}: {:#}", user, e);
                }
            });
            return Ok(());
        }

        let text = message.text.as_deref().unwrap_or_default();
        if let Some((command, argument)) = parse_command(text) {
            return self.on_command(chat_id, user, command, argument).await;
        }

        self.on_text(chat_id, user, text).await
    }

    async fn on_command(&self, chat_id: ChatId, user: UserId, command: &str, argument: &str) -> Result<()> {
        match command {
            "start" | "menu" => match self.sessions.reset(user)? {
                Some(_) => {
                    self.client
                        .send_keyboard(chat_id, "Choose a platform:", &platform_keyboard())
                        .await?;
                }
                None => self.reply(chat_id, BUSY_TEXT).await?,
            },
            "reset" => match self.sessions.reset(user)? {
                Some(_) => self.reply(chat_id, "Session reset.").await?,
                None => self.reply(chat_id, BUSY_TEXT).await?,
            },
            "proxy" => {
                let proxy = (!argument.is_empty()).then(|| argument.to_string());
                self.sessions.update(user, |s| s.proxy = proxy.clone())?;
                let text = match proxy {
                    Some(proxy) => format!("Proxy set to {}.", proxy),
                    None => "Proxy cleared.".to_string(),
                };
                self.reply(chat_id, &text).await?;
            }
            _ => self.reply(chat_id, HELP_TEXT).await?,
        }
        Ok(())
    }

    async fn on_document(&self, chat_id: ChatId, user: UserId, file_id: &str, file_name: Option<&str>) -> Result<()> {
        let session = self.sessions.get_or_create(user)?;
        let (dest, is_cookies) = upload_destination(&session.base_dir, file_name);

        self.client.download_document(file_id, &dest).await?;

        if is_cookies {
            self.sessions.update(user, |s| s.cookies = Some(dest.clone()))?;
            tracing::info!("Stored credential file for user {}", user);
            self.reply(chat_id, "Cookies received.").await
        } else {
            self.reply(chat_id, "File received.").await
        }
    }

    async fn on_text(&self, chat_id: ChatId, user: UserId, text: &str) -> Result<()> {
        match self.sessions.update(user, |s| apply_submission(s, text))? {
            Submission::Accepted(count) => {
                tracing::info!("User {} submitted {} URL(s)", user, count);
                self.client
                    .send_keyboard(chat_id, "Choose a mode:", &mode_keyboard())
                    .await?;
                Ok(())
            }
            Submission::Rejected(reply) => self.reply(chat_id, &reply).await,
            Submission::Ignored => self.reply(chat_id, HELP_TEXT).await,
        }
    }

    async fn on_callback(self: &Arc<Self>, callback: CallbackQuery) -> Result<()> {
        if let Err(e) = self.client.answer_callback(&callback.id).await {
            tracing::debug!("answerCallbackQuery failed: {}", e);
        }

        let Some(message) = callback.message.as_ref().map(|m| m.to_ref()) else {
            return Ok(());
        };
        let Some(choice) = callback.data.as_deref().and_then(parse_callback) else {
            return Ok(());
        };
        let user = callback.from.id;
        let step = self.sessions.get_or_create(user)?.step;

        match (choice, step) {
            (Choice::Platform(platform), _) if step != Step::Running => {
                let accepted = self.sessions.update(user, |s| {
                    if s.is_running() {
                        return false;
                    }
                    s.platform = platform;
                    s.step = Step::AwaitLink;
                    true
                })?;
                if accepted {
                    self.client
                        .edit_keyboard(message, "Paste one or more links.", None)
                        .await?;
                }
            }
            (Choice::Mode(DeliveryMode::AudioOnly), Step::AwaitMode) => {
                self.sessions.update(user, |s| {
                    s.mode = DeliveryMode::AudioOnly;
                    s.quality = Quality::Best;
                })?;
                self.client.edit_keyboard(message, STARTING_JOB_TEXT, None).await?;
                self.start_job(message.chat_id, user)?;
            }
            (Choice::Mode(mode), Step::AwaitMode) => {
                self.sessions.update(user, |s| {
                    s.mode = mode;
                    s.step = Step::AwaitQuality;
                })?;
                self.client
                    .edit_keyboard(message, "Choose a quality:", Some(&quality_keyboard()))
                    .await?;
            }
            (Choice::Quality(quality), Step::AwaitQuality) => {
                self.sessions.update(user, |s| s.quality = quality)?;
                self.client.edit_keyboard(message, STARTING_JOB_TEXT, None).await?;
                self.start_job(message.chat_id, user)?;
            }
            _ => tracing::debug!("Ignoring {:?} in step {:?}", choice, step),
        }
        Ok(())
    }

    /// Run the user's job in its own task so other chats stay responsive
    fn start_job(self: &Arc<Self>, chat_id: ChatId, user: UserId) -> Result<()> {
        let Some(session) = self.sessions.begin_job(user)? else {
            tracing::debug!("User {} already has a job running", user);
            return Ok(());
        };

        let bot = Arc::clone(self);
        tokio::spawn(async move {
            tracing::info!(
                "Starting job {} for user {} with {} URL(s)",
                session.job_id,
                user,
                session.urls.len()
            );
            let report = bot.orchestrator.run(chat_id, &session).await;
            tracing::debug!("Job report for user {}: {:?}", user, report);
            if let Err(e) = bot.sessions.finish_job(user, session.job_id) {
                tracing::warn!("Failed to release session for user {}: {:#}", user, e);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_callback() {
        assert_eq!(parse_callback("wiz:p:1"), Some(Choice::Platform(Platform::YouTube)));
        assert_eq!(parse_callback("wiz:m:1"), Some(Choice::Mode(DeliveryMode::VideoOnly)));
        assert_eq!(parse_callback("wiz:q:3"), Some(Choice::Quality(Quality::MaxHeight(720))));
        assert_eq!(parse_callback("wiz:q:42"), None);
        assert_eq!(parse_callback("other:p:1"), None);
        assert_eq!(parse_callback("wiz:p"), None);
    }

    #[test]
    fn test_keyboards_round_trip_through_parser() {
        for row in platform_keyboard()
            .inline_keyboard
            .iter()
            .chain(mode_keyboard().inline_keyboard.iter())
            .chain(quality_keyboard().inline_keyboard.iter())
        {
            assert!(parse_callback(&row[0].callback_data).is_some(), "{}", row[0].callback_data);
        }
        assert_eq!(quality_keyboard().inline_keyboard.len(), 8);
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("/menu"), Some(("menu", "")));
        assert_eq!(parse_command("/proxy@courier_bot socks5://h:1"), Some(("proxy", "socks5://h:1")));
        assert_eq!(parse_command("  /reset  "), Some(("reset", "")));
        assert_eq!(parse_command("https://youtu.be/x"), None);
    }

    #[test]
    fn test_parse_submission_without_url() {
        assert!(matches!(parse_submission("hello there", Platform::Auto), Err(CourierError::NoUrl)));
    }

    #[test]
    fn test_parse_submission_filters_by_platform() {
        let urls = parse_submission("https://vimeo.com/1 https://fb.watch/abc", Platform::Facebook).unwrap();
        assert_eq!(urls, vec!["https://fb.watch/abc"]);
    }

    fn awaiting_link(platform: Platform) -> Session {
        let mut session = Session::new("/data/user_1");
        session.platform = platform;
        session.step = Step::AwaitLink;
        session.proxy = Some("socks5://h:1".to_string());
        session
    }

    #[test]
    fn test_submission_without_url_resets_and_prompts() {
        let mut session = awaiting_link(Platform::YouTube);

        let outcome = apply_submission(&mut session, "what about this one?");

        let Submission::Rejected(reply) = outcome else {
            panic!("expected a rejection, got {:?}", outcome);
        };
        assert!(reply.starts_with("No URL found"), "{}", reply);
        assert!(reply.contains("/menu"));
        assert_eq!(session.step, Step::Idle);
        assert_eq!(session.platform, Platform::Auto);
        assert!(session.urls.is_empty());
        assert_eq!(session.proxy.as_deref(), Some("socks5://h:1"));
    }

    #[test]
    fn test_submission_with_urls_moves_to_mode_question() {
        let mut session = awaiting_link(Platform::TikTok);

        let outcome = apply_submission(&mut session, "https://www.tiktok.com/@u/video/1 https://youtu.be/x");

        assert_eq!(outcome, Submission::Accepted(1));
        assert_eq!(session.step, Step::AwaitMode);
        assert_eq!(session.urls, vec!["https://www.tiktok.com/@u/video/1"]);
    }

    #[test]
    fn test_submission_is_ignored_outside_link_step() {
        let mut session = awaiting_link(Platform::Auto);
        session.step = Step::Running;
        session.urls = vec!["https://youtu.be/running".to_string()];

        assert_eq!(apply_submission(&mut session, "https://youtu.be/other"), Submission::Ignored);
        assert_eq!(session.step, Step::Running);
        assert_eq!(session.urls, vec!["https://youtu.be/running"]);
    }

    #[test]
    fn test_no_url_reset_goes_through_the_store() {
        let root = tempfile::tempdir().unwrap();
        let store = SessionStore::new(root.path());
        store
            .update(5, |s| {
                s.platform = Platform::Facebook;
                s.step = Step::AwaitLink;
            })
            .unwrap();

        let outcome = store.update(5, |s| apply_submission(s, "nothing here")).unwrap();

        assert!(matches!(outcome, Submission::Rejected(_)));
        let session = store.get_or_create(5).unwrap();
        assert_eq!(session.step, Step::Idle);
        assert_eq!(session.platform, Platform::Auto);
    }

    #[test]
    fn test_upload_destination() {
        let base = Path::new("/data/user_9");

        let (path, is_cookies) = upload_destination(base, Some("YouTube_Cookies.txt"));
        assert_eq!(path, base.join("youtube_cookies.txt"));
        assert!(is_cookies);

        let (path, is_cookies) = upload_destination(base, Some("../notes.txt"));
        assert_eq!(path, base.join(".._notes.txt"));
        assert!(!is_cookies);

        assert_eq!(upload_destination(base, None), (base.join("file.bin"), false));
    }
}
