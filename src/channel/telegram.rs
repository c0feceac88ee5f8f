//! Telegram Bot API client.
//!
//! Covers the handful of methods the bot needs: long-polling for updates,
//! sending and editing text messages with inline keyboards, answering
//! callback queries, streaming documents up and downloading user uploads.
//! Rate limits surface as [`ChannelError::RetryAfter`] carrying the
//! `parameters.retry_after` value from the response body.

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::{ChannelError, ChatId, DeliveryChannel, MessageRef};

const API_BASE: &str = "https://api.telegram.org";

/// `sendMessage` text limit (characters).
const MESSAGE_LIMIT: usize = 4096;

/// Document caption limit (characters).
const CAPTION_LIMIT: usize = 1024;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

/// Uploads of multi-gigabyte files over slow links may take days.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3600);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<u16>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub document: Option<Document>,
}

impl Message {
    pub fn to_ref(&self) -> MessageRef {
        MessageRef {
            chat_id: self.chat.id,
            message_id: self.message_id,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    pub message: Option<Message>,
    pub data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineKeyboardMarkup {
    /// One button per row
    pub fn single_column<I, S, D>(buttons: I) -> Self
    where
        I: IntoIterator<Item = (S, D)>,
        S: Into<String>,
        D: Into<String>,
    {
        Self {
            inline_keyboard: buttons
                .into_iter()
                .map(|(text, data)| {
                    vec![InlineKeyboardButton {
                        text: text.into(),
                        callback_data: data.into(),
                    }]
                })
                .collect(),
        }
    }
}

/// Bot API client
#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    base_url: String,
    token: String,
}

impl TelegramClient {
    /// Create a client with a short connect timeout and a very long transfer timeout
    pub fn new(token: impl Into<String>) -> crate::Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TRANSFER_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
            token: token.into(),
        })
    }

    /// Point the client at a different Bot API server (e.g. a local `telegram-bot-api`)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, payload: &Value) -> Result<T, ChannelError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(payload)
            .send()
            .await
            .map_err(classify_transport)?;

        parse_response(response).await
    }

    /// Long-poll for new updates starting at `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>, ChannelError> {
        self.call(
            "getUpdates",
            &json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    /// Send a message carrying an inline keyboard
    pub async fn send_keyboard(
        &self,
        chat_id: ChatId,
        text: &str,
        markup: &InlineKeyboardMarkup,
    ) -> Result<MessageRef, ChannelError> {
        let message: Message = self
            .call(
                "sendMessage",
                &json!({
                    "chat_id": chat_id,
                    "text": truncate_text(text, MESSAGE_LIMIT),
                    "reply_markup": markup,
                }),
            )
            .await?;
        Ok(message.to_ref())
    }

    /// Edit a message's text, replacing (or removing) its inline keyboard
    pub async fn edit_keyboard(
        &self,
        message: MessageRef,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), ChannelError> {
        let mut payload = json!({
            "chat_id": message.chat_id,
            "message_id": message.message_id,
            "text": truncate_text(text, MESSAGE_LIMIT),
        });
        if let Some(markup) = markup {
            payload["reply_markup"] = json!(markup);
        }

        match self.call::<Value>("editMessageText", &payload).await {
            Ok(_) => Ok(()),
            Err(ChannelError::BadRequest(description)) if description.contains("message is not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub async fn answer_callback(&self, callback_id: &str) -> Result<(), ChannelError> {
        self.call::<Value>("answerCallbackQuery", &json!({ "callback_query_id": callback_id }))
            .await
            .map(|_| ())
    }

    /// Download a file the user uploaded to `dest`
    pub async fn download_document(&self, file_id: &str, dest: &Path) -> Result<(), ChannelError> {
        let remote: RemoteFile = self.call("getFile", &json!({ "file_id": file_id })).await?;
        let file_path = remote
            .file_path
            .ok_or_else(|| ChannelError::BadRequest("file is not available for download".to_string()))?;

        let url = format!("{}/file/bot{}/{}", self.base_url, self.token, file_path);
        let mut response = self.client.get(url).send().await.map_err(classify_transport)?;
        if !response.status().is_success() {
            return Err(ChannelError::Api {
                code: response.status().as_u16(),
                description: "file download failed".to_string(),
            });
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await.map_err(classify_transport)? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        tracing::debug!("Downloaded document {} to {}", file_id, dest.display());
        Ok(())
    }
}

#[async_trait]
impl DeliveryChannel for TelegramClient {
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<MessageRef, ChannelError> {
        let message: Message = self
            .call(
                "sendMessage",
                &json!({ "chat_id": chat_id, "text": truncate_text(text, MESSAGE_LIMIT) }),
            )
            .await?;
        Ok(message.to_ref())
    }

    async fn edit_message(&self, message: MessageRef, text: &str) -> Result<(), ChannelError> {
        self.edit_keyboard(message, text, None).await
    }

    async fn send_document(&self, chat_id: ChatId, path: &Path, caption: &str) -> Result<(), ChannelError> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, length).file_name(file_name);
        let form = multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", truncate_text(caption, CAPTION_LIMIT))
            .part("document", part);

        let response = self
            .client
            .post(self.method_url("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(classify_transport)?;

        let _: Message = parse_response(response).await?;
        Ok(())
    }
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ChannelError> {
    let status = response.status();
    let body = response.text().await.map_err(classify_transport)?;

    let parsed: ApiResponse<T> = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(_) if status.is_success() => {
            return Err(ChannelError::Network(format!("malformed response body: {}", truncate_text(&body, 200))));
        }
        Err(_) => {
            return Err(classify_api(status.as_u16(), truncate_text(&body, 200), None));
        }
    };

    if parsed.ok {
        if let Some(result) = parsed.result {
            return Ok(result);
        }
    }

    let code = parsed.error_code.unwrap_or(status.as_u16());
    let retry_after = parsed.parameters.and_then(|p| p.retry_after);
    Err(classify_api(
        code,
        parsed.description.unwrap_or_else(|| "unknown error".to_string()),
        retry_after,
    ))
}

fn classify_transport(err: reqwest::Error) -> ChannelError {
    if err.is_timeout() {
        ChannelError::TimedOut
    } else {
        ChannelError::Network(err.to_string())
    }
}

fn classify_api(code: u16, description: String, retry_after: Option<u64>) -> ChannelError {
    match (code, retry_after) {
        (_, Some(secs)) => ChannelError::RetryAfter(Duration::from_secs(secs)),
        (429, None) => ChannelError::RetryAfter(Duration::from_secs(5)),
        (400, None) => ChannelError::BadRequest(description),
        _ => ChannelError::Api { code, description },
    }
}

/// Truncate text to fit within a Telegram character limit.
fn truncate_text(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let truncated: String = text.chars().take(limit - 1).collect();
    format!("{truncated}…")
}
