use crate::error::{PlatformError, Result};
use crate::traits::PlatformClient;
use crate::types::{
    ChatId, Destination, FileId, InboundMessage, Media, MessageId, Payload, ThreadId, UserId,
};
use chrono::Utc;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const TELEGRAM_ALLOWED_UPDATES: &str = r#"["message"]"#;
const TELEGRAM_DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const TELEGRAM_NON_TRANSIENT_DELAY: Duration = Duration::from_secs(10);
const TELEGRAM_RETRY_BASE_MS: u64 = 250;
const TELEGRAM_RETRY_MAX_MS: u64 = 30_000;

// Message fields that describe the envelope rather than the content.
const TELEGRAM_ENVELOPE_FIELDS: &[&str] = &[
    "message_id",
    "message_thread_id",
    "from",
    "sender_chat",
    "sender_boost_count",
    "date",
    "chat",
    "edit_date",
    "is_topic_message",
    "is_automatic_forward",
    "has_protected_content",
    "forward_origin",
    "reply_to_message",
    "external_reply",
    "quote",
    "via_bot",
    "author_signature",
    "media_group_id",
    "entities",
    "caption_entities",
    "reply_markup",
    "link_preview_options",
    "show_caption_above_media",
    "has_media_spoiler",
];

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    bot_token: String,
    poll_timeout_secs: u64,
}

/// Subset of `getMe` used to confirm the token works.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

impl TelegramClient {
    pub fn new(bot_token: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            bot_token: bot_token.to_string(),
            poll_timeout_secs: TELEGRAM_DEFAULT_POLL_TIMEOUT_SECS,
        })
    }

    pub fn with_poll_timeout_secs(mut self, secs: u64) -> Self {
        self.poll_timeout_secs = secs;
        self
    }

    fn api_url(&self, method: &str) -> Result<Url> {
        Url::parse(&format!(
            "{TELEGRAM_API_BASE}/bot{}/{}",
            self.bot_token,
            method
        ))
        .map_err(|e| PlatformError::Http(format!("invalid telegram url for {method}: {e}")))
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> Result<T> {
        let url = self.api_url(method)?;
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        decode_response(status, &text)
    }

    pub async fn get_me(&self) -> Result<BotIdentity> {
        self.call("getMe", serde_json::json!({})).await
    }

    async fn send_file(
        &self,
        method: &str,
        field: &str,
        to: &Destination,
        file: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        let mut body = outbound_body(to);
        body.insert(field.to_string(), file.as_str().into());
        if let Some(caption) = caption {
            body.insert("caption".to_string(), caption.into());
        }
        let _: IgnoredAny = self.call(method, body.into()).await?;
        Ok(())
    }

    /// Spawn the long-poll loop; every inbound message is pushed to `tx`.
    pub fn start(&self, tx: mpsc::Sender<InboundMessage>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.run_poll_loop(tx).await {
                tracing::error!(%e, "telegram poll loop exited");
            }
        })
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<TelegramUpdate>> {
        let url = self.api_url("getUpdates")?;
        let response = self
            .http
            .get(url)
            .query(&[
                ("timeout", self.poll_timeout_secs.to_string().as_str()),
                ("offset", offset.to_string().as_str()),
                ("allowed_updates", TELEGRAM_ALLOWED_UPDATES),
            ])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        decode_response(status, &text)
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_poll_loop(&self, tx: mpsc::Sender<InboundMessage>) -> anyhow::Result<()> {
        let mut offset: i64 = 0;
        let mut consecutive_failures: u32 = 0;

        loop {
            let mut updates = match self.fetch_updates(offset).await {
                Ok(updates) => updates,
                Err(PlatformError::Api { code, description }) if !is_transient_code(code) => {
                    consecutive_failures = 0;
                    tracing::error!(
                        code,
                        %description,
                        ?TELEGRAM_NON_TRANSIENT_DELAY,
                        "telegram getUpdates non-transient failure; keeping poll loop alive"
                    );
                    tokio::time::sleep(TELEGRAM_NON_TRANSIENT_DELAY).await;
                    continue;
                }
                Err(error) => {
                    consecutive_failures += 1;
                    let delay = transient_retry_delay(consecutive_failures);
                    tracing::warn!(
                        %error,
                        attempt = consecutive_failures,
                        ?delay,
                        "telegram getUpdates failed; retrying with backoff"
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            consecutive_failures = 0;

            updates.sort_by_key(|update| update.update_id);
            for update in updates {
                // Advance offset before conversion to avoid poison-update replay loops.
                if update.update_id < offset {
                    continue;
                }
                offset = update.update_id.saturating_add(1);

                let Some(inbound) = build_inbound_message(&update) else {
                    tracing::debug!(update_id = update.update_id, "skipping non-message update");
                    continue;
                };
                tx.send(inbound)
                    .await
                    .map_err(|e| anyhow::anyhow!("telegram inbound queue closed: {e}"))?;
            }
        }
    }
}

#[async_trait::async_trait]
impl PlatformClient for TelegramClient {
    async fn forward_message(
        &self,
        from_chat: ChatId,
        message_id: MessageId,
        to: &Destination,
    ) -> Result<()> {
        let mut body = outbound_body(to);
        body.insert("from_chat_id".to_string(), from_chat.get().into());
        body.insert("message_id".to_string(), message_id.get().into());
        let _: IgnoredAny = self.call("forwardMessage", body.into()).await?;
        Ok(())
    }

    async fn send_text(&self, to: &Destination, text: &str) -> Result<()> {
        let mut body = outbound_body(to);
        body.insert("text".to_string(), text.into());
        let _: IgnoredAny = self.call("sendMessage", body.into()).await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        to: &Destination,
        photo: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_file("sendPhoto", "photo", to, photo, caption).await
    }

    async fn send_video(
        &self,
        to: &Destination,
        video: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_file("sendVideo", "video", to, video, caption).await
    }

    async fn send_document(
        &self,
        to: &Destination,
        document: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_file("sendDocument", "document", to, document, caption)
            .await
    }

    async fn send_audio(
        &self,
        to: &Destination,
        audio: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_file("sendAudio", "audio", to, audio, caption).await
    }

    async fn send_voice(
        &self,
        to: &Destination,
        voice: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_file("sendVoice", "voice", to, voice, caption).await
    }

    async fn send_sticker(&self, to: &Destination, sticker: &FileId) -> Result<()> {
        self.send_file("sendSticker", "sticker", to, sticker, None)
            .await
    }

    async fn send_animation(
        &self,
        to: &Destination,
        animation: &FileId,
        caption: Option<&str>,
    ) -> Result<()> {
        self.send_file("sendAnimation", "animation", to, animation, caption)
            .await
    }

    async fn send_video_note(&self, to: &Destination, video_note: &FileId) -> Result<()> {
        self.send_file("sendVideoNote", "video_note", to, video_note, None)
            .await
    }
}

fn outbound_body(to: &Destination) -> serde_json::Map<String, serde_json::Value> {
    let mut body = serde_json::Map::new();
    body.insert("chat_id".to_string(), to.chat.get().into());
    if let Some(thread) = to.thread {
        body.insert("message_thread_id".to_string(), thread.get().into());
    }
    body
}

fn decode_response<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T> {
    let envelope = match serde_json::from_str::<TelegramResponse<T>>(body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(PlatformError::Api {
                code: i64::from(status.as_u16()),
                description: body.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    if !envelope.ok {
        return Err(PlatformError::Api {
            code: envelope
                .error_code
                .unwrap_or_else(|| i64::from(status.as_u16())),
            description: envelope.description.unwrap_or_default(),
        });
    }
    envelope
        .result
        .ok_or_else(|| PlatformError::ResponseFormat("telegram response missing result".into()))
}

fn transient_retry_delay(attempt: u32) -> Duration {
    let multiplier = 1_u64 << attempt.saturating_sub(1).min(10);
    Duration::from_millis((TELEGRAM_RETRY_BASE_MS * multiplier).min(TELEGRAM_RETRY_MAX_MS))
}

fn is_transient_code(code: i64) -> bool {
    code == i64::from(StatusCode::TOO_MANY_REQUESTS.as_u16())
        || code == i64::from(StatusCode::REQUEST_TIMEOUT.as_u16())
        || code >= 500
}

fn build_inbound_message(update: &TelegramUpdate) -> Option<InboundMessage> {
    let message = update.message.as_ref()?;
    // Plain supergroups also set message_thread_id for reply chains; only
    // forum topics are addressable threads.
    let thread_id = message
        .message_thread_id
        .filter(|_| message.is_topic_message)
        .map(ThreadId::new);

    Some(InboundMessage {
        chat_id: ChatId::new(message.chat.id),
        message_id: MessageId::new(message.message_id),
        thread_id,
        sender_id: message.from.as_ref().map(|user| UserId::new(user.id)),
        payload: classify_payload(message),
        received_at: Utc::now(),
    })
}

fn classify_payload(message: &TelegramMessage) -> Payload {
    let media = |file: &TelegramFile| Media::new(file.file_id.clone(), message.caption.clone());

    if let Some(text) = message.text.as_deref().filter(|text| !text.is_empty()) {
        return Payload::Text {
            text: text.to_string(),
        };
    }
    // Sizes are ascending; the last entry is the original upload.
    if let Some(photo) = message.photo.last() {
        return Payload::Photo(media(photo));
    }
    if let Some(video) = &message.video {
        return Payload::Video(media(video));
    }
    // Animations also carry a `document` field; match them first so GIFs stay GIFs.
    if let Some(animation) = &message.animation {
        return Payload::Animation(media(animation));
    }
    if let Some(document) = &message.document {
        return Payload::Document(media(document));
    }
    if let Some(audio) = &message.audio {
        return Payload::Audio(media(audio));
    }
    if let Some(voice) = &message.voice {
        return Payload::Voice(media(voice));
    }
    if let Some(sticker) = &message.sticker {
        return Payload::Sticker {
            file_id: FileId::new(sticker.file_id.clone()),
        };
    }
    if let Some(video_note) = &message.video_note {
        return Payload::VideoNote {
            file_id: FileId::new(video_note.file_id.clone()),
        };
    }

    let mut fields: Vec<String> = message
        .extra
        .keys()
        .filter(|key| !TELEGRAM_ENVELOPE_FIELDS.contains(&key.as_str()))
        .cloned()
        .collect();
    fields.sort();
    Payload::Unknown { fields }
}

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessage {
    message_id: i64,
    chat: TelegramChat,
    #[serde(default)]
    message_thread_id: Option<i64>,
    #[serde(default)]
    is_topic_message: bool,
    #[serde(default)]
    from: Option<TelegramUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<TelegramFile>,
    #[serde(default)]
    video: Option<TelegramFile>,
    #[serde(default)]
    animation: Option<TelegramFile>,
    #[serde(default)]
    document: Option<TelegramFile>,
    #[serde(default)]
    audio: Option<TelegramFile>,
    #[serde(default)]
    voice: Option<TelegramFile>,
    #[serde(default)]
    sticker: Option<TelegramFile>,
    #[serde(default)]
    video_note: Option<TelegramFile>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_id: String,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}
