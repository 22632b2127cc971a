//! Test doubles shared by the forwarder, delivery and command tests.

use async_trait::async_trait;
use chrono::Utc;
use relay_channels::{
    ChatId, Destination, FileId, InboundMessage, MessageId, Payload, PlatformClient,
    PlatformError, UserId,
};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const SOURCE_CHAT: i64 = -100;

pub fn inbound(message_id: i64, payload: Payload) -> InboundMessage {
    InboundMessage {
        chat_id: ChatId::new(SOURCE_CHAT),
        message_id: MessageId::new(message_id),
        thread_id: None,
        sender_id: Some(UserId::new(1)),
        payload,
        received_at: Utc::now(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Forward {
        message_id: i64,
        to: Destination,
    },
    Send {
        kind: &'static str,
        handle: String,
        caption: Option<String>,
        to: Destination,
    },
}

/// Records every outbound call; forwards and sends can be made to fail.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<Call>>,
    fail_forward: bool,
    fail_sends: bool,
    fail_chats: Vec<i64>,
    call_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingClient {
    pub fn failing_forward() -> Self {
        Self {
            fail_forward: true,
            ..Self::default()
        }
    }

    pub fn with_failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Every call addressed to `chat` fails.
    pub fn with_failing_chat(mut self, chat: i64) -> Self {
        self.fail_chats.push(chat);
        self
    }

    pub fn with_call_delay(mut self, delay: Duration) -> Self {
        self.call_delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn record(&self, call: Call, fail: bool) -> Result<(), PlatformError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.call_delay.is_zero() {
            tokio::time::sleep(self.call_delay).await;
        }
        let to = match &call {
            Call::Forward { to, .. } | Call::Send { to, .. } => *to,
        };
        self.calls.lock().expect("calls lock").push(call);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fail || self.fail_chats.contains(&to.chat.get()) {
            return Err(PlatformError::Api {
                code: 400,
                description: "Bad Request: simulated failure".to_string(),
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        kind: &'static str,
        to: &Destination,
        handle: &str,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.record(
            Call::Send {
                kind,
                handle: handle.to_string(),
                caption: caption.map(str::to_string),
                to: *to,
            },
            self.fail_sends,
        )
        .await
    }
}

#[async_trait]
impl PlatformClient for RecordingClient {
    async fn forward_message(
        &self,
        _from_chat: ChatId,
        message_id: MessageId,
        to: &Destination,
    ) -> Result<(), PlatformError> {
        self.record(
            Call::Forward {
                message_id: message_id.get(),
                to: *to,
            },
            self.fail_forward,
        )
        .await
    }

    async fn send_text(&self, to: &Destination, text: &str) -> Result<(), PlatformError> {
        self.send("text", to, text, None).await
    }

    async fn send_photo(
        &self,
        to: &Destination,
        photo: &FileId,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.send("photo", to, photo.as_str(), caption).await
    }

    async fn send_video(
        &self,
        to: &Destination,
        video: &FileId,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.send("video", to, video.as_str(), caption).await
    }

    async fn send_document(
        &self,
        to: &Destination,
        document: &FileId,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.send("document", to, document.as_str(), caption).await
    }

    async fn send_audio(
        &self,
        to: &Destination,
        audio: &FileId,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.send("audio", to, audio.as_str(), caption).await
    }

    async fn send_voice(
        &self,
        to: &Destination,
        voice: &FileId,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.send("voice", to, voice.as_str(), caption).await
    }

    async fn send_sticker(&self, to: &Destination, sticker: &FileId) -> Result<(), PlatformError> {
        self.send("sticker", to, sticker.as_str(), None).await
    }

    async fn send_animation(
        &self,
        to: &Destination,
        animation: &FileId,
        caption: Option<&str>,
    ) -> Result<(), PlatformError> {
        self.send("animation", to, animation.as_str(), caption).await
    }

    async fn send_video_note(
        &self,
        to: &Destination,
        video_note: &FileId,
    ) -> Result<(), PlatformError> {
        self.send("video_note", to, video_note.as_str(), None).await
    }
}
