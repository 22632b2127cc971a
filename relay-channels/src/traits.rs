use crate::error::{PlatformError, Result};
use crate::types::{ChatId, Destination, FileId, MessageId};
use async_trait::async_trait;

/// Outbound half of a chat platform.
///
/// Every call addresses a [`Destination`]; the thread is passed through on
/// each call so forum topics keep working. Implementations return
/// [`PlatformError`] for any failure and never retry on their own.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Relay an existing message by reference.
    async fn forward_message(
        &self,
        from_chat: ChatId,
        message_id: MessageId,
        to: &Destination,
    ) -> Result<()>;

    async fn send_text(&self, to: &Destination, text: &str) -> Result<()>;

    async fn send_photo(&self, to: &Destination, photo: &FileId, caption: Option<&str>)
    -> Result<()>;

    async fn send_video(&self, to: &Destination, video: &FileId, caption: Option<&str>)
    -> Result<()>;

    async fn send_document(
        &self,
        to: &Destination,
        document: &FileId,
        caption: Option<&str>,
    ) -> Result<()>;

    async fn send_audio(&self, to: &Destination, audio: &FileId, caption: Option<&str>)
    -> Result<()>;

    async fn send_voice(&self, to: &Destination, voice: &FileId, caption: Option<&str>)
    -> Result<()>;

    async fn send_sticker(&self, to: &Destination, sticker: &FileId) -> Result<()>;

    async fn send_animation(
        &self,
        to: &Destination,
        animation: &FileId,
        caption: Option<&str>,
    ) -> Result<()>;

    /// Clients that cannot post round video messages should keep the default.
    async fn send_video_note(&self, _to: &Destination, _video_note: &FileId) -> Result<()> {
        Err(PlatformError::Unsupported("send_video_note"))
    }
}
