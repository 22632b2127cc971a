//! Delivery of one queued message to the destination.
//!
//! Native forward first, re-upload by content kind when forwarding fails or
//! the operator forced re-upload.

use relay_channels::{Destination, InboundMessage, Payload, PlatformClient, PlatformError};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    PreferForward,
    AlwaysReupload,
}

impl DeliveryMode {
    pub fn from_always_dl(always_dl: bool) -> Self {
        if always_dl {
            Self::AlwaysReupload
        } else {
            Self::PreferForward
        }
    }
}

/// Which path ended up delivering the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryPath {
    Forwarded,
    Reuploaded,
    FallbackReuploaded,
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unsupported content (fields: {})", .fields.join(","))]
    UnsupportedContent { fields: Vec<String> },

    #[error("platform call failed: {0}")]
    Platform(#[from] PlatformError),
}

#[tracing::instrument(
    level = "debug",
    skip_all,
    fields(
        chat_id = %item.chat_id,
        message_id = %item.message_id,
        kind = item.payload.kind(),
        destination = %to,
        ?mode
    )
)]
pub async fn deliver(
    client: &dyn PlatformClient,
    item: InboundMessage,
    to: &Destination,
    mode: DeliveryMode,
) -> Result<DeliveryPath, DeliveryError> {
    if let Payload::Unknown { fields } = item.payload {
        return Err(DeliveryError::UnsupportedContent { fields });
    }

    if mode == DeliveryMode::AlwaysReupload {
        reupload(client, &item.payload, to).await?;
        return Ok(DeliveryPath::Reuploaded);
    }

    match client
        .forward_message(item.chat_id, item.message_id, to)
        .await
    {
        Ok(()) => Ok(DeliveryPath::Forwarded),
        Err(error) => {
            tracing::debug!(%error, "native forward failed; re-uploading");
            reupload(client, &item.payload, to).await?;
            Ok(DeliveryPath::FallbackReuploaded)
        }
    }
}

async fn reupload(
    client: &dyn PlatformClient,
    payload: &Payload,
    to: &Destination,
) -> Result<(), DeliveryError> {
    match payload {
        Payload::Text { text } => client.send_text(to, text).await?,
        Payload::Photo(media) => {
            client
                .send_photo(to, &media.file_id, media.caption.as_deref())
                .await?
        }
        Payload::Video(media) => {
            client
                .send_video(to, &media.file_id, media.caption.as_deref())
                .await?
        }
        Payload::Document(media) => {
            client
                .send_document(to, &media.file_id, media.caption.as_deref())
                .await?
        }
        Payload::Audio(media) => {
            client
                .send_audio(to, &media.file_id, media.caption.as_deref())
                .await?
        }
        Payload::Voice(media) => {
            client
                .send_voice(to, &media.file_id, media.caption.as_deref())
                .await?
        }
        Payload::Sticker { file_id } => client.send_sticker(to, file_id).await?,
        Payload::Animation(media) => {
            client
                .send_animation(to, &media.file_id, media.caption.as_deref())
                .await?
        }
        Payload::VideoNote { file_id } => client.send_video_note(to, file_id).await?,
        Payload::Unknown { fields } => {
            return Err(DeliveryError::UnsupportedContent {
                fields: fields.clone(),
            });
        }
    }
    Ok(())
}
