use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            pub const fn new(value: i64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_newtype!(ChatId);
id_newtype!(MessageId);
id_newtype!(ThreadId);
id_newtype!(UserId);

/// Platform-assigned handle for uploaded content; re-sending it does not
/// transfer the bytes again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where outbound calls land: a chat plus an optional forum topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub chat: ChatId,
    #[serde(default)]
    pub thread: Option<ThreadId>,
}

impl Destination {
    pub fn new(chat: ChatId, thread: Option<ThreadId>) -> Self {
        Self { chat, thread }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.thread {
            Some(thread) => write!(f, "{}#{}", self.chat, thread),
            None => write!(f, "{}", self.chat),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    pub file_id: FileId,
    #[serde(default)]
    pub caption: Option<String>,
}

impl Media {
    pub fn new(file_id: impl Into<String>, caption: Option<String>) -> Self {
        Self {
            file_id: FileId::new(file_id),
            caption,
        }
    }
}

/// Content carried by an inbound message.
///
/// Stickers and video notes cannot carry a caption on the platform, so they
/// only hold a file handle. `Unknown` records the content fields that were
/// present so a failed delivery can be logged meaningfully.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Payload {
    Text { text: String },
    Photo(Media),
    Video(Media),
    Document(Media),
    Audio(Media),
    Voice(Media),
    Sticker { file_id: FileId },
    Animation(Media),
    VideoNote { file_id: FileId },
    Unknown { fields: Vec<String> },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Photo(_) => "photo",
            Self::Video(_) => "video",
            Self::Document(_) => "document",
            Self::Audio(_) => "audio",
            Self::Voice(_) => "voice",
            Self::Sticker { .. } => "sticker",
            Self::Animation(_) => "animation",
            Self::VideoNote { .. } => "video_note",
            Self::Unknown { .. } => "unknown",
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub message_id: MessageId,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub sender_id: Option<UserId>,
    pub payload: Payload,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Chat and topic the message arrived in; replies go back here.
    pub fn origin(&self) -> Destination {
        Destination {
            chat: self.chat_id,
            thread: self.thread_id,
        }
    }

    /// Time since the poll loop received the message.
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.received_at
    }
}
