//! Chat platform boundary for relaybot.
//!
//! The client is pure I/O: it turns platform updates into [`InboundMessage`]
//! values and exposes the outbound calls the forwarder needs through
//! [`PlatformClient`].

mod error;
mod telegram;
mod traits;
mod types;

pub use error::{PlatformError, Result};
pub use telegram::{BotIdentity, TelegramClient};
pub use traits::PlatformClient;
pub use types::{
    ChatId, Destination, FileId, InboundMessage, Media, MessageId, Payload, ThreadId, UserId,
};
