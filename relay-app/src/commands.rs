//! Chat command parser and handlers.
//!
//! Commands only touch the persisted record, the platform client for access
//! checks, and the forwarder status; they never deliver queued items.

use crate::forwarder::Forwarder;
use crate::store::ForwardingRecord;
use relay_channels::{ChatId, Destination, InboundMessage};

const SETCHAT_USAGE: &str = "Usage: /setchat <chat_id>";
const ALWAYSDL_USAGE: &str = "Usage: /alwaysdl <0 or 1>";
const NO_TARGET: &str = "No target chat set. Use /setchat <chat_id>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Start,
    SetChat(Option<&'a str>),
    SendHere,
    Check,
    Status,
    Current,
    AlwaysDl(Option<&'a str>),
    Queue,
}

/// Recognize a known command; anything else is an ordinary message.
///
/// Accepts the `/name@botname` form Telegram uses in groups. A suffix naming
/// a different bot makes the text an ordinary message. With no known
/// username every suffix is accepted.
pub fn parse<'a>(input: &'a str, bot_username: Option<&str>) -> Option<Command<'a>> {
    let rest = input.trim().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let (name, addressee) = match head.split_once('@') {
        Some((name, addressee)) => (name, Some(addressee)),
        None => (head, None),
    };
    if let (Some(addressee), Some(me)) = (addressee, bot_username) {
        if !addressee.eq_ignore_ascii_case(me) {
            return None;
        }
    }
    let arg = parts.next();

    let command = match name.to_ascii_lowercase().as_str() {
        "start" | "help" => Command::Start,
        "setchat" => Command::SetChat(arg),
        "sendhere" => Command::SendHere,
        "check" => Command::Check,
        "status" => Command::Status,
        "current" => Command::Current,
        "alwaysdl" => Command::AlwaysDl(arg),
        "queue" => Command::Queue,
        _ => return None,
    };
    Some(command)
}

#[tracing::instrument(level = "info", skip(forwarder, inbound), fields(chat_id = %inbound.chat_id))]
pub async fn handle_command(
    forwarder: &Forwarder,
    inbound: &InboundMessage,
    command: Command<'_>,
) -> String {
    match command {
        Command::Start => start(forwarder).await,
        Command::SetChat(arg) => set_chat(forwarder, arg).await,
        Command::SendHere => send_here(forwarder, inbound).await,
        Command::Check => check(forwarder).await,
        Command::Status => status(forwarder).await,
        Command::Current => current(inbound),
        Command::AlwaysDl(arg) => always_dl(forwarder, arg).await,
        Command::Queue => queue(forwarder),
    }
}

async fn load_record(forwarder: &Forwarder) -> Result<ForwardingRecord, String> {
    forwarder.store().load().await.map_err(|e| {
        tracing::warn!(%e, "failed to read forwarding state");
        format!("❌ Failed to read config: {e}")
    })
}

async fn save_record(forwarder: &Forwarder, record: &ForwardingRecord) -> Result<(), String> {
    forwarder.store().save(record).await.map_err(|e| {
        tracing::warn!(%e, "failed to save forwarding state");
        format!("❌ Failed to save config: {e}")
    })
}

fn describe_target(record: &ForwardingRecord) -> String {
    match record.destination() {
        Some(destination) => {
            let mut text = format!("Target: {}", destination.chat);
            if let Some(thread) = destination.thread {
                text.push_str(&format!("\nThread: {thread}"));
            }
            text
        }
        None => NO_TARGET.to_string(),
    }
}

async fn start(forwarder: &Forwarder) -> String {
    let mut text = String::from(
        "👋 Welcome to Forwarder Bot!\n\n\
         Commands:\n\
         /setchat <chat_id> - Set target chat\n\
         /sendhere - Set target to current chat\n\
         /check - Verify bot can send to target\n\
         /status - Show current target chat\n\
         /current - Show this chat's id\n\
         /alwaysdl <0/1> - Toggle always download & re-upload\n\
         /queue - Show queue status\n\n",
    );
    match load_record(forwarder).await {
        Ok(record) => text.push_str(&describe_target(&record)),
        Err(reply) => text.push_str(&reply),
    }
    text
}

async fn set_chat(forwarder: &Forwarder, arg: Option<&str>) -> String {
    let Some(arg) = arg else {
        return SETCHAT_USAGE.to_string();
    };
    let Ok(chat) = arg.parse::<i64>() else {
        return "Invalid chat ID. Must be a number.".to_string();
    };

    let destination = Destination::new(ChatId::new(chat), None);
    if let Err(e) = forwarder
        .client()
        .send_text(&destination, "✅ Test message - Bot has access")
        .await
    {
        tracing::info!(%e, %destination, "setchat access check failed");
        return format!("❌ Bot can't send message here: {e}");
    }

    let mut record = match load_record(forwarder).await {
        Ok(record) => record,
        Err(reply) => return reply,
    };
    // A topic id from the previous chat means nothing in the new one.
    record.set_destination(destination);
    if let Err(reply) = save_record(forwarder, &record).await {
        return reply;
    }
    tracing::info!(%destination, "target chat set");
    format!("✅ Target chat set to: {chat}")
}

async fn send_here(forwarder: &Forwarder, inbound: &InboundMessage) -> String {
    let origin = inbound.origin();
    if let Err(e) = forwarder.client().send_text(&origin, "✅").await {
        return format!("❌ Bot can't send here: {e}");
    }

    let mut record = match load_record(forwarder).await {
        Ok(record) => record,
        Err(reply) => return reply,
    };
    record.set_destination(origin);
    if let Err(reply) = save_record(forwarder, &record).await {
        return reply;
    }
    tracing::info!(destination = %origin, "target set to current chat");
    format!("✅ Target set to this chat ({origin})")
}

async fn check(forwarder: &Forwarder) -> String {
    let record = match load_record(forwarder).await {
        Ok(record) => record,
        Err(reply) => return reply,
    };
    let Some(destination) = record.destination() else {
        return NO_TARGET.to_string();
    };
    match forwarder.client().send_text(&destination, "✅ Test").await {
        Ok(()) => format!("✅ Bot can send to {}", destination.chat),
        Err(e) => format!("❌ Bot can't send to {}: {e}", destination.chat),
    }
}

async fn status(forwarder: &Forwarder) -> String {
    match load_record(forwarder).await {
        Ok(record) => describe_target(&record),
        Err(reply) => reply,
    }
}

fn current(inbound: &InboundMessage) -> String {
    match inbound.thread_id {
        Some(thread) => format!("{}\nThread: {thread}", inbound.chat_id),
        None => inbound.chat_id.to_string(),
    }
}

async fn always_dl(forwarder: &Forwarder, arg: Option<&str>) -> String {
    let mut record = match load_record(forwarder).await {
        Ok(record) => record,
        Err(reply) => return reply,
    };
    let Some(arg) = arg else {
        return format!("Always download: {}", record.always_dl);
    };
    record.always_dl = match arg {
        "0" => false,
        "1" => true,
        _ => return ALWAYSDL_USAGE.to_string(),
    };
    if let Err(reply) = save_record(forwarder, &record).await {
        return reply;
    }
    format!("Always download: {}", record.always_dl)
}

fn queue(forwarder: &Forwarder) -> String {
    let status = forwarder.status();
    format!(
        "Queue: {}/{}\nSuccess: {}\nFailed: {}\nProcessing: {}",
        status.queue_len, status.capacity, status.success, status.failure, status.processing
    )
}
