//! Inbound loop: commands are answered in place, everything else is queued.

use crate::commands;
use crate::forwarder::{EnqueueError, Forwarder};
use anyhow::Result;
use relay_channels::{Destination, InboundMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const NO_TARGET_WARNING: &str = "⚠️ No target chat set.\nUse /setchat <chat_id> to set target.";
const QUEUE_FULL_WARNING: &str = "⚠️ Queue full, please wait...";

pub struct Gateway {
    forwarder: Arc<Forwarder>,
    bot_username: Option<String>,
    inbound_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>>,
}

impl Gateway {
    pub fn new(
        forwarder: Arc<Forwarder>,
        inbound_rx: mpsc::Receiver<InboundMessage>,
        bot_username: Option<String>,
    ) -> Self {
        Self {
            forwarder,
            bot_username,
            inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
        }
    }

    pub fn start(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run_loop(shutdown).await {
                tracing::error!(%e, "gateway loop exited");
            }
        })
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self, shutdown: CancellationToken) -> Result<()> {
        let mut rx = self.inbound_rx.lock().await;
        loop {
            let inbound = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("gateway shutdown requested");
                    return Ok(());
                }
                msg = rx.recv() => msg,
            };
            let Some(inbound) = inbound else {
                return Ok(());
            };

            if let Err(e) = self.handle_inbound(inbound).await {
                tracing::warn!(%e, "handle_inbound failed");
            }
        }
    }

    #[tracing::instrument(
        level = "info",
        skip_all,
        fields(chat_id = %inbound.chat_id, message_id = %inbound.message_id)
    )]
    async fn handle_inbound(&self, inbound: InboundMessage) -> Result<()> {
        let origin = inbound.origin();

        let command = inbound
            .payload
            .text()
            .and_then(|text| commands::parse(text, self.bot_username.as_deref()));
        if let Some(command) = command {
            let reply = commands::handle_command(&self.forwarder, &inbound, command).await;
            return self.reply(&origin, &reply).await;
        }

        let record = match self.forwarder.store().load().await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(%e, "failed to read forwarding state");
                return self
                    .reply(&origin, &format!("❌ Failed to read config: {e}"))
                    .await;
            }
        };
        if record.destination().is_none() {
            return self.reply(&origin, NO_TARGET_WARNING).await;
        }

        let kind = inbound.payload.kind();
        match self.forwarder.enqueue(inbound) {
            Ok(()) => {
                tracing::debug!(kind, "message queued");
                Ok(())
            }
            Err(EnqueueError::QueueFull { capacity }) => {
                tracing::warn!(kind, capacity, "queue full; rejecting message");
                self.reply(&origin, QUEUE_FULL_WARNING).await
            }
        }
    }

    async fn reply(&self, to: &Destination, text: &str) -> Result<()> {
        self.forwarder.client().send_text(to, text).await?;
        Ok(())
    }
}
