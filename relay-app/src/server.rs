//! Process wiring: Telegram polling -> gateway -> forwarder.

use crate::config::RelayConfig;
use crate::forwarder::Forwarder;
use crate::gateway::Gateway;
use crate::store::ConfigStore;
use anyhow::Result;
use relay_channels::{InboundMessage, TelegramClient};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const INBOUND_CHANNEL_CAPACITY: usize = 256;

fn build_client(cfg: &RelayConfig) -> Result<TelegramClient> {
    let token = cfg.require_bot_token()?;
    let client = TelegramClient::new(
        token,
        Duration::from_secs(cfg.telegram.request_timeout_secs),
    )?
    .with_poll_timeout_secs(cfg.telegram.poll_timeout_secs);
    Ok(client)
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let client = build_client(&cfg)?;
    let identity = client
        .get_me()
        .await
        .map_err(|e| anyhow::anyhow!("telegram getMe failed: {e}"))?;

    let store = ConfigStore::new(cfg.state_path()?);
    let record = store.load().await?;
    tracing::info!(
        bot_id = identity.id,
        bot_username = ?identity.username,
        state_path = %store.path().display(),
        target_chat_id = ?record.target_chat_id,
        target_thread_id = ?record.target_thread_id,
        always_dl = record.always_dl,
        queue_capacity = cfg.forwarder.queue_capacity,
        delivery_delay_ms = cfg.forwarder.delivery_delay_ms,
        "relaybot starting"
    );

    let forwarder = Arc::new(Forwarder::new(
        Arc::new(client.clone()),
        store,
        cfg.forwarder.queue_capacity,
        cfg.forwarder.delivery_delay(),
    ));

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_CHANNEL_CAPACITY);
    let poll_handle = client.start(inbound_tx);

    let shutdown = CancellationToken::new();
    let gateway = Arc::new(Gateway::new(
        forwarder.clone(),
        inbound_rx,
        identity.username.clone(),
    ));
    let gateway_handle = gateway.start(shutdown.child_token());
    tracing::info!("gateway started");

    shutdown_signal(shutdown.clone()).await;

    poll_handle.abort();
    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }

    let status = forwarder.status();
    if status.queue_len > 0 {
        tracing::warn!(
            dropped = status.queue_len,
            "pending messages are not persisted and will be lost"
        );
    }
    tracing::info!(
        success = status.success,
        failure = status.failure,
        "relaybot stopped"
    );
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let client = build_client(&cfg)?;
    let identity = client
        .get_me()
        .await
        .map_err(|e| anyhow::anyhow!("telegram getMe failed: {e}"))?;
    let store = ConfigStore::new(cfg.state_path()?);
    let record = store.load().await?;
    tracing::info!(
        bot_id = identity.id,
        bot_username = ?identity.username,
        state_path = %store.path().display(),
        target_configured = record.destination().is_some(),
        "config ok"
    );
    Ok(())
}

pub async fn status(config_path: Option<PathBuf>) -> Result<()> {
    let cfg = RelayConfig::load(config_path).await?;
    let store = ConfigStore::new(cfg.state_path()?);
    let record = store.load().await?;
    println!("state: {}", store.path().display());
    match record.destination() {
        Some(destination) => {
            println!("target_chat_id: {}", destination.chat);
            if let Some(thread) = destination.thread {
                println!("target_thread_id: {thread}");
            }
        }
        None => println!("target_chat_id: (not set)"),
    }
    println!("always_dl: {}", record.always_dl);
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to await ctrl-c signal");
        } else {
            tracing::warn!("received ctrl-c; beginning graceful shutdown");
        }
    }
    shutdown.cancel();
}
