//! Persisted forwarding target.
//!
//! One small JSON record, replaced as a whole on every save. Callers
//! read-modify-write; concurrent writers are last-write-wins.

use anyhow::Result;
use relay_channels::{ChatId, Destination, ThreadId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardingRecord {
    #[serde(default)]
    pub target_chat_id: Option<i64>,
    #[serde(default)]
    pub target_thread_id: Option<i64>,
    /// Skip native forwarding and always re-upload content.
    #[serde(default)]
    pub always_dl: bool,
}

impl ForwardingRecord {
    pub fn destination(&self) -> Option<Destination> {
        let chat = self.target_chat_id?;
        Some(Destination::new(
            ChatId::new(chat),
            self.target_thread_id.map(ThreadId::new),
        ))
    }

    pub fn set_destination(&mut self, destination: Destination) {
        self.target_chat_id = Some(destination.chat.get());
        self.target_thread_id = destination.thread.map(ThreadId::get);
    }
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record; a missing file yields defaults.
    pub async fn load(&self) -> Result<ForwardingRecord> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse state {}: {e}", self.path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ForwardingRecord::default()),
            Err(e) => Err(anyhow::anyhow!("read state {}: {e}", self.path.display())),
        }
    }

    /// Replace the record atomically: write a sibling temp file, then rename.
    pub async fn save(&self, record: &ForwardingRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| anyhow::anyhow!("create state dir {}: {e}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(record)?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| anyhow::anyhow!("write state {}: {e}", tmp.display()))?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(anyhow::anyhow!(
                "replace state {}: {e}",
                self.path.display()
            ));
        }

        tracing::debug!(
            path = %self.path.display(),
            target_chat_id = ?record.target_chat_id,
            target_thread_id = ?record.target_thread_id,
            always_dl = record.always_dl,
            "forwarding state saved"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "state".to_string());
        self.path
            .with_file_name(format!(".{name}.{}.tmp", uuid::Uuid::new_v4()))
    }
}
