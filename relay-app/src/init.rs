//! `relaybot init`: writes the commented settings template next to the
//! default config path, leaving an existing file untouched.

use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const CONFIG_TEMPLATE: &str = include_str!("../../config-templates/config.toml");

#[derive(Debug, Clone)]
pub struct InitReport {
    pub config_path: PathBuf,
    pub created: bool,
}

pub async fn initialize_default() -> Result<InitReport> {
    let config_path = crate::config::default_config_path()?;
    write_template(&config_path).await
}

/// Create `path` from the template unless something already lives there.
pub async fn write_template(path: &Path) -> Result<InitReport> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create config dir {}", dir.display()))?;
    }

    let created = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(mut file) => {
            file.write_all(CONFIG_TEMPLATE.as_bytes())
                .await
                .with_context(|| format!("write settings template {}", path.display()))?;
            file.flush().await?;
            true
        }
        Err(err) if err.kind() == ErrorKind::AlreadyExists => false,
        Err(err) => {
            return Err(err).with_context(|| format!("open {}", path.display()));
        }
    };

    Ok(InitReport {
        config_path: path.to_path_buf(),
        created,
    })
}
