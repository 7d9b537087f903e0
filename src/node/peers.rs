//! Pre-generated peer configs on the node

use crate::error::{FleetError, Result};
use std::path::{Path, PathBuf};

/// Directory of `peer<N>/peer<N>.conf` files
#[derive(Debug, Clone)]
pub struct PeerConfigs {
    dir: PathBuf,
}

impl PeerConfigs {
    /// Configs under `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the config for slot `id`
    pub fn path(&self, id: u8) -> PathBuf {
        self.dir.join(format!("peer{}", id)).join(format!("peer{}.conf", id))
    }

    /// Config for slot `id` with `ListenPort` lines removed
    pub async fn read(&self, id: u8) -> Result<String> {
        let path = self.path(id);
        let config = read_text(&path).await?;
        Ok(strip_listen_port(&config))
    }
}

/// Drop `ListenPort = ` lines; peers pick their own source port
pub fn strip_listen_port(config: &str) -> String {
    let mut out = String::with_capacity(config.len());
    for line in config.lines().filter(|l| !l.starts_with("ListenPort = ")) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Read a text file, mapping absence to [`FleetError::NotFound`]
pub async fn read_text(path: &Path) -> Result<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FleetError::NotFound(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}
