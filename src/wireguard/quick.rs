//! `wg` and `wg-quick` invocations

use crate::error::{FleetError, Result};
use crate::exec::{args, CommandOutput, CommandRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Thin wrapper over the WireGuard userspace tools
#[derive(Clone)]
pub struct WgTools {
    runner: Arc<dyn CommandRunner>,
    wg: String,
    wg_quick: String,
}

impl WgTools {
    /// Tools at the given binary paths
    pub fn new(runner: Arc<dyn CommandRunner>, wg: impl Into<String>, wg_quick: impl Into<String>) -> Self {
        Self {
            runner,
            wg: wg.into(),
            wg_quick: wg_quick.into(),
        }
    }

    /// Output of `wg` with no arguments, i.e. every interface's status
    pub async fn status(&self) -> Result<String> {
        Ok(self.runner.run(&self.wg, &[]).await?.stdout)
    }

    /// `wg-quick up <config>`
    pub async fn up(&self, config: &Path) -> Result<CommandOutput> {
        info!("Bringing up {}", config.display());
        self.runner
            .run(&self.wg_quick, &args(["up".to_string(), path_arg(config)]))
            .await
    }

    /// `wg-quick down <config>`
    pub async fn down(&self, config: &Path) -> Result<CommandOutput> {
        info!("Bringing down {}", config.display());
        self.runner
            .run(&self.wg_quick, &args(["down".to_string(), path_arg(config)]))
            .await
    }

    /// Bring down every `.conf` in `dir`.
    ///
    /// Individual failures are expected (most configs are not up) and only
    /// logged. Failing to read the directory is an error.
    pub async fn down_all(&self, dir: &Path) -> Result<()> {
        let mut configs = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
            FleetError::Config(format!("Cannot read config directory {}: {}", dir.display(), e))
        })?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "conf") {
                configs.push(path);
            }
        }
        configs.sort();

        debug!("Bringing down {} config(s) in {}", configs.len(), dir.display());
        for config in configs {
            if let Err(e) = self.down(&config).await {
                warn!("Ignoring failed down of {}: {}", config.display(), e);
            }
        }
        Ok(())
    }
}

/// Interface name wg-quick derives from a config path (its file stem)
pub fn interface_name(config: &Path) -> Option<String> {
    config
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::to_string)
}

/// Path of `<name>.conf` inside `dir`
pub fn config_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.conf", name))
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
