//! Reverse-tunnel client process

use crate::config::TunnelCredentials;
use crate::error::{FleetError, Result};
use crate::fallback::TunnelClient;
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

/// Environment variable chisel reads `user:pass` from
const AUTH_ENV: &str = "AUTH";

/// Runs the `chisel client` binary with credentials read from disk.
///
/// Credentials are re-read on every run so a restart picks up a refreshed
/// file.
#[derive(Debug, Clone)]
pub struct ChiselClient {
    binary: String,
    credentials_path: PathBuf,
}

impl ChiselClient {
    /// Client running `binary` with credentials from `credentials_path`
    pub fn new(binary: impl Into<String>, credentials_path: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            credentials_path: credentials_path.into(),
        }
    }

    /// Command line for the given credentials.
    ///
    /// The `user:pass` pair is not part of it; see [`ChiselClient::command`].
    pub fn command_args(credentials: &TunnelCredentials) -> Vec<String> {
        let mut args = vec![
            "client".to_string(),
            "--hostname".to_string(),
            credentials.front.clone(),
            "--sni".to_string(),
            credentials.front.clone(),
            credentials.server_url(),
        ];
        args.extend(credentials.remotes());
        args
    }

    /// Process for the given credentials, with `user:pass` passed in the
    /// `AUTH` environment variable so it stays out of the process list
    pub fn command(&self, credentials: &TunnelCredentials) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(Self::command_args(credentials))
            .env(AUTH_ENV, credentials.auth())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl TunnelClient for ChiselClient {
    async fn run(&self) -> Result<()> {
        let credentials = TunnelCredentials::load(&self.credentials_path).await?;
        info!(
            "Starting fallback tunnel to {} via {} ({} forwards)",
            credentials.server_url(),
            credentials.front,
            credentials.nodes
        );

        let status = self
            .command(&credentials)
            .status()
            .await
            .map_err(|e| FleetError::Command(format!("Failed to execute {}: {}", self.binary, e)))?;

        if status.success() {
            Ok(())
        } else {
            Err(FleetError::Command(format!("{} exited with {}", self.binary, status)))
        }
    }
}
