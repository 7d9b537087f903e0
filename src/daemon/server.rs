//! Control server for the daemon's unix socket
//!
//! This module binds the local socket the client talks to and serves the
//! daemon router on it until shutdown.

use crate::error::{FleetError, Result};
use crate::security::{set_permissions, SecureFileMode};
use axum::Router;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;
use tracing::info;

/// Control server manages the control API socket
pub struct ControlServer {
    /// Path to the unix socket
    socket_path: PathBuf,
    /// Routes served on the socket
    router: Router,
}

impl ControlServer {
    /// Create a new control server
    pub fn new(socket_path: PathBuf, router: Router) -> Self {
        Self {
            socket_path,
            router,
        }
    }

    /// Socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, readable and writable by every local user
    pub fn bind(&self) -> Result<UnixListener> {
        info!("Starting control server at {:?}", self.socket_path);

        // Remove existing socket if present
        if self.socket_path.exists() {
            info!("Removing existing socket at {:?}", self.socket_path);
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                FleetError::Config(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        // Create parent directory if needed
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                FleetError::Config(format!("Failed to create socket directory: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| FleetError::Config(format!("Failed to bind unix socket: {}", e)))?;
        set_permissions(&self.socket_path, SecureFileMode::Socket)?;

        info!("Control server listening at {:?}", self.socket_path);
        Ok(listener)
    }

    /// Serve until `shutdown` resolves, then remove the socket
    pub async fn start<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = self.bind()?;
        let served = axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(shutdown)
            .await;

        self.shutdown()?;
        served.map_err(FleetError::from)
    }

    /// Remove the socket file
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down control server");

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                FleetError::Config(format!("Failed to remove socket: {}", e))
            })?;
        }

        Ok(())
    }
}
