//! Error types for wg-fleet
//!
//! This module defines the error types used throughout the fleet services.
//! We use `thiserror` for ergonomic error definitions and `anyhow` for
//! error propagation in the binary.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Main error type for fleet operations
#[derive(Error, Debug)]
pub enum FleetError {
    /// Missing or unknown `Authorization` token
    #[error("Unauthorized")]
    Unauthorized,

    /// Every device slot of a node is leased
    #[error("No free device slot left on node '{0}'")]
    AllocationExhausted(String),

    /// The operator has not picked a slot for a node
    #[error("no slot selected for node: {0}")]
    NoSlotAssigned(String),

    /// The leased slot is not among the devices the controller returned
    #[error("slot {slot} can't be found for node: {node}")]
    SlotNotFound {
        /// Node name
        node: String,
        /// Leased slot id
        slot: u8,
    },

    /// A call to the controller, a node agent or the relay directory failed
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A relay switch failed after the active relay was already updated
    #[error("Firewall state inconsistent for relay '{relay}': {reason}")]
    FirewallStateInconsistent {
        /// Relay that was being activated
        relay: String,
        /// Failing step
        reason: String,
    },

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// External command errors (wg, wg-quick, iptables)
    #[error("Command error: {0}")]
    Command(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Device store errors
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// Security-related errors
    #[error("Security error: {0}")]
    Security(String),

    /// Input validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias using FleetError
pub type Result<T> = std::result::Result<T, FleetError>;

impl FleetError {
    /// HTTP status this error maps to at the serving edge
    pub fn status(&self) -> StatusCode {
        match self {
            FleetError::Unauthorized => StatusCode::UNAUTHORIZED,
            FleetError::AllocationExhausted(_) => StatusCode::CONFLICT,
            FleetError::NotFound(_) => StatusCode::NOT_FOUND,
            FleetError::Validation(_) | FleetError::Serialization(_) => StatusCode::BAD_REQUEST,
            FleetError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        FleetError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        FleetError::Config(err.to_string())
    }
}

impl From<sqlx::Error> for FleetError {
    fn from(err: sqlx::Error) -> Self {
        FleetError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        FleetError::UpstreamUnavailable(err.to_string())
    }
}

impl IntoResponse for FleetError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        match self {
            // No body on auth failures
            FleetError::Unauthorized => status.into_response(),
            other => (status, other.to_string()).into_response(),
        }
    }
}
