//! Controller request handlers

use super::auth::CallerToken;
use super::ControllerState;
use crate::devices::DeviceView;
use crate::error::{FleetError, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Body of `POST /check`
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Token to check
    #[serde(default)]
    pub token: String,
}

/// Envelope returned by `POST /check`
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CheckResponse {
    /// Always null
    pub data: Option<serde_json::Value>,
    /// Whether the token is known
    pub success: bool,
    /// Reason when not
    pub error: String,
}

/// Body of `DELETE /{node}/device`
#[derive(Debug, Deserialize)]
pub struct DeviceById {
    /// Slot to release
    pub device_id: u8,
}

/// Token check used by the login screen; never answers 401
pub async fn check(
    State(state): State<Arc<ControllerState>>,
    body: Bytes,
) -> Result<Json<CheckResponse>> {
    let login: LoginRequest = serde_json::from_slice(&body)?;

    let known = !login.token.is_empty() && state.devices.is_known_token(&login.token).await?;
    let response = if known {
        CheckResponse {
            data: None,
            success: true,
            error: String::new(),
        }
    } else {
        CheckResponse {
            data: None,
            success: false,
            error: "Go away".to_string(),
        }
    };
    Ok(Json(response))
}

/// Configured node names
pub async fn nodes(State(state): State<Arc<ControllerState>>) -> Json<Vec<String>> {
    Json(state.config.nodes.keys().cloned().collect())
}

/// Relay hostnames from the relay directory
pub async fn relays(State(state): State<Arc<ControllerState>>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.relays.hostnames().await?))
}

/// Fallback-tunnel credentials, if the operator provisioned them
pub async fn tunnel_credentials(State(state): State<Arc<ControllerState>>) -> Result<Response> {
    let path = &state.config.tunnel_credentials_path;
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(([(header::CONTENT_TYPE, "application/json")], bytes).into_response()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(FleetError::NotFound(format!("{}", path.display())))
        }
        Err(e) => Err(e.into()),
    }
}

/// Server public key of a node
pub async fn node_public_key(
    State(state): State<Arc<ControllerState>>,
    Path(node): Path<String>,
) -> Result<Response> {
    let response = state.proxy(&node)?.forward(Method::GET, "/pk", None).await?;
    Ok(response.into_response())
}

/// Devices the caller holds on a node
pub async fn list_devices(
    State(state): State<Arc<ControllerState>>,
    Path(node): Path<String>,
    CallerToken(token): CallerToken,
) -> Result<Json<Vec<DeviceView>>> {
    state.proxy(&node)?;
    let devices = state.devices.list(&node, &token).await?;
    Ok(Json(devices.into_iter().map(DeviceView::from).collect()))
}

/// Lease the lowest free slot on a node; answers the slot id as text
pub async fn create_device(
    State(state): State<Arc<ControllerState>>,
    Path(node): Path<String>,
    CallerToken(token): CallerToken,
) -> Result<String> {
    let proxy = state.proxy(&node)?;
    let sentinel = state.config.sentinel_endpoint.clone();

    let record = state
        .devices
        .lease(&node, &token, |id| async move {
            proxy.peer_config(id, &sentinel).await
        })
        .await?;

    info!("Device {} on node '{}' leased ({})", record.id, node, record.assigned_ip);
    Ok(record.id.to_string())
}

/// Release a slot the caller holds
pub async fn delete_device(
    State(state): State<Arc<ControllerState>>,
    Path(node): Path<String>,
    CallerToken(token): CallerToken,
    body: Bytes,
) -> Result<&'static str> {
    state.proxy(&node)?;
    let request: DeviceById = serde_json::from_slice(&body)?;

    if !state.devices.release(&node, request.device_id, &token).await? {
        warn!(
            "Delete of device {} on node '{}' by a non-owner or for a free slot",
            request.device_id, node
        );
        return Err(FleetError::NotFound(format!(
            "device {} on node '{}'",
            request.device_id, node
        )));
    }
    Ok("OK")
}

/// Active relay of a node
pub async fn get_relay(
    State(state): State<Arc<ControllerState>>,
    Path(node): Path<String>,
) -> Result<Response> {
    let response = state.proxy(&node)?.forward(Method::GET, "/relay", None).await?;
    Ok(response.into_response())
}

/// Switch the active relay of a node
pub async fn set_relay(
    State(state): State<Arc<ControllerState>>,
    Path(node): Path<String>,
    body: Bytes,
) -> Result<Response> {
    let response = state
        .proxy(&node)?
        .forward(Method::POST, "/relay", Some(body))
        .await?;
    Ok(response.into_response())
}

/// Liveness check
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
