//! HTTPS client for the controller
//!
//! The controller is always dialled at the pinned IP from the operator
//! state: both the controller hostname and the fronting hostname resolve
//! to `<ip>:443`, bypassing DNS.

use crate::config::{NodeState, TunnelCredentials};
use crate::devices::DeviceView;
use crate::error::Result;
use axum::body::Bytes;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Authenticated controller client
#[derive(Debug, Clone)]
pub struct ControllerClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl ControllerClient {
    /// Client for the controller described by `state`.
    ///
    /// `base_override` replaces `https://<vpn_host>` as the URL prefix.
    pub fn from_state(state: &NodeState, base_override: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Ok(ip) = state.ip.parse::<IpAddr>() {
            let pinned = SocketAddr::new(ip, 443);
            for host in [&state.vpn_host, &state.front_host] {
                if !host.is_empty() {
                    builder = builder.resolve(host, pinned);
                }
            }
        }

        let base = match base_override {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", state.vpn_host),
        };

        Ok(Self {
            http: builder.build()?,
            base,
            token: state.token.clone(),
        })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base, path);
        debug!("GET {}", url);
        let response = self
            .http
            .get(&url)
            .header(AUTHORIZATION, &self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        Ok(self.get(path).await?.json().await?)
    }

    /// Node names known to the controller
    pub async fn nodes(&self) -> Result<Vec<String>> {
        self.get_json("/nodes").await
    }

    /// Devices the operator holds on `node`
    pub async fn devices(&self, node: &str) -> Result<Vec<DeviceView>> {
        self.get_json(&format!("/{}/device", node)).await
    }

    /// Raw `chisel.json`, checked to parse before it is handed back
    pub async fn tunnel_credentials(&self) -> Result<Bytes> {
        let bytes = self.get("/chisel.json").await?.bytes().await?;
        TunnelCredentials::from_slice(&bytes)?;
        Ok(bytes)
    }
}
