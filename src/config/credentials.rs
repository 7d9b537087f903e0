//! Fallback-tunnel credentials (`chisel.json`)

use crate::config::BASE_TUNNEL_PORT;
use crate::error::{FleetError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Credentials and routing for the reverse-tunnel client
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelCredentials {
    /// Pinned tunnel server IP, dialled directly to bypass DNS
    pub ip: String,

    /// Fronting hostname presented as `Host` and TLS server name
    pub front: String,

    /// Basic-auth user
    pub username: String,

    /// Basic-auth password
    pub password: String,

    /// Number of node slots to forward
    pub nodes: usize,
}

impl TunnelCredentials {
    /// Parse from JSON bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| FleetError::Serialization(format!("Invalid tunnel credentials: {}", e)))
    }

    /// Load from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            FleetError::Config(format!("Failed to read tunnel credentials {:?}: {}", path, e))
        })?;
        Self::from_slice(&bytes)
    }

    /// Tunnel server URL
    pub fn server_url(&self) -> String {
        format!("https://{}", self.ip)
    }

    /// `user:password` for basic auth
    pub fn auth(&self) -> String {
        format!("{}:{}", self.username, self.password)
    }

    /// One loopback UDP forward per node slot, starting at 51820
    pub fn remotes(&self) -> Vec<String> {
        (0..self.nodes)
            .map(|i| {
                let port = usize::from(BASE_TUNNEL_PORT) + i;
                format!("127.0.0.1:{port}:127.0.0.1:{port}/udp")
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remotes_per_slot() {
        let creds = TunnelCredentials {
            ip: "198.51.100.4".to_string(),
            front: "cdn.example.net".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            nodes: 2,
        };

        assert_eq!(
            creds.remotes(),
            vec![
                "127.0.0.1:51820:127.0.0.1:51820/udp",
                "127.0.0.1:51821:127.0.0.1:51821/udp",
            ]
        );
        assert_eq!(creds.server_url(), "https://198.51.100.4");
        assert_eq!(creds.auth(), "u:p");
    }

    #[test]
    fn test_parse_credentials() {
        let json = br#"{"ip":"198.51.100.4","front":"cdn.example.net","username":"u","password":"p","nodes":3}"#;
        let creds = TunnelCredentials::from_slice(json).unwrap();
        assert_eq!(creds.nodes, 3);
        assert!(TunnelCredentials::from_slice(b"[]").is_err());
    }
}
