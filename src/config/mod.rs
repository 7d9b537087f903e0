//! Configuration management
//!
//! Static TOML configuration for the three services, plus the JSON blobs the
//! daemon persists at runtime (operator state and fallback-tunnel
//! credentials).

mod credentials;
mod state;
mod toml_parser;

pub use credentials::TunnelCredentials;
pub use state::{NodeState, StateFile};
pub use toml_parser::{load_toml, load_toml_or_default, parse_toml};

use crate::error::{FleetError, Result};
use crate::security;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Endpoint node agents write into peer configs; replaced by the node's
/// public endpoint before a config leaves the controller
pub const SENTINEL_ENDPOINT: &str = "127.0.0.1:51820";

/// First local UDP port used by the fallback tunnel, one port per node slot
pub const BASE_TUNNEL_PORT: u16 = 51820;

/// Controller configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Listen address for the HTTP API
    #[serde(default = "default_controller_listen")]
    pub listen: String,

    /// Tokens seeded into the user table at start
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Node agents by name
    #[serde(default)]
    pub nodes: BTreeMap<String, NodeConfig>,

    /// Fallback-tunnel credentials served at `/chisel.json`
    #[serde(default = "default_credentials_path")]
    pub tunnel_credentials_path: PathBuf,

    /// Relay directory queried once for `/relays`
    #[serde(default = "default_relay_directory_url")]
    pub relay_directory_url: String,

    /// Endpoint node agents put into generated peer configs
    #[serde(default = "default_sentinel_endpoint")]
    pub sentinel_endpoint: String,

    /// SQLite file holding users and device leases
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

/// How the controller reaches one node agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// `host:port` of the node agent API
    pub host: String,

    /// Publicly reachable WireGuard endpoint of the node
    pub true_endpoint: String,

    /// Token the node agent expects
    pub token: String,
}

impl ControllerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Look up a node by name
    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.get(name)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        if self.tokens.iter().any(|t| t.trim().is_empty()) {
            return Err(FleetError::Config("Empty user token".to_string()));
        }
        security::validate_endpoint(&self.sentinel_endpoint)?;

        for (name, node) in &self.nodes {
            security::validate_node_name(name)
                .and_then(|_| node.validate())
                .map_err(|e| FleetError::Config(format!("Node '{}': {}", name, e)))?;
        }
        Ok(())
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            listen: default_controller_listen(),
            tokens: Vec::new(),
            nodes: BTreeMap::new(),
            tunnel_credentials_path: default_credentials_path(),
            relay_directory_url: default_relay_directory_url(),
            sentinel_endpoint: default_sentinel_endpoint(),
            database_path: default_database_path(),
        }
    }
}

impl NodeConfig {
    /// Validate node entry
    pub fn validate(&self) -> Result<()> {
        security::validate_endpoint(&self.host)?;
        security::validate_endpoint(&self.true_endpoint)?;
        if self.token.is_empty() {
            return Err(FleetError::Validation("Node token cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Node agent configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeAgentConfig {
    /// Listen address for the node API
    #[serde(default = "default_node_listen")]
    pub listen: String,

    /// Shared token the controller presents
    #[serde(default)]
    pub token: String,

    /// Relay activated at start
    #[serde(default)]
    pub default_relay: String,

    /// Directory of relay wg-quick configs (`<relay>.conf`)
    #[serde(default = "default_relay_dir")]
    pub relay_dir: PathBuf,

    /// Directory of generated peer configs (`peerN/peerN.conf`)
    #[serde(default = "default_peer_dir")]
    pub peer_dir: PathBuf,

    /// Server public key file
    #[serde(default = "default_public_key_path")]
    pub public_key_path: PathBuf,

    /// Interface facing the peers
    #[serde(default = "default_uplink_interface")]
    pub uplink_interface: String,

    /// Subnet peers are addressed from
    #[serde(default = "default_peer_subnet")]
    pub peer_subnet: String,

    /// wg-quick binary
    #[serde(default = "default_wg_quick")]
    pub wg_quick: String,

    /// iptables binary
    #[serde(default = "default_iptables")]
    pub iptables: String,

    /// Optional command run after a relay interface comes up; the interface
    /// name is appended as the last argument
    #[serde(default)]
    pub upgrade_command: Option<Vec<String>>,
}

impl NodeAgentConfig {
    /// Load configuration from a TOML file, defaults when absent
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        load_toml_or_default(path)
    }

    /// Validate node agent configuration
    pub fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(FleetError::Config("Node token is not set".to_string()));
        }
        security::validate_relay_name(&self.default_relay)
            .map_err(|e| FleetError::Config(format!("default_relay: {}", e)))?;
        security::validate_interface_name(&self.uplink_interface)
            .map_err(|e| FleetError::Config(format!("uplink_interface: {}", e)))?;
        if let Some(cmd) = &self.upgrade_command {
            if cmd.is_empty() {
                return Err(FleetError::Config("upgrade_command cannot be empty".to_string()));
            }
        }
        Ok(())
    }
}

impl Default for NodeAgentConfig {
    fn default() -> Self {
        Self {
            listen: default_node_listen(),
            token: String::new(),
            default_relay: String::new(),
            relay_dir: default_relay_dir(),
            peer_dir: default_peer_dir(),
            public_key_path: default_public_key_path(),
            uplink_interface: default_uplink_interface(),
            peer_subnet: default_peer_subnet(),
            wg_quick: default_wg_quick(),
            iptables: default_iptables(),
            upgrade_command: None,
        }
    }
}

/// Host daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding state, credentials, socket and configs
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Node address written into peer configs, rewritten to loopback on sync;
    /// when unset every `Endpoint` host is rewritten
    #[serde(default)]
    pub rendezvous_ip: Option<String>,

    /// Reverse-tunnel client binary
    #[serde(default = "default_tunnel_binary")]
    pub tunnel_binary: String,

    /// wg binary
    #[serde(default = "default_wg")]
    pub wg: String,

    /// wg-quick binary
    #[serde(default = "default_wg_quick_name")]
    pub wg_quick: String,
}

/// Files and directories derived from [`DaemonConfig::base_dir`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonPaths {
    /// Base directory
    pub base: PathBuf,
    /// Persisted [`NodeState`]
    pub state: PathBuf,
    /// Persisted [`TunnelCredentials`]
    pub credentials: PathBuf,
    /// Local control socket
    pub socket: PathBuf,
    /// Configs exactly as fetched
    pub raw_dir: PathBuf,
    /// Rewritten configs ready for wg-quick
    pub active_dir: PathBuf,
}

impl DaemonConfig {
    /// Load configuration from a TOML file, defaults when absent
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = load_toml_or_default(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate daemon configuration
    pub fn validate(&self) -> Result<()> {
        if let Some(ip) = &self.rendezvous_ip {
            security::validate_ipv4(ip)?;
        }
        security::sanitize_path(&self.base_dir.to_string_lossy())?;
        Ok(())
    }

    /// Paths under the base directory
    pub fn paths(&self) -> DaemonPaths {
        DaemonPaths::new(&self.base_dir)
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            rendezvous_ip: None,
            tunnel_binary: default_tunnel_binary(),
            wg: default_wg(),
            wg_quick: default_wg_quick_name(),
        }
    }
}

impl DaemonPaths {
    /// Lay out paths under `base`
    pub fn new(base: &Path) -> Self {
        Self {
            base: base.to_path_buf(),
            state: base.join("state.json"),
            credentials: base.join("chisel.json"),
            socket: base.join("daemon.sock"),
            raw_dir: base.join("conf-raw"),
            active_dir: base.join("conf-active"),
        }
    }

    /// Interface config file name for a node
    pub fn config_file_name(node: &str) -> String {
        format!("wg-{}.conf", node)
    }

    /// Raw config for a node
    pub fn raw_config(&self, node: &str) -> PathBuf {
        self.raw_dir.join(Self::config_file_name(node))
    }

    /// Active config for a node
    pub fn active_config(&self, node: &str) -> PathBuf {
        self.active_dir.join(Self::config_file_name(node))
    }
}

// Default value functions for serde
fn default_controller_listen() -> String {
    "0.0.0.0:6128".to_string()
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("chisel.json")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("controller.db")
}

fn default_relay_directory_url() -> String {
    "https://api.mullvad.net/www/relays/all/".to_string()
}

fn default_sentinel_endpoint() -> String {
    SENTINEL_ENDPOINT.to_string()
}

fn default_node_listen() -> String {
    "0.0.0.0:8888".to_string()
}

fn default_relay_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
    PathBuf::from(home).join(".config").join("mullvad").join("wg0")
}

fn default_peer_dir() -> PathBuf {
    PathBuf::from("/config")
}

fn default_public_key_path() -> PathBuf {
    PathBuf::from("/config/server/publickey-server")
}

fn default_uplink_interface() -> String {
    "eth0".to_string()
}

fn default_peer_subnet() -> String {
    "10.13.13.1/24".to_string()
}

fn default_wg_quick() -> String {
    "/usr/bin/wg-quick".to_string()
}

fn default_wg_quick_name() -> String {
    "wg-quick".to_string()
}

fn default_wg() -> String {
    "wg".to_string()
}

fn default_iptables() -> String {
    "iptables".to_string()
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("/etc/wg-fleet")
}

fn default_tunnel_binary() -> String {
    "chisel".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_controller_config() {
        let toml = r#"
            tokens = ["alice-token"]

            [nodes.fra]
            host = "10.1.0.2:8888"
            true_endpoint = "109.122.216.14:51820"
            token = "node-secret"
        "#;

        let config: ControllerConfig = parse_toml(toml).expect("Failed to parse TOML");
        config.validate().unwrap();

        assert_eq!(config.listen, "0.0.0.0:6128");
        assert_eq!(config.sentinel_endpoint, SENTINEL_ENDPOINT);
        let node = config.node("fra").unwrap();
        assert_eq!(node.true_endpoint, "109.122.216.14:51820");
        assert!(config.node("ams").is_none());
    }

    #[test]
    fn test_controller_config_rejects_bad_node() {
        let toml = r#"
            [nodes."bad node"]
            host = "10.1.0.2:8888"
            true_endpoint = "109.122.216.14:51820"
            token = "node-secret"
        "#;

        let config: ControllerConfig = parse_toml(toml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_controller_config_rejects_missing_port() {
        let mut config = ControllerConfig::default();
        config.nodes.insert(
            "fra".to_string(),
            NodeConfig {
                host: "10.1.0.2".to_string(),
                true_endpoint: "109.122.216.14:51820".to_string(),
                token: "t".to_string(),
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_agent_defaults() {
        let config: NodeAgentConfig = parse_toml(r#"token = "s3cret""#).unwrap();
        assert_eq!(config.listen, "0.0.0.0:8888");
        assert_eq!(config.uplink_interface, "eth0");
        assert_eq!(config.peer_subnet, "10.13.13.1/24");
        assert!(config.upgrade_command.is_none());

        // No default relay yet
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_node_agent_validate() {
        let config = NodeAgentConfig {
            token: "s3cret".to_string(),
            default_relay: "se-got-wg-001".to_string(),
            ..NodeAgentConfig::default()
        };
        config.validate().unwrap();

        let no_token = NodeAgentConfig {
            token: String::new(),
            ..config.clone()
        };
        assert!(no_token.validate().is_err());

        let empty_upgrade = NodeAgentConfig {
            upgrade_command: Some(vec![]),
            ..config
        };
        assert!(empty_upgrade.validate().is_err());
    }

    #[test]
    fn test_daemon_paths() {
        let config: DaemonConfig = parse_toml(r#"base_dir = "/tmp/fleet""#).unwrap();
        let paths = config.paths();

        assert_eq!(paths.state, PathBuf::from("/tmp/fleet/state.json"));
        assert_eq!(paths.socket, PathBuf::from("/tmp/fleet/daemon.sock"));
        assert_eq!(
            paths.active_config("fra"),
            PathBuf::from("/tmp/fleet/conf-active/wg-fra.conf")
        );
        assert_eq!(
            paths.raw_config("fra"),
            PathBuf::from("/tmp/fleet/conf-raw/wg-fra.conf")
        );
    }

    #[test]
    fn test_daemon_rejects_bad_rendezvous() {
        let config = DaemonConfig {
            rendezvous_ip: Some("vpn.example.com".to_string()),
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
