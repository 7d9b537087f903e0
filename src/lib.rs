//! wg-fleet: WireGuard fleet controller, node agent and host daemon
//!
//! This library runs a fleet of WireGuard VPN endpoints. A central
//! controller leases per-node device slots to users, a node agent on every
//! VPN node switches its egress relay and serves peer configs, and a host
//! daemon fetches, rewrites and activates tunnel configs for the local
//! client.
//!
//! # Architecture
//!
//! Requests flow client -> daemon (unix socket) -> controller (HTTPS, pinned
//! IP) -> node agent (HTTP). Each hop presents a bearer token in the
//! `Authorization` header. When the direct route is blocked the daemon
//! reaches the nodes through a supervised reverse tunnel.
//!
//! # Modules
//!
//! - `cidr`: Split-tunnel route computation
//! - `config`: Service configuration and persisted daemon state
//! - `controller`: Device slot API and node proxying
//! - `daemon`: Host daemon, config sync and control socket
//! - `devices`: Device slot store and allocator
//! - `exec`: External command execution
//! - `fallback`: Supervised fallback tunnel
//! - `node`: Node agent API
//! - `security`: Input validation, file permissions and privilege checks
//! - `wireguard`: wg-quick, firewall rules and relay switching
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cidr;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod devices;
pub mod error;
pub mod exec;
pub mod fallback;
pub mod node;
pub mod security;
pub mod wireguard;

// Re-export commonly used types
pub use error::{FleetError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
