//! WireGuard interface and relay management
//!
//! Everything here drives the system `wg`, `wg-quick` and `iptables`
//! binaries through a [`CommandRunner`](crate::exec::CommandRunner).

mod firewall;
mod quick;
mod relay;

pub use firewall::Firewall;
pub use quick::{config_path, interface_name, WgTools};
pub use relay::{RelayPhase, RelayState, RelaySwitcher};
