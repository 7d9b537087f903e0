//! Forwarding and NAT rules for the active relay
//!
//! Peers may only leave through the relay interface: traffic out of the
//! uplink is rejected unless it stays inside the peer subnet, and both the
//! uplink and the relay are masqueraded.

use crate::error::Result;
use crate::exec::{args, CommandRunner};
use std::sync::Arc;
use tracing::{debug, warn};

/// iptables rule set for one relay interface
#[derive(Clone)]
pub struct Firewall {
    runner: Arc<dyn CommandRunner>,
    iptables: String,
    uplink: String,
    peer_subnet: String,
}

impl Firewall {
    /// Rules masquerading `uplink` and confining `peer_subnet`
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        iptables: impl Into<String>,
        uplink: impl Into<String>,
        peer_subnet: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            iptables: iptables.into(),
            uplink: uplink.into(),
            peer_subnet: peer_subnet.into(),
        }
    }

    /// The six rules, with `op` being `-A` or `-D`
    fn rules(&self, op: &str, relay: &str) -> Vec<Vec<String>> {
        let uplink = self.uplink.as_str();
        let subnet = self.peer_subnet.as_str();
        vec![
            args([op, "FORWARD", "-o", uplink, "!", "-d", subnet, "-j", "REJECT"]),
            args([op, "FORWARD", "-i", relay, "-j", "ACCEPT"]),
            args([op, "FORWARD", "-m", "state", "--state", "RELATED,ESTABLISHED", "-j", "ACCEPT"]),
            args([op, "FORWARD", "-j", "REJECT"]),
            args(["-t", "nat", op, "POSTROUTING", "-o", uplink, "-j", "MASQUERADE"]),
            args(["-t", "nat", op, "POSTROUTING", "-o", relay, "-j", "MASQUERADE"]),
        ]
    }

    /// Append the rules for `relay`, stopping at the first failure
    pub async fn install(&self, relay: &str) -> Result<()> {
        debug!("Installing firewall rules for {}", relay);
        for rule in self.rules("-A", relay) {
            self.runner.run(&self.iptables, &rule).await?;
        }
        Ok(())
    }

    /// Delete the rules for `relay`.
    ///
    /// Every rule is attempted; returns how many deletions failed.
    pub async fn teardown(&self, relay: &str) -> usize {
        debug!("Removing firewall rules for {}", relay);
        let mut failed = 0;
        for rule in self.rules("-D", relay) {
            if let Err(e) = self.runner.run(&self.iptables, &rule).await {
                warn!("Failed to remove rule for {}: {}", relay, e);
                failed += 1;
            }
        }
        failed
    }
}
