//! Per-node tunnel config distribution
//!
//! For every cached node the leased device's config is fetched from the
//! controller, stored as-is under the raw directory, then rewritten for
//! split tunnelling and published under the active directory. A node whose
//! fetch fails keeps its previous active config if it has one.

use crate::cidr::allowed_ips_except;
use crate::config::{DaemonPaths, NodeState};
use crate::daemon::{exists, ControllerClient};
use crate::error::{FleetError, Result};
use crate::security::write_secret;
use tracing::{info, warn};

/// Loopback address the fallback tunnel listens on
const LOOPBACK: &str = "127.0.0.1";

/// Outcome of a successful sync
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Nodes whose active config was rewritten
    pub updated: Vec<String>,
    /// Nodes left on their previous active config
    pub stale: Vec<String>,
}

/// One sync pass over the cached nodes
pub struct ConfigSync<'a> {
    client: &'a ControllerClient,
    paths: &'a DaemonPaths,
    rendezvous_ip: Option<&'a str>,
}

impl<'a> ConfigSync<'a> {
    /// Sync pass writing under `paths`
    pub fn new(
        client: &'a ControllerClient,
        paths: &'a DaemonPaths,
        rendezvous_ip: Option<&'a str>,
    ) -> Self {
        Self {
            client,
            paths,
            rendezvous_ip,
        }
    }

    /// Sync every node in `state.node_cache`, stopping at the first error
    pub async fn run(&self, state: &NodeState) -> Result<SyncReport> {
        let mut report = SyncReport::default();
        if state.node_cache.is_empty() {
            return Ok(report);
        }

        // Same route list for every node; nothing is written if our address is bad
        let allowed_ips = allowed_ips_except(&state.ip)?;

        for node in &state.node_cache {
            let slot = state
                .slot(node)
                .ok_or_else(|| FleetError::NoSlotAssigned(node.clone()))?;
            let active = self.paths.active_config(node);

            let devices = match self.client.devices(node).await {
                Ok(devices) => devices,
                Err(e) => {
                    if !exists(&active).await {
                        return Err(e);
                    }
                    warn!("Using stale config for node '{}': {}", node, e);
                    report.stale.push(node.clone());
                    continue;
                }
            };

            let device = devices
                .into_iter()
                .find(|d| d.id == slot)
                .ok_or_else(|| FleetError::SlotNotFound {
                    node: node.clone(),
                    slot,
                })?;

            write_secret(&self.paths.raw_config(node), device.config.as_bytes()).await?;

            let rewritten = rewrite_config(&device.config, &allowed_ips, self.rendezvous_ip);
            write_secret(&active, rewritten.as_bytes()).await?;

            info!("Synced config for node '{}' (slot {})", node, slot);
            report.updated.push(node.clone());
        }

        Ok(report)
    }
}

/// Rewrite a fetched config for the local host.
///
/// The catch-all route becomes `allowed_ips`, and the node endpoint is
/// pointed at the loopback end of the fallback tunnel: either every
/// `<rendezvous>:` occurrence, or, without a rendezvous address, the host
/// part of each `Endpoint = ` line.
pub fn rewrite_config(raw: &str, allowed_ips: &str, rendezvous_ip: Option<&str>) -> String {
    let routed = raw.replace(
        "AllowedIPs = 0.0.0.0/0",
        &format!("AllowedIPs = {}", allowed_ips),
    );

    match rendezvous_ip {
        Some(ip) => routed.replace(&format!("{}:", ip), &format!("{}:", LOOPBACK)),
        None => routed
            .split_inclusive('\n')
            .map(|line| match line.strip_prefix("Endpoint = ") {
                Some(endpoint) => match endpoint.rsplit_once(':') {
                    Some((_, port)) => format!("Endpoint = {}:{}", LOOPBACK, port),
                    None => line.to_string(),
                },
                None => line.to_string(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::{ensure_dir, SecureFileMode};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RAW: &str = "[Interface]\nAddress = 10.13.13.3\n\n[Peer]\nEndpoint = 109.122.216.14:51821\nAllowedIPs = 0.0.0.0/0\n";

    fn paths(dir: &TempDir) -> DaemonPaths {
        let paths = DaemonPaths::new(dir.path());
        ensure_dir(&paths.raw_dir, SecureFileMode::SecretDirectory).unwrap();
        ensure_dir(&paths.active_dir, SecureFileMode::SecretDirectory).unwrap();
        paths
    }

    fn state(nodes: &[&str], slots: &[(&str, u8)]) -> NodeState {
        NodeState {
            ip: "10.0.0.1".to_string(),
            token: "alice".to_string(),
            node_cache: nodes.iter().map(|n| n.to_string()).collect(),
            slots: slots.iter().map(|(n, s)| (n.to_string(), *s)).collect(),
            ..NodeState::default()
        }
    }

    async fn controller_with(node: &str, body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{}/device", node)))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[test]
    fn test_rewrite_with_rendezvous() {
        let out = rewrite_config(RAW, "0.0.0.0/5", Some("109.122.216.14"));
        assert!(out.contains("Endpoint = 127.0.0.1:51821\n"));
        assert!(out.contains("AllowedIPs = 0.0.0.0/5\n"));
        assert!(!out.contains("0.0.0.0/0"));
    }

    #[test]
    fn test_rewrite_without_rendezvous() {
        let out = rewrite_config(RAW, "0.0.0.0/5", None);
        assert!(out.contains("Endpoint = 127.0.0.1:51821\n"));
        assert!(out.starts_with("[Interface]\nAddress = 10.13.13.3\n"));
    }

    #[tokio::test]
    async fn test_sync_writes_raw_and_active() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let server = controller_with(
            "fra",
            serde_json::json!([
                {"id": 1, "config": "other", "ip": "10.13.13.2"},
                {"id": 2, "config": RAW, "ip": "10.13.13.3"}
            ]),
        )
        .await;
        let client = ControllerClient::from_state(&NodeState::default(), Some(&server.uri())).unwrap();

        let report = ConfigSync::new(&client, &paths, Some("109.122.216.14"))
            .run(&state(&["fra"], &[("fra", 2)]))
            .await
            .unwrap();
        assert_eq!(report.updated, vec!["fra"]);

        assert_eq!(std::fs::read_to_string(paths.raw_config("fra")).unwrap(), RAW);
        let active = std::fs::read_to_string(paths.active_config("fra")).unwrap();
        assert!(active.contains("AllowedIPs = 0.0.0.0/5, 8.0.0.0/7, 10.0.0.0/32, 10.0.0.2/31"));
        assert!(active.contains("Endpoint = 127.0.0.1:51821"));
    }

    #[tokio::test]
    async fn test_invalid_own_address_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let server = controller_with(
            "fra",
            serde_json::json!([{"id": 1, "config": RAW, "ip": "10.13.13.2"}]),
        )
        .await;
        let client = ControllerClient::from_state(&NodeState::default(), Some(&server.uri())).unwrap();

        let stale = b"[Interface]\n# previous sync\n";
        std::fs::write(paths.raw_config("fra"), stale).unwrap();

        let mut state = state(&["fra"], &[("fra", 1)]);
        state.ip = String::new();
        let err = ConfigSync::new(&client, &paths, None).run(&state).await.unwrap_err();

        assert!(matches!(err, FleetError::Validation(_)));
        assert_eq!(std::fs::read(paths.raw_config("fra")).unwrap(), stale);
        assert!(!paths.active_config("fra").exists());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_nodes_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let client = ControllerClient::from_state(&NodeState::default(), Some("http://127.0.0.1:1")).unwrap();

        let report = ConfigSync::new(&client, &paths, None)
            .run(&NodeState::default())
            .await
            .unwrap();
        assert_eq!(report, SyncReport::default());
    }

    #[tokio::test]
    async fn test_missing_slot_aborts() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let client = ControllerClient::from_state(&NodeState::default(), Some("http://127.0.0.1:1")).unwrap();

        let err = ConfigSync::new(&client, &paths, None)
            .run(&state(&["fra"], &[]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no slot selected for node: fra");
    }

    #[tokio::test]
    async fn test_slot_not_returned() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let server = controller_with(
            "fra",
            serde_json::json!([{"id": 1, "config": RAW, "ip": "10.13.13.2"}]),
        )
        .await;
        let client = ControllerClient::from_state(&NodeState::default(), Some(&server.uri())).unwrap();

        let err = ConfigSync::new(&client, &paths, None)
            .run(&state(&["fra"], &[("fra", 5)]))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "slot 5 can't be found for node: fra");
        assert!(!paths.raw_config("fra").exists());
    }

    #[tokio::test]
    async fn test_stale_config_kept_byte_identical() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let stale = b"[Interface]\nAddress = 10.13.13.9\n# previous sync\n";
        std::fs::write(paths.active_config("fra"), stale).unwrap();

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fra/device"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ams/device"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"id": 1, "config": RAW, "ip": "10.13.13.3"}
            ])))
            .mount(&server)
            .await;
        let client = ControllerClient::from_state(&NodeState::default(), Some(&server.uri())).unwrap();

        let report = ConfigSync::new(&client, &paths, None)
            .run(&state(&["fra", "ams"], &[("fra", 1), ("ams", 1)]))
            .await
            .unwrap();

        assert_eq!(report.stale, vec!["fra"]);
        assert_eq!(report.updated, vec!["ams"]);
        assert_eq!(std::fs::read(paths.active_config("fra")).unwrap(), stale);
        assert!(!paths.raw_config("fra").exists());
    }

    #[tokio::test]
    async fn test_upstream_failure_without_stale_file() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let client = ControllerClient::from_state(&NodeState::default(), Some("http://127.0.0.1:1")).unwrap();

        let err = ConfigSync::new(&client, &paths, None)
            .run(&state(&["fra"], &[("fra", 1)]))
            .await
            .unwrap_err();
        assert!(matches!(err, FleetError::UpstreamUnavailable(_)));
    }
}
