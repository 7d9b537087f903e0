//! Relay directory
//!
//! The list of selectable egress relays comes from an external directory.
//! It is fetched on first use and cached for the life of the process.

use crate::error::{FleetError, Result};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::info;

/// Directory entry; only the hostname is used
#[derive(Debug, Clone, Deserialize)]
struct RelayEntry {
    hostname: String,
}

/// Cached relay directory client
#[derive(Debug)]
pub struct RelayDirectory {
    http: reqwest::Client,
    url: String,
    hostnames: OnceCell<Vec<String>>,
}

impl RelayDirectory {
    /// Directory served at `url`
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
            hostnames: OnceCell::new(),
        }
    }

    /// Relay hostnames, fetching the directory on first call.
    ///
    /// A failed fetch is not cached; the next call retries.
    pub async fn hostnames(&self) -> Result<Vec<String>> {
        let hostnames = self
            .hostnames
            .get_or_try_init(|| async {
                let relays: Vec<RelayEntry> = self
                    .http
                    .get(&self.url)
                    .send()
                    .await?
                    .error_for_status()?
                    .json()
                    .await
                    .map_err(|e| {
                        FleetError::UpstreamUnavailable(format!("relay directory: {}", e))
                    })?;

                info!("Fetched {} relays from {}", relays.len(), self.url);
                Ok::<_, FleetError>(relays.into_iter().map(|r| r.hostname).collect())
            })
            .await?;

        Ok(hostnames.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetches_once_and_caches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/www/relays/all/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"hostname": "se-got-wg-001", "country_code": "se", "active": true},
                {"hostname": "de-fra-wg-002", "country_code": "de", "active": false}
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let directory = RelayDirectory::new(
            reqwest::Client::new(),
            format!("{}/www/relays/all/", server.uri()),
        );

        let first = directory.hostnames().await.unwrap();
        let second = directory.hostnames().await.unwrap();
        assert_eq!(first, vec!["se-got-wg-001", "de-fra-wg-002"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!([{"hostname": "a"}])),
            )
            .mount(&server)
            .await;

        let directory = RelayDirectory::new(reqwest::Client::new(), server.uri());
        assert!(matches!(
            directory.hostnames().await,
            Err(FleetError::UpstreamUnavailable(_))
        ));
        assert_eq!(directory.hostnames().await.unwrap(), vec!["a"]);
    }
}
