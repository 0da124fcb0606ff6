//! Fleet registry client.
//!
//! `GET {url}/groups/{group}/targets` → `[{"id", "state", "address"?}]`.
//! An unknown group (404) has no members.

use std::time::Duration;

use async_trait::async_trait;

use fleetgrid_core::Target;
use fleetgrid_rollout::FleetRegistry;

use crate::client::JsonClient;

pub struct HttpFleetRegistry {
    client: JsonClient,
}

impl HttpFleetRegistry {
    pub fn new(url: &str) -> Self {
        Self {
            client: JsonClient::new(url),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = self.client.with_timeout(timeout);
        self
    }
}

#[async_trait]
impl FleetRegistry for HttpFleetRegistry {
    async fn list_healthy(&self, group: &str) -> anyhow::Result<Vec<Target>> {
        let targets: Option<Vec<Target>> = self
            .client
            .get_json(&format!("/groups/{}/targets", urlencoding::encode(group)))
            .await?;
        Ok(targets.unwrap_or_default())
    }
}
