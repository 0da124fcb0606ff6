//! Webhook notification sink: POSTs each `RunNotification` as JSON.

use async_trait::async_trait;

use fleetgrid_rollout::{Notifier, RunNotification};

use crate::client::JsonClient;

pub struct WebhookNotifier {
    client: JsonClient,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Self {
        Self {
            client: JsonClient::new(url),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, notification: &RunNotification) -> anyhow::Result<()> {
        self.client.post("", notification).await?;
        Ok(())
    }
}
