//! Remote command service client.
//!
//! ```text
//! POST {url}/invocations                          {targets, commands, timeout_secs} → {id}
//! GET  {url}/invocations/{id}                     → {statuses: {target: status}}
//! GET  {url}/invocations/{id}/targets/{target}/output → {output}   (404: none kept)
//! ```

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use urlencoding::encode;

use fleetgrid_rollout::RemoteCommandApi;
use fleetgrid_state::{CommandStatus, InvocationId, TargetId};

use crate::client::JsonClient;

#[derive(Debug, Serialize, Deserialize)]
pub struct SendCommand {
    pub targets: Vec<TargetId>,
    pub commands: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Invocation {
    pub id: InvocationId,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct InvocationStatus {
    #[serde(default)]
    pub statuses: HashMap<TargetId, CommandStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommandOutput {
    pub output: String,
}

pub struct HttpCommandApi {
    client: JsonClient,
}

impl HttpCommandApi {
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
impl RemoteCommandApi for HttpCommandApi {
    async fn send(
        &self,
        targets: &[TargetId],
        commands: &[String],
        timeout: Duration,
    ) -> anyhow::Result<InvocationId> {
        let body = SendCommand {
            targets: targets.to_vec(),
            commands: commands.to_vec(),
            timeout_secs: timeout.as_secs().max(1),
        };
        let invocation: Invocation = self.client.post_json("/invocations", &body).await?;
        Ok(invocation.id)
    }

    async fn get_status(&self, invocation: &str) -> anyhow::Result<HashMap<TargetId, CommandStatus>> {
        let status: Option<InvocationStatus> = self
            .client
            .get_json(&format!("/invocations/{}", encode(invocation)))
            .await?;
        match status {
            Some(status) => Ok(status.statuses),
            None => anyhow::bail!("invocation {invocation} is unknown to the command service"),
        }
    }

    async fn get_output(&self, invocation: &str, target: &str) -> anyhow::Result<Option<String>> {
        let output: Option<CommandOutput> = self
            .client
            .get_json(&format!(
                "/invocations/{}/targets/{}/output",
                encode(invocation),
                encode(target)
            ))
            .await?;
        Ok(output.map(|o| o.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::serve;

    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};

    #[derive(Clone, Default)]
    struct Service {
        received: Arc<Mutex<Vec<SendCommand>>>,
    }

    async fn create(State(svc): State<Service>, Json(body): Json<SendCommand>) -> Json<Invocation> {
        svc.received.lock().unwrap().push(body);
        Json(Invocation {
            id: "inv-42".to_string(),
        })
    }

    async fn status(Path(id): Path<String>) -> Result<Json<InvocationStatus>, StatusCode> {
        if id != "inv-42" {
            return Err(StatusCode::NOT_FOUND);
        }
        let mut statuses = HashMap::new();
        statuses.insert("i-1".to_string(), CommandStatus::Succeeded);
        statuses.insert("i-2".to_string(), CommandStatus::InProgress);
        Ok(Json(InvocationStatus { statuses }))
    }

    async fn output(Path((_id, target)): Path<(String, String)>) -> Result<Json<CommandOutput>, StatusCode> {
        if target == "i-1" || target == "pool/i 1?x" {
            Ok(Json(CommandOutput {
                output: "FLEETGRID_NO_STATE".to_string(),
            }))
        } else {
            Err(StatusCode::NOT_FOUND)
        }
    }

    async fn api() -> (HttpCommandApi, Service) {
        let svc = Service::default();
        let router = Router::new()
            .route("/invocations", post(create))
            .route("/invocations/{id}", get(status))
            .route("/invocations/{id}/targets/{target}/output", get(output))
            .with_state(svc.clone());
        (HttpCommandApi::new(&serve(router).await), svc)
    }

    #[tokio::test]
    async fn send_posts_the_command_set() {
        let (api, svc) = api().await;
        let id = api
            .send(
                &["i-1".to_string(), "i-2".to_string()],
                &["systemctl restart app".to_string()],
                Duration::from_secs(300),
            )
            .await
            .unwrap();
        assert_eq!(id, "inv-42");

        let received = svc.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].targets, vec!["i-1", "i-2"]);
        assert_eq!(received[0].timeout_secs, 300);
    }

    #[tokio::test]
    async fn status_is_decoded() {
        let (api, _svc) = api().await;
        let statuses = api.get_status("inv-42").await.unwrap();
        assert_eq!(statuses["i-1"], CommandStatus::Succeeded);
        assert_eq!(statuses["i-2"], CommandStatus::InProgress);

        assert!(api.get_status("inv-0").await.is_err());
    }

    #[tokio::test]
    async fn output_is_optional() {
        let (api, _svc) = api().await;
        assert_eq!(
            api.get_output("inv-42", "i-1").await.unwrap().as_deref(),
            Some("FLEETGRID_NO_STATE")
        );
        assert_eq!(api.get_output("inv-42", "i-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn reserved_characters_stay_inside_their_segment() {
        let (api, _svc) = api().await;
        assert_eq!(
            api.get_output("inv-42", "pool/i 1?x").await.unwrap().as_deref(),
            Some("FLEETGRID_NO_STATE")
        );
    }
}
