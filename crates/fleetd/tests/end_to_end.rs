//! End-to-end runs through the REST API against fake registry, command
//! and webhook services over real HTTP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{Request, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use fleetgrid_core::FleetConfig;
use fleetgrid_remote::{HttpCommandApi, HttpFleetRegistry, WebhookNotifier};
use fleetgrid_rollout::Orchestrator;
use fleetgrid_state::StateStore;

// ── Fake fleet ─────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Fleet {
    sent: Arc<Mutex<Vec<Value>>>,
    hooks: Arc<Mutex<Vec<Value>>>,
    /// Commands containing the needle fail on the named target.
    fail: Arc<Mutex<Option<(String, String)>>>,
}

impl Fleet {
    fn fail_on(&self, needle: &str, target: &str) {
        *self.fail.lock().unwrap() = Some((needle.to_string(), target.to_string()));
    }

    fn sent_mentioning(&self, needle: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|body| body["commands"].to_string().contains(needle))
            .count()
    }

    fn hooks(&self) -> Vec<Value> {
        self.hooks.lock().unwrap().clone()
    }
}

async fn targets(Path(group): Path<String>) -> Result<Json<Value>, StatusCode> {
    match group.as_str() {
        "web" => Ok(Json(json!([
            {"id": "i-1", "state": "healthy"},
            {"id": "i-2", "state": "healthy"},
            {"id": "i-3", "state": "not_ready"}
        ]))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn send(State(fleet): State<Fleet>, Json(body): Json<Value>) -> Json<Value> {
    let mut sent = fleet.sent.lock().unwrap();
    sent.push(body);
    Json(json!({"id": format!("inv-{}", sent.len() - 1)}))
}

async fn status(State(fleet): State<Fleet>, Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let index: usize = id
        .strip_prefix("inv-")
        .and_then(|n| n.parse().ok())
        .ok_or(StatusCode::NOT_FOUND)?;
    let body = fleet
        .sent
        .lock()
        .unwrap()
        .get(index)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)?;
    let fail = fleet.fail.lock().unwrap().clone();

    let commands = body["commands"].to_string();
    let mut statuses = HashMap::new();
    for target in body["targets"].as_array().into_iter().flatten() {
        let target = target.as_str().unwrap_or_default().to_string();
        let failed = matches!(&fail, Some((needle, t)) if commands.contains(needle.as_str()) && *t == target);
        statuses.insert(target, if failed { "failed" } else { "succeeded" });
    }
    Ok(Json(json!({"statuses": statuses})))
}

async fn hook(State(fleet): State<Fleet>, Json(body): Json<Value>) -> StatusCode {
    fleet.hooks.lock().unwrap().push(body);
    StatusCode::NO_CONTENT
}

async fn serve_fleet(fleet: Fleet) -> String {
    let router = Router::new()
        .route("/groups/{group}/targets", get(targets))
        .route("/invocations", post(send))
        .route("/invocations/{id}", get(status))
        .route("/hooks", post(hook))
        .with_state(fleet);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

// ── Daemon under test ──────────────────────────────────────────

fn config(base: &str) -> FleetConfig {
    let toml = format!(
        r#"
[orchestrator]
on_conflict = "reject"

[registry]
url = "{base}"

[commands]
url = "{base}"
dispatch_backoff = "10ms"

[notify]
webhook = "{base}/hooks"

[groups.web]
deploy = ["install {{artifact_key}} --version {{version}}"]
backup = ["snapshot"]
restore = ["restore {{backup}}"]
settle = "0s"
deploy_poll = {{ interval = "10ms", max_attempts = 20 }}
backup_poll = {{ interval = "10ms", max_attempts = 20 }}
restore_poll = {{ interval = "10ms", max_attempts = 20 }}

[groups.web.probe]
type = "command"
commands = ["healthcheck"]
poll = {{ interval = "10ms", max_attempts = 20 }}
"#
    );
    FleetConfig::from_toml_str(&toml).unwrap()
}

async fn daemon(fleet: Fleet) -> Router {
    let base = serve_fleet(fleet).await;
    let config = config(&base);
    let store = StateStore::open_in_memory().unwrap();
    let orchestrator = Orchestrator::new(
        config,
        store.clone(),
        Arc::new(store.clone()),
        Arc::new(HttpFleetRegistry::new(&base)),
        Arc::new(HttpCommandApi::new(&base)),
        Arc::new(WebhookNotifier::new(&format!("{base}/hooks"))),
    );
    fleetgrid_api::build_router(Arc::new(orchestrator), store)
}

async fn call(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

async fn stage(router: &Router, bytes: &'static str) -> u64 {
    let (status, body) = call(
        router,
        Request::post("/api/v1/groups/web/artifacts")
            .body(Body::from(bytes))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["data"]["version"].as_u64().unwrap()
}

async fn trigger(router: &Router, version: u64) -> StatusCode {
    let request = json!({
        "version": version,
        "gate": {"status": "success", "run_ref": "build-7", "triggered_by": "ci"}
    });
    let (status, _) = call(
        router,
        Request::post("/api/v1/groups/web/deployments")
            .header("content-type", "application/json")
            .body(Body::from(request.to_string()))
            .unwrap(),
    )
    .await;
    status
}

/// Poll history until the newest run has a verdict.
async fn finished_run(router: &Router) -> Value {
    for _ in 0..500 {
        let (_, body) = call(
            router,
            Request::get("/api/v1/groups/web/deployments?limit=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let run = &body["data"][0];
        if !run["verdict"].is_null() {
            return run.clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run did not finish");
}

async fn webhooks(fleet: &Fleet, count: usize) -> Vec<Value> {
    for _ in 0..500 {
        let hooks = fleet.hooks();
        if hooks.len() >= count {
            return hooks;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} webhook(s), got {}", fleet.hooks().len());
}

// ── Scenarios ──────────────────────────────────────────────────

#[tokio::test]
async fn staged_artifact_ships_and_becomes_current() {
    let fleet = Fleet::default();
    let router = daemon(fleet.clone()).await;

    let version = stage(&router, "bundle-v1").await;
    assert_eq!(trigger(&router, version).await, StatusCode::ACCEPTED);

    let run = finished_run(&router).await;
    assert_eq!(run["verdict"], "success");
    assert_eq!(run["targets"], json!(["i-1", "i-2"]));
    assert_eq!(run["backups"].as_array().unwrap().len(), 2);

    // Each healthy target was snapshotted before the install went out.
    assert_eq!(fleet.sent_mentioning("snapshot"), 2);
    assert_eq!(fleet.sent_mentioning("install"), 1);
    assert_eq!(fleet.sent_mentioning("healthcheck"), 1);
    assert_eq!(fleet.sent_mentioning("restore"), 0);

    let resp = router
        .clone()
        .oneshot(
            Request::get("/api/v1/groups/web/artifacts/current")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()["x-fleetgrid-version"].to_str().unwrap(),
        version.to_string()
    );
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"bundle-v1");

    let (status, body) = call(
        &router,
        Request::get("/api/v1/targets/i-1/backups")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let hooks = webhooks(&fleet, 1).await;
    assert_eq!(hooks[0]["verdict"], "success");
    assert_eq!(hooks[0]["run_ref"], "build-7");
    assert_eq!(hooks[0]["target_count"], 2);
}

#[tokio::test]
async fn failed_install_rolls_back_and_keeps_previous_artifact() {
    let fleet = Fleet::default();
    fleet.fail_on("install", "i-2");
    let router = daemon(fleet.clone()).await;

    let version = stage(&router, "bundle-v2").await;
    assert_eq!(trigger(&router, version).await, StatusCode::ACCEPTED);

    let run = finished_run(&router).await;
    assert_eq!(run["verdict"], "rolled_back");
    assert_eq!(run["failure"]["kind"], "partial_fleet_failure");
    assert!(run["escalation"].is_null());

    // Both backed-up targets are restored, not only the one that failed.
    assert_eq!(fleet.sent_mentioning("restore"), 2);
    assert_eq!(fleet.sent_mentioning("healthcheck"), 0);

    let (status, _) = call(
        &router,
        Request::get("/api/v1/groups/web/artifacts/current")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let hooks = webhooks(&fleet, 1).await;
    assert_eq!(hooks[0]["verdict"], "rolled_back");
}

#[tokio::test]
async fn run_is_readable_by_id() {
    let fleet = Fleet::default();
    let router = daemon(fleet).await;

    let version = stage(&router, "bundle-v3").await;
    trigger(&router, version).await;
    let run = finished_run(&router).await;
    let id = run["id"].as_str().unwrap();

    let (status, body) = call(
        &router,
        Request::get(format!("/api/v1/groups/web/deployments/{id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["artifact_version"], version);

    let (_, active) = call(
        &router,
        Request::get("/api/v1/groups/web/active")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(active["data"]["active"], false);
}
