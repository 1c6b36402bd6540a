#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use autotune_api::config::{ServerConfig, StorageConfig};
use autotune_api::router::build_app_router;
use autotune_api::state::{AppState, Backends};
use autotune_cloud::{MemoryObjectStore, ScriptedBackend, StepOutcome, RUN_STEP};
use autotune_db::MemoryStore;
use autotune_events::RecordingTransport;
use autotune_nightscout::NightscoutClient;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use tower::ServiceExt;

pub const CALLBACK_KEY: &str = "test-callback-key";

/// Query string scoping job lookups to the site used by [`submit_body`].
pub const SITE: &str = "endpoint=https://ns.example.com";

pub const RECOMMENDATIONS: &str =
    include_str!("../../../core/tests/fixtures/oref0_v1_recommendations.log");

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        database_url: None,
        public_base_url: "https://autotune.example.com".to_string(),
        callback_key: CALLBACK_KEY.to_string(),
        storage: StorageConfig::Local {
            root: PathBuf::from("/nonexistent"),
        },
        local_work_root: PathBuf::from("/nonexistent"),
        autotune_command: "oref0-autotune".to_string(),
        autotune_tool_dir: "/usr/src/oref0".to_string(),
        basal_rounding: Default::default(),
    }
}

/// The application over in-memory doubles, with handles to the doubles.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<ScriptedBackend>,
    pub objects: Arc<MemoryObjectStore>,
    pub transport: Arc<RecordingTransport>,
}

impl TestApp {
    /// Script the run step of `job_name` as finished with `exit_code`.
    pub fn finish_run(&self, job_name: &str, exit_code: i32) {
        let end = Utc::now();
        self.backend.set_outcome(
            job_name,
            RUN_STEP,
            StepOutcome {
                exit_code: Some(exit_code),
                start_time: Some(end - Duration::minutes(3)),
                end_time: Some(end),
            },
        );
    }
}

/// Build the full application router with all middleware layers, the same
/// way `main.rs` does.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(ScriptedBackend::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let transport = Arc::new(RecordingTransport::new());

    let backends = Backends {
        ledger: store.clone(),
        settings: store.clone(),
        counters: store.clone(),
        objects: objects.clone(),
        execution: backend.clone(),
        transport: transport.clone(),
    };
    let nightscout = NightscoutClient::new().expect("reqwest client");
    let state = AppState::new(config.clone(), backends, nightscout);

    TestApp {
        router: build_app_router(state, &config),
        store,
        backend,
        objects,
        transport,
    }
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn raw_profile() -> serde_json::Value {
    serde_json::json!({
        "dia": 4,
        "timezone": "Europe/London",
        "units": "mg/dl",
        "carbratio": [{"time": "00:00", "value": 10}],
        "sens": [{"time": "00:00", "value": 45}],
        "basal": [
            {"time": "00:00", "value": 0.9},
            {"time": "06:00", "value": 1.1}
        ]
    })
}

pub fn submit_body() -> serde_json::Value {
    serde_json::json!({
        "endpoint": "https://ns.example.com",
        "profile": raw_profile(),
        "basal_increment": 0.05,
        "email": "user@example.com",
        "days": 7
    })
}
