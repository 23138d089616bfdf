//! End-to-end tests of the HTTP API against a running engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use http::{Method, Request, StatusCode};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use axe_swarm::api::{SharedState, router};
use axe_swarm::api_client::types::SwarmState;
use axe_swarm::config::SwarmConfig;
use axe_swarm::device_api::{DeviceAction, DeviceApi, ProbeError};
use axe_swarm::scheduler::Scheduler;
use axe_swarm::store::MemoryStore;

/// Devices on a pretend LAN, keyed by address.
#[derive(Default)]
struct Lan {
    info: Mutex<HashMap<String, Result<Value, ProbeError>>>,
    hosts: Mutex<HashMap<String, String>>,
}

impl Lan {
    fn miner(&self, address: &str, hostname: &str, hash_rate: f64) {
        self.info.lock().insert(
            address.to_string(),
            Ok(json!({
                "hostname": hostname,
                "ASICModel": "BM1370",
                "hashRate": hash_rate,
                "power": 17.5,
                "boardVersion": "601",
            })),
        );
    }
}

#[async_trait]
impl DeviceApi for Lan {
    async fn system_info(&self, address: &str) -> Result<Value, ProbeError> {
        self.info
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| Err(ProbeError::Unreachable("no route to host".into())))
    }

    async fn asic_info(&self, _address: &str) -> Result<Value, ProbeError> {
        Ok(json!({"asicCount": 1}))
    }

    async fn post_action(&self, address: &str, action: DeviceAction) -> Result<String, ProbeError> {
        if self.info.lock().contains_key(address) {
            Ok(format!("{action} accepted"))
        } else {
            Err(ProbeError::Unreachable("no route to host".into()))
        }
    }

    async fn resolve(&self, host: &str) -> Result<String, ProbeError> {
        self.hosts
            .lock()
            .get(host)
            .cloned()
            .ok_or_else(|| ProbeError::Unreachable(format!("unknown host {host}")))
    }
}

struct Harness {
    app: Router,
    running: CancellationToken,
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.running.cancel();
    }
}

fn start(lan: Arc<Lan>, seed: Option<&str>) -> Harness {
    let config = SwarmConfig {
        seed: seed.map(str::to_string),
        ..SwarmConfig::default()
    };
    let scheduler = Scheduler::new(lan.clone(), Arc::new(MemoryStore::new()), &config);
    let (swarm_cmd_tx, swarm_cmd_rx) = mpsc::channel(16);
    let state = SharedState {
        swarm_cmd_tx,
        swarm_rx: scheduler.subscribe(),
        device_api: lan,
    };

    let running = CancellationToken::new();
    tokio::spawn(scheduler.run(swarm_cmd_rx, running.clone()));

    Harness {
        app: router(state),
        running,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string())),
        None => request.body(Body::empty()),
    }
    .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, value)
}

async fn add(app: &Router, address: &str) -> (StatusCode, Value) {
    call(
        app,
        Method::POST,
        "/api/v0/swarm/devices",
        Some(json!({"address": address})),
    )
    .await
}

#[tokio::test]
async fn health_check() {
    let harness = start(Arc::new(Lan::default()), None);
    let (status, body) = call(&harness.app, Method::GET, "/api/v0/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("OK"));
}

#[tokio::test]
async fn openapi_document_is_served() {
    let harness = start(Arc::new(Lan::default()), None);
    let (status, body) = call(&harness.app, Method::GET, "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v0/swarm/devices"].is_object());
}

#[tokio::test]
async fn manual_add_status_codes() {
    let lan = Arc::new(Lan::default());
    lan.miner("10.1.1.50", "gamma-1", 1000.0);
    lan.info
        .lock()
        .insert("10.1.1.60".into(), Err(ProbeError::Status(401)));
    let harness = start(lan, None);
    let app = &harness.app;

    let (status, device) = add(app, "10.1.1.50").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(device["connectionAddress"], "10.1.1.50");
    assert_eq!(device["deviceModel"], "Gamma");

    let (status, body) = add(app, "10.1.1.50").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("10.1.1.50"));

    assert_eq!(add(app, "not an address").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(add(app, "10.1.1.60").await.0, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(add(app, "10.1.1.99").await.0, StatusCode::BAD_GATEWAY);

    let (_, swarm) = call(app, Method::GET, "/api/v0/swarm", None).await;
    assert_eq!(swarm["devices"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn swarm_filter_and_totals() {
    let lan = Arc::new(Lan::default());
    lan.miner("10.1.1.50", "garage", 1000.0);
    lan.miner("10.1.1.51", "office", 500.0);
    let harness = start(lan, None);
    let app = &harness.app;
    add(app, "10.1.1.50").await;
    add(app, "10.1.1.51").await;

    let (status, body) = call(app, Method::GET, "/api/v0/swarm?filter=GARAGE", None).await;
    assert_eq!(status, StatusCode::OK);
    let swarm: SwarmState = serde_json::from_value(body).unwrap();
    assert_eq!(swarm.devices.len(), 1);
    assert_eq!(swarm.devices[0].device.address, "10.1.1.50");
    // Totals always cover the whole fleet.
    assert_eq!(swarm.totals.hash_rate, 1500.0);

    let (_, totals) = call(app, Method::GET, "/api/v0/swarm/totals", None).await;
    assert_eq!(totals["deviceCount"], 2);
    assert_eq!(totals["power"], 35.0);

    let (_, families) = call(app, Method::GET, "/api/v0/swarm/families", None).await;
    assert_eq!(families.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn remove_device() {
    let lan = Arc::new(Lan::default());
    lan.miner("10.1.1.50", "gamma-1", 1000.0);
    let harness = start(lan, None);
    let app = &harness.app;
    add(app, "10.1.1.50").await;

    let (status, _) = call(app, Method::DELETE, "/api/v0/swarm/devices/10.1.1.77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, device) = call(app, Method::DELETE, "/api/v0/swarm/devices/10.1.1.50", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["address"], "10.1.1.50");

    let (_, swarm) = call(app, Method::GET, "/api/v0/swarm", None).await;
    assert!(swarm["devices"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn device_actions() {
    let lan = Arc::new(Lan::default());
    lan.miner("10.1.1.50", "gamma-1", 1000.0);
    let harness = start(lan, None);
    let app = &harness.app;
    add(app, "10.1.1.50").await;

    let (status, outcome) = call(
        app,
        Method::POST,
        "/api/v0/swarm/devices/10.1.1.50/restart",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(outcome, json!({"status": "ok", "message": "restart accepted"}));

    let (status, _) = call(app, Method::POST, "/api/v0/swarm/devices/10.1.1.50/reboot", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(app, Method::POST, "/api/v0/swarm/devices/10.1.1.9/identify", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn settings_patch() {
    let harness = start(Arc::new(Lan::default()), None);
    let (status, body) = call(
        &harness.app,
        Method::PATCH,
        "/api/v0/swarm/settings",
        Some(json!({"refreshInterval": 45, "sort": "hashRate", "view": "list"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refreshInterval"], 45);
    assert_eq!(body["countdown"], 45);
    assert_eq!(body["sort"], json!({"field": "hashRate", "direction": "asc"}));
    assert_eq!(body["view"], "list");

    let (status, _) = call(
        &harness.app,
        Method::PATCH,
        "/api/v0/swarm/settings",
        Some(json!({"refreshInterval": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scan_requires_seed() {
    let harness = start(Arc::new(Lan::default()), None);
    let (status, _) = call(&harness.app, Method::POST, "/api/v0/swarm/scan", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn scan_and_refresh_are_accepted() {
    let lan = Arc::new(Lan::default());
    lan.info.lock().insert(
        "10.1.1.1".into(),
        Ok(json!({"currentIP": "10.1.1.1", "netmask": "255.255.255.0"})),
    );
    lan.miner("10.1.1.50", "gamma-1", 1000.0);
    let harness = start(lan, Some("10.1.1.1"));
    let app = &harness.app;

    // The startup scan may still be running, in which case this is a no-op.
    let (status, body) = call(app, Method::POST, "/api/v0/swarm/scan", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(body["started"].is_boolean());

    // Wait for discovery to land.
    let mut devices = 0;
    for _ in 0..100 {
        let (_, swarm) = call(app, Method::GET, "/api/v0/swarm", None).await;
        devices = swarm["devices"].as_array().unwrap().len();
        if devices == 1 && swarm["scanning"] == false {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(devices, 1);

    let (status, body) = call(app, Method::POST, "/api/v0/swarm/refresh", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["started"], true);
}
