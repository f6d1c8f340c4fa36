use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use opsgate_agent::{AgentRuntime, ChatMessage, LlmClient, LlmError};
use opsgate_cloud::memory::{pod, InMemoryCluster, InMemoryConnector, InMemoryControlPlane};
use opsgate_cloud::{ProxySettings, ResourceProxy};
use opsgate_core::config::AppConfig;
use opsgate_core::{OperationExecutor, UpstreamError};
use opsgate_server::{app, AppState, SessionStore};
use serde_json::{json, Value};
use tower::ServiceExt;

const TOKEN: &str = "gateway-test-token";
const SUBSCRIPTION_ID: &str = "7c1e4b2a-9f3d-4e51-8a6b-0d2c3e4f5a6b";

#[derive(Clone, Default)]
struct CountingLlm {
    calls: Arc<Mutex<usize>>,
}

#[async_trait]
impl LlmClient for CountingLlm {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
        let mut calls = self.calls.lock().expect("calls");
        *calls += 1;
        Ok(format!("answer {calls}"))
    }
}

fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.azure.subscription_id = SUBSCRIPTION_ID.to_string().into();
    config.server.bearer_token = TOKEN.to_string().into();
    config
}

fn gateway(control_plane: InMemoryControlPlane, cluster: InMemoryCluster) -> Router {
    gateway_with(control_plane, InMemoryConnector::new(cluster))
}

fn gateway_with(control_plane: InMemoryControlPlane, connector: InMemoryConnector) -> Router {
    let config = config();
    let proxy = ResourceProxy::new(
        Arc::new(control_plane),
        Arc::new(connector),
        ProxySettings::from_config(&config.azure),
    );
    let executor: Arc<dyn OperationExecutor> = Arc::new(proxy);
    let llm = Arc::new(CountingLlm::default());
    let runtime = AgentRuntime::from_config(&config, executor.clone(), llm);
    let state = AppState::new(
        executor,
        Arc::new(runtime),
        SessionStore::new(Duration::from_secs(60), 16),
        &config.server.bearer_token,
    );
    app(state)
}

fn demo_gateway() -> Router {
    let config = config();
    gateway(InMemoryControlPlane::demo(&config), InMemoryCluster::demo(&config, Utc::now()))
}

fn get(path: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(Method::GET).uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).expect("request")
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, body)
}

#[tokio::test]
async fn health_is_public() {
    let (status, body) = send(&demo_gateway(), get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn resource_routes_require_the_bearer_token() {
    let router = demo_gateway();

    for token in [None, Some("wrong-token")] {
        let (status, body) = send(&router, get("/api/azure/aks/status", token)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({ "error": "Unauthorized" }));
    }
}

#[tokio::test]
async fn chat_requires_the_bearer_token() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/agent/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "message": "aks status" }).to_string()))
        .expect("request");

    let (status, _) = send(&demo_gateway(), request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cluster_status_returns_normalized_record() {
    let (status, body) = send(&demo_gateway(), get("/api/azure/aks/status", Some(TOKEN))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "hsps-aks-cluster");
    assert!(body["agentPoolProfiles"].is_array());
}

#[tokio::test]
async fn log_route_returns_the_last_fifty_lines() {
    let log: String = (1..=120).map(|n| format!("line {n}\n")).collect();
    let cluster = InMemoryCluster::new()
        .with_pod(pod("hsps", "my-pod", "Running", Utc::now(), 0))
        .with_log("hsps", "my-pod", &log);
    let router = gateway(InMemoryControlPlane::new(), cluster);

    let (status, body) = send(&router, get("/api/azure/pods/hsps/my-pod/logs", Some(TOKEN))).await;

    assert_eq!(status, StatusCode::OK);
    let lines = body["logs"].as_array().expect("logs");
    assert_eq!(lines.len(), 50);
    assert_eq!(lines[0], "line 71");
    assert_eq!(lines[49], "line 120");
    assert_eq!(body["podName"], "my-pod");
}

#[tokio::test]
async fn credential_failure_is_a_normalized_error_on_every_cluster_route() {
    let config = config();
    let control_plane = InMemoryControlPlane::demo(&config)
        .with_credentials(Err(UpstreamError::Auth("identity rejected".to_string())));
    let router = gateway(control_plane, InMemoryCluster::demo(&config, Utc::now()));

    for path in [
        "/api/azure/pods/hsps",
        "/api/azure/deployments/hsps",
        "/api/azure/services/hsps",
        "/api/azure/pods/hsps/portal-7f9c4/logs",
    ] {
        let (status, body) = send(&router, get(path, Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY, "{path}");
        let message = body["error"].as_str().expect("error message");
        assert!(message.contains("could not obtain cluster credential"), "{path}: {message}");
        assert!(!message.contains(TOKEN));
    }
}

#[tokio::test]
async fn encoded_traversal_in_path_parameters_is_rejected_before_any_read() {
    let config = config();
    let control_plane = InMemoryControlPlane::demo(&config);
    let connector = InMemoryConnector::new(InMemoryCluster::demo(&config, Utc::now()));
    let router = gateway_with(control_plane.clone(), connector.clone());

    for path in [
        "/api/azure/pods/hsps/..%2Fsecrets%2Fdb-password%3F/logs",
        "/api/azure/pods/hsps/..%2F..%2Fsecrets",
        "/api/azure/pods/..%2Fkube-system",
        "/api/azure/deployments/hsps%3Fwatch=true",
        "/api/azure/storage/..%2F..%2Fproviders%2FMicrosoft.KeyVault%2Fvaults%2Fops/info",
        "/api/azure/appservice/portal%3Fapi-version=1/status",
        "/api/azure/resourcegroup/other-rg%2Fproviders",
    ] {
        let (status, body) = send(&router, get(path, Some(TOKEN))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{path}");
        let message = body["error"].as_str().expect("error message");
        assert!(message.contains("invalid operation parameters"), "{path}: {message}");
    }

    assert!(control_plane.reads().is_empty());
    assert_eq!(connector.connections(), 0);
}

#[tokio::test]
async fn missing_resource_maps_to_not_found() {
    let (status, body) =
        send(&demo_gateway(), get("/api/azure/storage/nosuchaccount/info", Some(TOKEN))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn subscription_route_masks_the_identifier() {
    let router = demo_gateway();
    let response = router
        .clone()
        .oneshot(get("/api/azure/subscription/info", Some(TOKEN)))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.expect("body");
    let raw = String::from_utf8(bytes.to_vec()).expect("utf8");
    assert!(raw.contains("7c1e4"));
    assert!(!raw.contains(SUBSCRIPTION_ID));
}

#[tokio::test]
async fn costs_route_is_simulated() {
    let (status, body) = send(&demo_gateway(), get("/api/azure/costs/summary", Some(TOKEN))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["totalCost"], "$127.45");
    assert!(body["note"].as_str().expect("note").contains("simulated"));
}

#[tokio::test]
async fn chat_session_refuses_then_resets() {
    let router = demo_gateway();

    let request = post_json("/api/agent/chat", json!({ "message": "aks cluster status" }));
    let (status, first) = send(&router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["outcome"]["kind"], "answered");
    assert_eq!(first["outcome"]["operation"], "cluster_status");
    let session_id = first["session_id"].as_str().expect("session id").to_string();

    let message = "please delete the deployment in hsps";
    for expected in ["refused", "refused", "reset"] {
        let request =
            post_json("/api/agent/chat", json!({ "session_id": session_id, "message": message }));
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"]["kind"], expected);
        assert!(body.get("violation_count").is_none());
    }
}

#[tokio::test]
async fn explicit_reset_requires_a_known_session() {
    let router = demo_gateway();

    let request = post_json("/api/agent/chat/unknown-session/reset", json!({}));
    let (status, _) = send(&router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = post_json("/api/agent/chat", json!({ "message": "hello" }));
    let (_, body) = send(&router, request).await;
    let session_id = body["session_id"].as_str().expect("session id");
    let (status, body) =
        send(&router, post_json(&format!("/api/agent/chat/{session_id}/reset"), json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reset"], true);
}

#[tokio::test]
async fn empty_chat_message_is_rejected() {
    let (status, body) =
        send(&demo_gateway(), post_json("/api/agent/chat", json!({ "message": "   " }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "message must not be empty");
}
