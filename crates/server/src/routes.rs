//! Read-only resource routes. Every handler is one registry operation executed through the
//! proxy; the proxy result body is returned as-is.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use opsgate_core::{OperationCall, OperationId};
use serde_json::Value;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;

pub const RESOURCE_PREFIX: &str = "/api/azure";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/aks/status", get(cluster_status))
        .route("/aks/nodepools", get(node_pools))
        .route("/pods/{namespace}", get(list_pods))
        .route("/pods/{namespace}/{pod}", get(pod_details))
        .route("/pods/{namespace}/{pod}/logs", get(pod_logs))
        .route("/deployments/{namespace}", get(deployments))
        .route("/services/{namespace}", get(services))
        .route("/resourcegroup/{name}", get(resource_group))
        .route("/resources/list", get(list_resources))
        .route("/appservice/{name}/status", get(web_app))
        .route("/functionapp/{name}/status", get(function_app))
        .route("/storage/{name}/info", get(storage_account))
        .route("/subscription/info", get(subscription))
        .route("/costs/summary", get(costs))
}

pub(crate) async fn read(
    state: &AppState,
    operation: OperationId,
    params: Vec<String>,
) -> Result<Json<Value>, ApiError> {
    let call = OperationCall::new(operation, params)?;
    let snapshot = state.executor.execute(&call).await.inspect_err(|error| {
        info!(
            event_name = "http.resource.failed",
            operation = %operation,
            reason_code = error.reason_code(),
            "resource read failed"
        );
    })?;
    Ok(Json(snapshot.data))
}

async fn cluster_status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::ClusterStatus, Vec::new()).await
}

async fn node_pools(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::NodePools, Vec::new()).await
}

async fn list_pods(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::ListPods, vec![namespace]).await
}

async fn pod_details(
    State(state): State<AppState>,
    Path((namespace, pod)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::PodDetails, vec![namespace, pod]).await
}

async fn pod_logs(
    State(state): State<AppState>,
    Path((namespace, pod)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::PodLogs, vec![namespace, pod]).await
}

async fn deployments(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::DeploymentStatus, vec![namespace]).await
}

async fn services(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::ServiceStatus, vec![namespace]).await
}

async fn resource_group(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::ResourceGroupInfo, vec![name]).await
}

async fn list_resources(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::ListResources, Vec::new()).await
}

async fn web_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::WebAppStatus, vec![name]).await
}

async fn function_app(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::FunctionAppStatus, vec![name]).await
}

async fn storage_account(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::StorageAccountInfo, vec![name]).await
}

async fn subscription(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::SubscriptionInfo, Vec::new()).await
}

async fn costs(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    read(&state, OperationId::CostSummary, Vec::new()).await
}
