use super::{ApiResult, ErrorResponse};
use crate::config::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use weft_core::graph::WorkflowGraph;
use weft_core::types::{Edge, Node, NodeId, RunOutcome};

/// Read the current graph
pub async fn get_graph(State(state): State<Arc<AppState>>) -> Json<WorkflowGraph> {
    Json(state.graph.read().await.clone())
}

/// Replace the whole graph (import from the interchange format)
pub async fn put_graph(
    State(state): State<Arc<AppState>>,
    Json(graph): Json<WorkflowGraph>,
) -> ApiResult<Json<WorkflowGraph>> {
    graph.validate()?;
    *state.graph.write().await = graph.clone();
    Ok(Json(graph))
}

/// Add a node
pub async fn create_node(
    State(state): State<Arc<AppState>>,
    Json(node): Json<Node>,
) -> ApiResult<Json<Node>> {
    state.graph.write().await.add_node(node.clone())?;
    Ok(Json(node))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateNodeRequest {
    pub label: Option<String>,
    pub config: Option<Map<String, Value>>,
}

/// Update a node's label and/or merge keys into its config
pub async fn update_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    Json(req): Json<UpdateNodeRequest>,
) -> ApiResult<Json<Node>> {
    let id = NodeId::new(node_id);
    let mut graph = state.graph.write().await;
    graph.update_node(&id, req.label, req.config)?;
    let node = graph
        .node(&id)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("node {id} not found"))?;
    Ok(Json(node))
}

/// Delete a node and every edge referencing it
pub async fn delete_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = NodeId::new(node_id);
    state.graph.write().await.remove_node(&id)?;
    Ok(Json(serde_json::json!({"deleted": id})))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEdgeRequest {
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

/// Connect two nodes
pub async fn create_edge(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateEdgeRequest>,
) -> ApiResult<Json<Edge>> {
    let edge = match req.id {
        Some(id) => Edge::new(id, req.source, req.target),
        None => Edge::between(req.source, req.target),
    };
    state.graph.write().await.add_edge(edge.clone())?;
    Ok(Json(edge))
}

/// Delete an edge
pub async fn delete_edge(
    State(state): State<Arc<AppState>>,
    Path(edge_id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.graph.write().await.remove_edge(&edge_id)?;
    Ok(Json(serde_json::json!({"deleted": edge_id})))
}

/// Execute the current graph and return the settled outcome.
///
/// The run works on a snapshot, so graph edits made while it is in flight do
/// not affect it. Only one run may be active at a time.
pub async fn execute(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    if state.executor.is_running() {
        return Ok((
            StatusCode::CONFLICT,
            Json(ErrorResponse::new("an execution is already running")),
        )
            .into_response());
    }

    let snapshot = state.graph.read().await.clone();
    let outcome = state.executor.run(&snapshot).await;

    *state.last_outcome.write().await = Some(outcome.clone());
    Ok(Json(outcome).into_response())
}

/// Read the most recent run outcome
pub async fn latest_outcome(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<RunOutcome>> {
    let outcome = state
        .last_outcome
        .read()
        .await
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no execution has completed yet"))?;
    Ok(Json(outcome))
}

/// Clear the stored run outcome
pub async fn clear_outcome(State(state): State<Arc<AppState>>) -> Json<Value> {
    *state.last_outcome.write().await = None;
    Json(serde_json::json!({"cleared": true}))
}

/// Cancel the active run, if any
pub async fn cancel(State(state): State<Arc<AppState>>) -> Json<Value> {
    let cancelled = state.executor.cancel();
    Json(serde_json::json!({"cancelled": cancelled}))
}
