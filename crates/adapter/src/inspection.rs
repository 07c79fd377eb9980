//! Operator-facing inspection endpoint.
//!
//! - `GET /health`: liveness plus registry generation and build failures
//! - `GET /tools`: every tool, named `namespace.tool`
//! - `GET /tools/{namespace}`: one namespace (404 if unknown)

use crate::error::Result;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use mcp_openapi_tools::protocol::ToolDescriptor;
use mcp_openapi_tools::registry::NamespaceRegistry;
use serde_json::{Value, json};
use std::sync::Arc;

pub fn router(registry: Arc<NamespaceRegistry>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/tools", get(list_all))
        .route("/tools/{namespace}", get(list_namespace))
        .with_state(registry)
}

async fn health(State(registry): State<Arc<NamespaceRegistry>>) -> Json<Value> {
    let snapshot = registry.snapshot();
    Json(json!({
        "status": "ok",
        "generation": snapshot.generation,
        "namespaces": snapshot.namespaces.keys().collect::<Vec<_>>(),
        "tools": snapshot.tool_count(),
        "failures": snapshot.failures,
    }))
}

async fn list_all(State(registry): State<Arc<NamespaceRegistry>>) -> Result<Json<Vec<ToolDescriptor>>> {
    Ok(Json(registry.list_tools(None)?))
}

async fn list_namespace(
    State(registry): State<Arc<NamespaceRegistry>>,
    Path(namespace): Path<String>,
) -> Result<Json<Vec<ToolDescriptor>>> {
    Ok(Json(registry.list_tools(Some(&namespace))?))
}
