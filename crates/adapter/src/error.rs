//! Error types for the adapter binary and its HTTP surface.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mcp_openapi_tools::error::OpenApiToolsError;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    /// Invalid command-line or configuration input.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server failed to start (bind, initial build).
    #[error("Startup error: {0}")]
    Startup(String),

    #[error(transparent)]
    Engine(#[from] OpenApiToolsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Engine(
                OpenApiToolsError::NamespaceNotFound(_) | OpenApiToolsError::ToolNotFound { .. },
            ) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AdapterError>;
