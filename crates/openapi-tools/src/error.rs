//! Error types for `mcp-openapi-tools`.

use thiserror::Error;

/// Main error type for the `OpenAPI` tool engine.
///
/// Build-time kinds (`SpecFetch`, `SchemaConflict`, `UnsupportedSchema`, `OpenApi`) are fatal for
/// the namespace being built. Invocation-time kinds (`MissingArgument`, `UnknownArgument`,
/// `InvalidArgumentType`, `Transport`) are returned to the caller as structured results.
#[derive(Error, Debug)]
pub enum OpenApiToolsError {
    /// Configuration errors (invalid config, missing fields, conflicts).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A document (root or referenced) could not be fetched, read, or parsed, or a `$ref`
    /// pointed at nothing.
    #[error("Spec fetch error: failed to load '{location}': {message}")]
    SpecFetch { location: String, message: String },

    /// `allOf` branches declare incompatible shapes for the same property.
    #[error("Schema conflict in {operation} at '{pointer}': {message}")]
    SchemaConflict {
        operation: String,
        pointer: String,
        message: String,
    },

    /// Schema construct the synthesizer cannot represent.
    #[error("Unsupported schema in {operation} at '{pointer}': {message}")]
    UnsupportedSchema {
        operation: String,
        pointer: String,
        message: String,
    },

    /// Structurally malformed `OpenAPI` document.
    #[error("OpenAPI error: {0}")]
    OpenApi(String),

    #[error("Missing required argument '{argument}' for tool '{tool}'")]
    MissingArgument { tool: String, argument: String },

    #[error("Unknown argument '{argument}' for tool '{tool}'")]
    UnknownArgument { tool: String, argument: String },

    #[error("Invalid argument '{argument}' for tool '{tool}': expected {expected}, {message}")]
    InvalidArgumentType {
        tool: String,
        argument: String,
        expected: String,
        message: String,
    },

    /// Connection failure or timeout talking to the upstream API.
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("Tool '{tool}' not found in namespace '{namespace}'")]
    ToolNotFound { namespace: String, tool: String },

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpenApiToolsError {
    /// Stable machine-readable kind, used in structured tool error results.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::SpecFetch { .. } => "spec_fetch",
            Self::SchemaConflict { .. } => "schema_conflict",
            Self::UnsupportedSchema { .. } => "unsupported_schema",
            Self::OpenApi(_) => "openapi",
            Self::MissingArgument { .. } => "missing_argument",
            Self::UnknownArgument { .. } => "unknown_argument",
            Self::InvalidArgumentType { .. } => "invalid_argument_type",
            Self::Transport(_) => "transport_error",
            Self::NamespaceNotFound(_) => "namespace_not_found",
            Self::ToolNotFound { .. } => "tool_not_found",
            Self::Json(_) => "json",
        }
    }

    /// Only transport failures are worth retrying; the engine itself never retries.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Attach the operation label (`GET /pets`) to schema errors raised without one.
    #[must_use]
    pub fn in_operation(self, label: &str) -> Self {
        match self {
            Self::SchemaConflict {
                operation,
                pointer,
                message,
            } if operation.is_empty() => Self::SchemaConflict {
                operation: label.to_string(),
                pointer,
                message,
            },
            Self::UnsupportedSchema {
                operation,
                pointer,
                message,
            } if operation.is_empty() => Self::UnsupportedSchema {
                operation: label.to_string(),
                pointer,
                message,
            },
            other => other,
        }
    }
}

/// Result type alias for `OpenAPI` tooling operations.
pub type Result<T> = std::result::Result<T, OpenApiToolsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(OpenApiToolsError::Transport("timed out".into()).is_retryable());
        assert!(
            !OpenApiToolsError::MissingArgument {
                tool: "t".into(),
                argument: "a".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn in_operation_fills_empty_label_only() {
        let e = OpenApiToolsError::UnsupportedSchema {
            operation: String::new(),
            pointer: "/x".into(),
            message: "m".into(),
        }
        .in_operation("GET /a");
        assert!(e.to_string().contains("GET /a"));

        let e = OpenApiToolsError::UnsupportedSchema {
            operation: "POST /b".into(),
            pointer: "/x".into(),
            message: "m".into(),
        }
        .in_operation("GET /a");
        assert!(e.to_string().contains("POST /b"));
        assert_eq!(e.kind(), "unsupported_schema");
    }
}
