//! Rendering for the tool-invocation side: listing descriptors, MCP tools and MCP call results.

use crate::dispatch::{InvocationResult, InvocationStatus, ResponseBody};
use crate::error::{OpenApiToolsError, Result};
use crate::synthesizer::{ArgType, Tool, ToolArgument};
use base64::Engine as _;
use rmcp::model::{CallToolResult, Content, JsonObject, ToolAnnotations};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;

/// One entry of a `listTools` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub arg_type: ArgType,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

impl ToolDescriptor {
    /// Descriptor named by the tool's name within its namespace.
    #[must_use]
    pub fn of(tool: &Tool) -> Self {
        Self::named(tool, tool.name.clone())
    }

    /// Descriptor named `namespace.tool`, for listings that span namespaces.
    #[must_use]
    pub fn qualified(tool: &Tool) -> Self {
        Self::named(tool, tool.qualified_name())
    }

    fn named(tool: &Tool, name: String) -> Self {
        Self {
            name,
            description: tool.description.clone(),
            parameters: tool
                .arguments
                .iter()
                .map(|a| ParameterDescriptor {
                    name: a.name.clone(),
                    arg_type: a.arg_type,
                    required: a.required,
                    default: a.default.clone(),
                    description: a.description.clone(),
                })
                .collect(),
        }
    }
}

/// JSON Schema for a tool's flat argument object.
///
/// Arguments with a default are never listed as required: the default fills them in.
#[must_use]
pub fn input_schema(tool: &Tool) -> JsonObject {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for arg in &tool.arguments {
        properties.insert(arg.name.clone(), argument_schema(arg));
        if arg.required && arg.default.is_none() {
            required.push(Value::String(arg.name.clone()));
        }
    }

    let mut schema = JsonObject::new();
    schema.insert("type".into(), json!("object"));
    schema.insert("properties".into(), Value::Object(properties));
    if !required.is_empty() {
        schema.insert("required".into(), Value::Array(required));
    }
    schema.insert("additionalProperties".into(), Value::Bool(false));
    schema
}

fn argument_schema(arg: &ToolArgument) -> Value {
    let mut prop = serde_json::Map::new();
    prop.insert("type".into(), json!(arg.arg_type.as_str()));
    if let Some(item) = arg.item_type {
        prop.insert("items".into(), json!({ "type": item.as_str() }));
    }
    if let Some(desc) = &arg.description {
        prop.insert("description".into(), json!(desc));
    }
    if let Some(default) = &arg.default {
        prop.insert("default".into(), default.clone());
    }
    if !arg.enum_values.is_empty() {
        prop.insert("enum".into(), Value::Array(arg.enum_values.clone()));
    }
    Value::Object(prop)
}

/// MCP tool definition, named `namespace.tool`.
#[must_use]
pub fn mcp_tool(tool: &Tool) -> rmcp::model::Tool {
    let mut out = rmcp::model::Tool::new(
        tool.qualified_name(),
        tool.description.clone(),
        Arc::new(input_schema(tool)),
    );
    out.annotations = Some(annotations_for_method(&tool.method));
    out
}

/// MCP annotations from HTTP method semantics. HTTP tools always touch an open world.
#[must_use]
pub fn annotations_for_method(method: &str) -> ToolAnnotations {
    let (read_only, destructive, idempotent) = match method.to_ascii_uppercase().as_str() {
        "GET" | "HEAD" | "OPTIONS" => (Some(true), Some(false), Some(true)),
        "POST" => (Some(false), Some(false), Some(false)),
        "PUT" | "DELETE" => (Some(false), Some(true), Some(true)),
        // PATCH may or may not be idempotent.
        "PATCH" => (Some(false), Some(true), None),
        _ => (None, None, None),
    };
    ToolAnnotations {
        title: None,
        read_only_hint: read_only,
        destructive_hint: destructive,
        idempotent_hint: idempotent,
        open_world_hint: Some(true),
    }
}

/// Render a dispatch outcome as an MCP call result.
///
/// Upstream HTTP errors are successful calls carrying their status; argument and transport
/// errors become `is_error` results with a structured `{kind, message, retryable}` payload.
#[must_use]
pub fn call_tool_result(outcome: Result<InvocationResult>) -> CallToolResult {
    match outcome {
        Ok(result) => success_result(&result),
        Err(e) => error_result(&e),
    }
}

fn success_result(result: &InvocationResult) -> CallToolResult {
    let content = match &result.body {
        ResponseBody::Binary {
            content_type: Some(ct),
            data,
        } if ct.starts_with("image/") => Content::image(
            base64::engine::general_purpose::STANDARD.encode(data),
            ct.clone(),
        ),
        ResponseBody::Json(v) => {
            Content::text(serde_json::to_string(v).unwrap_or_else(|_| v.to_string()))
        }
        ResponseBody::Text(t) => Content::text(t.clone()),
        body @ ResponseBody::Binary { .. } => Content::text(body.to_value().to_string()),
        ResponseBody::Empty => Content::text(String::new()),
    };

    let status = match result.status {
        InvocationStatus::Success => "success",
        InvocationStatus::HttpError => "http-error",
    };
    let structured = match &result.body {
        // Image bytes already travel in `content`.
        ResponseBody::Binary { .. } => json!({ "status": status, "httpStatus": result.http_status }),
        body => json!({
            "status": status,
            "httpStatus": result.http_status,
            "body": body.to_value(),
        }),
    };

    CallToolResult {
        content: vec![content],
        structured_content: Some(structured),
        is_error: Some(false),
        meta: None,
    }
}

fn error_result(e: &OpenApiToolsError) -> CallToolResult {
    let status = if e.is_retryable() {
        "transport-error"
    } else {
        "error"
    };
    CallToolResult {
        content: vec![Content::text(e.to_string())],
        structured_content: Some(json!({
            "status": status,
            "error": {
                "kind": e.kind(),
                "message": e.to_string(),
                "retryable": e.is_retryable(),
            }
        })),
        is_error: Some(true),
        meta: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthesizer::Binding;
    use reqwest::header::HeaderMap;
    use std::time::Duration;

    fn arg(name: &str, arg_type: ArgType, required: bool, default: Option<Value>) -> ToolArgument {
        ToolArgument {
            name: name.into(),
            arg_type,
            item_type: None,
            required,
            default,
            description: None,
            enum_values: Vec::new(),
            binding: Binding::Query(name.into()),
            query: None,
        }
    }

    fn weather_tool() -> Tool {
        let mut units = arg("units", ArgType::String, true, Some(json!("metric")));
        units.enum_values = vec![json!("metric"), json!("imperial")];
        let mut days = arg("days", ArgType::Array, false, None);
        days.item_type = Some(ArgType::Integer);
        Tool {
            namespace: "weather".into(),
            name: "current".into(),
            description: "Current weather".into(),
            arguments: vec![arg("q", ArgType::String, true, None), units, days],
            method: "get".into(),
            path: "/weather".into(),
            operation_id: Some("current".into()),
            body: None,
        }
    }

    fn result(body: ResponseBody, http_status: u16) -> InvocationResult {
        InvocationResult {
            status: if (200..300).contains(&http_status) {
                InvocationStatus::Success
            } else {
                InvocationStatus::HttpError
            },
            http_status,
            headers: HeaderMap::new(),
            body,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn descriptor_shape() {
        let v = serde_json::to_value(ToolDescriptor::of(&weather_tool())).unwrap();
        assert_eq!(v["name"], "current");
        assert_eq!(v["description"], "Current weather");
        assert_eq!(
            v["parameters"][1],
            json!({
                "name": "units",
                "type": "string",
                "required": true,
                "default": "metric",
                "description": null
            })
        );
        assert_eq!(
            ToolDescriptor::qualified(&weather_tool()).name,
            "weather.current"
        );
    }

    #[test]
    fn input_schema_omits_defaulted_arguments_from_required() {
        let schema = input_schema(&weather_tool());
        assert_eq!(schema["required"], json!(["q"]));
        assert_eq!(schema["properties"]["units"]["enum"], json!(["metric", "imperial"]));
        assert_eq!(
            schema["properties"]["days"],
            json!({"type": "array", "items": {"type": "integer"}})
        );

        let tool = mcp_tool(&weather_tool());
        assert_eq!(tool.name, "weather.current");
        assert_eq!(
            tool.annotations.and_then(|a| a.read_only_hint),
            Some(true)
        );
    }

    #[test]
    fn http_errors_are_successful_calls() {
        let r = call_tool_result(Ok(result(ResponseBody::Json(json!({"detail": "nope"})), 404)));
        assert_eq!(r.is_error, Some(false));
        let structured = r.structured_content.unwrap();
        assert_eq!(structured["status"], "http-error");
        assert_eq!(structured["httpStatus"], 404);
        assert_eq!(structured["body"], json!({"detail": "nope"}));
    }

    #[test]
    fn images_become_image_content() {
        let r = call_tool_result(Ok(result(
            ResponseBody::Binary {
                content_type: Some("image/png".into()),
                data: vec![1, 2, 3],
            },
            200,
        )));
        let image = serde_json::to_value(&r.content[0]).unwrap();
        assert_eq!(image["type"], "image");
        assert_eq!(image["mimeType"], "image/png");
        assert_eq!(image["data"], "AQID");
    }

    #[test]
    fn errors_carry_kind_and_retryability() {
        let r = call_tool_result(Err(OpenApiToolsError::MissingArgument {
            tool: "current".into(),
            argument: "q".into(),
        }));
        assert_eq!(r.is_error, Some(true));
        let s = r.structured_content.unwrap();
        assert_eq!(s["error"]["kind"], "missing_argument");
        assert_eq!(s["error"]["retryable"], false);

        let t = call_tool_result(Err(OpenApiToolsError::Transport("timed out".into())));
        assert_eq!(t.structured_content.unwrap()["status"], "transport-error");
    }
}
