//! Operation -> flat, strictly typed tool arguments.

use crate::error::{OpenApiToolsError, Result};
use crate::operation::{
    MediaTypeBody, Operation, OperationParameter, ParameterLocation, QuerySerialization,
    RequestBody,
};
use crate::schema::{PrimitiveType, SchemaGraph, SchemaId, SchemaKind};
use crate::selector::{reserve_unique_name, sanitize_tool_name, synthesized_operation_name};
use crate::document::escape_pointer_token;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

/// Upper bound for an argument description once enum options are appended.
pub const MAX_ENUM_DESCRIPTION_LENGTH: usize = 100;

/// Closed set of argument types exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ArgType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl From<PrimitiveType> for ArgType {
    fn from(p: PrimitiveType) -> Self {
        match p {
            PrimitiveType::String => Self::String,
            PrimitiveType::Integer => Self::Integer,
            PrimitiveType::Number => Self::Number,
            PrimitiveType::Boolean => Self::Boolean,
        }
    }
}

/// Where an argument's value goes in the outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Binding {
    Path(String),
    Query(String),
    Header(String),
    /// JSON pointer into the assembled body object.
    BodyField(String),
    /// The whole body is this one argument.
    BodyRaw,
}

impl std::fmt::Display for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Path(n) => write!(f, "path:{n}"),
            Self::Query(n) => write!(f, "query:{n}"),
            Self::Header(n) => write!(f, "header:{n}"),
            Self::BodyField(p) => write!(f, "body-field:{p}"),
            Self::BodyRaw => write!(f, "body-raw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Json,
    FormUrlEncoded,
    /// Caller supplies the body (or a payload reference) verbatim.
    Raw,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBody {
    pub media_type: String,
    pub encoding: BodyEncoding,
}

#[derive(Debug, Clone)]
pub struct ToolArgument {
    pub name: String,
    pub arg_type: ArgType,
    /// Element type for `array` arguments.
    pub item_type: Option<ArgType>,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
    pub enum_values: Vec<Value>,
    pub binding: Binding,
    pub query: Option<QuerySerialization>,
}

#[derive(Debug, Clone)]
pub struct Tool {
    pub namespace: String,
    pub name: String,
    pub description: String,
    pub arguments: Vec<ToolArgument>,
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub body: Option<ToolBody>,
}

impl Tool {
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }

    #[must_use]
    pub fn argument(&self, name: &str) -> Option<&ToolArgument> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// Base tool name for an operation: sanitized `operationId`, else `{method}_{segments}`.
#[must_use]
pub fn base_tool_name(op: &Operation) -> String {
    match op.operation_id.as_deref() {
        Some(id) if !id.trim().is_empty() => sanitize_tool_name(id),
        _ => synthesized_operation_name(&op.method, &op.path),
    }
}

/// Turn one resolved operation into a tool.
///
/// `hidden_query` lists query parameter names that are filled from caller context and must not
/// be exposed as arguments.
///
/// # Errors
///
/// Returns `UnsupportedSchema` for required cookie parameters.
pub fn synthesize(
    namespace: &str,
    op: &Operation,
    graph: &SchemaGraph,
    hidden_query: &HashSet<&str>,
) -> Result<Tool> {
    let label = op.label();
    let mut names = ArgumentNames::default();
    let mut arguments = Vec::new();

    for placeholder in op.path_placeholders() {
        let declared = op
            .parameters
            .iter()
            .find(|p| p.location == ParameterLocation::Path && p.name == placeholder);
        let name = names.claim(&placeholder, "path");
        let binding = Binding::Path(placeholder.clone());
        arguments.push(match declared {
            Some(param) => argument_from_parameter(graph, param, name, binding),
            None => {
                tracing::debug!(operation = %label, placeholder = %placeholder, "Undeclared path placeholder");
                plain_argument(name, ArgType::String, true, binding)
            }
        });
    }

    for param in op
        .parameters
        .iter()
        .filter(|p| p.location == ParameterLocation::Query)
    {
        if hidden_query.contains(param.name.as_str()) {
            continue;
        }
        let name = names.claim(&param.name, "query");
        arguments.push(argument_from_parameter(
            graph,
            param,
            name,
            Binding::Query(param.name.clone()),
        ));
    }

    for param in op
        .parameters
        .iter()
        .filter(|p| p.location == ParameterLocation::Header)
    {
        let name = names.claim(&param.name, "header");
        arguments.push(argument_from_parameter(
            graph,
            param,
            name,
            Binding::Header(param.name.clone()),
        ));
    }

    for param in op
        .parameters
        .iter()
        .filter(|p| p.location == ParameterLocation::Cookie)
    {
        if param.required {
            return Err(OpenApiToolsError::UnsupportedSchema {
                operation: label,
                pointer: format!("cookie:{}", param.name),
                message: "required cookie parameters cannot be supplied".to_string(),
            });
        }
        tracing::debug!(operation = %label, cookie = %param.name, "Skipping optional cookie parameter");
    }

    let body = match &op.request_body {
        Some(body) => body_arguments(graph, body, &mut names, &mut arguments),
        None => None,
    };

    Ok(Tool {
        namespace: namespace.to_string(),
        name: base_tool_name(op),
        description: tool_description(op),
        arguments,
        method: op.method.clone(),
        path: op.path.clone(),
        operation_id: op.operation_id.clone(),
        body,
    })
}

fn tool_description(op: &Operation) -> String {
    match (op.summary.as_deref(), op.description.as_deref()) {
        (Some(s), Some(d)) if s.trim() != d.trim() => format!("{}\n\n{}", s.trim(), d.trim()),
        (Some(s), _) => s.trim().to_string(),
        (None, Some(d)) => d.trim().to_string(),
        (None, None) => op.label(),
    }
}

#[derive(Default)]
struct ArgumentNames {
    taken: HashSet<String>,
}

impl ArgumentNames {
    /// Earlier claims win; a later clash gets `_{source}`, then a numeric suffix.
    fn claim(&mut self, wanted: &str, source: &str) -> String {
        if self.taken.insert(wanted.to_string()) {
            return wanted.to_string();
        }
        reserve_unique_name(&mut self.taken, &format!("{wanted}_{source}"))
    }
}

fn plain_argument(name: String, arg_type: ArgType, required: bool, binding: Binding) -> ToolArgument {
    ToolArgument {
        name,
        arg_type,
        item_type: None,
        required,
        default: None,
        description: None,
        enum_values: Vec::new(),
        binding,
        query: None,
    }
}

fn argument_from_parameter(
    graph: &SchemaGraph,
    param: &OperationParameter,
    name: String,
    binding: Binding,
) -> ToolArgument {
    let mut arg = argument_from_schema(graph, param.schema, name, param.required, binding);
    if let Some(desc) = &param.description {
        arg.description = Some(match arg.description.take() {
            // Schema notes (alternatives, options) go after the parameter's own text.
            Some(extra) if !extra.is_empty() => format!("{desc} {extra}"),
            _ => desc.clone(),
        });
    }
    arg.description = arg.description.map(|d| truncate_description(&d, &arg.enum_values));
    arg.query.clone_from(&param.query);
    arg
}

fn argument_from_schema(
    graph: &SchemaGraph,
    schema: Option<SchemaId>,
    name: String,
    required: bool,
    binding: Binding,
) -> ToolArgument {
    let mut arg = plain_argument(name, ArgType::String, required, binding);
    let Some(id) = schema else {
        return arg;
    };
    let node = graph.resolved(id);
    arg.default.clone_from(&node.default);
    arg.enum_values.clone_from(&node.enum_values);

    let (arg_type, item_type, alternatives) = flatten_type(graph, id);
    arg.arg_type = arg_type;
    arg.item_type = item_type;

    let mut notes: Vec<String> = Vec::new();
    if let Some(d) = &node.description {
        notes.push(d.trim().to_string());
    }
    if let Some(alt) = alternatives {
        notes.push(alt);
    }
    if !arg.enum_values.is_empty() {
        notes.push(format!("Options: {}", enum_list(&arg.enum_values)));
    }
    if !notes.is_empty() {
        arg.description = Some(notes.join(" "));
    }
    arg
}

/// Single flattened type for a schema, plus a rendering of `oneOf`/`anyOf` alternatives.
fn flatten_type(graph: &SchemaGraph, id: SchemaId) -> (ArgType, Option<ArgType>, Option<String>) {
    let node = graph.resolved(id);
    match &node.kind {
        SchemaKind::Primitive(p) => ((*p).into(), None, None),
        SchemaKind::Object(_) => (ArgType::Object, None, None),
        SchemaKind::Array { items } => (
            ArgType::Array,
            items.map(|i| shallow_type(graph, i)),
            None,
        ),
        SchemaKind::OneOf(branches) | SchemaKind::AnyOf(branches) => {
            let Some(first) = branches.first() else {
                return (ArgType::String, None, None);
            };
            let (ty, item, _) = flatten_type_shallow(graph, *first);
            let rendered: Vec<String> = branches
                .iter()
                .map(|b| format!("({})", describe_branch(graph, *b)))
                .collect();
            (ty, item, Some(format!("One of: {}", rendered.join(" OR "))))
        }
        SchemaKind::Any | SchemaKind::Pending | SchemaKind::Ref(_) => (ArgType::String, None, None),
    }
}

fn flatten_type_shallow(graph: &SchemaGraph, id: SchemaId) -> (ArgType, Option<ArgType>, Option<String>) {
    match &graph.resolved(id).kind {
        SchemaKind::Array { items } => (ArgType::Array, items.map(|i| shallow_type(graph, i)), None),
        _ => (shallow_type(graph, id), None, None),
    }
}

fn shallow_type(graph: &SchemaGraph, id: SchemaId) -> ArgType {
    match &graph.resolved(id).kind {
        SchemaKind::Primitive(p) => (*p).into(),
        SchemaKind::Object(_) => ArgType::Object,
        SchemaKind::Array { .. } => ArgType::Array,
        _ => ArgType::String,
    }
}

fn describe_branch(graph: &SchemaGraph, id: SchemaId) -> String {
    let node = graph.resolved(id);
    if let SchemaKind::Object(o) = &node.kind
        && !o.properties.is_empty()
    {
        let names: Vec<&str> = o.properties.iter().map(|(n, _)| n.as_str()).collect();
        return format!("Object with properties: {}", names.join(", "));
    }
    if let Some(d) = &node.description {
        return d.trim().to_string();
    }
    match &node.kind {
        SchemaKind::Array { items: Some(items) } => {
            format!("array of {}", shallow_type(graph, *items).as_str())
        }
        _ => shallow_type(graph, id).as_str().to_string(),
    }
}

fn enum_list(values: &[Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate_description(desc: &str, enum_values: &[Value]) -> String {
    if enum_values.is_empty() || desc.chars().count() <= MAX_ENUM_DESCRIPTION_LENGTH {
        return desc.to_string();
    }
    let mut out: String = desc.chars().take(MAX_ENUM_DESCRIPTION_LENGTH - 3).collect();
    out.push_str("...");
    out
}

fn body_arguments(
    graph: &SchemaGraph,
    body: &RequestBody,
    names: &mut ArgumentNames,
    arguments: &mut Vec<ToolArgument>,
) -> Option<ToolBody> {
    let first = body.content.first()?;

    if body.content.len() == 1
        && let Some(encoding) = structured_encoding(&first.media_type)
        && let Some(fields) = body_fields(graph, first)
    {
        for (prop, id, prop_required) in fields {
            let name = names.claim(&prop, "body");
            let binding = Binding::BodyField(format!("/{}", escape_pointer_token(&prop)));
            let mut arg = argument_from_schema(
                graph,
                Some(id),
                name,
                body.required && prop_required,
                binding,
            );
            arg.description = arg
                .description
                .map(|d| truncate_description(&d, &arg.enum_values));
            arguments.push(arg);
        }
        return Some(ToolBody {
            media_type: first.media_type.clone(),
            encoding,
        });
    }

    let name = names.claim("body", "raw");
    let mut arg = plain_argument(name, ArgType::String, body.required, Binding::BodyRaw);
    let mut desc = if is_payload_reference(&first.media_type) {
        format!(
            "Reference to the {} payload (path or URL), forwarded as-is",
            first.media_type
        )
    } else {
        format!("Raw request body ({})", first.media_type)
    };
    if body.content.len() > 1 {
        let others: Vec<&str> = body.content[1..]
            .iter()
            .map(|m| m.media_type.as_str())
            .collect();
        desc.push_str(&format!("; also accepted upstream: {}", others.join(", ")));
    }
    if let Some(d) = &body.description {
        desc = format!("{} {desc}", d.trim());
    }
    arg.description = Some(desc);
    arguments.push(arg);
    Some(ToolBody {
        media_type: first.media_type.clone(),
        encoding: BodyEncoding::Raw,
    })
}

/// Top-level properties of an object body schema with a finite property list.
fn body_fields(graph: &SchemaGraph, media: &MediaTypeBody) -> Option<Vec<(String, SchemaId, bool)>> {
    let node = graph.resolved(media.schema?);
    let obj = node.as_object()?;
    if obj.properties.is_empty() {
        return None;
    }
    Some(
        obj.properties
            .iter()
            .map(|(name, id)| (name.clone(), *id, obj.is_required(name)))
            .collect(),
    )
}

fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn structured_encoding(media_type: &str) -> Option<BodyEncoding> {
    let m = essence(media_type);
    if m == "application/json" || m.ends_with("+json") {
        Some(BodyEncoding::Json)
    } else if m == "application/x-www-form-urlencoded" {
        Some(BodyEncoding::FormUrlEncoded)
    } else {
        None
    }
}

fn is_payload_reference(media_type: &str) -> bool {
    let m = essence(media_type);
    m.starts_with("multipart/")
        || m == "application/octet-stream"
        || m.starts_with("image/")
        || m.starts_with("audio/")
        || m.starts_with("video/")
}
