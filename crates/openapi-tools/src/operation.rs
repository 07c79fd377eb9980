//! Operation extraction.
//!
//! Walks `paths` of the root document and turns each operation into an [`Operation`] with merged
//! parameters and resolved schemas. Parameter envelopes (`in`, `style`, `explode`, ...) are parsed
//! with `openapiv3`; schemas are resolved into the build's [`SchemaGraph`].

use crate::document::{DocumentSet, RefTarget, escape_pointer_token};
use crate::error::{OpenApiToolsError, Result};
use crate::schema::{SchemaGraph, SchemaId};
use openapiv3::{Parameter, QueryStyle};
use serde_json::Value;

/// HTTP methods that may appear as keys of a path item.
pub const METHODS: [&str; 8] = [
    "get", "put", "post", "delete", "options", "head", "patch", "trace",
];

/// One `(path, method)` pair found in the root document, before schema resolution.
#[derive(Debug, Clone)]
pub struct OperationEntry {
    pub path: String,
    pub method: String,
    /// Where the (possibly `$ref`-ed) path item lives.
    pub item_at: RefTarget,
    pub item: Value,
}

impl crate::selector::HasPath for OperationEntry {
    fn path(&self) -> &str {
        &self.path
    }
}

impl OperationEntry {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    fn operation(&self) -> &Value {
        &self.item[self.method.as_str()]
    }
}

/// List every operation of the root document in declaration order.
///
/// # Errors
///
/// Returns an error if `paths` is malformed or a path item `$ref` cannot be resolved.
pub fn enumerate(docs: &DocumentSet) -> Result<Vec<OperationEntry>> {
    let Some(paths) = docs.root().get("paths") else {
        return Ok(Vec::new());
    };
    let paths = paths
        .as_object()
        .ok_or_else(|| OpenApiToolsError::OpenApi("'paths' must be an object".to_string()))?;

    let mut out = Vec::new();
    for (path, item) in paths {
        let pointer = format!("/paths/{}", escape_pointer_token(path));
        let (item_at, item) = docs.follow_refs(docs.root_id(), &pointer, item)?;
        let Some(item_obj) = item.as_object() else {
            return Err(OpenApiToolsError::OpenApi(format!(
                "path item '{path}' must be an object"
            )));
        };
        for key in item_obj.keys() {
            let method = key.to_ascii_lowercase();
            if METHODS.contains(&method.as_str()) {
                out.push(OperationEntry {
                    path: path.clone(),
                    method: key.clone(),
                    item_at: item_at.clone(),
                    item: item.clone(),
                });
            }
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParameterLocation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Path => "path",
            Self::Query => "query",
            Self::Header => "header",
            Self::Cookie => "cookie",
        }
    }
}

/// How a query parameter is serialized onto the URL.
#[derive(Debug, Clone)]
pub struct QuerySerialization {
    pub style: QueryStyle,
    pub explode: bool,
    pub allow_reserved: bool,
    pub allow_empty_value: bool,
}

#[derive(Debug, Clone)]
pub struct OperationParameter {
    pub name: String,
    pub location: ParameterLocation,
    pub required: bool,
    pub description: Option<String>,
    /// `None` when the parameter is declared with `content` instead of `schema`.
    pub schema: Option<SchemaId>,
    pub query: Option<QuerySerialization>,
}

#[derive(Debug, Clone)]
pub struct MediaTypeBody {
    pub media_type: String,
    pub schema: Option<SchemaId>,
}

#[derive(Debug, Clone)]
pub struct RequestBody {
    pub required: bool,
    pub description: Option<String>,
    /// Media types in declaration order.
    pub content: Vec<MediaTypeBody>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub method: String,
    pub path: String,
    pub operation_id: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub parameters: Vec<OperationParameter>,
    pub request_body: Option<RequestBody>,
}

impl Operation {
    #[must_use]
    pub fn label(&self) -> String {
        format!("{} {}", self.method.to_uppercase(), self.path)
    }

    /// `{name}` placeholders of the path template, in order of appearance.
    #[must_use]
    pub fn path_placeholders(&self) -> Vec<String> {
        template_placeholders(&self.path)
    }

    /// Resolve an enumerated operation: merge parameters, resolve schemas into `graph`.
    ///
    /// # Errors
    ///
    /// Returns schema errors annotated with the operation label.
    pub fn resolve(
        entry: &OperationEntry,
        docs: &DocumentSet,
        graph: &mut SchemaGraph,
    ) -> Result<Self> {
        let label = entry.label();
        Self::resolve_inner(entry, docs, graph).map_err(|e| e.in_operation(&label))
    }

    fn resolve_inner(
        entry: &OperationEntry,
        docs: &DocumentSet,
        graph: &mut SchemaGraph,
    ) -> Result<Self> {
        let item_ptr = &entry.item_at.pointer;
        let op = entry.operation();
        let op_ptr = format!("{item_ptr}/{}", entry.method);

        let mut parameters: Vec<OperationParameter> = Vec::new();
        let levels = [
            (entry.item.get("parameters"), format!("{item_ptr}/parameters")),
            (op.get("parameters"), format!("{op_ptr}/parameters")),
        ];
        // Path-item parameters first; operation-level ones override on (location, name).
        for (list, list_ptr) in levels {
            let Some(list) = list else { continue };
            let Some(list) = list.as_array() else {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "{list_ptr}: parameters must be an array"
                )));
            };
            for (i, raw) in list.iter().enumerate() {
                let param = parse_parameter(
                    docs,
                    graph,
                    &RefTarget {
                        doc: entry.item_at.doc.clone(),
                        pointer: format!("{list_ptr}/{i}"),
                    },
                    raw,
                )?;
                match parameters
                    .iter_mut()
                    .find(|p| p.location == param.location && p.name == param.name)
                {
                    Some(existing) => *existing = param,
                    None => parameters.push(param),
                }
            }
        }

        let request_body = match op.get("requestBody") {
            Some(raw) => Some(parse_request_body(
                docs,
                graph,
                &RefTarget {
                    doc: entry.item_at.doc.clone(),
                    pointer: format!("{op_ptr}/requestBody"),
                },
                raw,
            )?),
            None => None,
        };

        let text = |key: &str| op.get(key).and_then(Value::as_str).map(String::from);
        Ok(Self {
            method: entry.method.to_ascii_lowercase(),
            path: entry.path.clone(),
            operation_id: text("operationId"),
            summary: text("summary"),
            description: text("description"),
            parameters,
            request_body,
        })
    }
}

#[must_use]
pub fn template_placeholders(template: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else { break };
        let name = &after[..end];
        if !name.is_empty() && !out.iter().any(|n: &String| n == name) {
            out.push(name.to_string());
        }
        rest = &after[end + 1..];
    }
    out
}

fn parse_parameter(
    docs: &DocumentSet,
    graph: &mut SchemaGraph,
    at: &RefTarget,
    raw: &Value,
) -> Result<OperationParameter> {
    let (at, value) = docs.follow_refs(&at.doc, &at.pointer, raw)?;

    // Parse only the envelope: the schema is resolved separately into the graph, so hand
    // openapiv3 an empty one.
    let mut envelope = value.clone();
    let has_content = if let Some(obj) = envelope.as_object_mut() {
        let had = obj.remove("content").is_some();
        obj.insert("schema".to_string(), Value::Object(serde_json::Map::new()));
        had
    } else {
        return Err(OpenApiToolsError::OpenApi(format!(
            "{}: parameter must be an object",
            at.pointer
        )));
    };
    let parsed: Parameter = serde_json::from_value(envelope).map_err(|e| {
        OpenApiToolsError::OpenApi(format!("{}: invalid parameter: {e}", at.pointer))
    })?;

    let (location, query) = match &parsed {
        Parameter::Path { .. } => (ParameterLocation::Path, None),
        Parameter::Query {
            parameter_data,
            allow_reserved,
            style,
            allow_empty_value,
        } => (
            ParameterLocation::Query,
            Some(QuerySerialization {
                style: style.clone(),
                explode: parameter_data
                    .explode
                    .unwrap_or_else(|| default_query_explode(style)),
                allow_reserved: *allow_reserved,
                allow_empty_value: allow_empty_value.unwrap_or(false),
            }),
        ),
        Parameter::Header { .. } => (ParameterLocation::Header, None),
        Parameter::Cookie { .. } => (ParameterLocation::Cookie, None),
    };
    let data = parsed.parameter_data_ref();

    let schema = match value.get("schema") {
        Some(schema) if !has_content => Some(graph.resolve(
            docs,
            &at.doc,
            schema,
            &format!("{}/schema", at.pointer),
        )?),
        _ => None,
    };

    Ok(OperationParameter {
        name: data.name.clone(),
        location,
        // Path parameters are always required.
        required: location == ParameterLocation::Path || data.required,
        description: data.description.clone(),
        schema,
        query,
    })
}

fn parse_request_body(
    docs: &DocumentSet,
    graph: &mut SchemaGraph,
    at: &RefTarget,
    raw: &Value,
) -> Result<RequestBody> {
    let (at, value) = docs.follow_refs(&at.doc, &at.pointer, raw)?;
    let mut content = Vec::new();
    if let Some(media) = value.get("content").and_then(Value::as_object) {
        for (media_type, entry) in media {
            let schema = match entry.get("schema") {
                Some(schema) => Some(graph.resolve(
                    docs,
                    &at.doc,
                    schema,
                    &format!(
                        "{}/content/{}/schema",
                        at.pointer,
                        escape_pointer_token(media_type)
                    ),
                )?),
                None => None,
            };
            content.push(MediaTypeBody {
                media_type: media_type.clone(),
                schema,
            });
        }
    }
    Ok(RequestBody {
        required: value.get("required").and_then(Value::as_bool) == Some(true),
        description: value
            .get("description")
            .and_then(Value::as_str)
            .map(String::from),
        content,
    })
}

fn default_query_explode(style: &QueryStyle) -> bool {
    matches!(style, QueryStyle::Form | QueryStyle::DeepObject)
}
