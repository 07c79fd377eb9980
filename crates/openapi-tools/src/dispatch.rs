//! Tool invocation -> outbound HTTP request -> invocation result.

use crate::config::NamespaceConfig;
use crate::document::unescape_pointer_token;
use crate::error::{OpenApiToolsError, Result};
use crate::operation::{QuerySerialization, template_placeholders};
use crate::synthesizer::{ArgType, Binding, BodyEncoding, Tool, ToolArgument};
use crate::transport::{HttpTransport, OutboundRequest, OutboundResponse, redact_url};
use base64::Engine as _;
use mime::Mime;
use openapiv3::QueryStyle;
use reqwest::Method;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use url::Url;

/// Caller headers that never travel upstream, allow-listed or not.
const HOP_BY_HOP: [&str; 8] = [
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
    "te",
    "trailer",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvocationStatus {
    /// Upstream answered 2xx.
    Success,
    /// Upstream answered with any other status. Still a completed dispatch.
    HttpError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    /// Non-UTF-8 payload, kept byte-exact.
    Binary {
        content_type: Option<String>,
        data: Vec<u8>,
    },
    Empty,
}

impl ResponseBody {
    /// Structured rendering: JSON as-is, text as a string, binary as base64 with its content type.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Json(v) => v.clone(),
            Self::Text(t) => Value::String(t.clone()),
            Self::Binary { content_type, data } => serde_json::json!({
                "encoding": "base64",
                "mimeType": content_type,
                "data": base64::engine::general_purpose::STANDARD.encode(data),
            }),
            Self::Empty => Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub status: InvocationStatus,
    pub http_status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
    pub elapsed: Duration,
}

/// Validate `arguments`, build the outbound request, send it and map the response.
///
/// Validation happens before any I/O: an invalid call never reaches the transport.
///
/// # Errors
///
/// Returns `MissingArgument`, `UnknownArgument` or `InvalidArgumentType` for bad arguments,
/// `Config` when the URL cannot be built, and `Transport` when the upstream cannot be reached.
pub async fn dispatch(
    transport: &dyn HttpTransport,
    tool: &Tool,
    arguments: &Value,
    base_url: &str,
    config: &NamespaceConfig,
    caller_headers: &HeaderMap,
) -> Result<InvocationResult> {
    let values = validate_arguments(tool, arguments)?;
    let request = build_request(tool, &values, base_url, config, caller_headers)?;

    tracing::debug!(
        tool = %tool.qualified_name(),
        method = %request.method,
        url = %redact_url(&request.url),
        "Dispatching tool call"
    );

    let started = Instant::now();
    let response = transport.send(request).await.inspect_err(|e| {
        tracing::warn!(tool = %tool.qualified_name(), error = %e, "Upstream request failed");
    })?;
    Ok(map_response(response, started.elapsed()))
}

/// Check names and types, apply defaults, coerce lenient scalars.
///
/// # Errors
///
/// Returns the first argument error found.
pub fn validate_arguments<'t>(
    tool: &'t Tool,
    arguments: &Value,
) -> Result<Vec<(&'t ToolArgument, Value)>> {
    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            return Err(OpenApiToolsError::InvalidArgumentType {
                tool: tool.name.clone(),
                argument: "<arguments>".to_string(),
                expected: "object".to_string(),
                message: format!("got {}", json_type_name(other)),
            });
        }
    };

    if let Some(unknown) = args.keys().find(|k| tool.argument(k).is_none()) {
        return Err(OpenApiToolsError::UnknownArgument {
            tool: tool.name.clone(),
            argument: unknown.clone(),
        });
    }

    let mut out = Vec::with_capacity(tool.arguments.len());
    for arg in &tool.arguments {
        let supplied = args.get(&arg.name).filter(|v| !v.is_null()).cloned();
        let Some(value) = supplied.or_else(|| arg.default.clone()) else {
            if arg.required {
                return Err(OpenApiToolsError::MissingArgument {
                    tool: tool.name.clone(),
                    argument: arg.name.clone(),
                });
            }
            continue;
        };
        let value = coerce(arg.arg_type, arg.item_type, value).map_err(|message| {
            OpenApiToolsError::InvalidArgumentType {
                tool: tool.name.clone(),
                argument: arg.name.clone(),
                expected: expected_label(arg),
                message,
            }
        })?;
        out.push((arg, value));
    }
    Ok(out)
}

fn expected_label(arg: &ToolArgument) -> String {
    match (arg.arg_type, arg.item_type) {
        (ArgType::Array, Some(item)) => format!("array of {}", item.as_str()),
        (ty, _) => ty.as_str().to_string(),
    }
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn coerce(ty: ArgType, item: Option<ArgType>, value: Value) -> std::result::Result<Value, String> {
    match (ty, value) {
        (ArgType::String, v @ Value::String(_)) => Ok(v),
        (ArgType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ArgType::String, Value::Bool(b)) => Ok(Value::String(b.to_string())),

        (ArgType::Integer, Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(Value::Number(n)),
        (ArgType::Integer, Value::Number(n)) => integral(&n)
            .map(Value::from)
            .ok_or_else(|| format!("got non-integer number {n}")),
        (ArgType::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("got non-numeric string '{s}'")),

        (ArgType::Number, v @ Value::Number(_)) => Ok(v),
        (ArgType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("got non-numeric string '{s}'")),

        (ArgType::Boolean, v @ Value::Bool(_)) => Ok(v),
        (ArgType::Boolean, Value::String(s)) if s.eq_ignore_ascii_case("true") => {
            Ok(Value::Bool(true))
        }
        (ArgType::Boolean, Value::String(s)) if s.eq_ignore_ascii_case("false") => {
            Ok(Value::Bool(false))
        }

        (ArgType::Object, v @ Value::Object(_)) => Ok(v),

        (ArgType::Array, Value::Array(items)) => match item {
            Some(item_ty) if !matches!(item_ty, ArgType::Array | ArgType::Object) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| coerce(item_ty, None, v).map_err(|m| format!("item {i}: {m}")))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Ok(Value::Array(items)),
        },

        (_, other) => Err(format!("got {}", json_type_name(&other))),
    }
}

/// `42.0` is an integer; `4.5` and out-of-range floats are not.
#[allow(clippy::cast_possible_truncation)]
fn integral(n: &serde_json::Number) -> Option<i64> {
    let f = n.as_f64()?;
    (f.fract() == 0.0 && f.abs() < 9.0e15).then_some(f as i64)
}

fn build_request(
    tool: &Tool,
    values: &[(&ToolArgument, Value)],
    base_url: &str,
    config: &NamespaceConfig,
    caller_headers: &HeaderMap,
) -> Result<OutboundRequest> {
    let path_value = |name: &str| {
        values.iter().find_map(|(arg, v)| match &arg.binding {
            Binding::Path(p) if p == name => Some(value_to_string(v)),
            _ => None,
        })
    };

    let mut path = tool.path.clone();
    for placeholder in template_placeholders(&tool.path) {
        let Some(v) = path_value(&placeholder) else {
            continue;
        };
        path = path.replace(
            &format!("{{{placeholder}}}"),
            &percent_encode(&v, false),
        );
    }

    let mut base = base_url.to_string();
    for placeholder in template_placeholders(base_url) {
        let v = match path_value(&placeholder) {
            Some(v) => percent_encode(&v, false),
            None => std::env::var(&placeholder).map_err(|_| {
                OpenApiToolsError::Config(format!(
                    "base_url placeholder '{{{placeholder}}}' has no path argument or environment variable"
                ))
            })?,
        };
        base = base.replace(&format!("{{{placeholder}}}"), &v);
    }

    let mut query: Vec<QueryPair> = Vec::new();
    for (arg, v) in values {
        if let Binding::Query(name) = &arg.binding {
            query.extend(serialize_query_param(name, v, arg.required, arg.query.as_ref()));
        }
    }
    for (external, internal) in &config.forward_query_params {
        if let Some(v) = caller_headers.get(external).and_then(|v| v.to_str().ok()) {
            query.retain(|p| &p.key != internal);
            query.push(QueryPair {
                key: internal.clone(),
                value: v.to_string(),
                allow_reserved: false,
            });
        }
    }
    let url = build_url(&base, &path, &query)?;

    let mut headers = HeaderMap::new();
    for (name, value) in caller_headers {
        if config.forwards_header(name.as_str()) && !HOP_BY_HOP.contains(&name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    for (arg, v) in values {
        if let Binding::Header(name) = &arg.binding {
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                OpenApiToolsError::Config(format!("invalid header parameter name '{name}'"))
            })?;
            let value = HeaderValue::from_str(&value_to_string(v)).map_err(|e| {
                OpenApiToolsError::InvalidArgumentType {
                    tool: tool.name.clone(),
                    argument: arg.name.clone(),
                    expected: "header-safe string".to_string(),
                    message: e.to_string(),
                }
            })?;
            headers.insert(header, value);
        }
    }

    let body = build_body(tool, values)?;
    if body.is_some()
        && let Some(shape) = &tool.body
        && let Ok(ct) = HeaderValue::from_str(&shape.media_type)
    {
        headers.insert(CONTENT_TYPE, ct);
    }

    let method = Method::from_bytes(tool.method.to_ascii_uppercase().as_bytes()).map_err(|_| {
        OpenApiToolsError::Config(format!("unsupported HTTP method '{}'", tool.method))
    })?;

    Ok(OutboundRequest {
        method,
        url,
        headers,
        body,
        timeout: config.request_timeout(),
    })
}

fn build_body(tool: &Tool, values: &[(&ToolArgument, Value)]) -> Result<Option<Vec<u8>>> {
    let Some(shape) = &tool.body else {
        return Ok(None);
    };

    if shape.encoding == BodyEncoding::Raw {
        return Ok(values.iter().find_map(|(arg, v)| match arg.binding {
            Binding::BodyRaw => Some(value_to_string(v).into_bytes()),
            _ => None,
        }));
    }

    let mut fields = Map::new();
    for (arg, v) in values {
        if let Binding::BodyField(pointer) = &arg.binding {
            let key = unescape_pointer_token(pointer.trim_start_matches('/'));
            fields.insert(key, v.clone());
        }
    }
    if fields.is_empty() {
        return Ok(None);
    }

    match shape.encoding {
        BodyEncoding::Json => Ok(Some(serde_json::to_vec(&Value::Object(fields))?)),
        BodyEncoding::FormUrlEncoded => {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            for (k, v) in &fields {
                match v {
                    Value::Array(items) => {
                        for item in items {
                            form.append_pair(k, &value_to_string(item));
                        }
                    }
                    other => {
                        form.append_pair(k, &value_to_string(other));
                    }
                }
            }
            Ok(Some(form.finish().into_bytes()))
        }
        BodyEncoding::Raw => Ok(None),
    }
}

fn map_response(response: OutboundResponse, elapsed: Duration) -> InvocationResult {
    let content_type = response
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body = if response.body.is_empty() {
        ResponseBody::Empty
    } else if is_json_content_type(content_type.as_deref())
        && let Ok(v) = serde_json::from_slice(&response.body)
    {
        ResponseBody::Json(v)
    } else if is_binary_content_type(content_type.as_deref()) {
        ResponseBody::Binary {
            content_type,
            data: response.body,
        }
    } else {
        match String::from_utf8(response.body) {
            Ok(text) => ResponseBody::Text(text),
            Err(e) => ResponseBody::Binary {
                content_type,
                data: e.into_bytes(),
            },
        }
    };

    InvocationResult {
        status: if response.status.is_success() {
            InvocationStatus::Success
        } else {
            InvocationStatus::HttpError
        },
        http_status: response.status.as_u16(),
        headers: response.headers,
        body,
        elapsed,
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    let Some(Ok(m)) = content_type.map(str::parse::<Mime>) else {
        return false;
    };
    m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
}

/// Media types that are never rendered as text even when the bytes happen to be UTF-8.
fn is_binary_content_type(content_type: Option<&str>) -> bool {
    let Some(Ok(m)) = content_type.map(str::parse::<Mime>) else {
        return false;
    };
    matches!(m.type_(), mime::IMAGE | mime::AUDIO | mime::VIDEO)
        || m.essence_str() == "application/octet-stream"
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueryPair {
    key: String,
    value: String,
    allow_reserved: bool,
}

fn build_url(base_url: &str, path: &str, query: &[QueryPair]) -> Result<Url> {
    let raw = format!("{}{}", base_url.trim_end_matches('/'), path);
    let mut url = Url::parse(&raw)
        .map_err(|e| OpenApiToolsError::Config(format!("Invalid request URL '{raw}': {e}")))?;

    if !query.is_empty() {
        let mut qs = String::new();
        if let Some(existing) = url.query() {
            qs.push_str(existing);
        }
        for p in query {
            if !qs.is_empty() {
                qs.push('&');
            }
            qs.push_str(&percent_encode(&p.key, false));
            qs.push('=');
            qs.push_str(&percent_encode(&p.value, p.allow_reserved));
        }
        url.set_query(Some(&qs));
    }
    Ok(url)
}

fn serialize_query_param(
    name: &str,
    value: &Value,
    required: bool,
    ser: Option<&QuerySerialization>,
) -> Vec<QueryPair> {
    let (style, explode) = ser.map_or((QueryStyle::Form, true), |s| (s.style.clone(), s.explode));
    let allow_reserved = ser.is_some_and(|s| s.allow_reserved);
    let allow_empty_value = ser.is_some_and(|s| s.allow_empty_value);

    if query_value_is_empty(value) {
        if allow_empty_value || required {
            return vec![pair(name, String::new(), allow_reserved)];
        }
        return Vec::new();
    }

    match value {
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(value_to_string).collect();
            match style {
                QueryStyle::Form if explode => items
                    .into_iter()
                    .map(|v| pair(name, v, allow_reserved))
                    .collect(),
                QueryStyle::SpaceDelimited => vec![pair(name, items.join(" "), allow_reserved)],
                QueryStyle::PipeDelimited => vec![pair(name, items.join("|"), allow_reserved)],
                QueryStyle::Form | QueryStyle::DeepObject => {
                    vec![pair(name, items.join(","), allow_reserved)]
                }
            }
        }
        Value::Object(map) => match style {
            QueryStyle::DeepObject => map
                .iter()
                .map(|(k, v)| pair(&format!("{name}[{k}]"), value_to_string(v), allow_reserved))
                .collect(),
            QueryStyle::Form if explode => map
                .iter()
                .map(|(k, v)| pair(k, value_to_string(v), allow_reserved))
                .collect(),
            QueryStyle::Form => {
                let flat: Vec<String> = map
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), value_to_string(v)])
                    .collect();
                vec![pair(name, flat.join(","), allow_reserved)]
            }
            QueryStyle::SpaceDelimited | QueryStyle::PipeDelimited => {
                vec![pair(name, Value::Object(map.clone()).to_string(), allow_reserved)]
            }
        },
        scalar => vec![pair(name, value_to_string(scalar), allow_reserved)],
    }
}

fn pair(key: &str, value: String, allow_reserved: bool) -> QueryPair {
    QueryPair {
        key: key.to_string(),
        value,
        allow_reserved,
    }
}

fn query_value_is_empty(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        _ => value.to_string(),
    }
}

/// Percent-encode all but unreserved characters. With `allow_reserved`, reserved characters
/// that cannot split a `k=v&k=v` query survive as-is.
fn percent_encode(s: &str, allow_reserved: bool) -> String {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        let keep = is_unreserved(b) || (allow_reserved && is_reserved_but_safe_in_pairs(b));
        if keep {
            out.push(b as char);
        } else {
            out.push('%');
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0F) as usize] as char);
        }
    }
    out
}

fn is_unreserved(b: u8) -> bool {
    matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~')
}

fn is_reserved_but_safe_in_pairs(b: u8) -> bool {
    // '&', '=' and '#' stay encoded.
    matches!(
        b,
        b':' | b'/' | b'?' | b'[' | b']' | b'@' | b'!' | b'$' | b'\'' | b'(' | b')' | b'*'
            | b'+' | b',' | b';'
    )
}
