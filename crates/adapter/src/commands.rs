//! `serve`, `parse`, `tools` and `slim` command bodies, kept out of `main` so tests can drive them.

use crate::error::{AdapterError, Result};
use crate::inspection;
use crate::watch::ConfigWatcher;
use mcp_openapi_tools::config::{AdapterConfig, NamespaceConfig};
use mcp_openapi_tools::document::DocumentLoader;
use mcp_openapi_tools::operation::{Operation, enumerate};
use mcp_openapi_tools::protocol::ToolDescriptor;
use mcp_openapi_tools::registry::{NamespaceRegistry, build_tools};
use mcp_openapi_tools::schema::SchemaGraph;
use mcp_openapi_tools::selector::PathSelector;
use mcp_openapi_tools::slimmer::slim;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ServeOptions {
    pub config_path: PathBuf,
    pub bind: SocketAddr,
    /// `None` disables hot reload.
    pub watch_interval: Option<Duration>,
}

/// Build every namespace, then serve the inspection endpoint until `cancel` fires.
///
/// Namespaces that fail to build are logged and skipped; the server still starts.
///
/// # Errors
///
/// Returns an error if the config cannot be loaded or the listener cannot be bound.
pub async fn serve(options: ServeOptions, cancel: CancellationToken) -> Result<()> {
    let config = AdapterConfig::load(&options.config_path)?;
    let registry = Arc::new(NamespaceRegistry::new(reqwest::Client::new()));
    registry.reload(config.servers).await;

    if let Some(interval) = options.watch_interval {
        let watcher = ConfigWatcher::new(&options.config_path, interval);
        tokio::spawn(watcher.run(registry.clone(), cancel.child_token()));
    }

    let listener = tokio::net::TcpListener::bind(options.bind)
        .await
        .map_err(|e| AdapterError::Startup(format!("bind {}: {e}", options.bind)))?;
    tracing::info!(addr = %options.bind, "Inspection endpoint listening");

    axum::serve(listener, inspection::router(registry))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("Shut down");
    Ok(())
}

/// Load a spec, resolve the selected operations and summarize what was found.
///
/// With no `paths` every operation is selected. Resolution runs the same schema pass as tool
/// synthesis, so an unsupported construct fails here too.
///
/// # Errors
///
/// Returns any fetch, selection or schema error.
pub async fn parse_spec(spec: &str, paths: &[String]) -> Result<Value> {
    let docs = DocumentLoader::default().load(spec).await?;
    let entries = enumerate(&docs)?;
    let selected: Vec<_> = if paths.is_empty() {
        entries.iter().collect()
    } else {
        PathSelector::new(paths)?.select(&entries)
    };

    let mut graph = SchemaGraph::new();
    let mut operations = Vec::new();
    for entry in selected {
        let op = Operation::resolve(entry, &docs, &mut graph)?;
        operations.push(json!({
            "method": op.method.to_uppercase(),
            "path": op.path,
            "operation_id": op.operation_id,
            "summary": op.summary,
            "parameters": op.parameters.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "request_body": op.request_body.as_ref().map(|b| {
                b.content.iter().map(|m| &m.media_type).collect::<Vec<_>>()
            }),
        }));
    }

    let info = &docs.root()["info"];
    Ok(json!({
        "title": info.get("title"),
        "version": info.get("version"),
        "digest": docs.digest(),
        "documents": docs.documents().iter().map(ToString::to_string).collect::<Vec<_>>(),
        "operations": operations,
    }))
}

/// Synthesize the tools of one spec without serving them.
///
/// # Errors
///
/// Returns any fetch, selection or synthesis error.
pub async fn spec_tools(
    spec: &str,
    paths: &[String],
    forward_query_params: BTreeMap<String, String>,
) -> Result<Vec<ToolDescriptor>> {
    let mut config = NamespaceConfig::new("spec", spec);
    config.paths = paths.to_vec();
    config.forward_query_params = forward_query_params;

    let docs = DocumentLoader::default().load(spec).await?;
    let tools = build_tools(&docs, &config)?;
    Ok(tools.iter().map(ToolDescriptor::of).collect())
}

/// Slim `spec` down to `paths` and write it to `output` (YAML for `.yaml`/`.yml`, else JSON).
///
/// Returns the number of paths kept.
///
/// # Errors
///
/// Returns an error on fetch failures, dangling references or write failures.
pub async fn slim_spec(spec: &str, paths: &[String], output: &Path) -> Result<usize> {
    let selector = PathSelector::new(paths)?;
    let docs = DocumentLoader::default().load(spec).await?;
    let slimmed = slim(&docs, &selector)?;
    let kept = slimmed
        .get("paths")
        .and_then(Value::as_object)
        .map_or(0, serde_json::Map::len);

    let is_yaml = output
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    let rendered = if is_yaml {
        serde_yaml::to_string(&slimmed)?
    } else {
        let mut s = serde_json::to_string_pretty(&slimmed)?;
        s.push('\n');
        s
    };
    tokio::fs::write(output, rendered).await?;

    tracing::info!(
        spec,
        output = %output.display(),
        paths = kept,
        "Wrote slimmed spec"
    );
    Ok(kept)
}

/// Parse `external=internal` pairs for `--forward-query-param`.
///
/// # Errors
///
/// Returns `Config` for an entry without `=` or with an empty side.
pub fn parse_forward_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|p| match p.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() && !v.trim().is_empty() => {
                Ok((k.trim().to_string(), v.trim().to_string()))
            }
            _ => Err(AdapterError::Config(format!(
                "expected HEADER=QUERY_KEY, got '{p}'"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_pairs() {
        let parsed = parse_forward_pairs(&["x-api-key=appid".into()]).unwrap();
        assert_eq!(parsed["x-api-key"], "appid");
        assert!(parse_forward_pairs(&["x-api-key".into()]).is_err());
        assert!(parse_forward_pairs(&["=appid".into()]).is_err());
    }
}
