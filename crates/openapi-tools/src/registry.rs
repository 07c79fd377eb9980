//! Namespace registry.
//!
//! Every namespace is built from its own spec (load, select, resolve, synthesize) and the results
//! are published together as one immutable [`RegistrySnapshot`]. Readers clone the current
//! `Arc` and never see a half-rebuilt set; a rebuild replaces the pointer in one step.
//!
//! A namespace whose build fails is left out of the snapshot and recorded in
//! [`RegistrySnapshot::failures`]; the other namespaces are still served.

use crate::config::{HashPolicy, NamespaceConfig};
use crate::dispatch::{InvocationResult, dispatch};
use crate::document::{DocId, DocumentLoader, DocumentSet};
use crate::error::{OpenApiToolsError, Result};
use crate::operation::{Operation, enumerate};
use crate::protocol::ToolDescriptor;
use crate::reload::{RebuildCoalescer, RebuildOutcome};
use crate::schema::SchemaGraph;
use crate::selector::{PathSelector, reserve_unique_name};
use crate::synthesizer::{Tool, synthesize};
use crate::transport::{HttpTransport, ReqwestTransport};
use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::header::HeaderMap;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// One built namespace.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub config: NamespaceConfig,
    /// `info.title` of the spec, if any.
    pub title: Option<String>,
    /// Upstream base URL; may still contain `{placeholder}`s filled per call.
    pub base_url: String,
    pub spec_digest: String,
    /// Local files the spec was assembled from (root plus external `$ref` targets).
    pub sources: Vec<PathBuf>,
    pub tools: Vec<Tool>,
    /// Hash of every tool's name, route and argument bindings.
    pub fingerprint: String,
}

impl Namespace {
    #[must_use]
    pub fn tool(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    /// Incremented on every publish; `0` is the empty initial snapshot.
    pub generation: u64,
    pub namespaces: BTreeMap<String, Arc<Namespace>>,
    /// Namespace key -> build error message.
    pub failures: BTreeMap<String, String>,
}

impl RegistrySnapshot {
    /// # Errors
    ///
    /// Returns `NamespaceNotFound` if no namespace is registered under `namespace`.
    pub fn namespace(&self, namespace: &str) -> Result<&Arc<Namespace>> {
        self.namespaces
            .get(namespace)
            .ok_or_else(|| OpenApiToolsError::NamespaceNotFound(namespace.to_string()))
    }

    /// # Errors
    ///
    /// Returns `NamespaceNotFound` or `ToolNotFound`.
    pub fn tool(&self, namespace: &str, name: &str) -> Result<&Tool> {
        self.namespace(namespace)?
            .tool(name)
            .ok_or_else(|| OpenApiToolsError::ToolNotFound {
                namespace: namespace.to_string(),
                tool: name.to_string(),
            })
    }

    #[must_use]
    pub fn tool_count(&self) -> usize {
        self.namespaces.values().map(|n| n.tools.len()).sum()
    }
}

pub struct NamespaceRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
    desired: RwLock<Vec<NamespaceConfig>>,
    loader: DocumentLoader,
    transport: Arc<dyn HttpTransport>,
    coalescer: RebuildCoalescer,
}

impl NamespaceRegistry {
    /// Registry that fetches specs and calls upstreams with the same `reqwest` client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_transport(
            DocumentLoader::new(client.clone()),
            Arc::new(ReqwestTransport::new(client)),
        )
    }

    #[must_use]
    pub fn with_transport(loader: DocumentLoader, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
            desired: RwLock::new(Vec::new()),
            loader,
            transport,
            coalescer: RebuildCoalescer::new(),
        }
    }

    /// The currently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    /// Build every namespace in `configs` concurrently and publish the result.
    pub async fn rebuild(&self, configs: &[NamespaceConfig]) -> Arc<RegistrySnapshot> {
        let results = join_all(configs.iter().map(|c| build_namespace(&self.loader, c))).await;

        let mut namespaces = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (config, result) in configs.iter().zip(results) {
            match result {
                Ok(ns) => {
                    namespaces.insert(config.namespace.clone(), Arc::new(ns));
                }
                Err(e) => {
                    tracing::warn!(
                        namespace = %config.namespace,
                        kind = e.kind(),
                        error = %e,
                        "Failed to build namespace; it will not be served"
                    );
                    failures.insert(config.namespace.clone(), e.to_string());
                }
            }
        }

        let mut current = self.current.write();
        let snapshot = Arc::new(RegistrySnapshot {
            generation: current.generation + 1,
            namespaces,
            failures,
        });
        *current = snapshot.clone();
        drop(current);

        tracing::info!(
            generation = snapshot.generation,
            namespaces = snapshot.namespaces.len(),
            failed = snapshot.failures.len(),
            tools = snapshot.tool_count(),
            "Published tool registry"
        );
        snapshot
    }

    /// Record `configs` as the desired state and rebuild, coalescing with any rebuild in flight.
    ///
    /// A coalesced call returns immediately; the running rebuild picks up the latest configs.
    pub async fn reload(&self, configs: Vec<NamespaceConfig>) -> RebuildOutcome {
        *self.desired.write() = configs;
        self.coalescer
            .trigger(|| async {
                let configs = self.desired.read().clone();
                self.rebuild(&configs).await;
            })
            .await
    }

    /// `listTools`: descriptors for one namespace, or `namespace.tool`-named descriptors for all.
    ///
    /// # Errors
    ///
    /// Returns `NamespaceNotFound` for an unknown namespace.
    pub fn list_tools(&self, namespace: Option<&str>) -> Result<Vec<ToolDescriptor>> {
        let snapshot = self.snapshot();
        match namespace {
            Some(ns) => Ok(snapshot
                .namespace(ns)?
                .tools
                .iter()
                .map(ToolDescriptor::of)
                .collect()),
            None => Ok(snapshot
                .namespaces
                .values()
                .flat_map(|n| n.tools.iter().map(ToolDescriptor::qualified))
                .collect()),
        }
    }

    /// `callTool`: dispatch one invocation against the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `NamespaceNotFound`/`ToolNotFound` for unknown targets, plus any dispatch error.
    pub async fn call_tool(
        &self,
        namespace: &str,
        name: &str,
        arguments: &Value,
        caller_headers: &HeaderMap,
    ) -> Result<InvocationResult> {
        let snapshot = self.snapshot();
        let ns = snapshot.namespace(namespace)?;
        let tool = snapshot.tool(namespace, name)?;
        dispatch(
            self.transport.as_ref(),
            tool,
            arguments,
            &ns.base_url,
            &ns.config,
            caller_headers,
        )
        .await
    }
}

/// Load, verify and build one namespace.
///
/// # Errors
///
/// Returns any fetch, hash, base URL or synthesis error for this namespace.
pub async fn build_namespace(loader: &DocumentLoader, config: &NamespaceConfig) -> Result<Namespace> {
    let docs = loader.load(&config.url).await?;
    check_spec_hash(config, docs.digest())?;
    let base_url = resolve_base_url(config, &docs)?;
    let tools = build_tools(&docs, config)?;

    tracing::info!(
        namespace = %config.namespace,
        "Discovered {} tools from OpenAPI spec '{}'",
        tools.len(),
        config.display_name()
    );

    Ok(Namespace {
        title: docs
            .root()
            .pointer("/info/title")
            .and_then(Value::as_str)
            .map(String::from),
        base_url,
        spec_digest: docs.digest().to_string(),
        sources: docs.local_files(),
        fingerprint: fingerprint(&tools),
        tools,
        config: config.clone(),
    })
}

/// Select, resolve and synthesize the tools of one loaded spec. Pure: no I/O.
///
/// # Errors
///
/// Returns the first schema or synthesis error, annotated with its operation.
pub fn build_tools(docs: &DocumentSet, config: &NamespaceConfig) -> Result<Vec<Tool>> {
    let selector = PathSelector::new(&config.paths)?;
    if config.paths.is_empty() {
        tracing::warn!(namespace = %config.namespace, "No path patterns configured; no tools selected");
    }

    let entries = enumerate(docs)?;
    let hidden: HashSet<&str> = config.forwarded_query_names().collect();
    let mut graph = SchemaGraph::new();
    let mut taken = HashSet::new();
    let mut tools = Vec::new();

    for entry in selector.select(&entries) {
        let op = Operation::resolve(entry, docs, &mut graph)?;
        let mut tool = synthesize(&config.namespace, &op, &graph, &hidden)?;
        let unique = reserve_unique_name(&mut taken, &tool.name);
        if unique != tool.name {
            tracing::debug!(
                namespace = %config.namespace,
                tool = %tool.name,
                renamed = %unique,
                "Duplicate tool name"
            );
            tool.name = unique;
        }
        tools.push(tool);
    }
    Ok(tools)
}

fn check_spec_hash(config: &NamespaceConfig, actual: &str) -> Result<()> {
    let Some(expected) = &config.spec_hash else {
        return Ok(());
    };
    if expected.eq_ignore_ascii_case(actual) {
        return Ok(());
    }
    match config.spec_hash_policy {
        HashPolicy::Fail => Err(OpenApiToolsError::OpenApi(format!(
            "Spec hash mismatch. Expected: {expected}, Got: {actual}"
        ))),
        HashPolicy::Warn => {
            tracing::warn!(
                namespace = %config.namespace,
                "Spec hash mismatch for '{}'. Expected: {}, Got: {}",
                config.display_name(),
                expected,
                actual
            );
            Ok(())
        }
        HashPolicy::Ignore => Ok(()),
    }
}

/// Configured `base_url`, else the spec's first server (variables set to their defaults).
///
/// Relative server URLs resolve against the spec URL when the spec was fetched over HTTP.
fn resolve_base_url(config: &NamespaceConfig, docs: &DocumentSet) -> Result<String> {
    if let Some(base) = &config.base_url {
        return Ok(base.clone());
    }

    let server = docs.root().pointer("/servers/0");
    let Some(mut url) = server
        .and_then(|s| s.get("url"))
        .and_then(Value::as_str)
        .map(String::from)
    else {
        return Err(OpenApiToolsError::Config(format!(
            "namespace '{}': no base_url configured and none found in spec",
            config.namespace
        )));
    };
    if let Some(vars) = server
        .and_then(|s| s.get("variables"))
        .and_then(Value::as_object)
    {
        for (name, var) in vars {
            if let Some(default) = var.get("default").and_then(Value::as_str) {
                url = url.replace(&format!("{{{name}}}"), default);
            }
        }
    }

    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(url);
    }
    if let DocId::Url(spec_url) = docs.root_id() {
        let mut spec_url: Url = spec_url.clone();
        spec_url.set_fragment(None);
        let resolved = spec_url.join(&url).map_err(|e| {
            OpenApiToolsError::Config(format!(
                "Invalid server URL '{url}': {e} (set base_url explicitly)"
            ))
        })?;
        return Ok(resolved.to_string());
    }
    Err(OpenApiToolsError::Config(format!(
        "Invalid server URL '{url}': must be an absolute http(s) URL (set base_url explicitly)"
    )))
}

/// Stable hash over tool names, routes and argument bindings, in order.
#[must_use]
pub fn fingerprint(tools: &[Tool]) -> String {
    let shape: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "method": t.method,
                "path": t.path,
                "arguments": t.arguments.iter().map(|a| json!({
                    "name": a.name,
                    "type": a.arg_type,
                    "items": a.item_type,
                    "required": a.required,
                    "default": a.default,
                    "binding": a.binding.to_string(),
                })).collect::<Vec<_>>(),
            })
        })
        .collect();
    format!(
        "sha256:{}",
        hex::encode(Sha256::digest(Value::Array(shape).to_string().as_bytes()))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SpyTransport;
    use std::path::Path;

    const PETSTORE: &str = r##"
openapi: "3.0.0"
info: { title: Petstore, version: "1" }
servers:
  - url: "https://{env}.petstore.example/v1"
    variables:
      env: { default: api }
paths:
  /pets:
    get:
      operationId: listPets
      parameters:
        - { name: limit, in: query, schema: { type: integer } }
      responses: {}
    post:
      operationId: createPet
      requestBody:
        required: true
        content:
          application/json:
            schema: { $ref: "#/components/schemas/Pet" }
      responses: {}
  /pets/{petId}:
    get:
      operationId: showPetById
      parameters:
        - { name: petId, in: path, required: true, schema: { type: string } }
      responses: {}
  /store/inventory:
    get:
      operationId: getInventory
      responses: {}
components:
  schemas:
    Pet:
      type: object
      required: [name]
      properties:
        name: { type: string }
        parent: { $ref: "#/components/schemas/Pet" }
"##;

    fn write(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn ns(name: &str, url: &str, paths: &[&str]) -> NamespaceConfig {
        let mut c = NamespaceConfig::new(name, url);
        c.paths = paths.iter().map(|p| (*p).to_string()).collect();
        c
    }

    fn registry(spy: Arc<SpyTransport>) -> NamespaceRegistry {
        NamespaceRegistry::with_transport(DocumentLoader::default(), spy)
    }

    #[tokio::test]
    async fn failing_namespace_does_not_block_the_others() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(dir.path(), "petstore.yaml", PETSTORE);
        let reg = registry(Arc::new(SpyTransport::ok_json(json!({}))));

        let snapshot = reg
            .rebuild(&[
                ns("pets", &spec, &["^/pets"]),
                ns("broken", &dir.path().join("missing.yaml").to_string_lossy(), &[".*"]),
            ])
            .await;

        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.namespaces.keys().collect::<Vec<_>>(), vec!["pets"]);
        assert!(snapshot.failures["broken"].contains("missing.yaml"));

        let pets = snapshot.namespace("pets").unwrap();
        let names: Vec<&str> = pets.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["listPets", "createPet", "showPetById"]);
        assert_eq!(pets.base_url, "https://api.petstore.example/v1");
        assert_eq!(pets.title.as_deref(), Some("Petstore"));

        assert_eq!(
            reg.list_tools(Some("broken")).unwrap_err().to_string(),
            "Namespace 'broken' not found"
        );
    }

    #[tokio::test]
    async fn rebuild_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(dir.path(), "petstore.yaml", PETSTORE);
        let reg = registry(Arc::new(SpyTransport::ok_json(json!({}))));
        let configs = [ns("pets", &spec, &["^/pets", "inventory"])];

        let first = reg.rebuild(&configs).await;
        let second = reg.rebuild(&configs).await;
        assert_eq!(second.generation, 2);

        let a = first.namespace("pets").unwrap();
        let b = second.namespace("pets").unwrap();
        assert_eq!(a.fingerprint, b.fingerprint);
        assert_eq!(
            ToolDescriptorList::of(a),
            ToolDescriptorList::of(b),
        );
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_a_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(dir.path(), "petstore.yaml", PETSTORE);
        let reg = registry(Arc::new(SpyTransport::ok_json(json!({}))));

        reg.rebuild(&[ns("pets", &spec, &["^/pets$"])]).await;
        let held = reg.snapshot();
        reg.rebuild(&[ns("pets", &spec, &["^/store"])]).await;

        assert_eq!(held.namespace("pets").unwrap().tools.len(), 2);
        let names: Vec<String> = reg
            .list_tools(Some("pets"))
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["getInventory"]);
    }

    #[tokio::test]
    async fn call_tool_dispatches_against_the_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write(dir.path(), "petstore.yaml", PETSTORE);
        let spy = Arc::new(SpyTransport::ok_json(json!([{"name": "Rex"}])));
        let reg = registry(spy.clone());
        let mut config = ns("pets", &spec, &["^/pets"]);
        config.base_url = Some("http://127.0.0.1:9/v1".into());
        reg.rebuild(&[config]).await;

        let result = reg
            .call_tool("pets", "showPetById", &json!({"petId": "p 1"}), &HeaderMap::new())
            .await
            .unwrap();
        assert_eq!(result.http_status, 200);
        assert_eq!(spy.requests()[0].url.as_str(), "http://127.0.0.1:9/v1/pets/p%201");

        let err = reg
            .call_tool("pets", "nope", &json!({}), &HeaderMap::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_not_found");

        let all = reg.list_tools(None).unwrap();
        assert_eq!(all[0].name, "pets.listPets");
    }

    #[test]
    fn spec_hash_policies() {
        let mut config = NamespaceConfig::new("pets", "unused");
        config.spec_hash = Some("sha256:00".into());

        config.spec_hash_policy = HashPolicy::Fail;
        assert!(check_spec_hash(&config, "sha256:ff").is_err());
        config.spec_hash_policy = HashPolicy::Warn;
        assert!(check_spec_hash(&config, "sha256:ff").is_ok());
        config.spec_hash_policy = HashPolicy::Ignore;
        assert!(check_spec_hash(&config, "sha256:ff").is_ok());
        config.spec_hash_policy = HashPolicy::Fail;
        assert!(check_spec_hash(&config, "sha256:00").is_ok());
    }

    #[test]
    fn relative_server_urls_resolve_against_the_spec_url() {
        let docs = DocumentSet::from_value(
            DocId::parse("https://petstore3.swagger.io/api/v3/openapi.json").unwrap(),
            json!({"openapi": "3.0.0", "servers": [{"url": "/api/v3"}], "paths": {}}),
        );
        let config = NamespaceConfig::new("pets", "https://petstore3.swagger.io/api/v3/openapi.json");
        assert_eq!(
            resolve_base_url(&config, &docs).unwrap(),
            "https://petstore3.swagger.io/api/v3"
        );

        let local = DocumentSet::from_value(
            DocId::Inline("local".into()),
            json!({"openapi": "3.0.0", "servers": [{"url": "/api/v3"}], "paths": {}}),
        );
        assert_eq!(resolve_base_url(&config, &local).unwrap_err().kind(), "config");
    }

    #[test]
    fn forwarded_query_params_are_hidden_from_every_tool() {
        let docs = DocumentSet::from_value(
            DocId::Inline("weather".into()),
            serde_yaml::from_str(
                r#"
openapi: "3.0.0"
info: { title: OpenWeather, version: "2.5" }
paths:
  /weather:
    get:
      operationId: currentWeather
      parameters:
        - { name: q, in: query, required: true, schema: { type: string } }
        - { name: appid, in: query, required: true, schema: { type: string } }
      responses: {}
"#,
            )
            .unwrap(),
        );
        let mut config = ns("weather", "inline", &["/weather"]);
        config
            .forward_query_params
            .insert("x-api-key".into(), "appid".into());
        let tools = build_tools(&docs, &config).unwrap();
        assert!(tools[0].argument("appid").is_none());
        assert!(tools[0].argument("q").is_some());
    }

    /// Names and argument lists, for comparing two builds.
    #[derive(Debug, PartialEq)]
    struct ToolDescriptorList(Vec<ToolDescriptor>);

    impl ToolDescriptorList {
        fn of(ns: &Namespace) -> Self {
            Self(ns.tools.iter().map(ToolDescriptor::of).collect())
        }
    }
}
