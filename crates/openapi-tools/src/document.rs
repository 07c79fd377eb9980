//! Spec documents and `$ref` addressing.
//!
//! A build starts from one root document and transitively loads every document its `$ref`s
//! point into (relative files, `file://` URLs, `http(s)://` URLs). All documents are kept as raw
//! JSON values so schema walking, operation extraction and slimming can share them.
//!
//! `$ref` resolution is **relative to the document that contains the `$ref`**, so every lookup
//! carries the id of the containing document.

use crate::error::{OpenApiToolsError, Result};
use crate::transport::sanitize_reqwest_error;
use futures::future::try_join_all;
use reqwest::Client;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocId {
    Url(Url),
    File(PathBuf),
    /// In-memory document with no location; relative refs resolve against the working dir.
    Inline(String),
}

impl DocId {
    /// Parse a spec location into a document identifier (URL or file path).
    ///
    /// # Errors
    ///
    /// Returns an error if the location is an invalid URL or invalid file URL.
    pub fn parse(location: &str) -> Result<Self> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = Url::parse(location).map_err(|e| {
                OpenApiToolsError::Config(format!("Invalid spec URL '{location}': {e}"))
            })?;
            Ok(DocId::Url(strip_fragment(url)))
        } else if location.starts_with("file://") {
            Ok(DocId::File(file_url_to_path(location)?))
        } else {
            Ok(DocId::File(canonicalize_best_effort(PathBuf::from(
                location,
            ))))
        }
    }

    /// Key prefix used in canonical reference strings.
    fn key_prefix(&self) -> String {
        match self {
            DocId::Url(u) => format!("url:{u}"),
            DocId::File(p) => format!("file:{}", p.display()),
            DocId::Inline(name) => format!("inline:{name}"),
        }
    }

    #[must_use]
    pub fn as_url(&self) -> Option<&Url> {
        match self {
            DocId::Url(u) => Some(u),
            _ => None,
        }
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocId::Url(u) => write!(f, "{u}"),
            DocId::File(p) => write!(f, "{}", p.display()),
            DocId::Inline(name) => write!(f, "<{name}>"),
        }
    }
}

fn strip_fragment(mut url: Url) -> Url {
    url.set_fragment(None);
    url
}

fn canonicalize_best_effort(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

fn file_url_to_path(location: &str) -> Result<PathBuf> {
    let url = Url::parse(location)
        .map_err(|e| OpenApiToolsError::Config(format!("Invalid file URL '{location}': {e}")))?;
    let path = url.to_file_path().map_err(|()| {
        OpenApiToolsError::Config(format!("Invalid file URL (not a path): {location}"))
    })?;
    Ok(canonicalize_best_effort(path))
}

/// A resolved `$ref`: the document it lands in plus a JSON pointer (empty = whole document).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefTarget {
    pub doc: DocId,
    pub pointer: String,
}

impl RefTarget {
    /// Canonical identity string, e.g. `file:/specs/common.yaml#/components/schemas/Pet`.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}#{}", self.doc.key_prefix(), self.pointer)
    }

    /// Parse `reference` as written inside `current_doc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fragment is not a JSON pointer or the document part is not a
    /// valid URL/path.
    pub fn parse(current_doc: &DocId, reference: &str) -> Result<Self> {
        let (doc_part, frag) = match reference.split_once('#') {
            Some((d, f)) => (d, f),
            None => (reference, ""),
        };
        if !frag.is_empty() && !frag.starts_with('/') {
            return Err(OpenApiToolsError::OpenApi(format!(
                "Unsupported $ref fragment (expected JSON pointer starting with '/'): {reference}",
            )));
        }
        Ok(Self {
            doc: resolve_doc(current_doc, doc_part)?,
            pointer: frag.to_string(),
        })
    }

    /// Last pointer segment, unescaped (`Pet` for `#/components/schemas/Pet`).
    #[must_use]
    pub fn last_segment(&self) -> Option<String> {
        self.pointer
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(unescape_pointer_token)
    }
}

#[must_use]
pub fn unescape_pointer_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

#[must_use]
pub fn escape_pointer_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn resolve_doc(current_doc: &DocId, doc_part: &str) -> Result<DocId> {
    if doc_part.is_empty() {
        return Ok(current_doc.clone());
    }

    if doc_part.starts_with("http://") || doc_part.starts_with("https://") {
        let url = Url::parse(doc_part)
            .map_err(|e| OpenApiToolsError::OpenApi(format!("Bad $ref URL '{doc_part}': {e}")))?;
        return Ok(DocId::Url(strip_fragment(url)));
    }

    if doc_part.starts_with("file://") {
        return file_url_to_path(doc_part).map(DocId::File);
    }

    match current_doc {
        DocId::Url(base) => {
            let joined = base.join(doc_part).map_err(|e| {
                OpenApiToolsError::OpenApi(format!(
                    "Failed to resolve relative $ref '{doc_part}' against base {base}: {e}",
                ))
            })?;
            Ok(DocId::Url(strip_fragment(joined)))
        }
        DocId::File(base) => {
            let resolved = if Path::new(doc_part).is_absolute() {
                PathBuf::from(doc_part)
            } else {
                base.parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(doc_part)
            };
            Ok(DocId::File(canonicalize_best_effort(resolved)))
        }
        DocId::Inline(_) => Ok(DocId::File(canonicalize_best_effort(PathBuf::from(
            doc_part,
        )))),
    }
}

/// The root document plus every document reachable through `$ref`s.
///
/// Immutable once loaded; lives for one build.
#[derive(Debug, Clone)]
pub struct DocumentSet {
    root: DocId,
    docs: HashMap<DocId, Arc<Value>>,
    digest: String,
}

impl DocumentSet {
    /// Wrap an already-parsed root document. External refs are not fetched; use
    /// [`DocumentLoader`] for that.
    #[must_use]
    pub fn from_value(root: DocId, value: Value) -> Self {
        let digest = sha256_digest(value.to_string().as_bytes());
        let mut docs = HashMap::new();
        docs.insert(root.clone(), Arc::new(value));
        Self { root, docs, digest }
    }

    #[must_use]
    pub fn root_id(&self) -> &DocId {
        &self.root
    }

    #[must_use]
    pub fn root(&self) -> &Value {
        static EMPTY: Value = Value::Null;
        // The root is inserted on construction and never removed.
        self.docs.get(&self.root).map_or(&EMPTY, AsRef::as_ref)
    }

    /// `sha256:<hex>` of the root document's raw content.
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    #[must_use]
    pub fn get(&self, doc: &DocId) -> Option<&Value> {
        self.docs.get(doc).map(AsRef::as_ref)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.docs.len()
    }

    /// Every loaded document, sorted.
    #[must_use]
    pub fn documents(&self) -> Vec<&DocId> {
        let mut ids: Vec<&DocId> = self.docs.keys().collect();
        ids.sort();
        ids
    }

    /// Local files among the loaded documents, sorted.
    #[must_use]
    pub fn local_files(&self) -> Vec<PathBuf> {
        self.documents()
            .into_iter()
            .filter_map(|d| match d {
                DocId::File(path) => Some(path.clone()),
                _ => None,
            })
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Look up the value a reference target points at.
    ///
    /// # Errors
    ///
    /// Returns `SpecFetch` if the document was never loaded or the pointer is dangling.
    pub fn value_at(&self, target: &RefTarget) -> Result<&Value> {
        let doc = self.get(&target.doc).ok_or_else(|| OpenApiToolsError::SpecFetch {
            location: target.doc.to_string(),
            message: "referenced document was not loaded".to_string(),
        })?;
        if target.pointer.is_empty() {
            return Ok(doc);
        }
        doc.pointer(&target.pointer)
            .ok_or_else(|| OpenApiToolsError::SpecFetch {
                location: target.doc.to_string(),
                message: format!("dangling $ref: no value at '{}'", target.pointer),
            })
    }

    /// Resolve one `$ref` string written inside `current_doc`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is malformed or dangling.
    pub fn resolve_ref(&self, current_doc: &DocId, reference: &str) -> Result<(RefTarget, &Value)> {
        let target = RefTarget::parse(current_doc, reference)?;
        let value = self.value_at(&target)?;
        Ok((target, value))
    }

    /// Follow a chain of `$ref`s (parameters, request bodies, path items) to a concrete value.
    ///
    /// `pointer` is where `value` itself lives inside `doc`. The returned target is where the
    /// final value lives, so refs nested inside it resolve against the right document.
    ///
    /// # Errors
    ///
    /// Returns an error on dangling or cyclic reference chains.
    pub fn follow_refs<'a>(
        &'a self,
        doc: &DocId,
        pointer: &str,
        value: &'a Value,
    ) -> Result<(RefTarget, &'a Value)> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut at = RefTarget {
            doc: doc.clone(),
            pointer: pointer.to_string(),
        };
        let mut cur = value;
        while let Some(reference) = ref_of(cur) {
            let (target, next) = self.resolve_ref(&at.doc, reference)?;
            if !seen.insert(target.key()) {
                return Err(OpenApiToolsError::OpenApi(format!(
                    "Cyclic $ref detected while resolving: {reference}",
                )));
            }
            at = target;
            cur = next;
        }
        Ok((at, cur))
    }
}

/// The `$ref` string of a JSON object, if it has one.
#[must_use]
pub fn ref_of(value: &Value) -> Option<&str> {
    value.get("$ref").and_then(Value::as_str)
}

fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

/// Loads a root document and every external document it references.
///
/// Each unique location is fetched at most once per load; independent documents discovered in
/// the same pass are fetched concurrently.
#[derive(Debug, Clone, Default)]
pub struct DocumentLoader {
    client: Client,
}

impl DocumentLoader {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Load `location` and transitively every document referenced from it.
    ///
    /// # Errors
    ///
    /// Returns `SpecFetch` if any document cannot be fetched or parsed.
    pub async fn load(&self, location: &str) -> Result<DocumentSet> {
        let root = DocId::parse(location)?;
        tracing::info!(location = %root, "Loading OpenAPI spec");
        let raw = self.fetch_text(&root).await?;
        let value = parse_document(&root, &raw)?;
        let mut set = DocumentSet::from_value(root.clone(), value);
        set.digest = sha256_digest(raw.as_bytes());
        self.complete(set).await
    }

    /// Fetch every external document referenced by `set` that is not loaded yet.
    ///
    /// # Errors
    ///
    /// Returns `SpecFetch` if any referenced document cannot be fetched or parsed.
    pub async fn complete(&self, mut set: DocumentSet) -> Result<DocumentSet> {
        let mut frontier: Vec<DocId> = set.docs.keys().cloned().collect();
        while !frontier.is_empty() {
            let mut missing: BTreeSet<DocId> = BTreeSet::new();
            for doc in &frontier {
                if let Some(value) = set.docs.get(doc) {
                    collect_external_docs(doc, value, &mut missing)?;
                }
            }
            missing.retain(|d| !set.docs.contains_key(d));
            if missing.is_empty() {
                break;
            }

            let fetched = try_join_all(missing.iter().map(|doc| async move {
                let raw = self.fetch_text(doc).await?;
                let value = parse_document(doc, &raw)?;
                Ok::<_, OpenApiToolsError>((doc.clone(), value))
            }))
            .await?;

            frontier = Vec::with_capacity(fetched.len());
            for (doc, value) in fetched {
                tracing::debug!(document = %doc, "Loaded referenced document");
                set.docs.insert(doc.clone(), Arc::new(value));
                frontier.push(doc);
            }
        }
        Ok(set)
    }

    async fn fetch_text(&self, doc: &DocId) -> Result<String> {
        match doc {
            DocId::File(path) => {
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| OpenApiToolsError::SpecFetch {
                        location: doc.to_string(),
                        message: e.to_string(),
                    })
            }
            DocId::Url(url) => {
                let fetch_err = |e: &reqwest::Error| OpenApiToolsError::SpecFetch {
                    location: doc.to_string(),
                    message: sanitize_reqwest_error(e),
                };
                let resp = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| fetch_err(&e))?
                    .error_for_status()
                    .map_err(|e| fetch_err(&e))?;
                resp.text().await.map_err(|e| fetch_err(&e))
            }
            DocId::Inline(_) => Err(OpenApiToolsError::SpecFetch {
                location: doc.to_string(),
                message: "inline documents cannot be fetched".to_string(),
            }),
        }
    }
}

/// JSON first, YAML as fallback (JSON is valid YAML, but the JSON parser is faster and stricter).
fn parse_document(doc: &DocId, content: &str) -> Result<Value> {
    serde_json::from_str(content)
        .or_else(|_| serde_yaml::from_str(content))
        .map_err(|e: serde_yaml::Error| OpenApiToolsError::SpecFetch {
            location: doc.to_string(),
            message: format!("failed to parse document: {e}"),
        })
}

fn collect_external_docs(doc: &DocId, value: &Value, out: &mut BTreeSet<DocId>) -> Result<()> {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref")
                && !reference.starts_with('#')
            {
                out.insert(RefTarget::parse(doc, reference)?.doc);
            }
            for v in map.values() {
                collect_external_docs(doc, v, out)?;
            }
        }
        Value::Array(items) => {
            for v in items {
                collect_external_docs(doc, v, out)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_local_and_relative_refs() {
        let base = DocId::Url(Url::parse("https://example.com/specs/root.yaml").unwrap());

        let local = RefTarget::parse(&base, "#/components/schemas/Pet").unwrap();
        assert_eq!(local.doc, base);
        assert_eq!(
            local.key(),
            "url:https://example.com/specs/root.yaml#/components/schemas/Pet"
        );
        assert_eq!(local.last_segment().as_deref(), Some("Pet"));

        let relative = RefTarget::parse(&base, "common/types.yaml#/Id").unwrap();
        assert_eq!(
            relative.doc,
            DocId::Url(Url::parse("https://example.com/specs/common/types.yaml").unwrap())
        );

        let whole = RefTarget::parse(&base, "other.json").unwrap();
        assert_eq!(whole.pointer, "");
    }

    #[test]
    fn rejects_non_pointer_fragments() {
        let base = DocId::Inline("t".into());
        assert!(RefTarget::parse(&base, "#Pet").is_err());
    }

    #[test]
    fn dangling_pointer_is_spec_fetch_error() {
        let set = DocumentSet::from_value(
            DocId::Inline("t".into()),
            json!({"components": {"schemas": {}}}),
        );
        let err = set
            .resolve_ref(set.root_id(), "#/components/schemas/Missing")
            .unwrap_err();
        assert_eq!(err.kind(), "spec_fetch");
    }

    #[test]
    fn follow_refs_detects_cycles() {
        let set = DocumentSet::from_value(
            DocId::Inline("t".into()),
            json!({
                "components": {
                    "parameters": {
                        "A": {"$ref": "#/components/parameters/B"},
                        "B": {"$ref": "#/components/parameters/A"},
                        "C": {"name": "c", "in": "query"}
                    }
                }
            }),
        );
        let root = set.root_id().clone();
        let start = json!({"$ref": "#/components/parameters/A"});
        assert!(set.follow_refs(&root, "/x", &start).is_err());

        let ok = json!({"$ref": "#/components/parameters/C"});
        let (at, v) = set.follow_refs(&root, "/x", &ok).unwrap();
        assert_eq!(v["name"], "c");
        assert_eq!(at.pointer, "/components/parameters/C");

        let inline = json!({"name": "d"});
        let (at, _) = set.follow_refs(&root, "/x", &inline).unwrap();
        assert_eq!(at.pointer, "/x");
    }

    #[tokio::test]
    async fn loads_nested_external_files_once() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("shared")).unwrap();
        fs::write(
            dir.path().join("shared/types.yaml"),
            r"
Id:
  type: string
",
        )
        .unwrap();
        fs::write(
            dir.path().join("shared/pet.yaml"),
            r"
Pet:
  type: object
  properties:
    id: { $ref: './types.yaml#/Id' }
",
        )
        .unwrap();
        let root_path = dir.path().join("root.yaml");
        fs::write(
            &root_path,
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths:
  /pets:
    get:
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: "shared/pet.yaml#/Pet" }
  /ids:
    get:
      responses:
        "200":
          description: ok
          content:
            application/json:
              schema: { $ref: "./shared/types.yaml#/Id" }
"#,
        )
        .unwrap();

        let set = DocumentLoader::default()
            .load(&root_path.display().to_string())
            .await
            .unwrap();
        assert_eq!(set.len(), 3);
        assert!(set.digest().starts_with("sha256:"));

        let pet_doc = DocId::File(fs::canonicalize(dir.path().join("shared/pet.yaml")).unwrap());
        let (target, id) = set
            .resolve_ref(&pet_doc, "./types.yaml#/Id")
            .unwrap();
        assert_eq!(id["type"], "string");
        assert!(target.key().ends_with("types.yaml#/Id"));
    }

    #[tokio::test]
    async fn unreadable_or_unparseable_roots_are_spec_fetch_errors() {
        let dir = tempdir().unwrap();
        let garbled = dir.path().join("garbled.yaml");
        fs::write(&garbled, "openapi: [unclosed").unwrap();

        let loader = DocumentLoader::default();
        let err = loader.load(&garbled.to_string_lossy()).await.unwrap_err();
        assert_eq!(err.kind(), "spec_fetch");
        assert!(err.to_string().contains("failed to parse document"));

        let missing = dir.path().join("absent.yaml");
        let err = loader.load(&missing.to_string_lossy()).await.unwrap_err();
        assert_eq!(err.kind(), "spec_fetch");
    }

    #[tokio::test]
    async fn missing_external_file_fails_the_load() {
        let dir = tempdir().unwrap();
        let root_path = dir.path().join("root.yaml");
        fs::write(
            &root_path,
            r#"
openapi: "3.0.0"
info: { title: t, version: "1" }
paths: {}
components:
  schemas:
    X: { $ref: "./nope.yaml#/X" }
"#,
        )
        .unwrap();
        let err = DocumentLoader::default()
            .load(&root_path.display().to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "spec_fetch");
    }
}
