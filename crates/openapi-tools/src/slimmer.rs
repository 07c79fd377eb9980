//! Spec slimming.
//!
//! Keeps only the selected paths plus everything they transitively reference, pulls external
//! definitions into `components`, and rewrites every `$ref` to a local pointer. The output is a
//! single self-contained document.

use crate::document::{DocId, DocumentSet, RefTarget, escape_pointer_token, ref_of, unescape_pointer_token};
use crate::error::{OpenApiToolsError, Result};
use crate::selector::PathSelector;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Top-level keys carried over verbatim.
const COPIED_KEYS: [&str; 5] = ["openapi", "info", "servers", "security", "tags"];

/// Produce the self-contained subset of `docs` reachable from the paths `selector` matches.
///
/// # Errors
///
/// Returns `SpecFetch` for dangling references and `OpenApi` for a malformed `paths` object.
pub fn slim(docs: &DocumentSet, selector: &PathSelector) -> Result<Value> {
    let root = docs.root();
    let mut interner = Interner::new(docs);

    let mut paths = Map::new();
    if let Some(all) = root.get("paths") {
        let all = all
            .as_object()
            .ok_or_else(|| OpenApiToolsError::OpenApi("'paths' must be an object".to_string()))?;
        for (path, item) in all {
            if !selector.matches(path) {
                continue;
            }
            let pointer = format!("/paths/{}", escape_pointer_token(path));
            let (at, item) = docs.follow_refs(docs.root_id(), &pointer, item)?;
            paths.insert(path.clone(), interner.rewrite(item, &at.doc, "schemas")?);
        }
    }

    let mut components: BTreeMap<String, BTreeMap<String, Value>> = BTreeMap::new();
    while let Some(entry) = interner.queue.pop_front() {
        let value = docs.value_at(&entry.target)?;
        let rewritten = interner.rewrite(value, &entry.target.doc, section_ref(&entry.section))?;
        components
            .entry(entry.section)
            .or_default()
            .insert(entry.name, rewritten);
    }

    if let Some(schemes) = root
        .pointer("/components/securitySchemes")
        .and_then(Value::as_object)
    {
        let section = components.entry("securitySchemes".to_string()).or_default();
        for (name, scheme) in schemes {
            section.insert(name.clone(), scheme.clone());
        }
    }

    let mut out = Map::new();
    for key in COPIED_KEYS {
        if let Some(v) = root.get(key) {
            out.insert(key.to_string(), v.clone());
        }
    }
    out.insert("paths".to_string(), Value::Object(paths));
    if !components.is_empty() {
        let components: Map<String, Value> = components
            .into_iter()
            .map(|(section, entries)| {
                let entries: Map<String, Value> = entries.into_iter().collect();
                (section, Value::Object(entries))
            })
            .collect();
        out.insert("components".to_string(), Value::Object(components));
    }

    tracing::debug!(
        paths = out["paths"].as_object().map_or(0, Map::len),
        definitions = interner.assigned.len(),
        "Slimmed spec"
    );
    Ok(Value::Object(out))
}

struct QueuedDefinition {
    target: RefTarget,
    section: String,
    name: String,
}

/// Assigns each reachable definition one local component slot.
struct Interner {
    root: DocId,
    /// Canonical ref key -> local `#/components/...` pointer.
    assigned: HashMap<String, String>,
    /// Names taken per section. Root component names are reserved up front.
    taken: HashMap<String, HashSet<String>>,
    queue: VecDeque<QueuedDefinition>,
}

impl Interner {
    fn new(docs: &DocumentSet) -> Self {
        let mut taken: HashMap<String, HashSet<String>> = HashMap::new();
        if let Some(sections) = docs.root().get("components").and_then(Value::as_object) {
            for (section, entries) in sections {
                if let Some(entries) = entries.as_object() {
                    taken
                        .entry(section.clone())
                        .or_default()
                        .extend(entries.keys().cloned());
                }
            }
        }
        Self {
            root: docs.root_id().clone(),
            assigned: HashMap::new(),
            taken,
            queue: VecDeque::new(),
        }
    }

    /// Copy `value`, replacing every `$ref` with a local pointer and queueing its target.
    ///
    /// `section` is where a `$ref` found directly on `value` lands when its target is not
    /// already a `components` entry.
    fn rewrite(&mut self, value: &Value, doc: &DocId, section: &'static str) -> Result<Value> {
        match value {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                if let Some(reference) = ref_of(value) {
                    let target = RefTarget::parse(doc, reference)?;
                    let local = self.intern(target, section);
                    out.insert("$ref".to_string(), Value::String(local));
                }
                for (k, v) in map {
                    if k == "$ref" && v.is_string() {
                        continue;
                    }
                    let rewritten = match (named_map_section(k), v) {
                        // `responses: {"200": {$ref}}`: every entry is one definition.
                        (Some(entry_section), Value::Object(entries)) if ref_of(v).is_none() => {
                            let mut m = Map::with_capacity(entries.len());
                            for (name, entry) in entries {
                                m.insert(name.clone(), self.rewrite(entry, doc, entry_section)?);
                            }
                            Value::Object(m)
                        }
                        _ => self.rewrite(v, doc, direct_section(k))?,
                    };
                    out.insert(k.clone(), rewritten);
                }
                Ok(Value::Object(out))
            }
            // Array elements share the array's section (`parameters: [...]`).
            Value::Array(items) => items
                .iter()
                .map(|v| self.rewrite(v, doc, section))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other.clone()),
        }
    }

    fn intern(&mut self, target: RefTarget, section_hint: &str) -> String {
        let key = target.key();
        if let Some(local) = self.assigned.get(&key) {
            return local.clone();
        }

        let (section, name) = match component_slot(&target.pointer) {
            Some((section, name)) if target.doc == self.root => (section, name),
            Some((section, name)) => {
                let name = self.unique_name(&section, &name);
                (section, name)
            }
            None => {
                let section = section_hint.to_string();
                let base = target
                    .last_segment()
                    .or_else(|| document_stem(&target.doc))
                    .unwrap_or_else(|| "Definition".to_string());
                let name = self.unique_name(&section, &base);
                (section, name)
            }
        };

        let local = format!(
            "#/components/{}/{}",
            escape_pointer_token(&section),
            escape_pointer_token(&name)
        );
        self.assigned.insert(key, local.clone());
        self.queue.push_back(QueuedDefinition {
            target,
            section,
            name,
        });
        local
    }

    fn unique_name(&mut self, section: &str, base: &str) -> String {
        let taken = self.taken.entry(section.to_string()).or_default();
        if taken.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}_{n}");
            if taken.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// `(section, name)` for a pointer of the form `/components/<section>/<name>`.
fn component_slot(pointer: &str) -> Option<(String, String)> {
    let mut tokens = pointer.strip_prefix("/components/")?.split('/');
    let section = tokens.next()?;
    let name = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }
    Some((unescape_pointer_token(section), unescape_pointer_token(name)))
}

/// Section for a `$ref` sitting directly under `key`.
fn direct_section(key: &str) -> &'static str {
    match key {
        "parameters" => "parameters",
        "requestBody" => "requestBodies",
        _ => "schemas",
    }
}

/// Keys whose value maps names to definitions of one section.
fn named_map_section(key: &str) -> Option<&'static str> {
    match key {
        "responses" => Some("responses"),
        "headers" => Some("headers"),
        "examples" => Some("examples"),
        "links" => Some("links"),
        "callbacks" => Some("callbacks"),
        _ => None,
    }
}

/// The static name of a known section; unknown sections fall back to `schemas` for nested refs.
fn section_ref(section: &str) -> &'static str {
    const KNOWN: [&str; 9] = [
        "schemas",
        "parameters",
        "requestBodies",
        "responses",
        "headers",
        "examples",
        "links",
        "callbacks",
        "securitySchemes",
    ];
    KNOWN
        .into_iter()
        .find(|k| *k == section)
        .unwrap_or("schemas")
}

fn document_stem(doc: &DocId) -> Option<String> {
    let name = match doc {
        DocId::File(path) => path.file_stem()?.to_string_lossy().into_owned(),
        DocId::Url(url) => url.path_segments()?.next_back()?.split('.').next()?.to_string(),
        DocId::Inline(name) => name.clone(),
    };
    (!name.is_empty()).then_some(name)
}
