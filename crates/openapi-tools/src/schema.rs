//! Resolved schema graph.
//!
//! Schemas are stored in an arena and addressed by [`SchemaId`]. Every `$ref` target gets exactly
//! one node, keyed by its canonical reference string, so a cyclic reference resolves to the *same*
//! id as the node it points back to. Resolution is depth-first: a `Pending` placeholder is
//! registered before a target is walked and overwritten in place once the walk finishes.

use crate::document::{DocId, DocumentSet, RefTarget, escape_pointer_token, ref_of};
use crate::error::{OpenApiToolsError, Result};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Depth limit when comparing two schemas structurally (`allOf` conflict detection).
const SHAPE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SchemaId(usize);

impl SchemaId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveType {
    String,
    Integer,
    Number,
    Boolean,
}

impl PrimitiveType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectSchema {
    /// Properties in declaration order.
    pub properties: Vec<(String, SchemaId)>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl ObjectSchema {
    #[must_use]
    pub fn property(&self, name: &str) -> Option<SchemaId> {
        self.properties
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }

    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaKind {
    Primitive(PrimitiveType),
    Object(ObjectSchema),
    Array { items: Option<SchemaId> },
    OneOf(Vec<SchemaId>),
    AnyOf(Vec<SchemaId>),
    /// No usable type information.
    Any,
    /// `$ref` whose target is itself a `$ref`.
    Ref(SchemaId),
    /// Placeholder for a reference still being resolved.
    Pending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaKind,
    /// Canonical reference string when this node is a `$ref` target.
    pub ref_key: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub default: Option<Value>,
    pub enum_values: Vec<Value>,
    pub format: Option<String>,
    pub nullable: bool,
}

impl SchemaNode {
    fn bare(kind: SchemaKind) -> Self {
        Self {
            kind,
            ref_key: None,
            title: None,
            description: None,
            default: None,
            enum_values: Vec::new(),
            format: None,
            nullable: false,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match &self.kind {
            SchemaKind::Object(o) => Some(o),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    nodes: Vec<SchemaNode>,
    by_ref: HashMap<String, SchemaId>,
    /// `allOf` merges waiting for a branch that is still being resolved.
    deferred: Vec<DeferredAllOf>,
}

/// An `allOf` whose merged shape lands in `slot` once every branch is back-patched.
#[derive(Debug, Clone)]
struct DeferredAllOf {
    slot: SchemaId,
    branches: Vec<SchemaId>,
    pointer: String,
}

impl SchemaGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids are only minted by this graph, so indexing cannot go out of bounds.
    #[must_use]
    pub fn get(&self, id: SchemaId) -> &SchemaNode {
        &self.nodes[id.0]
    }

    /// Id registered for a canonical reference key, if that reference has been walked.
    #[must_use]
    pub fn lookup_ref(&self, key: &str) -> Option<SchemaId> {
        self.by_ref.get(key).copied()
    }

    /// Skip through `Ref` aliases to the node that carries the actual shape.
    #[must_use]
    pub fn follow(&self, id: SchemaId) -> SchemaId {
        let mut cur = id;
        for _ in 0..=self.nodes.len() {
            match self.get(cur).kind {
                SchemaKind::Ref(next) => cur = next,
                _ => return cur,
            }
        }
        cur
    }

    /// `get(follow(id))`.
    #[must_use]
    pub fn resolved(&self, id: SchemaId) -> &SchemaNode {
        self.get(self.follow(id))
    }

    /// Resolve a schema value found at `pointer` inside `doc`.
    ///
    /// # Errors
    ///
    /// Returns `SpecFetch` for dangling refs, `SchemaConflict` for irreconcilable `allOf`
    /// branches and `UnsupportedSchema` for constructs that cannot be represented.
    pub fn resolve(
        &mut self,
        docs: &DocumentSet,
        doc: &DocId,
        value: &Value,
        pointer: &str,
    ) -> Result<SchemaId> {
        if let Some(reference) = ref_of(value) {
            return self.resolve_ref(docs, doc, reference);
        }
        let node = self.build_node(docs, doc, value, pointer)?;
        Ok(self.push(node))
    }

    fn push(&mut self, node: SchemaNode) -> SchemaId {
        let id = SchemaId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn resolve_ref(&mut self, docs: &DocumentSet, doc: &DocId, reference: &str) -> Result<SchemaId> {
        let target = RefTarget::parse(doc, reference)?;
        let key = target.key();
        if let Some(id) = self.by_ref.get(&key) {
            return Ok(*id);
        }

        let value = docs.value_at(&target)?;
        let id = self.push(SchemaNode::bare(SchemaKind::Pending));
        self.by_ref.insert(key.clone(), id);

        let mut node = if let Some(next) = ref_of(value) {
            let inner = self.resolve_ref(docs, &target.doc, next)?;
            if self.follow_reaches(inner, id) {
                return Err(unsupported(
                    &target.pointer,
                    format!("$ref alias cycle through '{reference}'"),
                ));
            }
            SchemaNode::bare(SchemaKind::Ref(inner))
        } else {
            let node = self.build_node(docs, &target.doc, value, &target.pointer)?;
            if let SchemaKind::Ref(inner) = node.kind
                && self.follow_reaches(inner, id)
            {
                return Err(unsupported(
                    &target.pointer,
                    "allOf refers only to the schema itself".into(),
                ));
            }
            node
        };
        node.ref_key = Some(key);
        self.nodes[id.0] = node;
        self.settle_deferred()?;
        Ok(id)
    }

    fn is_pending(&self, id: SchemaId) -> bool {
        matches!(self.resolved(id).kind, SchemaKind::Pending)
    }

    /// Merge every deferred `allOf` whose branches are all resolved now.
    fn settle_deferred(&mut self) -> Result<()> {
        let mut i = 0;
        while i < self.deferred.len() {
            let d = &self.deferred[i];
            let ready = d
                .branches
                .iter()
                .all(|b| self.follow(*b) == d.slot || !self.is_pending(*b));
            if !ready {
                i += 1;
                continue;
            }
            let d = self.deferred.swap_remove(i);
            let mut merged = SchemaNode::bare(SchemaKind::Any);
            let kind = self.combine_all_of(&d.branches, &d.pointer, Some(d.slot), &mut merged)?;
            merged.kind = kind;
            self.nodes[d.slot.0] = merged;
            // Settling one merge can unblock an earlier one.
            i = 0;
        }
        Ok(())
    }

    fn follow_reaches(&self, start: SchemaId, needle: SchemaId) -> bool {
        let mut cur = start;
        for _ in 0..=self.nodes.len() {
            if cur == needle {
                return true;
            }
            match self.get(cur).kind {
                SchemaKind::Ref(next) => cur = next,
                _ => return false,
            }
        }
        true
    }

    fn build_node(
        &mut self,
        docs: &DocumentSet,
        doc: &DocId,
        value: &Value,
        pointer: &str,
    ) -> Result<SchemaNode> {
        let obj = match value {
            Value::Object(obj) => obj,
            // JSON Schema boolean form.
            Value::Bool(_) => return Ok(SchemaNode::bare(SchemaKind::Any)),
            other => {
                return Err(unsupported(
                    pointer,
                    format!("schema must be an object, got {other}"),
                ));
            }
        };

        let mut node = SchemaNode::bare(SchemaKind::Any);
        node.title = obj.get("title").and_then(Value::as_str).map(String::from);
        node.description = obj
            .get("description")
            .and_then(Value::as_str)
            .map(String::from);
        node.default = obj.get("default").cloned();
        node.enum_values = obj
            .get("enum")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        node.format = obj.get("format").and_then(Value::as_str).map(String::from);
        node.nullable = obj.get("nullable").and_then(Value::as_bool) == Some(true);

        if let Some(branches) = obj.get("allOf") {
            let kind = self.merge_all_of(docs, doc, obj, branches, pointer, &mut node)?;
            node.kind = kind;
            return Ok(node);
        }
        if let Some(branches) = obj.get("oneOf") {
            let ids = self.resolve_branches(docs, doc, branches, &format!("{pointer}/oneOf"))?;
            node.kind = SchemaKind::OneOf(ids);
            return Ok(node);
        }
        if let Some(branches) = obj.get("anyOf") {
            let ids = self.resolve_branches(docs, doc, branches, &format!("{pointer}/anyOf"))?;
            node.kind = SchemaKind::AnyOf(ids);
            return Ok(node);
        }

        let ty = match obj.get("type") {
            None => infer_type(obj),
            Some(Value::String(t)) => Some(t.clone()),
            Some(Value::Array(types)) => {
                // 3.1 style: first non-null entry, "null" makes it nullable.
                let mut picked = None;
                for t in types {
                    match t.as_str() {
                        Some("null") => node.nullable = true,
                        Some(t) if picked.is_none() => picked = Some(t.to_string()),
                        Some(_) => {}
                        None => {
                            return Err(unsupported(
                                &format!("{pointer}/type"),
                                format!("type entries must be strings, got {t}"),
                            ));
                        }
                    }
                }
                picked
            }
            Some(other) => {
                return Err(unsupported(
                    &format!("{pointer}/type"),
                    format!("unsupported type keyword {other}"),
                ));
            }
        };

        node.kind = match ty.as_deref() {
            None => SchemaKind::Any,
            Some("string") => SchemaKind::Primitive(PrimitiveType::String),
            Some("integer") => SchemaKind::Primitive(PrimitiveType::Integer),
            Some("number") => SchemaKind::Primitive(PrimitiveType::Number),
            Some("boolean") => SchemaKind::Primitive(PrimitiveType::Boolean),
            Some("null") => {
                node.nullable = true;
                SchemaKind::Any
            }
            Some("object") => SchemaKind::Object(self.build_object(docs, doc, obj, pointer)?),
            Some("array") => {
                let items = match obj.get("items") {
                    Some(items) => Some(self.resolve(docs, doc, items, &format!("{pointer}/items"))?),
                    None => None,
                };
                SchemaKind::Array { items }
            }
            Some(other) => {
                return Err(unsupported(
                    &format!("{pointer}/type"),
                    format!("unknown type '{other}'"),
                ));
            }
        };
        Ok(node)
    }

    fn build_object(
        &mut self,
        docs: &DocumentSet,
        doc: &DocId,
        obj: &Map<String, Value>,
        pointer: &str,
    ) -> Result<ObjectSchema> {
        let mut out = ObjectSchema {
            additional_properties: !matches!(obj.get("additionalProperties"), Some(Value::Bool(false))),
            ..ObjectSchema::default()
        };
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (name, schema) in props {
                let child_ptr = format!("{pointer}/properties/{}", escape_pointer_token(name));
                let id = self.resolve(docs, doc, schema, &child_ptr)?;
                out.properties.push((name.clone(), id));
            }
        }
        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            out.required = required
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
        }
        Ok(out)
    }

    fn resolve_branches(
        &mut self,
        docs: &DocumentSet,
        doc: &DocId,
        branches: &Value,
        pointer: &str,
    ) -> Result<Vec<SchemaId>> {
        let Some(items) = branches.as_array() else {
            return Err(unsupported(pointer, "composition keyword must be an array".into()));
        };
        items
            .iter()
            .enumerate()
            .map(|(i, b)| self.resolve(docs, doc, b, &format!("{pointer}/{i}")))
            .collect()
    }

    /// Merge `allOf` branches (plus sibling keywords of the composing schema) into one shape.
    fn merge_all_of(
        &mut self,
        docs: &DocumentSet,
        doc: &DocId,
        obj: &Map<String, Value>,
        branches: &Value,
        pointer: &str,
        node: &mut SchemaNode,
    ) -> Result<SchemaKind> {
        let all_of_ptr = format!("{pointer}/allOf");
        let mut ids = self.resolve_branches(docs, doc, branches, &all_of_ptr)?;

        let has_siblings = obj.contains_key("properties")
            || obj.contains_key("required")
            || obj.get("type").and_then(Value::as_str) == Some("object");
        if has_siblings {
            let siblings = self.build_object(docs, doc, obj, pointer)?;
            ids.push(self.push(SchemaNode::bare(SchemaKind::Object(siblings))));
        }

        let pending: Vec<SchemaId> = ids.iter().copied().filter(|id| self.is_pending(*id)).collect();
        if pending.is_empty() {
            return self.combine_all_of(&ids, &all_of_ptr, None, node);
        }

        let rest: Vec<SchemaId> = ids.iter().copied().filter(|id| !pending.contains(id)).collect();
        if let [only] = pending.as_slice()
            && rest
                .iter()
                .all(|id| matches!(self.resolved(*id).kind, SchemaKind::Any))
        {
            // Wrapped reference back to a schema on the resolution stack: alias it.
            for id in &rest {
                let branch = self.resolved(*id);
                if node.description.is_none() {
                    node.description.clone_from(&branch.description);
                }
                node.nullable |= branch.nullable;
            }
            return Ok(SchemaKind::Ref(*only));
        }

        let slot = self.push(SchemaNode::bare(SchemaKind::Pending));
        self.deferred.push(DeferredAllOf {
            slot,
            branches: ids,
            pointer: all_of_ptr,
        });
        Ok(SchemaKind::Ref(slot))
    }

    /// Merge resolved `allOf` branches into one shape. Branches that lead back to `skip` are
    /// ignored.
    fn combine_all_of(
        &self,
        ids: &[SchemaId],
        all_of_ptr: &str,
        skip: Option<SchemaId>,
        node: &mut SchemaNode,
    ) -> Result<SchemaKind> {
        let mut merged: Option<ObjectSchema> = None;
        let mut other: Option<SchemaId> = None;

        for (i, id) in ids.iter().enumerate() {
            let target = self.follow(*id);
            if Some(target) == skip {
                continue;
            }
            let branch_ptr = format!("{all_of_ptr}/{i}");
            let branch = self.get(target).clone();
            if node.description.is_none() {
                node.description.clone_from(&branch.description);
            }
            if node.enum_values.is_empty() {
                node.enum_values.clone_from(&branch.enum_values);
            }
            node.nullable |= branch.nullable;

            match branch.kind {
                SchemaKind::Pending => {
                    return Err(unsupported(
                        &branch_ptr,
                        "allOf branch refers back to a schema that is still being resolved".into(),
                    ));
                }
                SchemaKind::Any => {}
                SchemaKind::Object(o) => {
                    let acc = merged.get_or_insert_with(|| ObjectSchema {
                        additional_properties: true,
                        ..ObjectSchema::default()
                    });
                    acc.additional_properties &= o.additional_properties;
                    for (name, prop) in o.properties {
                        match acc.property(&name) {
                            Some(existing) if !self.same_shape(existing, prop, SHAPE_DEPTH) => {
                                return Err(OpenApiToolsError::SchemaConflict {
                                    operation: String::new(),
                                    pointer: format!(
                                        "{branch_ptr}/properties/{}",
                                        escape_pointer_token(&name)
                                    ),
                                    message: format!(
                                        "property '{name}' has incompatible shapes across allOf branches"
                                    ),
                                });
                            }
                            Some(_) => {}
                            None => acc.properties.push((name, prop)),
                        }
                    }
                    for r in o.required {
                        if !acc.is_required(&r) {
                            acc.required.push(r);
                        }
                    }
                }
                _ => match other {
                    Some(prev) if !self.same_shape(prev, target, SHAPE_DEPTH) => {
                        return Err(OpenApiToolsError::SchemaConflict {
                            operation: String::new(),
                            pointer: branch_ptr,
                            message: "allOf branches have incompatible types".into(),
                        });
                    }
                    Some(_) => {}
                    None => other = Some(target),
                },
            }
        }

        match (merged, other) {
            (Some(_), Some(_)) => Err(OpenApiToolsError::SchemaConflict {
                operation: String::new(),
                pointer: all_of_ptr.to_string(),
                message: "allOf mixes object and non-object branches".into(),
            }),
            (Some(o), None) => Ok(SchemaKind::Object(o)),
            (None, Some(id)) => Ok(self.get(id).kind.clone()),
            (None, None) => Ok(SchemaKind::Any),
        }
    }

    /// Structural equality up to `depth` levels; identical ids are always equal.
    #[must_use]
    pub fn same_shape(&self, a: SchemaId, b: SchemaId, depth: usize) -> bool {
        let (a, b) = (self.follow(a), self.follow(b));
        if a == b || depth == 0 {
            return true;
        }
        match (&self.get(a).kind, &self.get(b).kind) {
            (SchemaKind::Primitive(x), SchemaKind::Primitive(y)) => x == y,
            (SchemaKind::Any, SchemaKind::Any) => true,
            (SchemaKind::Array { items: x }, SchemaKind::Array { items: y }) => match (x, y) {
                (Some(x), Some(y)) => self.same_shape(*x, *y, depth - 1),
                (None, None) => true,
                _ => false,
            },
            (SchemaKind::Object(x), SchemaKind::Object(y)) => {
                x.properties.len() == y.properties.len()
                    && x.properties.iter().all(|(name, xid)| {
                        y.property(name)
                            .is_some_and(|yid| self.same_shape(*xid, yid, depth - 1))
                    })
            }
            (SchemaKind::OneOf(x), SchemaKind::OneOf(y))
            | (SchemaKind::AnyOf(x), SchemaKind::AnyOf(y)) => {
                x.len() == y.len()
                    && x.iter()
                        .zip(y)
                        .all(|(xi, yi)| self.same_shape(*xi, *yi, depth - 1))
            }
            // A placeholder may still turn into the other shape.
            (SchemaKind::Pending, _) | (_, SchemaKind::Pending) => true,
            _ => false,
        }
    }
}

fn infer_type(obj: &Map<String, Value>) -> Option<String> {
    if obj.contains_key("properties")
        || obj.contains_key("additionalProperties")
        || obj.contains_key("required")
    {
        return Some("object".into());
    }
    if obj.contains_key("items") {
        return Some("array".into());
    }
    let first = obj.get("enum").and_then(Value::as_array)?.first()?;
    match first {
        Value::String(_) => Some("string".into()),
        Value::Bool(_) => Some("boolean".into()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("integer".into()),
        Value::Number(_) => Some("number".into()),
        _ => None,
    }
}

fn unsupported(pointer: &str, message: String) -> OpenApiToolsError {
    OpenApiToolsError::UnsupportedSchema {
        operation: String::new(),
        pointer: pointer.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(value: Value) -> DocumentSet {
        DocumentSet::from_value(DocId::Inline("test".into()), value)
    }

    fn resolve_component(set: &DocumentSet, graph: &mut SchemaGraph, name: &str) -> Result<SchemaId> {
        let root = set.root_id().clone();
        graph.resolve(
            set,
            &root,
            &json!({"$ref": format!("#/components/schemas/{name}")}),
            "",
        )
    }

    #[test]
    fn self_reference_resolves_to_same_node() {
        let set = docs(json!({
            "components": {"schemas": {"Node": {
                "type": "object",
                "properties": {
                    "value": {"type": "string"},
                    "children": {"type": "array", "items": {"$ref": "#/components/schemas/Node"}}
                }
            }}}
        }));
        let mut graph = SchemaGraph::new();
        let node = resolve_component(&set, &mut graph, "Node").unwrap();

        let obj = graph.get(node).as_object().unwrap();
        let children = obj.property("children").unwrap();
        let SchemaKind::Array { items: Some(items) } = graph.get(children).kind else {
            panic!("children should be an array");
        };
        assert_eq!(items, node);
        assert!(graph.get(node).ref_key.as_deref().unwrap().ends_with("#/components/schemas/Node"));
    }

    #[test]
    fn mutual_recursion_terminates_with_shared_identity() {
        let set = docs(json!({
            "components": {"schemas": {
                "A": {"type": "object", "properties": {"b": {"$ref": "#/components/schemas/B"}}},
                "B": {"type": "object", "properties": {"a": {"$ref": "#/components/schemas/A"}}}
            }}
        }));
        let mut graph = SchemaGraph::new();
        let a = resolve_component(&set, &mut graph, "A").unwrap();
        let b = graph.get(a).as_object().unwrap().property("b").unwrap();
        let back = graph.get(b).as_object().unwrap().property("a").unwrap();
        assert_eq!(back, a);
        assert_eq!(graph.len(), 2);

        // Walking again hits the cache.
        let again = resolve_component(&set, &mut graph, "B").unwrap();
        assert_eq!(again, b);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn all_of_merges_properties_and_required() {
        let set = docs(json!({
            "components": {"schemas": {
                "Base": {
                    "type": "object",
                    "required": ["id"],
                    "properties": {"id": {"type": "integer"}, "name": {"type": "string"}}
                },
                "Pet": {
                    "allOf": [
                        {"$ref": "#/components/schemas/Base"},
                        {"type": "object", "required": ["tag"], "properties": {"tag": {"type": "string"}}}
                    ],
                    "properties": {"name": {"type": "string"}, "age": {"type": "integer"}}
                }
            }}
        }));
        let mut graph = SchemaGraph::new();
        let pet = resolve_component(&set, &mut graph, "Pet").unwrap();
        let obj = graph.get(pet).as_object().unwrap();
        let names: Vec<&str> = obj.properties.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "tag", "age"]);
        assert_eq!(obj.required, vec!["id".to_string(), "tag".to_string()]);
    }

    #[test]
    fn all_of_conflict_reports_pointer() {
        let set = docs(json!({
            "components": {"schemas": {
                "Bad": {"allOf": [
                    {"type": "object", "properties": {"id": {"type": "string"}}},
                    {"type": "object", "properties": {"id": {"type": "integer"}}}
                ]}
            }}
        }));
        let mut graph = SchemaGraph::new();
        let err = resolve_component(&set, &mut graph, "Bad").unwrap_err();
        match err {
            OpenApiToolsError::SchemaConflict { pointer, .. } => {
                assert_eq!(pointer, "/components/schemas/Bad/allOf/1/properties/id");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn all_of_wrapped_self_reference_resolves() {
        let set = docs(json!({
            "components": {"schemas": {"Node": {
                "type": "object",
                "properties": {
                    "value": {"type": "string"},
                    "parent": {
                        "allOf": [{"$ref": "#/components/schemas/Node"}],
                        "nullable": true,
                        "description": "Enclosing node"
                    }
                }
            }}}
        }));
        let mut graph = SchemaGraph::new();
        let node = resolve_component(&set, &mut graph, "Node").unwrap();

        let parent = graph.get(node).as_object().unwrap().property("parent").unwrap();
        assert_eq!(graph.follow(parent), node);
        assert!(graph.get(parent).nullable);
        assert_eq!(graph.get(parent).description.as_deref(), Some("Enclosing node"));
    }

    #[test]
    fn all_of_over_a_schema_under_construction_is_merged_afterwards() {
        let set = docs(json!({
            "components": {"schemas": {
                "Category": {
                    "type": "object",
                    "required": ["name"],
                    "properties": {
                        "name": {"type": "string"},
                        "children": {"type": "array", "items": {"$ref": "#/components/schemas/Leaf"}}
                    }
                },
                "Leaf": {"allOf": [
                    {"$ref": "#/components/schemas/Category"},
                    {"type": "object", "properties": {"sku": {"type": "string"}}}
                ]}
            }}
        }));
        let mut graph = SchemaGraph::new();
        let category = resolve_component(&set, &mut graph, "Category").unwrap();

        let children = graph.get(category).as_object().unwrap().property("children").unwrap();
        let SchemaKind::Array { items: Some(leaf) } = graph.get(children).kind else {
            panic!("children should be an array");
        };
        let merged = graph.resolved(leaf).as_object().unwrap();
        let names: Vec<&str> = merged.properties.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["name", "children", "sku"]);
        assert_eq!(merged.required, vec!["name".to_string()]);
    }

    #[test]
    fn self_inheriting_all_of_keeps_own_properties() {
        let set = docs(json!({
            "components": {"schemas": {"Tree": {"allOf": [
                {"$ref": "#/components/schemas/Tree"},
                {"type": "object", "properties": {"label": {"type": "string"}}}
            ]}}}
        }));
        let mut graph = SchemaGraph::new();
        let tree = resolve_component(&set, &mut graph, "Tree").unwrap();
        let obj = graph.resolved(tree).as_object().unwrap();
        assert_eq!(obj.property("label").map(|id| &graph.get(id).kind), Some(&SchemaKind::Primitive(PrimitiveType::String)));

        let lone = docs(json!({
            "components": {"schemas": {"Echo": {"allOf": [{"$ref": "#/components/schemas/Echo"}]}}}
        }));
        let mut graph = SchemaGraph::new();
        let err = resolve_component(&lone, &mut graph, "Echo").unwrap_err();
        assert_eq!(err.kind(), "unsupported_schema");
    }

    #[test]
    fn unknown_type_is_unsupported_with_pointer() {
        let set = docs(json!({
            "components": {"schemas": {
                "Weird": {"type": "object", "properties": {"blob": {"type": "file"}}}
            }}
        }));
        let mut graph = SchemaGraph::new();
        let err = resolve_component(&set, &mut graph, "Weird").unwrap_err();
        match err {
            OpenApiToolsError::UnsupportedSchema { pointer, .. } => {
                assert_eq!(pointer, "/components/schemas/Weird/properties/blob/type");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn ref_to_ref_becomes_alias_and_pure_cycles_fail() {
        let set = docs(json!({
            "components": {"schemas": {
                "Id": {"$ref": "#/components/schemas/RealId"},
                "RealId": {"type": "string", "format": "uuid"},
                "Loop1": {"$ref": "#/components/schemas/Loop2"},
                "Loop2": {"$ref": "#/components/schemas/Loop1"}
            }}
        }));
        let mut graph = SchemaGraph::new();
        let id = resolve_component(&set, &mut graph, "Id").unwrap();
        assert!(matches!(graph.get(id).kind, SchemaKind::Ref(_)));
        let real = graph.resolved(id);
        assert_eq!(real.kind, SchemaKind::Primitive(PrimitiveType::String));
        assert_eq!(real.format.as_deref(), Some("uuid"));

        let err = resolve_component(&set, &mut graph, "Loop1").unwrap_err();
        assert_eq!(err.kind(), "unsupported_schema");
    }

    #[test]
    fn type_arrays_and_composition_are_kept() {
        let set = docs(json!({
            "components": {"schemas": {
                "MaybeName": {"type": ["string", "null"]},
                "Choice": {"oneOf": [{"type": "string"}, {"$ref": "#/components/schemas/MaybeName"}]},
                "Inferred": {"enum": [1, 2, 3]}
            }}
        }));
        let mut graph = SchemaGraph::new();
        let maybe = resolve_component(&set, &mut graph, "MaybeName").unwrap();
        assert!(graph.get(maybe).nullable);
        assert_eq!(
            graph.get(maybe).kind,
            SchemaKind::Primitive(PrimitiveType::String)
        );

        let choice = resolve_component(&set, &mut graph, "Choice").unwrap();
        let SchemaKind::OneOf(branches) = &graph.get(choice).kind else {
            panic!("expected oneOf");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[1], maybe);

        let inferred = resolve_component(&set, &mut graph, "Inferred").unwrap();
        assert_eq!(
            graph.get(inferred).kind,
            SchemaKind::Primitive(PrimitiveType::Integer)
        );
    }

    #[test]
    fn dangling_ref_is_spec_fetch() {
        let set = docs(json!({"components": {"schemas": {}}}));
        let mut graph = SchemaGraph::new();
        let err = resolve_component(&set, &mut graph, "Nope").unwrap_err();
        assert_eq!(err.kind(), "spec_fetch");
    }
}
