//! Path-pattern operation selection and tool naming.

use crate::error::{OpenApiToolsError, Result};
use regex::Regex;
use std::collections::HashSet;

/// Anything that has an `OpenAPI` path template.
pub trait HasPath {
    fn path(&self) -> &str;
}

/// Selects operations whose path template matches at least one regex.
///
/// Patterns are matched unanchored against the raw template (`/pets/{petId}`), so authors anchor
/// explicitly with `^`/`$` when they need to. An empty pattern list selects nothing.
#[derive(Debug, Clone)]
pub struct PathSelector {
    patterns: Vec<Regex>,
}

impl PathSelector {
    /// Compile the given patterns.
    ///
    /// # Errors
    ///
    /// Returns a `Config` error naming the first pattern that fails to compile.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(p).map_err(|e| {
                    OpenApiToolsError::Config(format!("invalid path pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    /// Keep the items whose path matches, preserving input order.
    pub fn select<'a, T: HasPath>(&self, items: &'a [T]) -> Vec<&'a T> {
        items.iter().filter(|i| self.matches(i.path())).collect()
    }
}

/// Name for an operation without `operationId`: `{method}_{segments}` with braces stripped,
/// e.g. `get /status/{code}` becomes `get_status_code`.
#[must_use]
pub fn synthesized_operation_name(method: &str, path: &str) -> String {
    let mut name = method.to_ascii_lowercase();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        name.push('_');
        name.push_str(segment.trim_start_matches('{').trim_end_matches('}'));
    }
    sanitize_tool_name(&name)
}

/// Restrict a name to `[A-Za-z0-9_-]`, collapsing runs of other characters into `_`.
#[must_use]
pub fn sanitize_tool_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "operation".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Reserve `base`, or the first free `base_1`, `base_2`, ...
pub fn reserve_unique_name(taken: &mut HashSet<String>, base: &str) -> String {
    if taken.insert(base.to_string()) {
        return base.to_string();
    }
    let mut counter = 1;
    loop {
        let candidate = format!("{base}_{counter}");
        if taken.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
