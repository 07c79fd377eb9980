use crate::error::{OpenApiToolsError, Result};
use regex::Regex;
use reqwest::header::HeaderName;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Default per-request timeout when a namespace does not set one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest accepted per-request timeout, in seconds (one day).
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// Top-level adapter configuration document.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AdapterConfig {
    /// One entry per namespace.
    #[serde(default)]
    pub servers: Vec<NamespaceConfig>,
}

impl AdapterConfig {
    /// Parse a YAML configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed, has unknown fields, or fails validation.
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(raw)
            .map_err(|e| OpenApiToolsError::Config(format!("invalid configuration: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and parse a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its contents are invalid.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OpenApiToolsError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&raw)
    }

    /// Check cross-field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.namespace.as_str()) {
                return Err(OpenApiToolsError::Config(format!(
                    "duplicate namespace '{}'",
                    server.namespace
                )));
            }
            server.validate()?;
        }
        Ok(())
    }
}

/// Configuration for one namespace: one spec, one operation filter, one forwarding policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NamespaceConfig {
    /// Unique namespace key.
    pub namespace: String,

    /// Human-readable label.
    #[serde(default)]
    pub name: Option<String>,

    /// Spec location: `http(s)://`, `file://`, or a plain file path.
    pub url: String,

    /// Upstream base URL. May embed `{placeholder}` segments filled from path arguments or the
    /// environment. Falls back to the spec's first `servers` entry.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Path regexes; an operation is selected if any pattern matches its path template.
    #[serde(default)]
    pub paths: Vec<String>,

    /// Caller header names copied onto outbound requests (case-insensitive allow-list).
    #[serde(default, alias = "headers")]
    pub forward_headers: Vec<String>,

    /// Caller header name -> outbound query parameter name.
    #[serde(default)]
    pub forward_query_params: BTreeMap<String, String>,

    /// Per-request timeout in seconds. `0` disables the timeout.
    #[serde(default)]
    pub timeout: Option<f64>,

    /// Optional spec hash (`sha256:<hex>`) for version detection.
    #[serde(default)]
    pub spec_hash: Option<String>,

    /// What to do when `spec_hash` does not match.
    #[serde(default)]
    pub spec_hash_policy: HashPolicy,
}

/// Hash verification policy.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashPolicy {
    /// Log warning if hash doesn't match.
    #[default]
    Warn,
    /// Fail the namespace build if hash doesn't match.
    Fail,
    /// Ignore hash verification.
    Ignore,
}

impl NamespaceConfig {
    /// Minimal config for a namespace; everything else defaulted.
    #[must_use]
    pub fn new(namespace: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: None,
            url: url.into(),
            base_url: None,
            paths: Vec::new(),
            forward_headers: Vec::new(),
            forward_query_params: BTreeMap::new(),
            timeout: None,
            spec_hash: None,
            spec_hash_policy: HashPolicy::default(),
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.namespace)
    }

    /// Effective request timeout; `None` when explicitly disabled.
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        match self.timeout {
            None => Some(DEFAULT_TIMEOUT),
            Some(secs) if secs <= 0.0 => None,
            // Unvalidated configs are clamped so the conversion cannot panic.
            Some(secs) => Some(Duration::from_secs_f64(secs.min(MAX_TIMEOUT_SECS))),
        }
    }

    /// Whether the caller header `name` may be forwarded upstream.
    #[must_use]
    pub fn forwards_header(&self, name: &str) -> bool {
        self.forward_headers
            .iter()
            .any(|h| h.eq_ignore_ascii_case(name))
    }

    /// Query parameter names that are filled from caller headers rather than tool arguments.
    pub fn forwarded_query_names(&self) -> impl Iterator<Item = &str> {
        self.forward_query_params.values().map(String::as_str)
    }

    fn validate(&self) -> Result<()> {
        let ns = &self.namespace;
        if ns.is_empty()
            || !ns
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(OpenApiToolsError::Config(format!(
                "invalid namespace '{ns}': use letters, digits, '_' or '-'"
            )));
        }
        if self.url.trim().is_empty() {
            return Err(OpenApiToolsError::Config(format!(
                "namespace '{ns}': url must not be empty"
            )));
        }
        for pattern in &self.paths {
            Regex::new(pattern).map_err(|e| {
                OpenApiToolsError::Config(format!(
                    "namespace '{ns}': invalid path pattern '{pattern}': {e}"
                ))
            })?;
        }
        for header in self
            .forward_headers
            .iter()
            .chain(self.forward_query_params.keys())
        {
            HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
                OpenApiToolsError::Config(format!(
                    "namespace '{ns}': invalid header name '{header}'"
                ))
            })?;
        }
        if let Some(t) = self.timeout
            && (!t.is_finite() || !(0.0..=MAX_TIMEOUT_SECS).contains(&t))
        {
            return Err(OpenApiToolsError::Config(format!(
                "namespace '{ns}': timeout must be between 0 and {MAX_TIMEOUT_SECS} seconds"
            )));
        }
        Ok(())
    }
}
