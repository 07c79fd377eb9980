//! Hot reload by polling.
//!
//! Watched files are the config file, every local root spec it names, and every local file the
//! published namespaces were assembled from (external `$ref` targets included). A change in
//! modification time or size, or a file appearing/disappearing, re-reads the config and triggers
//! a coalesced registry rebuild. An unreadable or invalid config is logged and the current
//! registry stays published.

use mcp_openapi_tools::config::AdapterConfig;
use mcp_openapi_tools::document::DocId;
use mcp_openapi_tools::registry::{NamespaceRegistry, RegistrySnapshot};
use mcp_openapi_tools::reload::RebuildOutcome;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// `(mtime, len)` per watched file; `None` when the file is missing.
type Stamp = BTreeMap<PathBuf, Option<(SystemTime, u64)>>;

pub struct ConfigWatcher {
    config_path: PathBuf,
    interval: Duration,
}

impl ConfigWatcher {
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            config_path: config_path.into(),
            interval,
        }
    }

    /// Poll until `cancel` fires.
    pub async fn run(self, registry: Arc<NamespaceRegistry>, cancel: CancellationToken) {
        let mut config = AdapterConfig::load(&self.config_path).ok();
        let files = watched_files(&self.config_path, config.as_ref(), &registry.snapshot());
        let mut last = stamp(&files).await;
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // The set follows the latest config and snapshot; newly listed files start as a baseline.
            let files = watched_files(&self.config_path, config.as_ref(), &registry.snapshot());
            let current = stamp(&files).await;
            let changed = changed_files(&last, &current);
            last = current;
            if changed.is_empty() {
                continue;
            }

            let loaded = match AdapterConfig::load(&self.config_path) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(
                        path = %self.config_path.display(),
                        error = %e,
                        "Config changed but could not be loaded; keeping current tools"
                    );
                    continue;
                }
            };

            tracing::info!(files = ?changed, "Change detected; rebuilding tools");
            let servers = loaded.servers.clone();
            config = Some(loaded);
            // Keep polling while the rebuild runs; later changes coalesce into one follow-up.
            let registry = registry.clone();
            tokio::spawn(async move {
                if registry.reload(servers).await == RebuildOutcome::Coalesced {
                    tracing::debug!("Rebuild already running; queued a follow-up");
                }
            });
        }
    }
}

/// Config file, the local root specs of `config`, and the local sources of every built namespace.
fn watched_files(
    config_path: &Path,
    config: Option<&AdapterConfig>,
    snapshot: &RegistrySnapshot,
) -> Vec<PathBuf> {
    let mut files = BTreeSet::from([config_path.to_path_buf()]);
    if let Some(config) = config {
        for server in &config.servers {
            if let Ok(DocId::File(path)) = DocId::parse(&server.url) {
                files.insert(path);
            }
        }
    }
    for ns in snapshot.namespaces.values() {
        files.extend(ns.sources.iter().cloned());
    }
    files.into_iter().collect()
}

async fn stamp(files: &[PathBuf]) -> Stamp {
    let mut out = Stamp::new();
    for path in files {
        let meta = tokio::fs::metadata(path)
            .await
            .ok()
            .and_then(|m| Some((m.modified().ok()?, m.len())));
        out.insert(path.clone(), meta);
    }
    out
}

/// Files present in both stamps whose metadata differs.
fn changed_files(before: &Stamp, after: &Stamp) -> Vec<PathBuf> {
    after
        .iter()
        .filter(|(path, meta)| before.get(*path).is_some_and(|b| b != *meta))
        .map(|(path, _)| path.clone())
        .collect()
}
