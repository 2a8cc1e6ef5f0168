//! Configuration file watcher for hot reload.
//!
//! Reloaded files are revalidated; only node-set changes of already watched
//! services are applied live, everything else needs a restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::WatcherConfig;
use crate::health::types::NodeName;

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<WatcherConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<WatcherConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file. Keep the returned watcher alive for as long
    /// as reloads are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    tracing::info!("Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(config) => {
                            let _ = tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current configuration");
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Service-level difference between two configurations.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ServiceDiff {
    /// Services present in both whose node list changed, with the new list.
    pub node_sets: BTreeMap<String, Vec<NodeName>>,
    /// Services only in the new configuration.
    pub added: Vec<String>,
    /// Services only in the old configuration.
    pub removed: Vec<String>,
}

/// Compare the services of two configurations.
pub fn diff_services(old: &WatcherConfig, new: &WatcherConfig) -> ServiceDiff {
    let old_nodes: BTreeMap<_, _> = old.services.iter().map(|s| (s.id.as_str(), &s.nodes)).collect();
    let new_nodes: BTreeMap<_, _> = new.services.iter().map(|s| (s.id.as_str(), &s.nodes)).collect();

    let mut diff = ServiceDiff::default();
    for (id, nodes) in &new_nodes {
        match old_nodes.get(id) {
            Some(previous) if previous != nodes => {
                diff.node_sets.insert(id.to_string(), (*nodes).clone());
            }
            Some(_) => {}
            None => diff.added.push(id.to_string()),
        }
    }
    diff.removed = old_nodes
        .keys()
        .filter(|id| !new_nodes.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    diff
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServiceConfig;

    fn config(services: &[(&str, &[&str])]) -> WatcherConfig {
        WatcherConfig {
            services: services
                .iter()
                .map(|(id, nodes)| ServiceConfig {
                    id: id.to_string(),
                    nodes: nodes.iter().map(|n| NodeName::from(*n)).collect(),
                    status: Default::default(),
                    use_health_service: false,
                    use_only_health_service: false,
                })
                .collect(),
            ..WatcherConfig::default()
        }
    }

    #[test]
    fn test_diff_services() {
        let old = config(&[("web", &["n1"]), ("db", &["n2"]), ("cache", &["n3"])]);
        let new = config(&[("web", &["n1", "n4"]), ("db", &["n2"]), ("queue", &["n5"])]);

        let diff = diff_services(&old, &new);
        assert_eq!(diff.node_sets.len(), 1);
        assert_eq!(
            diff.node_sets["web"],
            vec![NodeName::from("n1"), NodeName::from("n4")]
        );
        assert_eq!(diff.added, vec!["queue".to_string()]);
        assert_eq!(diff.removed, vec!["cache".to_string()]);
    }

    #[test]
    fn test_identical_configs_have_no_diff() {
        let old = config(&[("web", &["n1"])]);
        assert_eq!(diff_services(&old, &old.clone()), ServiceDiff::default());
    }
}
