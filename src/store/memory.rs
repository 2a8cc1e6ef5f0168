//! In-process health store.
//!
//! Implements blocking-query semantics over an in-memory tree so watches can
//! run without an external store (embedding, local runs, tests).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::watch;

use crate::health::decode::health_path;
use crate::health::types::HealthResult;
use crate::store::{HealthKv, KvError, KvPair, QueryMeta, QueryOptions};

/// Default hold time of a blocking query.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct Tree {
    index: u64,
    pairs: BTreeMap<String, KvPair>,
}

struct Inner {
    tree: watch::Sender<Tree>,
    pending_failures: AtomicUsize,
    queries: AtomicUsize,
    default_wait: Duration,
}

/// In-memory `HealthKv`.
///
/// Cloning yields another handle onto the same tree.
#[derive(Clone)]
pub struct MemoryKv {
    inner: Arc<Inner>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::with_default_wait(DEFAULT_WAIT)
    }

    /// Create a store whose blocking queries are held at most `wait` when the
    /// caller does not bound them.
    pub fn with_default_wait(wait: Duration) -> Self {
        // Index starts at 1 so a reader at index 0 always sees a change.
        let (tree, _) = watch::channel(Tree {
            index: 1,
            pairs: BTreeMap::new(),
        });
        Self {
            inner: Arc::new(Inner {
                tree,
                pending_failures: AtomicUsize::new(0),
                queries: AtomicUsize::new(0),
                default_wait: wait,
            }),
        }
    }

    /// Store a raw value, bumping the index.
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> u64 {
        let value = value.into();
        let mut index = 0;
        self.inner.tree.send_modify(|tree| {
            tree.index += 1;
            index = tree.index;
            tree.pairs.insert(
                key.to_string(),
                KvPair {
                    key: key.to_string(),
                    value,
                    modify_index: tree.index,
                },
            );
        });
        index
    }

    /// Store a JSON document.
    pub fn put_json<T: Serialize>(&self, key: &str, value: &T) -> Result<u64, serde_json::Error> {
        let bytes = serde_json::to_vec(value)?;
        Ok(self.put(key, bytes))
    }

    /// Store a health result at its canonical path.
    pub fn put_health(&self, result: &HealthResult) -> Result<u64, serde_json::Error> {
        self.put_json(&health_path(&result.service, &result.node), result)
    }

    /// Remove a key, bumping the index.
    pub fn delete(&self, key: &str) -> u64 {
        let mut index = 0;
        self.inner.tree.send_modify(|tree| {
            tree.index += 1;
            index = tree.index;
            tree.pairs.remove(key);
        });
        index
    }

    /// Make the next `count` queries fail.
    pub fn fail_next(&self, count: usize) {
        self.inner.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Number of queries served so far, failed ones included.
    pub fn query_count(&self) -> usize {
        self.inner.queries.load(Ordering::SeqCst)
    }

    /// Current change index.
    pub fn index(&self) -> u64 {
        self.inner.tree.borrow().index
    }

    fn take_failure(&self, op: &'static str, key: &str) -> Result<(), KvError> {
        self.inner.queries.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .inner
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(KvError::Query {
                op,
                key: key.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    async fn wait_for_change(&self, opts: QueryOptions) -> Tree {
        let mut rx = self.inner.tree.subscribe();
        let deadline = tokio::time::sleep(opts.wait_time.unwrap_or(self.inner.default_wait));
        tokio::pin!(deadline);

        loop {
            {
                let tree = rx.borrow_and_update();
                if opts.wait_index == 0 || tree.index > opts.wait_index {
                    return tree.clone();
                }
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = &mut deadline => break,
            }
        }

        let tree = rx.borrow().clone();
        tree
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthKv for MemoryKv {
    async fn list(
        &self,
        prefix: &str,
        opts: QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), KvError> {
        self.take_failure("list", prefix)?;
        let tree = self.wait_for_change(opts).await;
        let pairs = tree
            .pairs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(_, pair)| pair.clone())
            .collect();
        Ok((pairs, QueryMeta { last_index: tree.index }))
    }

    async fn get(
        &self,
        key: &str,
        opts: QueryOptions,
    ) -> Result<(Option<KvPair>, QueryMeta), KvError> {
        self.take_failure("get", key)?;
        let tree = self.wait_for_change(opts).await;
        Ok((tree.pairs.get(key).cloned(), QueryMeta { last_index: tree.index }))
    }
}
