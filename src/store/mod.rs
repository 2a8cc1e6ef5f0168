//! Backing key-value store access.
//!
//! # Data Flow
//! ```text
//! HealthKv (consul.rs over HTTP, memory.rs in-process)
//!     → watch.rs (long-poll one key or one prefix)
//!     → raw snapshots (Vec<KvPair> / Option<KvPair>)
//!     → health::publisher / health::checker (decode + publish)
//! ```
//!
//! # Design Decisions
//! - The store is read-only from this crate's point of view
//! - Every query is a blocking query: it returns once the store's index moves
//!   past `wait_index` or the wait time elapses
//! - Indexes are opaque and only compared for change

pub mod consul;
pub mod memory;
pub mod watch;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use consul::ConsulKv;
pub use memory::MemoryKv;

/// A raw value stored at a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
    pub modify_index: u64,
}

/// Parameters of a blocking query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Return only once the store index is greater than this. Zero reads immediately.
    pub wait_index: u64,
    /// Upper bound on how long the store may hold the query. `None` uses the store default.
    pub wait_time: Option<Duration>,
}

impl QueryOptions {
    pub fn new(wait_index: u64) -> Self {
        Self {
            wait_index,
            wait_time: None,
        }
    }

    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time = Some(wait_time);
        self
    }
}

/// Metadata returned with every query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryMeta {
    /// Store change index at the time the query returned.
    pub last_index: u64,
}

/// Errors from the backing store.
#[derive(Debug, Clone, Error)]
pub enum KvError {
    /// Transport failure or timeout.
    #[error("kv {op} on {key} failed: {reason}")]
    Query {
        op: &'static str,
        key: String,
        reason: String,
    },

    /// The store answered with an unexpected status.
    #[error("kv {op} on {key} returned status {status}")]
    Status {
        op: &'static str,
        key: String,
        status: u16,
    },

    /// The store answered with a body or header that could not be parsed.
    #[error("kv {op} on {key} returned a malformed response: {reason}")]
    Malformed {
        op: &'static str,
        key: String,
        reason: String,
    },
}

/// Read access to the health tree of the backing store.
#[async_trait]
pub trait HealthKv: Send + Sync {
    /// List every pair under `prefix`.
    async fn list(
        &self,
        prefix: &str,
        opts: QueryOptions,
    ) -> Result<(Vec<KvPair>, QueryMeta), KvError>;

    /// Read one key. `None` means the key is absent.
    async fn get(&self, key: &str, opts: QueryOptions)
        -> Result<(Option<KvPair>, QueryMeta), KvError>;
}
