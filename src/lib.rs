//! Health aggregation and watch engine.
//!
//! Reads per-instance health records from a Consul-style KV store, optionally
//! merges them with active HTTP probes of each instance's status endpoint, and
//! streams the result to consumers as channels of results or snapshots.

pub mod config;
pub mod error;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod probe;
pub mod resources;
pub mod store;

pub use config::schema::WatcherConfig;
pub use error::HealthError;
pub use health::{HealthChecker, ShadowTrafficChecker};
pub use lifecycle::Shutdown;
