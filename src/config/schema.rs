//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the daemon.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::health::endpoints::StatusStanza;
use crate::health::types::NodeName;

/// Root configuration for the health watcher.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    /// Backing store connection.
    pub store: StoreConfig,

    /// Poll pacing and channel sizing.
    pub watch: WatchConfig,

    /// Shadow traffic mode flags and periods.
    pub shadow: ShadowConfig,

    /// Active probe client settings.
    pub probe: ProbeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Services to watch.
    pub services: Vec<ServiceConfig>,
}

/// Backing store connection.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the KV HTTP API.
    pub address: String,

    /// Optional ACL token.
    pub token: Option<String>,

    /// How long the store may hold a blocking query.
    pub wait_secs: u64,

    /// Extra time allowed on top of the wait before a request is abandoned.
    pub request_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            token: None,
            wait_secs: 300,
            request_timeout_secs: 10,
        }
    }
}

/// Poll pacing and channel sizing.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    /// Delay between service polls (floored to 1s).
    pub delay_secs: u64,

    /// Jitter window for the all-services watch, in milliseconds.
    pub jitter_ms: u64,

    /// Capacity of every error channel.
    pub error_buffer: usize,

    /// Capacity of single-subject result channels.
    pub result_buffer: usize,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            delay_secs: 1,
            jitter_ms: 500,
            error_buffer: 16,
            result_buffer: 1,
        }
    }
}

/// Shadow traffic settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ShadowConfig {
    /// Add the active probe source to every watch.
    pub use_health_service: bool,

    /// Use only the active probe source.
    pub use_only_health_service: bool,

    /// Heartbeat period while probing.
    pub heartbeat_secs: u64,

    /// Heartbeat period for subjects without a status port.
    pub always_healthy_heartbeat_secs: u64,

    /// Period after which probe subscriptions are reissued.
    pub monitor_refresh_secs: u64,

    /// Backoff before a failed probe subscription is reissued.
    pub monitor_retry_secs: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            use_health_service: false,
            use_only_health_service: false,
            heartbeat_secs: 5,
            always_healthy_heartbeat_secs: 2,
            monitor_refresh_secs: 600,
            monitor_retry_secs: 1,
        }
    }
}

/// Active probe client settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-check timeout.
    pub timeout_secs: u64,

    /// Poll period of push monitors, in milliseconds.
    pub interval_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 2,
            interval_ms: 1000,
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_filter: String,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter listen address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "health_watch=info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9102".to_string(),
        }
    }
}

/// One watched service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Service identifier (the `<service-id>` path segment).
    pub id: String,

    /// Nodes the service runs on.
    #[serde(default)]
    pub nodes: Vec<NodeName>,

    /// Status endpoint of the service.
    #[serde(default)]
    pub status: StatusStanza,

    /// Per-service override of `shadow.use_health_service`.
    #[serde(default)]
    pub use_health_service: bool,

    /// Per-service override of `shadow.use_only_health_service`.
    #[serde(default)]
    pub use_only_health_service: bool,
}
