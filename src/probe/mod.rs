//! Active health-probe client.
//!
//! # Data Flow
//! ```text
//! Batch check:
//!     HealthEndpointsRequest → HealthClient::health_check_endpoints
//!     → url → HealthStatus
//!
//! Push monitor:
//!     HealthRequest → HealthClient::health_monitor (long-lived)
//!     → HealthResponse on the caller's channel whenever the status changes
//!     → returns on cancellation or error
//! ```
//!
//! # Design Decisions
//! - The wire protocol is behind a trait; `http.rs` is one implementation
//! - Monitors push only on change; callers compensate with heartbeats

pub mod http;

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::health::types::HealthStatus;

pub use http::HttpHealthClient;

/// Transport used to reach a status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
}

impl Protocol {
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Http => f.write_str("HTTP"),
            Protocol::Https => f.write_str("HTTPS"),
        }
    }
}

/// Subscription to one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthRequest {
    pub url: String,
    pub protocol: Protocol,
}

/// Push notification from a monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthResponse {
    /// The subscription that produced this sample.
    pub request: HealthRequest,
    pub health: HealthStatus,
}

/// One-shot check of several endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEndpointsRequest {
    pub endpoints: Vec<String>,
    pub protocol: Protocol,
}

/// Errors from the probe client.
#[derive(Debug, Clone, Error)]
pub enum ProbeError {
    /// The request to the endpoint or probe service failed.
    #[error("probe of {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// Nobody is listening for monitor pushes anymore.
    #[error("probe response channel closed for {url}")]
    Closed { url: String },

    /// The probe service is not reachable at all.
    #[error("probe service unavailable: {0}")]
    Unavailable(String),
}

/// Client of the active probe service.
#[async_trait]
pub trait HealthClient: Send + Sync {
    /// Check every endpoint once.
    async fn health_check_endpoints(
        &self,
        req: &HealthEndpointsRequest,
    ) -> Result<HashMap<String, HealthStatus>, ProbeError>;

    /// Subscribe to one endpoint, pushing samples until `cancel` fires
    /// (returns `Ok`) or the subscription breaks (returns `Err`).
    async fn health_monitor(
        &self,
        req: HealthRequest,
        responses: mpsc::Sender<HealthResponse>,
        cancel: CancellationToken,
    ) -> Result<(), ProbeError>;
}
