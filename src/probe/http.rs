//! HTTP status-endpoint prober.
//!
//! # Responsibilities
//! - Probe status endpoints directly with GET requests
//! - Serve batch checks concurrently
//! - Run push monitors that poll and report only status changes
//!
//! A 2xx answer is passing; any other answer, a connection error or a
//! timeout is critical.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ProbeConfig;
use crate::health::types::HealthStatus;
use crate::probe::{
    HealthClient, HealthEndpointsRequest, HealthRequest, HealthResponse, ProbeError,
};

/// Shortest poll period of a push monitor.
pub const MIN_MONITOR_INTERVAL: Duration = Duration::from_millis(1);

/// `HealthClient` that talks to status endpoints itself.
#[derive(Debug, Clone)]
pub struct HttpHealthClient {
    client: reqwest::Client,
    interval: Duration,
}

impl HttpHealthClient {
    pub fn new(config: &ProbeConfig) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("health-watch-probe")
            .build()
            .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            interval: Duration::from_millis(config.interval_ms).max(MIN_MONITOR_INTERVAL),
        })
    }

    async fn check(&self, url: &str) -> HealthStatus {
        match self.client.get(url).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    HealthStatus::Passing
                } else {
                    tracing::debug!(url = %url, status = %response.status(), "Status check failed: non-success status");
                    HealthStatus::Critical
                }
            }
            Err(e) if e.is_timeout() => {
                tracing::debug!(url = %url, "Status check failed: timeout");
                HealthStatus::Critical
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Status check failed: connection error");
                HealthStatus::Critical
            }
        }
    }
}

#[async_trait]
impl HealthClient for HttpHealthClient {
    async fn health_check_endpoints(
        &self,
        req: &HealthEndpointsRequest,
    ) -> Result<HashMap<String, HealthStatus>, ProbeError> {
        let checks = req.endpoints.iter().map(|url| async move {
            let health = self.check(url).await;
            (url.clone(), health)
        });
        Ok(join_all(checks).await.into_iter().collect())
    }

    async fn health_monitor(
        &self,
        req: HealthRequest,
        responses: mpsc::Sender<HealthResponse>,
        cancel: CancellationToken,
    ) -> Result<(), ProbeError> {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = None;

        loop {
            let health = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Ok(()),
                        health = self.check(&req.url) => health,
                    }
                }
            };

            if last == Some(health) {
                continue;
            }
            last = Some(health);

            let response = HealthResponse {
                request: req.clone(),
                health,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                sent = responses.send(response) => {
                    if sent.is_err() {
                        return Err(ProbeError::Closed { url: req.url.clone() });
                    }
                }
            }
        }
    }
}
