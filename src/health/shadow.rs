//! Shadow traffic reconciliation.
//!
//! # Data Flow
//! ```text
//! Store source (same as HealthChecker::watch_service):
//!     health/<service>/ long-poll → whole-service snapshot ─┐
//!                                                           ├→ one snapshot channel
//! Probe source:                                             │
//!     monitor manager (re-subscribes every refresh period)  │
//!     → one HealthClient::health_monitor per status URL     │
//!     → HealthResponse → reconciler (owns node map) ────────┘
//!     node-set updates → reconciler → monitor manager targets
//!     heartbeat tick → reconciler re-emits its map
//! ```
//!
//! # Design Decisions
//! - The node map lives in the reconciler task only; consumers get copies
//! - A node keeps its last probed result until a newer one arrives
//! - Status port zero means "always healthy": no probing, passing results
//!   re-emitted on a faster heartbeat
//! - Subscriptions are retried forever after a fixed backoff until the watch
//!   is cancelled

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ShadowConfig;
use crate::error::HealthError;
use crate::health::checker::{poll_service_health, Buffers, HealthChecker};
use crate::health::endpoints::{status_endpoints, status_url_to_node, StatusStanza};
use crate::health::publisher::{snapshot_channel, SnapshotReceiver, SnapshotSender};
use crate::health::types::{HealthResult, NodeName, PodId, ServiceSnapshot};
use crate::health::watch::{report_error, Watch};
use crate::observability::metrics;
use crate::probe::{HealthClient, HealthEndpointsRequest, HealthRequest, HealthResponse};
use crate::resources::{LabelReader, ResourceClient};
use crate::store::HealthKv;

/// Periods used by the probe source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowTimings {
    /// Re-emit period while probing.
    pub heartbeat: Duration,
    /// Re-emit period in always-healthy mode.
    pub always_healthy_heartbeat: Duration,
    /// How often monitors are torn down and reissued.
    pub monitor_refresh: Duration,
    /// Backoff before a failed monitor is reissued.
    pub monitor_retry: Duration,
}

impl Default for ShadowTimings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(5),
            always_healthy_heartbeat: Duration::from_secs(2),
            monitor_refresh: Duration::from_secs(600),
            monitor_retry: Duration::from_secs(1),
        }
    }
}

/// Shortest period any shadow timer runs at.
pub const MIN_SHADOW_PERIOD: Duration = Duration::from_millis(1);

impl ShadowTimings {
    /// Raise every zero period to `MIN_SHADOW_PERIOD`.
    pub fn floored(self) -> Self {
        Self {
            heartbeat: self.heartbeat.max(MIN_SHADOW_PERIOD),
            always_healthy_heartbeat: self.always_healthy_heartbeat.max(MIN_SHADOW_PERIOD),
            monitor_refresh: self.monitor_refresh.max(MIN_SHADOW_PERIOD),
            monitor_retry: self.monitor_retry.max(MIN_SHADOW_PERIOD),
        }
    }
}

impl From<&ShadowConfig> for ShadowTimings {
    fn from(config: &ShadowConfig) -> Self {
        Self {
            heartbeat: Duration::from_secs(config.heartbeat_secs),
            always_healthy_heartbeat: Duration::from_secs(config.always_healthy_heartbeat_secs),
            monitor_refresh: Duration::from_secs(config.monitor_refresh_secs),
            monitor_retry: Duration::from_secs(config.monitor_retry_secs),
        }
    }
}

/// Parameters of one shadow traffic watch.
#[derive(Debug)]
pub struct ShadowWatchRequest {
    pub service_id: String,
    /// Nodes to probe initially.
    pub node_ids: Vec<NodeName>,
    /// Replacement node sets pushed while the watch runs.
    pub node_updates: Option<mpsc::Receiver<Vec<NodeName>>>,
    /// Store poll delay, floored to one second.
    pub watch_delay: Duration,
    pub use_health_service: bool,
    pub use_only_health_service: bool,
    pub status: StatusStanza,
}

impl ShadowWatchRequest {
    pub fn new(service_id: impl Into<String>, node_ids: Vec<NodeName>, status: StatusStanza) -> Self {
        Self {
            service_id: service_id.into(),
            node_ids,
            node_updates: None,
            watch_delay: Duration::from_secs(1),
            use_health_service: false,
            use_only_health_service: false,
            status,
        }
    }

    pub fn with_node_updates(mut self, updates: mpsc::Receiver<Vec<NodeName>>) -> Self {
        self.node_updates = Some(updates);
        self
    }

    pub fn with_watch_delay(mut self, delay: Duration) -> Self {
        self.watch_delay = delay;
        self
    }

    pub fn with_health_service(mut self, enabled: bool) -> Self {
        self.use_health_service = enabled;
        self
    }

    pub fn with_only_health_service(mut self, enabled: bool) -> Self {
        self.use_only_health_service = enabled;
        self
    }
}

/// Health checker combining store records with active probes.
#[derive(Clone)]
pub struct ShadowTrafficChecker {
    store: HealthChecker,
    health_client: Arc<dyn HealthClient>,
    resource_client: Arc<dyn ResourceClient>,
    label_reader: Arc<dyn LabelReader>,
    use_health_service: bool,
    use_only_health_service: bool,
    timings: ShadowTimings,
}

impl ShadowTrafficChecker {
    pub fn new(
        health_client: Arc<dyn HealthClient>,
        resource_client: Arc<dyn ResourceClient>,
        kv: Arc<dyn HealthKv>,
        label_reader: Arc<dyn LabelReader>,
        use_health_service: bool,
        use_only_health_service: bool,
    ) -> Self {
        Self {
            store: HealthChecker::new(kv),
            health_client,
            resource_client,
            label_reader,
            use_health_service,
            use_only_health_service,
            timings: ShadowTimings::default(),
        }
    }

    /// Replace the timer periods. Zero periods are raised to `MIN_SHADOW_PERIOD`.
    pub fn with_timings(mut self, timings: ShadowTimings) -> Self {
        self.timings = timings.floored();
        self
    }

    pub fn with_buffers(mut self, buffers: Buffers) -> Self {
        self.store = self.store.with_buffers(buffers);
        self
    }

    pub fn resource_client(&self) -> &Arc<dyn ResourceClient> {
        &self.resource_client
    }

    pub fn label_reader(&self) -> &Arc<dyn LabelReader> {
        &self.label_reader
    }

    /// Watch one service from the store, the probe service, or both.
    ///
    /// Unless probe-only operation is requested the store source always runs.
    /// If probe-only is requested without any probe source active, the watch
    /// idles until cancelled.
    pub fn watch_service(
        &self,
        req: ShadowWatchRequest,
        cancel: CancellationToken,
    ) -> Watch<SnapshotReceiver<ServiceSnapshot>> {
        let (result_tx, result_rx) = snapshot_channel();
        let (err_tx, err_rx) = mpsc::channel(self.store.buffers().errors);

        let probe_only = self.use_only_health_service || req.use_only_health_service;
        let probing = probe_only || self.use_health_service || req.use_health_service;

        tracing::info!(
            service = %req.service_id,
            nodes = req.node_ids.len(),
            probing,
            probe_only,
            always_healthy = req.status.always_healthy(),
            "Shadow traffic watch starting"
        );

        let probe_source = probing.then(|| {
            ProbeSource {
                client: self.health_client.clone(),
                service_id: req.service_id.clone(),
                status: req.status.clone(),
                timings: self.timings,
                results: result_tx.clone(),
                errors: err_tx.clone(),
            }
            .run(req.node_ids, req.node_updates, cancel.clone())
        });

        let store_source = (!probe_only).then(|| {
            poll_service_health(
                req.service_id.clone(),
                self.store.kv().clone(),
                result_tx,
                err_tx,
                req.watch_delay,
                cancel.clone(),
            )
        });

        let task = tokio::spawn(async move {
            let probe = async {
                if let Some(probe) = probe_source {
                    probe.await;
                }
            };
            let store = async {
                match store_source {
                    Some(store) => store.await,
                    None => cancel.cancelled().await,
                }
            };
            tokio::join!(probe, store);
        });

        Watch {
            results: result_rx,
            errors: err_rx,
            task,
        }
    }

    /// Current health of `service_id` from one backing call.
    ///
    /// Reads the store unless probing is requested. When probing and the
    /// status port is zero every node is reported passing without a probe.
    pub async fn service(
        &self,
        service_id: &str,
        node_ids: &[NodeName],
        use_health_service: bool,
        status: &StatusStanza,
    ) -> Result<ServiceSnapshot, HealthError> {
        if !self.use_health_service && !use_health_service {
            return self.store.service(service_id).await;
        }

        if status.always_healthy() {
            return Ok(node_ids
                .iter()
                .map(|node| (node.clone(), HealthResult::passing(service_id, node.clone())))
                .collect());
        }

        let req = HealthEndpointsRequest {
            endpoints: status_endpoints(node_ids, status),
            protocol: status.protocol(),
        };
        let url_to_health = self.health_client.health_check_endpoints(&req).await?;

        let mut snapshot = ServiceSnapshot::new();
        for (url, health) in url_to_health {
            let node = status_url_to_node(&url)?;
            snapshot.insert(
                node.clone(),
                HealthResult::new(PodId::from(service_id), node, service_id, health),
            );
        }
        Ok(snapshot)
    }
}

/// Everything the probe source needs, moved into its task.
struct ProbeSource {
    client: Arc<dyn HealthClient>,
    service_id: String,
    status: StatusStanza,
    timings: ShadowTimings,
    results: SnapshotSender<ServiceSnapshot>,
    errors: mpsc::Sender<HealthError>,
}

impl ProbeSource {
    async fn run(
        self,
        node_ids: Vec<NodeName>,
        node_updates: Option<mpsc::Receiver<Vec<NodeName>>>,
        cancel: CancellationToken,
    ) {
        let always_healthy = self.status.always_healthy();
        let (targets_tx, targets_rx) = watch::channel(node_ids.clone());
        let (response_tx, response_rx) = mpsc::channel(node_ids.len().max(1));

        let heartbeat = if always_healthy {
            self.timings.always_healthy_heartbeat
        } else {
            self.timings.heartbeat
        };

        let monitors = MonitorManager {
            client: self.client,
            status: self.status,
            retry: self.timings.monitor_retry,
            refresh: self.timings.monitor_refresh,
            errors: self.errors.clone(),
        };
        let manage = async {
            // Nothing to probe; dropping the sender leaves the reconciler
            // with heartbeats only.
            if always_healthy {
                drop(response_tx);
                return;
            }
            monitors.run(targets_rx, response_tx, cancel.clone()).await;
        };

        let mut reconciler = Reconciler {
            service_id: self.service_id,
            always_healthy,
            results: self.results,
            errors: self.errors,
            health: ServiceSnapshot::new(),
        };
        reconciler.mark_passing(&node_ids);

        tokio::join!(
            manage,
            reconciler.run(response_rx, node_updates, targets_tx, heartbeat, cancel.clone()),
        );
    }
}

/// Sole owner of the probed node map.
struct Reconciler {
    service_id: String,
    always_healthy: bool,
    results: SnapshotSender<ServiceSnapshot>,
    errors: mpsc::Sender<HealthError>,
    health: ServiceSnapshot,
}

impl Reconciler {
    async fn run(
        mut self,
        mut responses: mpsc::Receiver<HealthResponse>,
        mut node_updates: Option<mpsc::Receiver<Vec<NodeName>>>,
        targets: watch::Sender<Vec<NodeName>>,
        heartbeat: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                Some(response) = responses.recv() => {
                    if !self.apply_response(response, &cancel).await {
                        return;
                    }
                }
                nodes = next_node_set(&mut node_updates) => match nodes {
                    Some(nodes) => {
                        tracing::debug!(service = %self.service_id, nodes = nodes.len(), "Monitored node set replaced");
                        self.mark_passing(&nodes);
                        targets.send_replace(nodes);
                    }
                    None => node_updates = None,
                },
                _ = ticker.tick() => self.publish("heartbeat"),
            }
        }
    }

    async fn apply_response(&mut self, response: HealthResponse, cancel: &CancellationToken) -> bool {
        let node = match status_url_to_node(&response.request.url) {
            Ok(node) => node,
            Err(e) => return report_error(&self.errors, e, cancel).await,
        };

        self.health.insert(
            node.clone(),
            HealthResult::new(
                PodId::from(self.service_id.as_str()),
                node,
                self.service_id.as_str(),
                response.health,
            ),
        );
        self.publish("probe");
        true
    }

    /// In always-healthy mode, record every node as passing.
    fn mark_passing(&mut self, nodes: &[NodeName]) {
        if !self.always_healthy {
            return;
        }
        for node in nodes {
            self.health
                .insert(node.clone(), HealthResult::passing(&self.service_id, node.clone()));
        }
    }

    fn publish(&self, source: &'static str) {
        self.results.publish(self.health.clone());
        metrics::record_snapshot_published(source);
    }
}

/// Next node set from an optional update input; pending forever without one.
async fn next_node_set(updates: &mut Option<mpsc::Receiver<Vec<NodeName>>>) -> Option<Vec<NodeName>> {
    match updates {
        Some(updates) => updates.recv().await,
        None => std::future::pending().await,
    }
}

/// Keeps one monitor subscription per status endpoint of the current targets.
struct MonitorManager {
    client: Arc<dyn HealthClient>,
    status: StatusStanza,
    retry: Duration,
    refresh: Duration,
    errors: mpsc::Sender<HealthError>,
}

impl MonitorManager {
    async fn run(
        self,
        mut targets: watch::Receiver<Vec<NodeName>>,
        responses: mpsc::Sender<HealthResponse>,
        cancel: CancellationToken,
    ) {
        let protocol = self.status.protocol();

        while !cancel.is_cancelled() {
            let nodes = targets.borrow_and_update().clone();
            let round = cancel.child_token();
            let mut subscriptions = JoinSet::new();

            for url in status_endpoints(&nodes, &self.status) {
                subscriptions.spawn(subscribe(
                    self.client.clone(),
                    HealthRequest { url, protocol },
                    responses.clone(),
                    self.errors.clone(),
                    self.retry,
                    round.clone(),
                ));
            }
            metrics::record_probe_subscriptions("started", subscriptions.len() as u64);
            tracing::debug!(endpoints = subscriptions.len(), "Probe monitors issued");

            // Targets may have drifted; reissue on the next period.
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = time::sleep(self.refresh) => {
                    metrics::record_probe_subscriptions("refreshed", 1);
                }
            }

            round.cancel();
            while subscriptions.join_next().await.is_some() {}
        }
    }
}

/// Hold one subscription open, reissuing it after `retry` whenever it ends.
async fn subscribe(
    client: Arc<dyn HealthClient>,
    req: HealthRequest,
    responses: mpsc::Sender<HealthResponse>,
    errors: mpsc::Sender<HealthError>,
    retry: Duration,
    round: CancellationToken,
) {
    loop {
        let outcome = client
            .health_monitor(req.clone(), responses.clone(), round.clone())
            .await;
        if round.is_cancelled() {
            return;
        }
        if let Err(e) = outcome {
            metrics::record_probe_subscriptions("failed", 1);
            if !report_error(&errors, e.into(), &round).await {
                return;
            }
        }

        tokio::select! {
            _ = round.cancelled() => return,
            _ = time::sleep(retry) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_periods_are_floored() {
        let timings = ShadowTimings {
            heartbeat: Duration::ZERO,
            always_healthy_heartbeat: Duration::ZERO,
            monitor_refresh: Duration::ZERO,
            monitor_retry: Duration::from_secs(3),
        }
        .floored();
        assert_eq!(timings.heartbeat, MIN_SHADOW_PERIOD);
        assert_eq!(timings.always_healthy_heartbeat, MIN_SHADOW_PERIOD);
        assert_eq!(timings.monitor_refresh, MIN_SHADOW_PERIOD);
        assert_eq!(timings.monitor_retry, Duration::from_secs(3));
    }

    #[test]
    fn test_config_timings() {
        let timings = ShadowTimings::from(&ShadowConfig::default());
        assert_eq!(timings, ShadowTimings::default());
    }
}
