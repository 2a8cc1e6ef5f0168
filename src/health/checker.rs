//! Store-backed health checker.
//!
//! # Responsibilities
//! - Watch one subject on one node (absence becomes an `unknown` result)
//! - Long-poll one service's namespace into whole-service snapshots
//! - Watch the entire health tree into freshest-wins snapshots
//! - Answer point lookups with a single store read

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::WatchConfig;
use crate::error::HealthError;
use crate::health::decode::{health_path, kv_to_result, service_prefix, HEALTH_ROOT};
use crate::health::publisher::{publish_latest_health, snapshot_channel, SnapshotReceiver, SnapshotSender};
use crate::health::types::{HealthResult, NodeName, PodId, ServiceSnapshot};
use crate::health::watch::{offer_error, report_error, Watch};
use crate::observability::metrics;
use crate::store::watch::{watch_prefix, watch_single};
use crate::store::{HealthKv, QueryOptions};

/// Floor applied to every service poll delay and key-watch interval.
pub const MIN_WATCH_DELAY: Duration = Duration::from_secs(1);

/// Channel capacities used by watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffers {
    pub results: usize,
    pub errors: usize,
}

impl Default for Buffers {
    fn default() -> Self {
        Self {
            results: 1,
            errors: 16,
        }
    }
}

impl From<&WatchConfig> for Buffers {
    fn from(config: &WatchConfig) -> Self {
        Self {
            results: config.result_buffer.max(1),
            errors: config.error_buffer.max(1),
        }
    }
}

/// Health checker reading only from the store.
#[derive(Clone)]
pub struct HealthChecker {
    kv: Arc<dyn HealthKv>,
    buffers: Buffers,
}

impl HealthChecker {
    pub fn new(kv: Arc<dyn HealthKv>) -> Self {
        Self {
            kv,
            buffers: Buffers::default(),
        }
    }

    pub fn with_buffers(mut self, buffers: Buffers) -> Self {
        self.buffers = Buffers {
            results: buffers.results.max(1),
            errors: buffers.errors.max(1),
        };
        self
    }

    pub(crate) fn kv(&self) -> &Arc<dyn HealthKv> {
        &self.kv
    }

    pub(crate) fn buffers(&self) -> Buffers {
        self.buffers
    }

    /// Watch the record of `pod` on `node`.
    ///
    /// Every observed absence yields one `unknown` result; a record that fails
    /// to decode yields an error and no result for that change.
    pub fn watch_pod_on_node(
        &self,
        node: NodeName,
        pod: PodId,
        cancel: CancellationToken,
    ) -> Watch<mpsc::Receiver<HealthResult>> {
        let (result_tx, result_rx) = mpsc::channel(self.buffers.results);
        let (err_tx, err_rx) = mpsc::channel(self.buffers.errors);
        let (raw_tx, mut raw_rx) = mpsc::channel(1);

        let key = health_path(pod.as_str(), &node);
        // Stops the key watcher whenever the translator exits.
        let watcher_cancel = cancel.child_token();
        let watcher = watch_single(
            key,
            self.kv.clone(),
            raw_tx,
            err_tx.clone(),
            watcher_cancel.clone(),
            MIN_WATCH_DELAY,
            Duration::ZERO,
        );

        let translator = async move {
            let _stop_watcher = watcher_cancel.drop_guard();
            loop {
                let observed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    observed = raw_rx.recv() => match observed {
                        Some(observed) => observed,
                        None => return,
                    },
                };

                let res = match observed {
                    None => HealthResult::unknown(pod.clone(), node.clone()),
                    Some(pair) => match kv_to_result(&pair) {
                        Ok(res) => res,
                        Err(e) => {
                            if !report_error(&err_tx, e, &cancel).await {
                                return;
                            }
                            continue;
                        }
                    },
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = result_tx.send(res) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        };

        let task = tokio::spawn(async move {
            tokio::join!(watcher, translator);
        });

        Watch {
            results: result_rx,
            errors: err_rx,
            task,
        }
    }

    /// Long-poll every record of `service_id`, publishing whole snapshots.
    ///
    /// `watch_delay` is floored to one second.
    pub fn watch_service(
        &self,
        service_id: &str,
        watch_delay: Duration,
        cancel: CancellationToken,
    ) -> Watch<SnapshotReceiver<ServiceSnapshot>> {
        let (result_tx, result_rx) = snapshot_channel();
        let (err_tx, err_rx) = mpsc::channel(self.buffers.errors);

        let task = tokio::spawn(poll_service_health(
            service_id.to_string(),
            self.kv.clone(),
            result_tx,
            err_tx,
            watch_delay,
            cancel,
        ));

        Watch {
            results: result_rx,
            errors: err_rx,
            task,
        }
    }

    /// Watch the whole health tree.
    ///
    /// Errors are forwarded without waiting; if the error channel is full they
    /// are dropped.
    pub fn watch_health(
        &self,
        jitter: Duration,
        cancel: CancellationToken,
    ) -> Watch<SnapshotReceiver<Vec<HealthResult>>> {
        let (result_tx, result_rx) = snapshot_channel();
        let (err_tx, err_rx) = mpsc::channel(self.buffers.errors);
        let (raw_tx, raw_rx) = mpsc::channel(1);
        let (watch_err_tx, mut watch_err_rx) = mpsc::channel(1);
        let (publish_err_tx, mut publish_err_rx) = mpsc::channel(1);

        let watcher = watch_prefix(
            HEALTH_ROOT.to_string(),
            self.kv.clone(),
            raw_tx,
            watch_err_tx,
            cancel.clone(),
            MIN_WATCH_DELAY,
            jitter,
        );
        let publisher = publish_latest_health(raw_rx, result_tx, publish_err_tx, cancel.clone());
        let forwarder = async move {
            loop {
                let err = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    Some(err) = watch_err_rx.recv() => err,
                    Some(err) = publish_err_rx.recv() => err,
                    else => return,
                };
                offer_error(&err_tx, err);
            }
        };

        let task = tokio::spawn(async move {
            tokio::join!(watcher, publisher, forwarder);
        });

        Watch {
            results: result_rx,
            errors: err_rx,
            task,
        }
    }

    /// Current health of every instance of `service_id`, from one store read.
    pub async fn service(&self, service_id: &str) -> Result<ServiceSnapshot, HealthError> {
        let (pairs, _) = self
            .kv
            .list(&service_prefix(service_id), QueryOptions::default())
            .await?;

        let mut snapshot = ServiceSnapshot::new();
        for pair in &pairs {
            let res = kv_to_result(pair)?;
            snapshot.insert(res.node.clone(), res);
        }
        Ok(snapshot)
    }

    /// Current health of `pod` on `node`; `unknown` when there is no record.
    pub async fn node_health(&self, pod: &PodId, node: &NodeName) -> Result<HealthResult, HealthError> {
        let (pair, _) = self
            .kv
            .get(&health_path(pod.as_str(), node), QueryOptions::default())
            .await?;

        match pair {
            Some(pair) => kv_to_result(&pair),
            None => Ok(HealthResult::unknown(pod.clone(), node.clone())),
        }
    }
}

/// Long-poll one service's namespace until cancelled.
///
/// Starts at index zero so the first read is immediate. A failed query leaves
/// the index untouched. Entries that fail to decode are reported and left out
/// of that round's snapshot.
pub(crate) async fn poll_service_health(
    service_id: String,
    kv: Arc<dyn HealthKv>,
    results: SnapshotSender<ServiceSnapshot>,
    errors: mpsc::Sender<HealthError>,
    watch_delay: Duration,
    cancel: CancellationToken,
) {
    let watch_delay = watch_delay.max(MIN_WATCH_DELAY);
    let prefix = service_prefix(&service_id);
    let timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(timer);
    let mut current_index = 0;

    tracing::debug!(service = %service_id, delay_ms = watch_delay.as_millis() as u64, "Service poller starting");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = &mut timer => {}
        }
        timer.as_mut().reset(Instant::now() + watch_delay);

        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            listed = kv.list(&prefix, QueryOptions::new(current_index)) => listed,
        };

        let (pairs, meta) = match listed {
            Ok(listed) => listed,
            Err(e) => {
                if !report_error(&errors, e.into(), &cancel).await {
                    return;
                }
                continue;
            }
        };
        current_index = meta.last_index;

        let mut snapshot = ServiceSnapshot::new();
        for pair in &pairs {
            match kv_to_result(pair) {
                Ok(res) => {
                    snapshot.insert(res.node.clone(), res);
                }
                Err(e) => {
                    if !report_error(&errors, e, &cancel).await {
                        return;
                    }
                }
            }
        }

        results.publish(snapshot);
        metrics::record_snapshot_published("store");
    }
}
