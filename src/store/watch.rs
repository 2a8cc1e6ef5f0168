//! Long-poll watchers over one key or one key prefix.
//!
//! # Responsibilities
//! - Track the last observed change index
//! - Issue blocking queries bounded by `interval + random(0, jitter)`
//! - Emit the full current value set whenever the index moves
//! - Report query failures without advancing the index, then retry
//!
//! Each watcher owns its output senders; they close exactly once, when the
//! watcher returns after cancellation (or after its consumer went away).

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep};
use tokio_util::sync::CancellationToken;

use crate::error::HealthError;
use crate::health::watch::report_error;
use crate::store::{HealthKv, KvPair, QueryOptions};

/// Paces queries so that consecutive queries start at least one bound apart.
struct Pacer {
    interval: Duration,
    jitter: Duration,
    timer: Pin<Box<Sleep>>,
}

impl Pacer {
    fn new(interval: Duration, jitter: Duration) -> Self {
        Self {
            interval,
            jitter,
            // First query goes out immediately.
            timer: Box::pin(tokio::time::sleep(Duration::ZERO)),
        }
    }

    /// Wait for the next slot. Returns the bound for the query about to be
    /// issued, or `None` when cancelled.
    async fn next(&mut self, cancel: &CancellationToken) -> Option<Duration> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            _ = self.timer.as_mut() => {}
        }
        let bound = jittered(self.interval, self.jitter);
        self.timer.as_mut().reset(Instant::now() + bound);
        Some(bound)
    }
}

/// `interval` plus a uniformly random share of `jitter`.
pub fn jittered(interval: Duration, jitter: Duration) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return interval;
    }
    interval + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
}

/// Watch every key under `prefix`, sending the whole set on each change.
pub async fn watch_prefix(
    prefix: String,
    kv: Arc<dyn HealthKv>,
    out: mpsc::Sender<Vec<KvPair>>,
    errors: mpsc::Sender<HealthError>,
    cancel: CancellationToken,
    interval: Duration,
    jitter: Duration,
) {
    let mut pacer = Pacer::new(interval, jitter);
    let mut current_index = 0;

    while let Some(bound) = pacer.next(&cancel).await {
        let opts = QueryOptions::new(current_index).with_wait_time(bound);
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            listed = kv.list(&prefix, opts) => listed,
        };

        match listed {
            Err(e) => {
                if !report_error(&errors, e.into(), &cancel).await {
                    return;
                }
            }
            Ok((pairs, meta)) => {
                if meta.last_index == current_index {
                    continue;
                }
                current_index = meta.last_index;
                tracing::trace!(prefix = %prefix, index = current_index, count = pairs.len(), "Prefix changed");
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = out.send(pairs) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Watch one key. `None` is sent whenever the key is observed absent.
pub async fn watch_single(
    key: String,
    kv: Arc<dyn HealthKv>,
    out: mpsc::Sender<Option<KvPair>>,
    errors: mpsc::Sender<HealthError>,
    cancel: CancellationToken,
    interval: Duration,
    jitter: Duration,
) {
    let mut pacer = Pacer::new(interval, jitter);
    let mut current_index = 0;

    while let Some(bound) = pacer.next(&cancel).await {
        let opts = QueryOptions::new(current_index).with_wait_time(bound);
        let got = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            got = kv.get(&key, opts) => got,
        };

        match got {
            Err(e) => {
                if !report_error(&errors, e.into(), &cancel).await {
                    return;
                }
            }
            Ok((pair, meta)) => {
                if meta.last_index == current_index {
                    continue;
                }
                current_index = meta.last_index;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    sent = out.send(pair) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    }
}
