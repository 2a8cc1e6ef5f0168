//! Freshness-preserving snapshot delivery.
//!
//! # Responsibilities
//! - Provide a single-slot channel where a new snapshot replaces an unread one
//! - Decode raw snapshots from a key watcher and publish them whole
//!
//! # Design Decisions
//! - A slow consumer always reads the newest state, never a backlog
//! - A batch with any undecodable entry is dropped whole, after every bad
//!   entry has been reported
//! - Each delivered snapshot is an independently owned value

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::error::HealthError;
use crate::health::decode::kv_to_result;
use crate::health::types::HealthResult;
use crate::health::watch::report_error;
use crate::observability::metrics;
use crate::store::KvPair;

/// Create a single-slot snapshot channel.
pub fn snapshot_channel<T: Clone>() -> (SnapshotSender<T>, SnapshotReceiver<T>) {
    let (tx, rx) = watch::channel(None);
    (
        SnapshotSender { inner: Arc::new(tx) },
        SnapshotReceiver { inner: rx },
    )
}

/// Publishing half of a snapshot channel.
///
/// Clones publish into the same slot; the channel closes once every clone is
/// dropped.
#[derive(Debug)]
pub struct SnapshotSender<T> {
    inner: Arc<watch::Sender<Option<T>>>,
}

impl<T> Clone for SnapshotSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SnapshotSender<T> {
    /// Replace whatever is in the slot, read or not. Never blocks.
    pub fn publish(&self, snapshot: T) {
        self.inner.send_replace(Some(snapshot));
    }
}

/// Consuming half of a snapshot channel.
#[derive(Debug)]
pub struct SnapshotReceiver<T> {
    inner: watch::Receiver<Option<T>>,
}

impl<T: Clone> SnapshotReceiver<T> {
    /// Wait for the next unread snapshot.
    ///
    /// Returns `None` once every sender is gone and nothing is left unread.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            self.inner.changed().await.ok()?;
            if let Some(snapshot) = self.take() {
                return Some(snapshot);
            }
        }
    }

    /// Take the unread snapshot, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        match self.inner.has_changed() {
            Ok(true) => self.take(),
            _ => None,
        }
    }

    fn take(&mut self) -> Option<T> {
        // The slot keeps its value for other readers; clone marks it seen here.
        self.inner.borrow_and_update().clone()
    }
}

/// Decode raw prefix snapshots and publish them.
///
/// Only one publisher may feed a given sender. Returns when cancelled or when
/// the input closes.
pub async fn publish_latest_health(
    mut input: mpsc::Receiver<Vec<KvPair>>,
    results: SnapshotSender<Vec<HealthResult>>,
    errors: mpsc::Sender<HealthError>,
    cancel: CancellationToken,
) {
    loop {
        let listed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            listed = input.recv() => match listed {
                Some(listed) => listed,
                None => return,
            },
        };

        let mut decoded = Vec::with_capacity(listed.len());
        let mut failed = false;
        for pair in &listed {
            match kv_to_result(pair) {
                Ok(res) => decoded.push(res),
                Err(e) => {
                    failed = true;
                    if !report_error(&errors, e, &cancel).await {
                        return;
                    }
                }
            }
        }
        if failed {
            continue;
        }

        results.publish(decoded);
        metrics::record_snapshot_published("prefix");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slow_consumer_sees_latest() {
        let (tx, mut rx) = snapshot_channel();
        tx.publish(1);
        tx.publish(2);
        tx.publish(3);
        assert_eq!(rx.recv().await, Some(3));
        assert_eq!(rx.try_recv(), None);
    }

    #[tokio::test]
    async fn test_closes_after_last_sender() {
        let (tx, mut rx) = snapshot_channel();
        let tx2 = tx.clone();
        tx.publish("a");
        drop(tx);
        assert_eq!(rx.recv().await, Some("a"));
        tx2.publish("b");
        drop(tx2);
        assert_eq!(rx.recv().await, Some("b"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_bad_entry_drops_whole_batch() {
        let (raw_tx, raw_rx) = mpsc::channel(2);
        let (tx, mut rx) = snapshot_channel();
        let (err_tx, mut err_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publish_latest_health(raw_rx, tx, err_tx, cancel.clone()));

        let good = KvPair {
            key: "health/web/n1".to_string(),
            value: br#"{"id":"web","node":"n1","service":"web","status":"passing"}"#.to_vec(),
            modify_index: 2,
        };
        let bad = KvPair {
            key: "health/web/n2".to_string(),
            value: b"garbage".to_vec(),
            modify_index: 3,
        };

        raw_tx.send(vec![good.clone(), bad]).await.unwrap();
        let err = err_rx.recv().await.unwrap();
        assert_eq!(err.kind(), "decode");

        raw_tx.send(vec![good]).await.unwrap();
        let published = rx.recv().await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].node.as_str(), "n1");

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(rx.recv().await, None);
    }
}
