//! Watch handles and best-effort error delivery.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::HealthError;
use crate::observability::metrics;

/// A running watch.
///
/// Both receivers close once the watch's tasks observe cancellation. Dropping
/// the handle does not stop the watch; cancel its token.
#[derive(Debug)]
pub struct Watch<R> {
    /// Observations or snapshots.
    pub results: R,
    /// Best-effort error side channel.
    pub errors: mpsc::Receiver<HealthError>,
    /// Task driving the watch.
    pub task: JoinHandle<()>,
}

/// Deliver an error, waiting for room on the channel.
///
/// Returns `false` when cancellation fired first. A dropped receiver counts as
/// delivered so the caller keeps running.
pub(crate) async fn report_error(
    errors: &mpsc::Sender<HealthError>,
    err: HealthError,
    cancel: &CancellationToken,
) -> bool {
    log_error(&err);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = errors.send(err) => true,
    }
}

/// Pass on an already reported error only if the channel has room right now.
pub(crate) fn offer_error(errors: &mpsc::Sender<HealthError>, err: HealthError) {
    if let Err(mpsc::error::TrySendError::Full(err)) = errors.try_send(err) {
        tracing::debug!(kind = err.kind(), "Error channel full, dropping error");
    }
}

fn log_error(err: &HealthError) {
    metrics::record_watch_error(err.kind());
    tracing::warn!(kind = err.kind(), error = %err, "Health watch error");
}
