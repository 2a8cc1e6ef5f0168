//! Error taxonomy shared by every watch and lookup.
//!
//! # Categories
//! - Decode: a stored record could not be parsed; the watch keeps its prior state
//! - Store: a KV query failed; retried at the same cadence without advancing the index
//! - Resolve: a probe endpoint could not be mapped back to a node; the sample is dropped
//! - Probe: the active probe client failed; subscriptions are retried
//!
//! Cancellation is not an error and never appears here.

use thiserror::Error;

use crate::probe::ProbeError;
use crate::store::KvError;

/// Errors surfaced on watch error channels and returned by point lookups.
#[derive(Debug, Error)]
pub enum HealthError {
    /// A stored health record was malformed.
    #[error("could not decode health record at {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// The backing store query failed.
    #[error(transparent)]
    Store(#[from] KvError),

    /// A status endpoint URL did not map back to a node.
    #[error("could not resolve node from status url '{url}': {reason}")]
    Resolve { url: String, reason: String },

    /// The active probe client failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

impl HealthError {
    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            HealthError::Decode { .. } => "decode",
            HealthError::Store(_) => "store",
            HealthError::Resolve { .. } => "resolve",
            HealthError::Probe(_) => "probe",
        }
    }
}
