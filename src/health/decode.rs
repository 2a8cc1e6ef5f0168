//! Stored record decoding and store path scheme.
//!
//! Records live at `health/<service-id>/<node-id>` and hold a JSON document
//! with at least `id`, `node`, `service` and `status`.

use serde::{Deserialize, Serialize};

use crate::error::HealthError;
use crate::health::types::{HealthResult, HealthStatus, NodeName, PodId};
use crate::store::KvPair;

/// Root prefix of the health tree.
pub const HEALTH_ROOT: &str = "health/";

/// Path of one subject's record on one node.
pub fn health_path(service_id: &str, node: &NodeName) -> String {
    format!("{}{}/{}", HEALTH_ROOT, service_id, node)
}

/// Prefix holding every record of one service.
pub fn service_prefix(service_id: &str) -> String {
    format!("{}{}/", HEALTH_ROOT, service_id)
}

/// Raw document as written by health agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub node: String,
    pub service: String,
    #[serde(default)]
    pub status: String,
    /// Free-form check output; not carried into results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl From<StoredRecord> for HealthResult {
    fn from(record: StoredRecord) -> Self {
        HealthResult {
            id: PodId(record.id),
            node: NodeName(record.node),
            service: record.service,
            status: HealthStatus::from_token(&record.status),
        }
    }
}

/// Decode one stored value.
pub fn decode_record(key: &str, value: &[u8]) -> Result<HealthResult, HealthError> {
    let record: StoredRecord = serde_json::from_slice(value).map_err(|source| HealthError::Decode {
        key: key.to_string(),
        source,
    })?;
    Ok(record.into())
}

/// Decode a pair read from the store.
pub fn kv_to_result(pair: &KvPair) -> Result<HealthResult, HealthError> {
    decode_record(&pair.key, &pair.value)
}
