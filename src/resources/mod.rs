//! Cluster resource capabilities handed to the shadow traffic checker.
//!
//! These are carried for callers that resolve which subjects a rollout
//! covers; the health engine itself never calls them.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::health::types::PodId;

/// Replication controller identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RcId(pub String);

impl fmt::Display for RcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of labeled object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelType {
    #[default]
    Unknown,
    Pod,
    Node,
    PodClusters,
    ReplicationController,
    Rolls,
}

/// An object and its labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labeled {
    pub label_type: LabelType,
    pub id: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Errors from resource capabilities.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("resource service unavailable: {0}")]
    Unavailable(String),
}

/// Maps a subject to the controllers that own it.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    async fn rc_ids_for_pod(&self, pod: &PodId) -> Result<Vec<RcId>, ResourceError>;
}

/// Resolves label selectors to matching objects.
#[async_trait]
pub trait LabelReader: Send + Sync {
    async fn get_matches(
        &self,
        selector: &str,
        label_type: LabelType,
    ) -> Result<Vec<Labeled>, ResourceError>;
}

/// Capability stand-in for deployments that do not wire a resource service.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unwired;

#[async_trait]
impl ResourceClient for Unwired {
    async fn rc_ids_for_pod(&self, pod: &PodId) -> Result<Vec<RcId>, ResourceError> {
        Err(ResourceError::Unavailable(format!(
            "no resource client configured (pod {})",
            pod
        )))
    }
}

#[async_trait]
impl LabelReader for Unwired {
    async fn get_matches(
        &self,
        selector: &str,
        _label_type: LabelType,
    ) -> Result<Vec<Labeled>, ResourceError> {
        Err(ResourceError::Unavailable(format!(
            "no label reader configured (selector {})",
            selector
        )))
    }
}
