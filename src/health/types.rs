//! Health observation types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a machine running subjects.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(pub String);

/// Identity of a health subject (a pod / service instance type).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(NodeName);
string_id!(PodId);

/// Closed set of health tokens.
///
/// Unrecognised tokens decode to `Unknown` instead of failing, so a record
/// written by a newer agent never breaks a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum HealthStatus {
    Passing,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Passing => "passing",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }

    /// Map a stored token to a status.
    pub fn from_token(token: &str) -> Self {
        match token {
            "passing" => HealthStatus::Passing,
            "warning" => HealthStatus::Warning,
            "critical" => HealthStatus::Critical,
            _ => HealthStatus::Unknown,
        }
    }

    pub fn is_passing(&self) -> bool {
        *self == HealthStatus::Passing
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for HealthStatus {
    fn from(token: String) -> Self {
        Self::from_token(&token)
    }
}

impl From<HealthStatus> for String {
    fn from(status: HealthStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One point-in-time health observation of a subject on a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResult {
    /// Subject identity.
    pub id: PodId,
    pub node: NodeName,
    pub service: String,
    #[serde(default)]
    pub status: HealthStatus,
}

impl HealthResult {
    pub fn new(id: PodId, node: NodeName, service: impl Into<String>, status: HealthStatus) -> Self {
        Self {
            id,
            node,
            service: service.into(),
            status,
        }
    }

    /// Result for a node that has no observation yet.
    pub fn unknown(id: PodId, node: NodeName) -> Self {
        let service = id.0.clone();
        Self::new(id, node, service, HealthStatus::Unknown)
    }

    /// Result for a subject that is treated as healthy without probing.
    pub fn passing(service_id: &str, node: NodeName) -> Self {
        Self::new(PodId::from(service_id), node, service_id, HealthStatus::Passing)
    }
}

/// Complete view of one service's health, keyed by node.
///
/// Every value's `node` field equals its key. Snapshots replace one another
/// wholesale; consumers must never treat one as a delta.
pub type ServiceSnapshot = BTreeMap<NodeName, HealthResult>;
