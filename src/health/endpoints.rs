//! Status endpoint addressing for active probes.

use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::error::HealthError;
use crate::health::types::NodeName;
use crate::probe::Protocol;

/// Path probed when a stanza does not name one.
pub const DEFAULT_STATUS_PATH: &str = "/_status";

/// Probe configuration of a subject type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusStanza {
    /// Status port. Zero means the subject has no checkable endpoint and is
    /// always considered healthy.
    pub port: u16,
    pub path: Option<String>,
    /// Probe over plain HTTP instead of HTTPS.
    pub http: bool,
}

impl StatusStanza {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    /// True when there is nothing to probe.
    pub fn always_healthy(&self) -> bool {
        self.port == 0
    }

    pub fn path(&self) -> &str {
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => path,
            _ => DEFAULT_STATUS_PATH,
        }
    }

    pub fn protocol(&self) -> Protocol {
        if self.http {
            Protocol::Http
        } else {
            Protocol::Https
        }
    }
}

/// Build one status URL per node.
pub fn status_endpoints(nodes: &[NodeName], status: &StatusStanza) -> Vec<String> {
    let scheme = status.protocol().scheme();
    let path = status.path();
    let sep = if path.starts_with('/') { "" } else { "/" };
    nodes
        .iter()
        .map(|node| format!("{}://{}:{}{}{}", scheme, node, status.port, sep, path))
        .collect()
}

/// Recover the node a status URL was built for.
pub fn status_url_to_node(endpoint: &str) -> Result<NodeName, HealthError> {
    let resolve_err = |reason: String| HealthError::Resolve {
        url: endpoint.to_string(),
        reason,
    };

    let parsed = Url::parse(endpoint).map_err(|e| resolve_err(e.to_string()))?;
    match parsed.host() {
        // The parser lowercases domains; node names keep their case.
        Some(Host::Domain(domain)) if !domain.is_empty() => match raw_host(endpoint) {
            Some(raw) if raw.eq_ignore_ascii_case(domain) => Ok(NodeName::from(raw)),
            _ => Ok(NodeName::from(domain)),
        },
        Some(Host::Ipv4(ip)) => Ok(NodeName(ip.to_string())),
        Some(Host::Ipv6(ip)) => Ok(NodeName(ip.to_string())),
        _ => Err(resolve_err("missing host".to_string())),
    }
}

/// Host of `endpoint` exactly as written, without userinfo or port.
fn raw_host(endpoint: &str) -> Option<&str> {
    let (_, rest) = endpoint.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = host_port.rsplit_once(':').map_or(host_port, |(host, _)| host);
    (!host.is_empty()).then_some(host)
}
