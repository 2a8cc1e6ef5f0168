//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check value ranges (periods > 0, buffers >= 1)
//! - Check service identities are unique and well formed
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: WatcherConfig → Result<(), Vec<ValidationError>>

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::WatcherConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("store.address '{0}' is not a valid URL")]
    StoreAddress(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("observability.metrics_address '{0}' is not a socket address")]
    MetricsAddress(String),

    #[error("service at position {0} has an empty id")]
    EmptyServiceId(usize),

    #[error("service '{0}' is configured more than once")]
    DuplicateService(String),

    #[error("service '{0}' contains a node with an empty name or a '/'")]
    BadNodeName(String),
}

/// Check a configuration, returning every problem found.
pub fn validate_config(config: &WatcherConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if Url::parse(&config.store.address).is_err() {
        errors.push(ValidationError::StoreAddress(config.store.address.clone()));
    }
    if config.store.wait_secs == 0 {
        errors.push(ValidationError::Zero("store.wait_secs"));
    }

    if config.watch.error_buffer == 0 {
        errors.push(ValidationError::Zero("watch.error_buffer"));
    }
    if config.watch.result_buffer == 0 {
        errors.push(ValidationError::Zero("watch.result_buffer"));
    }

    let shadow = &config.shadow;
    for (name, value) in [
        ("shadow.heartbeat_secs", shadow.heartbeat_secs),
        ("shadow.always_healthy_heartbeat_secs", shadow.always_healthy_heartbeat_secs),
        ("shadow.monitor_refresh_secs", shadow.monitor_refresh_secs),
        ("shadow.monitor_retry_secs", shadow.monitor_retry_secs),
        ("probe.timeout_secs", config.probe.timeout_secs),
        ("probe.interval_ms", config.probe.interval_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    let mut seen = HashSet::new();
    for (i, service) in config.services.iter().enumerate() {
        if service.id.is_empty() {
            errors.push(ValidationError::EmptyServiceId(i));
            continue;
        }
        if !seen.insert(service.id.as_str()) {
            errors.push(ValidationError::DuplicateService(service.id.clone()));
        }
        if service
            .nodes
            .iter()
            .any(|node| node.as_str().is_empty() || node.as_str().contains('/'))
        {
            errors.push(ValidationError::BadNodeName(service.id.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
