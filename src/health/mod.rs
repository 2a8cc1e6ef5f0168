//! Health aggregation subsystem.
//!
//! # Data Flow
//! ```text
//! Store-backed (checker.rs):
//!     health/<service>/<node> records
//!     → store::watch key/prefix watchers
//!     → decode.rs (record → HealthResult)
//!     → per-subject channel, or publisher.rs snapshot slot
//!
//! Shadow traffic (shadow.rs):
//!     store poller ─────────────────────────┐
//!     probe monitors → reconciler (node map) ┴→ one snapshot slot
//!
//! Point lookups:
//!     one store read or one batch probe → snapshot
//! ```
//!
//! # Design Decisions
//! - Every watch is stopped by its cancellation token, never by dropping it
//! - Snapshot consumers only ever see the freshest value
//! - Errors travel on a bounded side channel and never stop a watch

pub mod checker;
pub mod decode;
pub mod endpoints;
pub mod publisher;
pub mod shadow;
pub mod types;
pub mod watch;

pub use checker::{Buffers, HealthChecker};
pub use endpoints::StatusStanza;
pub use publisher::{SnapshotReceiver, SnapshotSender};
pub use shadow::{ShadowTimings, ShadowTrafficChecker, ShadowWatchRequest};
pub use types::{HealthResult, HealthStatus, NodeName, PodId, ServiceSnapshot};
pub use watch::Watch;
