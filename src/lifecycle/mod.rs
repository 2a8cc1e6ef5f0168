//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → cancel root token → every watch observes it at its
//!     next blocking point → output channels close → tasks join
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One root cancellation token per process; each watch gets a child
//! - Triggering shutdown twice is harmless

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
