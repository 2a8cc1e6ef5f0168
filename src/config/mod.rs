//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → WatcherConfig (validated, immutable)
//!     → store / checker / probe construction
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → diff_services finds changed node sets
//!     → new node sets pushed to running shadow watches
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes arrive as whole new configs
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use schema::{
    ObservabilityConfig, ProbeConfig, ServiceConfig, ShadowConfig, StoreConfig, WatchConfig,
    WatcherConfig,
};
