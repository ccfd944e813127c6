//! meshfilter controller
//!
//! Watches `HTTPFilterPolicy` and `Consumer` objects and keeps the generated
//! Istio EnvoyFilters and object statuses in sync with the translation engine.

pub mod config;
pub mod controller;
pub mod error;
pub mod runner;
pub mod store;

pub use error::ReconcileError;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "meshfilter-controller";
