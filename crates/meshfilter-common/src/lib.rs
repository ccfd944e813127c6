//! Common types for meshfilter: CRDs, generated Istio resources, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod network;
pub mod policy;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace Istio reads mesh-wide EnvoyFilters from
pub const DEFAULT_ROOT_NAMESPACE: &str = "istio-system";

/// Standard Kubernetes name label
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label on every resource generated by meshfilter
pub const LABEL_MANAGED_BY_MESHFILTER: &str = "meshfilter";

/// Label selector matching every generated resource
pub const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=meshfilter";

/// Annotation carrying the provenance of a generated EnvoyFilter
pub const INFO_ANNOTATION: &str = "meshfilter.dev/info";

/// Gateway annotation listing sections whose filter manager is already installed
///
/// The value is a comma separated list of listener names, or `*` for all listeners.
pub const FILTER_MANAGER_ANNOTATION: &str = "meshfilter.dev/filter-manager";
