//! Gateway API types
//!
//! Gateways and HTTPRoutes are the attachment targets of HTTPFilterPolicies.
//! meshfilter only reads them; all types implement `HasApiResource` so the
//! controller can list them through `DynamicObject`.

pub mod gateway_api;
