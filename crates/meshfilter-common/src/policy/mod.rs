//! Generated proxy policy types
//!
//! meshfilter renders all of its output as Istio EnvoyFilter resources.
//! Types implement the `HasApiResource` trait for consistent API version and
//! kind handling.

mod istio;

pub use istio::{
    ApplyTo, ConfigPatch, EnvoyFilter, EnvoyFilterSpec, FilterChainMatch, FilterMatch,
    ListenerMatch, Operation, PatchContext, PatchMatch, PatchValue, RouteConfigurationMatch,
    RouteMatch, SubFilterMatch, VirtualHostMatch, WorkloadSelector, GATEWAY_NAME_LABEL,
};
