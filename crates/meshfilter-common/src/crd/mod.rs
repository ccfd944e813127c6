//! Custom Resource Definitions for meshfilter
//!
//! `HTTPFilterPolicy` attaches plugin configuration to gateways and routes;
//! `Consumer` carries per-identity plugin configuration.

mod consumer;
mod filter_policy;
mod types;

pub use consumer::{Consumer, ConsumerPlugin, ConsumerSpec, ConsumerStatus};
pub use filter_policy::{
    FilterConfig, HttpFilterPolicy, HttpFilterPolicySpec, HttpFilterPolicyStatus,
    PolicyTargetReference,
};
pub use types::{
    preserve_unknown_fields, Condition, ConditionStatus, CONDITION_ACCEPTED, GROUP, VERSION,
};
