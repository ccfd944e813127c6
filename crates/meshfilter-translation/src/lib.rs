//! Translation engine for meshfilter
//!
//! Compiles `HTTPFilterPolicy` and `Consumer` objects attached to Gateway API
//! gateways and routes into Istio EnvoyFilters:
//!
//! - **Model**: value-typed attachment keys and the per-pass topology
//! - **Resolver**: target resolution and precedence-aware merging
//! - **Consumer**: per-consumer payloads and fingerprints
//! - **Patch**: EnvoyFilter rendering
//! - **Status**: one outcome per policy and consumer
//!
//! A pass is a pure function of its [`Snapshot`]; see [`translate`].

pub mod consumer;
pub mod error;
pub mod model;
pub mod patch;
pub mod plugin;
pub mod provenance;
pub mod resolver;
pub mod status;

use std::collections::BTreeMap;

use kube::ResourceExt;
use meshfilter_common::crd::{Consumer, HttpFilterPolicy};
use meshfilter_common::network::gateway_api::{Gateway, HttpRoute};
use meshfilter_common::policy::EnvoyFilter;
use meshfilter_common::DEFAULT_ROOT_NAMESPACE;
use tracing::{debug, instrument};

pub use error::TranslationError;
pub use model::NamespacedName;
pub use plugin::PluginRegistry;
pub use status::{InvalidReason, ObjectStatus};

use crate::consumer::{build_consumer, ConsumerRecord};
use crate::model::Topology;
use crate::patch::PatchGenerator;

/// Default name of the consumer aggregate EnvoyFilter
pub const DEFAULT_CONSUMER_FILTER_NAME: &str = "meshfilter-consumer";
/// Default path of the golang filter shared library on the proxy
pub const DEFAULT_GOLANG_LIBRARY_PATH: &str = "/etc/libgolang.so";
/// Default golang filter library id
pub const DEFAULT_GOLANG_LIBRARY_ID: &str = "meshfilter";

// =============================================================================
// Configuration
// =============================================================================

/// Settings that shape generated artifacts
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TranslationConfig {
    /// Namespace every EnvoyFilter is written to
    pub root_namespace: String,
    /// Name of the consumer aggregate EnvoyFilter and its extension config
    pub consumer_filter_name: String,
    /// Path of the golang filter library on the proxy
    pub golang_library_path: String,
    /// Library id of the golang filter
    pub golang_library_id: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            root_namespace: DEFAULT_ROOT_NAMESPACE.to_string(),
            consumer_filter_name: DEFAULT_CONSUMER_FILTER_NAME.to_string(),
            golang_library_path: DEFAULT_GOLANG_LIBRARY_PATH.to_string(),
            golang_library_id: DEFAULT_GOLANG_LIBRARY_ID.to_string(),
        }
    }
}

// =============================================================================
// Pass input and output
// =============================================================================

/// Everything one pass reads
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    /// Gateway API gateways
    pub gateways: Vec<Gateway>,
    /// Gateway API HTTP routes
    pub routes: Vec<HttpRoute>,
    /// Filter policies
    pub policies: Vec<HttpFilterPolicy>,
    /// Consumers
    pub consumers: Vec<Consumer>,
    /// Consumer aggregate written by the previous pass
    pub previous_consumer_filter: Option<EnvoyFilter>,
}

/// Everything one pass produces
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TranslationOutput {
    /// Gateway and route EnvoyFilters, sorted by name
    pub envoy_filters: Vec<EnvoyFilter>,
    /// Consumer aggregate, absent when no consumer is valid
    pub consumer_filter: Option<EnvoyFilter>,
    /// Outcome per policy
    pub policy_status: BTreeMap<NamespacedName, ObjectStatus>,
    /// Outcome per consumer
    pub consumer_status: BTreeMap<NamespacedName, ObjectStatus>,
}

impl TranslationOutput {
    /// Every generated EnvoyFilter including the consumer aggregate
    pub fn all_filters(&self) -> impl Iterator<Item = &EnvoyFilter> {
        self.envoy_filters.iter().chain(self.consumer_filter.iter())
    }
}

// =============================================================================
// Translation
// =============================================================================

/// Run one translation pass
///
/// Invalid policies and consumers are reported in the output statuses and
/// never affect the artifacts of other objects. An error means the snapshot
/// itself is inconsistent.
#[instrument(
    skip_all,
    fields(
        gateways = snapshot.gateways.len(),
        routes = snapshot.routes.len(),
        policies = snapshot.policies.len(),
        consumers = snapshot.consumers.len()
    )
)]
pub fn translate(
    snapshot: &Snapshot,
    registry: &PluginRegistry,
    config: &TranslationConfig,
) -> Result<TranslationOutput, TranslationError> {
    let topology = Topology::build(&snapshot.gateways, &snapshot.routes)?;
    let resolution = resolver::resolve(&topology, &snapshot.policies, registry);
    status::report_policies(&resolution.outcomes);

    let mut consumers: Vec<&Consumer> = snapshot.consumers.iter().collect();
    consumers.sort_by_key(|c| (c.namespace().unwrap_or_default(), c.name_any()));
    let records: Vec<ConsumerRecord> = consumers
        .into_iter()
        .map(|c| build_consumer(c, registry))
        .collect();

    let generator = PatchGenerator::new(config, registry);
    let mut envoy_filters = generator.gateway_filters(&topology, &resolution)?;
    envoy_filters.extend(generator.route_filters(&resolution)?);
    envoy_filters.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    let consumer_filter =
        generator.consumer_filter(&records, snapshot.previous_consumer_filter.as_ref())?;

    let output = TranslationOutput {
        envoy_filters,
        consumer_filter,
        policy_status: resolution.outcomes,
        consumer_status: status::consumer_statuses(&records),
    };
    debug!(
        envoy_filters = output.envoy_filters.len(),
        consumer_filter = output.consumer_filter.is_some(),
        "translation pass complete"
    );
    Ok(output)
}
