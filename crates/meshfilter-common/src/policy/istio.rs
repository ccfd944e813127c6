//! Istio EnvoyFilter types
//!
//! Only the subset of `networking.istio.io/v1alpha3` EnvoyFilter used by
//! meshfilter is modelled: config patches with listener and route
//! configuration matches. Patch values are opaque JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Istio EnvoyFilter carrying configuration patches for the proxy fleet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilter {
    /// API version
    #[serde(default = "EnvoyFilter::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "EnvoyFilter::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    pub spec: EnvoyFilterSpec,
}

impl HasApiResource for EnvoyFilter {
    const API_VERSION: &'static str = "networking.istio.io/v1alpha3";
    const KIND: &'static str = "EnvoyFilter";
}

impl EnvoyFilter {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new EnvoyFilter
    pub fn new(metadata: ObjectMeta, spec: EnvoyFilterSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }

    /// Name of this EnvoyFilter
    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

/// Pod label Istio sets on the proxies it deploys for a Gateway
pub const GATEWAY_NAME_LABEL: &str = "gateway.networking.k8s.io/gateway-name";

/// EnvoyFilter spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvoyFilterSpec {
    /// Proxies the filter applies to; every proxy when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload_selector: Option<WorkloadSelector>,
    /// Ordered configuration patches
    #[serde(default)]
    pub config_patches: Vec<ConfigPatch>,
}

impl EnvoyFilterSpec {
    /// Spec applying to every proxy
    pub fn new(config_patches: Vec<ConfigPatch>) -> Self {
        Self {
            workload_selector: None,
            config_patches,
        }
    }

    /// Restrict the filter to the proxies of one Gateway
    pub fn for_gateway(mut self, gateway_name: &str) -> Self {
        self.workload_selector = Some(WorkloadSelector {
            labels: BTreeMap::from([(GATEWAY_NAME_LABEL.to_string(), gateway_name.to_string())]),
        });
        self
    }
}

/// Label selector over proxy workloads
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkloadSelector {
    /// Labels a workload must carry
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// One configuration patch
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    /// Which part of the Envoy configuration the patch applies to
    pub apply_to: ApplyTo,
    /// Where the patch applies
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub match_: Option<PatchMatch>,
    /// The patch itself
    pub patch: PatchValue,
}

/// Envoy configuration object a patch applies to
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplyTo {
    /// An extension config served over ECDS
    ExtensionConfig,
    /// An HTTP filter in an HTTP connection manager
    HttpFilter,
    /// A listener filter
    ListenerFilter,
    /// A network filter in a filter chain
    NetworkFilter,
    /// A route inside a virtual host
    HttpRoute,
    /// A virtual host inside a route configuration
    VirtualHost,
}

/// Proxy context a patch matches
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchContext {
    /// Any proxy
    Any,
    /// Gateway proxies
    Gateway,
    /// Sidecar inbound listeners
    SidecarInbound,
    /// Sidecar outbound listeners
    SidecarOutbound,
}

/// Match conditions of a patch
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchMatch {
    /// Proxy context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<PatchContext>,
    /// Listener match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerMatch>,
    /// Route configuration match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_configuration: Option<RouteConfigurationMatch>,
}

/// Listener match
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListenerMatch {
    /// Listener port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_number: Option<u32>,
    /// Filter chain match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_chain: Option<FilterChainMatch>,
}

/// Filter chain match
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterChainMatch {
    /// Network filter match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterMatch>,
}

/// Network filter match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterMatch {
    /// Network filter name
    pub name: String,
    /// HTTP filter match inside the network filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_filter: Option<SubFilterMatch>,
}

/// HTTP filter match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubFilterMatch {
    /// HTTP filter name
    pub name: String,
}

/// Route configuration match
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfigurationMatch {
    /// Listener port the route configuration is served on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_number: Option<u32>,
    /// Virtual host match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vhost: Option<VirtualHostMatch>,
}

/// Virtual host match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualHostMatch {
    /// Virtual host name (`hostname:port`)
    pub name: String,
    /// Route match inside the virtual host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteMatch>,
}

/// Route match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RouteMatch {
    /// Route name
    pub name: String,
}

/// Patch operation
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    /// Add a new object
    Add,
    /// Merge into the matched object
    Merge,
    /// Insert before the matched object
    InsertBefore,
    /// Insert as the first object of the list
    InsertFirst,
}

/// Patch operation and value
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatchValue {
    /// Operation
    pub operation: Operation,
    /// Opaque Envoy configuration
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envoy_filter_serializes_in_istio_shape() {
        let ef = EnvoyFilter::new(
            ObjectMeta::new("meshfilter-consumer", "istio-system"),
            EnvoyFilterSpec::new(vec![ConfigPatch {
                    apply_to: ApplyTo::HttpRoute,
                    match_: Some(PatchMatch {
                        context: Some(PatchContext::Gateway),
                        listener: None,
                        route_configuration: Some(RouteConfigurationMatch {
                            port_number: Some(80),
                            vhost: Some(VirtualHostMatch {
                                name: "shop.example.com:80".to_string(),
                                route: Some(RouteMatch {
                                    name: "default.shop.login".to_string(),
                                }),
                            }),
                        }),
                    }),
                    patch: PatchValue {
                        operation: Operation::Merge,
                        value: serde_json::json!({}),
                    },
                }])
                .for_gateway("ingress"),
        );

        let json = serde_json::to_value(&ef).unwrap();
        assert_eq!(json["apiVersion"], "networking.istio.io/v1alpha3");
        assert_eq!(json["kind"], "EnvoyFilter");
        let cp = &json["spec"]["configPatches"][0];
        assert_eq!(cp["applyTo"], "HTTP_ROUTE");
        assert_eq!(cp["match"]["context"], "GATEWAY");
        assert_eq!(
            json["spec"]["workloadSelector"]["labels"][GATEWAY_NAME_LABEL],
            "ingress"
        );
        assert_eq!(cp["match"]["routeConfiguration"]["portNumber"], 80);
        assert_eq!(
            cp["match"]["routeConfiguration"]["vhost"]["route"]["name"],
            "default.shop.login"
        );
        assert_eq!(cp["patch"]["operation"], "MERGE");
    }

    #[test]
    fn envoy_filter_round_trips_from_cluster_json() {
        let ef: EnvoyFilter = serde_json::from_value(serde_json::json!({
            "apiVersion": "networking.istio.io/v1alpha3",
            "kind": "EnvoyFilter",
            "metadata": { "name": "meshfilter-consumer", "namespace": "istio-system" },
            "spec": {
                "configPatches": [{
                    "applyTo": "EXTENSION_CONFIG",
                    "patch": { "operation": "ADD", "value": { "name": "meshfilter-consumer" } }
                }]
            }
        }))
        .unwrap();
        assert_eq!(ef.name(), "meshfilter-consumer");
        assert_eq!(ef.spec.config_patches[0].apply_to, ApplyTo::ExtensionConfig);
        assert!(ef.spec.workload_selector.is_none());
    }
}
