//! HTTPFilterPolicy Custom Resource Definition
//!
//! An HTTPFilterPolicy attaches a set of plugin configurations to one target:
//!
//! - a Gateway (optionally one listener via `sectionName`), configuring the
//!   gateway's filter chain
//! - an HTTPRoute, configuring every rule of the route (host scope)
//! - one named rule of an HTTPRoute via `sectionName` (route scope)
//!
//! When a host-scoped and a route-scoped policy configure the same plugin on
//! the same rule, the route-scoped configuration wins.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{preserve_unknown_fields, Condition};

/// Spec for an HTTPFilterPolicy
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "meshfilter.dev",
    version = "v1alpha1",
    kind = "HTTPFilterPolicy",
    root = "HttpFilterPolicy",
    plural = "httpfilterpolicies",
    shortname = "hfp",
    namespaced,
    status = "HttpFilterPolicyStatus",
    printcolumn = r#"{"name":"Target","type":"string","jsonPath":".spec.targetRef.name"}"#,
    printcolumn = r#"{"name":"Accepted","type":"string","jsonPath":".status.conditions[0].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HttpFilterPolicySpec {
    /// The gateway or route this policy attaches to
    pub target_ref: PolicyTargetReference,

    /// Plugin name -> plugin configuration
    #[serde(default)]
    pub filters: BTreeMap<String, FilterConfig>,
}

/// Reference to the object a policy attaches to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PolicyTargetReference {
    /// API group of the target
    #[serde(default)]
    pub group: String,
    /// Kind of the target (Gateway or HTTPRoute)
    pub kind: String,
    /// Name of the target
    pub name: String,
    /// Namespace of the target; defaults to the policy namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Listener name (Gateway) or rule name (HTTPRoute)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_name: Option<String>,
}

impl PolicyTargetReference {
    /// Reference a Gateway, optionally one of its listeners
    pub fn gateway(name: impl Into<String>, section_name: Option<&str>) -> Self {
        Self {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "Gateway".to_string(),
            name: name.into(),
            namespace: None,
            section_name: section_name.map(str::to_string),
        }
    }

    /// Reference an HTTPRoute, optionally one of its rules
    pub fn http_route(name: impl Into<String>, section_name: Option<&str>) -> Self {
        Self {
            group: "gateway.networking.k8s.io".to_string(),
            kind: "HTTPRoute".to_string(),
            name: name.into(),
            namespace: None,
            section_name: section_name.map(str::to_string),
        }
    }

    /// Set an explicit target namespace
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Opaque configuration of one plugin
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct FilterConfig {
    /// Plugin configuration, validated by the plugin registry
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: serde_json::Value,
}

impl FilterConfig {
    /// Wrap a JSON value as a plugin configuration
    pub fn new(config: serde_json::Value) -> Self {
        Self { config }
    }
}

/// Status of an HTTPFilterPolicy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpFilterPolicyStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_route_scoped_policy() {
        let spec: HttpFilterPolicySpec = serde_json::from_value(serde_json::json!({
            "targetRef": {
                "group": "gateway.networking.k8s.io",
                "kind": "HTTPRoute",
                "name": "default",
                "sectionName": "login"
            },
            "filters": {
                "key_auth": { "config": { "keys": [{ "name": "Authorization" }] } }
            }
        }))
        .unwrap();

        assert_eq!(spec.target_ref.kind, "HTTPRoute");
        assert_eq!(spec.target_ref.section_name.as_deref(), Some("login"));
        assert!(spec.filters.contains_key("key_auth"));
    }

    #[test]
    fn target_ref_builders() {
        let gw = PolicyTargetReference::gateway("ingress", Some("http")).in_namespace("infra");
        assert_eq!(gw.kind, "Gateway");
        assert_eq!(gw.namespace.as_deref(), Some("infra"));

        let route = PolicyTargetReference::http_route("shop", None);
        assert_eq!(route.kind, "HTTPRoute");
        assert!(route.section_name.is_none());
    }
}
