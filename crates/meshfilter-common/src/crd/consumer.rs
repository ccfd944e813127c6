//! Consumer Custom Resource Definition
//!
//! A Consumer is an identity known to the gateway. Its `auth` section carries
//! the credentials each authentication plugin matches requests against, and
//! its `filters` section carries plugin configuration applied to requests once
//! the consumer is identified.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{preserve_unknown_fields, Condition};

/// Spec for a Consumer
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "meshfilter.dev",
    version = "v1alpha1",
    kind = "Consumer",
    plural = "consumers",
    namespaced,
    status = "ConsumerStatus",
    printcolumn = r#"{"name":"Accepted","type":"string","jsonPath":".status.conditions[0].status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerSpec {
    /// Authentication plugin name -> credential configuration
    #[serde(default)]
    pub auth: BTreeMap<String, ConsumerPlugin>,

    /// Plugin name -> configuration applied after the consumer is identified
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filters: BTreeMap<String, ConsumerPlugin>,
}

/// Configuration of one plugin on a consumer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ConsumerPlugin {
    /// Plugin configuration, validated by the plugin registry
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: serde_json::Value,
}

impl ConsumerPlugin {
    /// Wrap a JSON value as a consumer plugin configuration
    pub fn new(config: serde_json::Value) -> Self {
        Self { config }
    }
}

/// Status of a Consumer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatus {
    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_consumer_spec() {
        let spec: ConsumerSpec = serde_json::from_value(serde_json::json!({
            "auth": {
                "key_auth": { "config": { "key": "rick" } }
            },
            "filters": {
                "demo": { "config": { "host_name": "rick" } }
            }
        }))
        .unwrap();

        assert_eq!(spec.auth["key_auth"].config["key"], "rick");
        assert_eq!(spec.filters["demo"].config["host_name"], "rick");
    }

    #[test]
    fn filters_default_to_empty() {
        let spec: ConsumerSpec = serde_json::from_value(serde_json::json!({
            "auth": { "basic_auth": { "config": { "username": "u", "password": "p" } } }
        }))
        .unwrap();
        assert!(spec.filters.is_empty());
    }
}
