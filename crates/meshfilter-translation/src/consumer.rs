//! Consumer config builder
//!
//! Turns one `Consumer` into the payload the consumer filter matches
//! requests against. Validation is all-or-nothing: a consumer with any bad
//! entry contributes nothing to the aggregate.

use std::collections::BTreeMap;

use kube::ResourceExt;
use meshfilter_common::crd::{Consumer, ConsumerPlugin, ConsumerSpec};
use meshfilter_common::kube_utils::deterministic_hash;
use serde_json::{Map, Value};
use tracing::debug;

use crate::model::NamespacedName;
use crate::plugin::{PluginError, PluginRegistry, PluginType};

/// Result of building one consumer
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsumerRecord {
    /// Consumer identity
    pub id: NamespacedName,
    /// Whether every entry validated
    pub valid: bool,
    /// Compact JSON payload, present when valid
    pub payload: Option<String>,
    /// Truncated SHA-256 of the payload, present when valid
    pub fingerprint: Option<String>,
    /// Whether the consumer carries credentials for an authentication plugin
    pub has_auth: bool,
    /// Rejection message, present when invalid
    pub reason: Option<String>,
}

/// Build the record for one consumer
pub fn build_consumer(consumer: &Consumer, registry: &PluginRegistry) -> ConsumerRecord {
    let id = NamespacedName::new(consumer.namespace().unwrap_or_default(), consumer.name_any());

    if let Err(err) = validate(&consumer.spec, registry) {
        debug!(consumer = %id, error = %err, "consumer failed validation");
        return ConsumerRecord {
            id,
            valid: false,
            payload: None,
            fingerprint: None,
            has_auth: false,
            reason: Some(err.to_string()),
        };
    }

    let payload = render_payload(&consumer.spec);
    let fingerprint = deterministic_hash(&payload);
    ConsumerRecord {
        id,
        valid: true,
        payload: Some(payload),
        fingerprint: Some(fingerprint),
        has_auth: !consumer.spec.auth.is_empty(),
        reason: None,
    }
}

fn validate(spec: &ConsumerSpec, registry: &PluginRegistry) -> Result<(), PluginError> {
    for (name, entry) in &spec.auth {
        let plugin = registry.get(name)?;
        if !plugin.accepts_consumer() {
            return Err(PluginError::ConsumerUnsupported {
                plugin: name.clone(),
            });
        }
        plugin.validate_consumer(&entry.config)?;
    }
    for (name, entry) in &spec.filters {
        let plugin = registry.get(name)?;
        if plugin.plugin_type() != PluginType::Golang {
            return Err(PluginError::NotGolang {
                plugin: name.clone(),
            });
        }
        plugin.validate(&entry.config)?;
    }
    Ok(())
}

/// Compact `{"auth": {...}, "filters": {...}}` with sorted keys, empty sections omitted
fn render_payload(spec: &ConsumerSpec) -> String {
    let mut root = Map::new();
    for (section, entries) in [("auth", &spec.auth), ("filters", &spec.filters)] {
        if entries.is_empty() {
            continue;
        }
        root.insert(section.to_string(), section_value(entries));
    }
    Value::Object(root).to_string()
}

fn section_value(entries: &BTreeMap<String, ConsumerPlugin>) -> Value {
    Value::Object(
        entries
            .iter()
            .map(|(name, entry)| (name.clone(), sorted(&entry.config)))
            .collect(),
    )
}

/// Rebuild a JSON value with object keys in ascending order at every level
pub(crate) fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, sorted(v))).collect();
            Value::Object(ordered.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}
