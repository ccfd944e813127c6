//! Supporting types shared by meshfilter CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of meshfilter CRDs
pub const GROUP: &str = "meshfilter.dev";

/// API version of meshfilter CRDs
pub const VERSION: &str = "v1alpha1";

/// Condition type written to every policy and consumer
pub const CONDITION_ACCEPTED: &str = "Accepted";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Accepted)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Generation of the object the condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
            last_transition_time: Utc::now(),
        }
    }

    /// Set the observed generation
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Whether two conditions describe the same state, ignoring the timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Schema for opaque plugin configuration embedded in a CRD.
///
/// Plugin configs are validated by the plugin registry, not by the API server,
/// so the schema only requires an object and keeps unknown fields.
pub fn preserve_unknown_fields(
    _gen: &mut schemars::gen::SchemaGenerator,
) -> schemars::schema::Schema {
    let mut schema = schemars::schema::SchemaObject {
        instance_type: Some(schemars::schema::InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    schema.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_state_ignores_timestamp() {
        let a = Condition::new(CONDITION_ACCEPTED, ConditionStatus::True, "Accepted", "ok");
        let mut b = a.clone();
        b.last_transition_time = b.last_transition_time + chrono::Duration::seconds(30);
        assert!(a.same_state(&b));

        let c = Condition::new(CONDITION_ACCEPTED, ConditionStatus::False, "Invalid", "bad");
        assert!(!a.same_state(&c));
    }

    #[test]
    fn condition_serializes_in_kubernetes_shape() {
        let cond = Condition::new(CONDITION_ACCEPTED, ConditionStatus::True, "Accepted", "ok")
            .with_observed_generation(Some(3));
        let json = serde_json::to_value(&cond).unwrap();
        assert_eq!(json["type"], "Accepted");
        assert_eq!(json["status"], "True");
        assert_eq!(json["observedGeneration"], 3);
        assert!(json.get("lastTransitionTime").is_some());
    }
}
