//! Status emitter
//!
//! Every policy and consumer in a snapshot gets exactly one outcome per pass.
//! Outcomes are plain data without timestamps; the controller renders them
//! into Kubernetes conditions when it writes status.

use std::collections::BTreeMap;
use std::fmt;

use meshfilter_common::crd::{Condition, ConditionStatus, CONDITION_ACCEPTED};
use tracing::warn;

use crate::consumer::ConsumerRecord;
use crate::model::NamespacedName;

/// Why an object was not accepted
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidReason {
    /// The target object or section does not exist
    TargetNotFound,
    /// Another policy with higher precedence configures the same plugin
    ConflictingPolicy,
    /// A plugin configuration is invalid
    PluginSchemaInvalid,
}

impl InvalidReason {
    /// Reason string written to the `Accepted` condition
    pub fn condition_reason(self) -> &'static str {
        match self {
            Self::TargetNotFound => "TargetNotFound",
            Self::ConflictingPolicy => "Conflicted",
            Self::PluginSchemaInvalid => "Invalid",
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TargetNotFound => write!(f, "TargetNotFound"),
            Self::ConflictingPolicy => write!(f, "ConflictingPolicy"),
            Self::PluginSchemaInvalid => write!(f, "PluginSchemaInvalid"),
        }
    }
}

/// Outcome of one object in one pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ObjectStatus {
    /// The object was applied
    Accepted,
    /// The object was rejected
    Invalid {
        /// Machine readable reason
        reason: InvalidReason,
        /// Human readable message
        message: String,
    },
}

impl ObjectStatus {
    /// Create a rejected outcome
    pub fn invalid(reason: InvalidReason, message: impl Into<String>) -> Self {
        Self::Invalid {
            reason,
            message: message.into(),
        }
    }

    /// Whether the object was accepted
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    /// Rejection reason, if any
    pub fn reason(&self) -> Option<InvalidReason> {
        match self {
            Self::Accepted => None,
            Self::Invalid { reason, .. } => Some(*reason),
        }
    }

    /// Rejection message, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Accepted => None,
            Self::Invalid { message, .. } => Some(message),
        }
    }

    /// Render as the object's `Accepted` condition
    pub fn to_condition(&self, observed_generation: Option<i64>) -> Condition {
        let condition = match self {
            Self::Accepted => Condition::new(
                CONDITION_ACCEPTED,
                ConditionStatus::True,
                "Accepted",
                "The resource has been accepted",
            ),
            Self::Invalid { reason, message } => Condition::new(
                CONDITION_ACCEPTED,
                ConditionStatus::False,
                reason.condition_reason(),
                message.clone(),
            ),
        };
        condition.with_observed_generation(observed_generation)
    }
}

/// Per-consumer outcomes derived from the built consumer records
pub fn consumer_statuses(records: &[ConsumerRecord]) -> BTreeMap<NamespacedName, ObjectStatus> {
    records
        .iter()
        .map(|record| {
            let status = match &record.reason {
                None => ObjectStatus::Accepted,
                Some(message) => {
                    warn!(consumer = %record.id, message = %message, "consumer rejected");
                    ObjectStatus::invalid(InvalidReason::PluginSchemaInvalid, message.clone())
                }
            };
            (record.id.clone(), status)
        })
        .collect()
}

/// Log every rejected policy
pub fn report_policies(outcomes: &BTreeMap<NamespacedName, ObjectStatus>) {
    for (policy, status) in outcomes {
        if let ObjectStatus::Invalid { reason, message } = status {
            warn!(policy = %policy, reason = %reason, message = %message, "policy rejected");
        }
    }
}
