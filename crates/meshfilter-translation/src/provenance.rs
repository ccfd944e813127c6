//! Provenance of generated artifacts
//!
//! Every generated EnvoyFilter records which policies contributed to it in
//! the `meshfilter.dev/info` annotation. The set stays sorted and
//! duplicate-free so the annotation is identical across passes.

use serde::{Deserialize, Serialize};

use crate::model::NamespacedName;

/// Sorted, duplicate-free list of policy identifiers (`namespace/name`)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvenanceSet {
    ids: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Info {
    #[serde(default)]
    httpfilterpolicies: Vec<String>,
}

impl ProvenanceSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an identifier, keeping the set sorted
    ///
    /// Returns false if the identifier was already present.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        match self.ids.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.ids.insert(pos, id);
                true
            }
        }
    }

    /// Insert the identifier of a policy
    pub fn insert_policy(&mut self, policy: &NamespacedName) -> bool {
        self.insert(policy.to_string())
    }

    /// Union with another set
    pub fn merge(&mut self, other: &ProvenanceSet) {
        for id in &other.ids {
            self.insert(id.as_str());
        }
    }

    /// Whether the identifier is present
    pub fn contains(&self, id: &str) -> bool {
        self.ids.binary_search_by(|existing| existing.as_str().cmp(id)).is_ok()
    }

    /// Identifiers in ascending order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    /// Number of identifiers
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Render the `meshfilter.dev/info` annotation value
    pub fn to_annotation(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&Info {
            httpfilterpolicies: self.ids.clone(),
        })
    }

    /// Parse a `meshfilter.dev/info` annotation value
    pub fn from_annotation(value: &str) -> Result<Self, serde_json::Error> {
        let info: Info = serde_json::from_str(value)?;
        let mut set = Self::new();
        for id in info.httpfilterpolicies {
            set.insert(id);
        }
        Ok(set)
    }
}

impl<S: Into<String>> FromIterator<S> for ProvenanceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}
