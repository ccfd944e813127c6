//! Policy resolver
//!
//! Resolves every `HTTPFilterPolicy` to its attachment points and merges the
//! policies' plugin configurations into one bucket per
//! `(attachment point, category)`.
//!
//! Policies are visited in `(namespace, name)` order, so whenever two
//! policies compete at the same precedence the one visited first holds the
//! lexicographically smaller identifier and wins.

use std::collections::BTreeMap;

use kube::ResourceExt;
use meshfilter_common::crd::HttpFilterPolicy;
use serde_json::Value;
use tracing::debug;

use crate::model::{Category, GatewaySection, NamespacedName, PolicyScope, RouteKey, Topology};
use crate::plugin::{PluginError, PluginRegistry, TargetLevel};
use crate::provenance::ProvenanceSet;
use crate::status::{InvalidReason, ObjectStatus};

// =============================================================================
// Precedence
// =============================================================================

/// What happens when a policy configures a plugin that is already configured
/// at the same attachment point
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Precedence {
    /// Incoming configuration replaces the existing one
    Override,
    /// Existing configuration stays; the incoming policy is still recorded
    Keep,
    /// Same scope; the policy with the smaller identifier wins
    Conflict,
}

impl Precedence {
    /// Decision table indexed by the existing and incoming scopes
    pub fn decide(existing: PolicyScope, incoming: PolicyScope) -> Self {
        match (existing, incoming) {
            (PolicyScope::Host, PolicyScope::Host) => Self::Conflict,
            (PolicyScope::Host, PolicyScope::Route) => Self::Override,
            (PolicyScope::Route, PolicyScope::Host) => Self::Keep,
            (PolicyScope::Route, PolicyScope::Route) => Self::Conflict,
        }
    }
}

// =============================================================================
// Buckets
// =============================================================================

/// One plugin configuration and the policy it came from
#[derive(Clone, Debug, PartialEq)]
pub struct Contribution {
    /// Contributing policy
    pub policy: NamespacedName,
    /// Scope the policy attached with
    pub scope: PolicyScope,
    /// Validated plugin configuration
    pub config: Value,
}

/// Everything merged into one `(attachment point, category)`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bucket {
    /// Winning configuration per plugin
    pub plugins: BTreeMap<String, Contribution>,
    /// Every policy that contributed
    pub provenance: ProvenanceSet,
}

/// Output of the resolver
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    /// Gateway-level buckets
    pub gateway_buckets: BTreeMap<(GatewaySection, Category), Bucket>,
    /// Route-level buckets
    pub route_buckets: BTreeMap<(RouteKey, Category), Bucket>,
    /// Outcome per policy
    pub outcomes: BTreeMap<NamespacedName, ObjectStatus>,
}

/// A validated policy entry ready to merge
struct Entry<'a> {
    plugin: &'a str,
    category: Category,
    config: &'a Value,
}

/// A rejection at one attachment point
struct Rejection {
    point: String,
    plugin: String,
    winner: NamespacedName,
}

/// Attachment points of one policy
enum Attachment {
    Gateway(Vec<GatewaySection>),
    Routes(Vec<RouteKey>, PolicyScope),
}

// =============================================================================
// Resolver
// =============================================================================

/// Resolve and merge all policies against a topology
pub fn resolve(
    topology: &Topology,
    policies: &[HttpFilterPolicy],
    registry: &PluginRegistry,
) -> Resolution {
    let mut ordered: Vec<(NamespacedName, &HttpFilterPolicy)> = policies
        .iter()
        .map(|p| {
            (
                NamespacedName::new(p.namespace().unwrap_or_default(), p.name_any()),
                p,
            )
        })
        .collect();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));

    let mut resolution = Resolution::default();
    for (id, policy) in ordered {
        let status = resolve_policy(&mut resolution, topology, registry, &id, policy);
        resolution.outcomes.insert(id, status);
    }

    debug!(
        policies = resolution.outcomes.len(),
        gateway_buckets = resolution.gateway_buckets.len(),
        route_buckets = resolution.route_buckets.len(),
        "policies resolved"
    );
    resolution
}

fn resolve_policy(
    resolution: &mut Resolution,
    topology: &Topology,
    registry: &PluginRegistry,
    id: &NamespacedName,
    policy: &HttpFilterPolicy,
) -> ObjectStatus {
    let target = &policy.spec.target_ref;
    let level = match target.kind.as_str() {
        "Gateway" => Some(TargetLevel::Gateway),
        "HTTPRoute" => Some(TargetLevel::Route),
        _ => None,
    };

    let entries = match validate_entries(policy, registry, level) {
        Ok(entries) => entries,
        Err(err) => return ObjectStatus::invalid(InvalidReason::PluginSchemaInvalid, err.to_string()),
    };

    let Some(attachment) = attach(topology, policy, id) else {
        return ObjectStatus::invalid(
            InvalidReason::TargetNotFound,
            format!(
                "target {} {}/{}{} not found",
                target.kind,
                target.namespace.as_deref().unwrap_or(&id.namespace),
                target.name,
                target
                    .section_name
                    .as_deref()
                    .map(|s| format!(" section {s}"))
                    .unwrap_or_default()
            ),
        );
    };

    let points = match &attachment {
        Attachment::Gateway(sections) => sections.len(),
        Attachment::Routes(keys, _) => keys.len(),
    };
    let mut rejections = Vec::new();
    match attachment {
        Attachment::Gateway(sections) => {
            for section in sections {
                merge_point(
                    &mut resolution.gateway_buckets,
                    &section,
                    PolicyScope::Host,
                    id,
                    &entries,
                    &mut rejections,
                    || section.to_string(),
                );
            }
        }
        Attachment::Routes(keys, scope) => {
            for key in keys {
                merge_point(
                    &mut resolution.route_buckets,
                    &key,
                    scope,
                    id,
                    &entries,
                    &mut rejections,
                    || format!("{}/{}", key.virtual_host.route_table_name, key.route_name),
                );
            }
        }
    }

    match rejections.first() {
        None => ObjectStatus::Accepted,
        Some(first) => {
            let others = rejections.len() - 1;
            let applied = points - rejections.len();
            ObjectStatus::invalid(
                InvalidReason::ConflictingPolicy,
                format!(
                    "plugin {} at {} is already configured by {}{}; {}",
                    first.plugin,
                    first.point,
                    first.winner,
                    if others > 0 {
                        format!(" (and {others} more attachment points)")
                    } else {
                        String::new()
                    },
                    if applied > 0 {
                        format!("policy still applies at {applied} other attachment points")
                    } else {
                        "policy applies nowhere".to_string()
                    }
                ),
            )
        }
    }
}

/// Validate every filter of a policy; the first failure rejects the policy
fn validate_entries<'a>(
    policy: &'a HttpFilterPolicy,
    registry: &PluginRegistry,
    level: Option<TargetLevel>,
) -> Result<Vec<Entry<'a>>, PluginError> {
    let mut entries = Vec::with_capacity(policy.spec.filters.len());
    for (name, filter) in &policy.spec.filters {
        let category = match level {
            Some(level) => registry.validate_policy_entry(name, &filter.config, level)?,
            None => {
                // Unsupported target kinds surface as TargetNotFound; still
                // check the plugin configuration itself.
                registry.get(name)?.validate(&filter.config)?;
                continue;
            }
        };
        entries.push(Entry {
            plugin: name,
            category,
            config: &filter.config,
        });
    }
    Ok(entries)
}

/// Resolve a policy's target reference to attachment points
fn attach(topology: &Topology, policy: &HttpFilterPolicy, id: &NamespacedName) -> Option<Attachment> {
    let target = &policy.spec.target_ref;
    let namespace = target.namespace.as_deref().unwrap_or(&id.namespace);

    match target.kind.as_str() {
        "Gateway" => {
            let sections: Vec<GatewaySection> = topology
                .sections_of(namespace, &target.name)
                .into_iter()
                .filter(|gw| {
                    target
                        .section_name
                        .as_deref()
                        .is_none_or(|s| s == gw.section.section_name)
                })
                .map(|gw| gw.section.clone())
                .collect();
            (!sections.is_empty()).then_some(Attachment::Gateway(sections))
        }
        "HTTPRoute" => {
            let owner = NamespacedName::new(namespace, &target.name);
            let section = target.section_name.as_deref();
            let keys = topology.route_keys(&owner, section)?;
            let scope = if section.is_some() {
                PolicyScope::Route
            } else {
                PolicyScope::Host
            };
            Some(Attachment::Routes(keys, scope))
        }
        _ => None,
    }
}

/// Merge all entries of one policy into one attachment point
///
/// A conflict on any plugin rejects the policy at this point entirely: none
/// of its plugins apply here and it is left out of the point's provenance.
fn merge_point<K: Ord + Clone>(
    buckets: &mut BTreeMap<(K, Category), Bucket>,
    point: &K,
    scope: PolicyScope,
    id: &NamespacedName,
    entries: &[Entry<'_>],
    rejections: &mut Vec<Rejection>,
    describe: impl Fn() -> String,
) {
    for entry in entries {
        let existing = buckets
            .get(&(point.clone(), entry.category))
            .and_then(|b| b.plugins.get(entry.plugin));
        if let Some(existing) = existing.filter(|e| e.policy != *id) {
            if Precedence::decide(existing.scope, scope) == Precedence::Conflict {
                rejections.push(Rejection {
                    point: describe(),
                    plugin: entry.plugin.to_string(),
                    winner: existing.policy.clone(),
                });
                return;
            }
        }
    }

    for entry in entries {
        let bucket = buckets.entry((point.clone(), entry.category)).or_default();
        let replace = match bucket.plugins.get(entry.plugin) {
            None => true,
            Some(existing) => Precedence::decide(existing.scope, scope) == Precedence::Override,
        };
        if replace {
            bucket.plugins.insert(
                entry.plugin.to_string(),
                Contribution {
                    policy: id.clone(),
                    scope,
                    config: entry.config.clone(),
                },
            );
        }
        bucket.provenance.insert_policy(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta as KubeMeta;
    use meshfilter_common::crd::{FilterConfig, HttpFilterPolicySpec, PolicyTargetReference};
    use meshfilter_common::kube_utils::ObjectMeta;
    use meshfilter_common::network::gateway_api::{
        Gateway, GatewayListener, GatewaySpec, HttpRoute, HttpRouteRule, HttpRouteSpec, ParentRef,
    };
    use serde_json::json;

    fn topology() -> Topology {
        let gw = Gateway::new(
            ObjectMeta::bare("ingress", "default"),
            GatewaySpec {
                gateway_class_name: "istio".to_string(),
                listeners: vec![GatewayListener::http("http", 80), GatewayListener::http("alt", 8080)],
            },
        );
        let route = HttpRoute::new(
            ObjectMeta::bare("shop", "default"),
            HttpRouteSpec {
                parent_refs: vec![ParentRef::gateway("ingress", "default", "http")],
                hostnames: vec!["shop.example.com".to_string()],
                rules: vec![HttpRouteRule::named("login"), HttpRouteRule::named("cart")],
            },
        );
        Topology::build(&[gw], &[route]).unwrap()
    }

    fn policy(name: &str, target: PolicyTargetReference, filters: Value) -> HttpFilterPolicy {
        let filters: BTreeMap<String, FilterConfig> = filters
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), FilterConfig::new(v.clone())))
            .collect();
        HttpFilterPolicy {
            metadata: KubeMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: HttpFilterPolicySpec {
                target_ref: target,
                filters,
            },
            status: None,
        }
    }

    fn id(name: &str) -> NamespacedName {
        NamespacedName::new("default", name)
    }

    #[test]
    fn decision_table() {
        use PolicyScope::*;
        assert_eq!(Precedence::decide(Host, Host), Precedence::Conflict);
        assert_eq!(Precedence::decide(Host, Route), Precedence::Override);
        assert_eq!(Precedence::decide(Route, Host), Precedence::Keep);
        assert_eq!(Precedence::decide(Route, Route), Precedence::Conflict);
    }

    #[test]
    fn gateway_policy_without_section_fans_out() {
        let topo = topology();
        let policies = vec![policy(
            "gw",
            PolicyTargetReference::gateway("ingress", None),
            json!({ "demo": { "host_name": "a" } }),
        )];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        assert_eq!(res.outcomes[&id("gw")], ObjectStatus::Accepted);
        assert_eq!(res.gateway_buckets.len(), 2);
        assert!(res
            .gateway_buckets
            .keys()
            .all(|(_, c)| *c == Category::ExtensionConfigGolang));
    }

    #[test]
    fn route_scope_overrides_host_scope() {
        let topo = topology();
        let policies = vec![
            policy(
                "b-host",
                PolicyTargetReference::http_route("shop", None),
                json!({ "demo": { "host_name": "host" } }),
            ),
            policy(
                "a-route",
                PolicyTargetReference::http_route("shop", Some("login")),
                json!({ "demo": { "host_name": "route" } }),
            ),
        ];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        assert!(res.outcomes.values().all(ObjectStatus::is_accepted));

        let login = res
            .route_buckets
            .iter()
            .find(|((k, _), _)| k.route_name == "default.shop.login")
            .map(|(_, b)| b)
            .unwrap();
        assert_eq!(login.plugins["demo"].config["host_name"], "route");
        assert_eq!(
            login.provenance.iter().collect::<Vec<_>>(),
            vec!["default/a-route", "default/b-host"]
        );

        let cart = res
            .route_buckets
            .iter()
            .find(|((k, _), _)| k.route_name == "default.shop.cart")
            .map(|(_, b)| b)
            .unwrap();
        assert_eq!(cart.plugins["demo"].config["host_name"], "host");
    }

    #[test]
    fn same_scope_conflict_rejects_larger_id() {
        let topo = topology();
        let policies = vec![
            policy(
                "z",
                PolicyTargetReference::http_route("shop", Some("login")),
                json!({ "demo": { "host_name": "z" } }),
            ),
            policy(
                "a",
                PolicyTargetReference::http_route("shop", Some("login")),
                json!({ "demo": { "host_name": "a" } }),
            ),
        ];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        assert_eq!(res.outcomes[&id("a")], ObjectStatus::Accepted);
        assert_eq!(
            res.outcomes[&id("z")].reason(),
            Some(InvalidReason::ConflictingPolicy)
        );
        assert!(res.outcomes[&id("z")]
            .message()
            .is_some_and(|m| m.ends_with("policy applies nowhere")));
        let bucket = res.route_buckets.values().next().unwrap();
        assert_eq!(bucket.plugins["demo"].config["host_name"], "a");
        assert!(!bucket.provenance.contains("default/z"));
    }

    #[test]
    fn conflict_rejects_policy_only_at_that_point() {
        let topo = topology();
        let policies = vec![
            policy(
                "a",
                PolicyTargetReference::gateway("ingress", Some("http")),
                json!({ "demo": { "host_name": "a" } }),
            ),
            policy(
                "b",
                PolicyTargetReference::gateway("ingress", None),
                json!({ "demo": { "host_name": "b" }, "key_auth": { "keys": [{ "name": "k" }] } }),
            ),
        ];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        assert_eq!(res.outcomes[&id("b")].reason(), Some(InvalidReason::ConflictingPolicy));
        let message = res.outcomes[&id("b")].message().unwrap_or_default();
        assert!(message.contains("already configured by default/a"));
        assert!(message.contains("still applies at 1 other attachment points"));

        let http = &res.gateway_buckets[&(
            GatewaySection::new("default", "ingress", "http"),
            Category::ExtensionConfigGolang,
        )];
        assert!(!http.plugins.contains_key("key_auth"));
        assert!(!http.provenance.contains("default/b"));

        let alt = &res.gateway_buckets[&(
            GatewaySection::new("default", "ingress", "alt"),
            Category::ExtensionConfigGolang,
        )];
        assert_eq!(alt.plugins["demo"].config["host_name"], "b");
        assert!(alt.plugins.contains_key("key_auth"));
    }

    #[test]
    fn invalid_plugin_rejects_whole_policy() {
        let topo = topology();
        let policies = vec![policy(
            "bad",
            PolicyTargetReference::http_route("shop", None),
            json!({ "demo": { "host_name": "ok" }, "rate_limit": { "unit": "day" } }),
        )];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        assert_eq!(
            res.outcomes[&id("bad")].reason(),
            Some(InvalidReason::PluginSchemaInvalid)
        );
        assert!(res.route_buckets.is_empty());
    }

    #[test]
    fn plugin_not_allowed_at_level_is_schema_invalid() {
        let topo = topology();
        let policies = vec![policy(
            "timeout-on-gw",
            PolicyTargetReference::gateway("ingress", None),
            json!({ "timeout": { "duration": "5s" } }),
        )];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        assert_eq!(
            res.outcomes[&id("timeout-on-gw")].reason(),
            Some(InvalidReason::PluginSchemaInvalid)
        );
    }

    #[test]
    fn missing_targets_are_target_not_found() {
        let topo = topology();
        let policies = vec![
            policy(
                "no-route",
                PolicyTargetReference::http_route("missing", None),
                json!({ "demo": { "host_name": "x" } }),
            ),
            policy(
                "no-rule",
                PolicyTargetReference::http_route("shop", Some("checkout")),
                json!({ "demo": { "host_name": "x" } }),
            ),
            policy(
                "no-listener",
                PolicyTargetReference::gateway("ingress", Some("https")),
                json!({ "demo": { "host_name": "x" } }),
            ),
            policy(
                "other-ns",
                PolicyTargetReference::http_route("shop", None).in_namespace("prod"),
                json!({ "demo": { "host_name": "x" } }),
            ),
            policy(
                "wrong-kind",
                PolicyTargetReference {
                    kind: "Service".to_string(),
                    name: "shop".to_string(),
                    ..Default::default()
                },
                json!({ "demo": { "host_name": "x" } }),
            ),
        ];
        let res = resolve(&topo, &policies, &PluginRegistry::with_builtin());
        for name in ["no-route", "no-rule", "no-listener", "other-ns", "wrong-kind"] {
            assert_eq!(
                res.outcomes[&id(name)].reason(),
                Some(InvalidReason::TargetNotFound),
                "{name}"
            );
        }
        assert!(res.route_buckets.is_empty());
        assert!(res.gateway_buckets.is_empty());
    }
}
