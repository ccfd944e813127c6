//! Attachment key model
//!
//! Value-typed identities for everything a policy can attach to, plus the
//! [`Topology`] built once per pass from the Gateway API objects of a
//! snapshot. All keys are `Ord` so accumulation maps iterate
//! deterministically.

use std::collections::BTreeMap;
use std::fmt;

use meshfilter_common::network::gateway_api::{Gateway as GatewayObject, HttpRoute};
use tracing::debug;

use crate::TranslationError;

// =============================================================================
// Identities
// =============================================================================

/// `namespace/name` identity of a Kubernetes object
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NamespacedName {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl NamespacedName {
    /// Create a new identity
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// One listener of one gateway
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GatewaySection {
    /// Gateway namespace
    pub namespace: String,
    /// Gateway name
    pub gateway_name: String,
    /// Listener name
    pub section_name: String,
}

impl GatewaySection {
    /// Create a new section key
    pub fn new(
        namespace: impl Into<String>,
        gateway_name: impl Into<String>,
        section_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            gateway_name: gateway_name.into(),
            section_name: section_name.into(),
        }
    }

    /// ECDS resource name holding the section's gateway-level golang plugins
    pub fn extension_config_name(&self) -> String {
        format!(
            "meshfilter-ecds-{}",
            sanitize_name(&format!(
                "{}-{}-{}",
                self.namespace, self.gateway_name, self.section_name
            ))
        )
    }
}

impl fmt::Display for GatewaySection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.namespace, self.gateway_name, self.section_name
        )
    }
}

/// A gateway listener as seen by the engine
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Gateway {
    /// Section identity
    pub section: GatewaySection,
    /// Listener port
    pub port: u16,
    /// Filter manager already installed; extension-config patches are skipped
    pub has_filter_manager: bool,
}

/// One hostname of one route object on one gateway section
///
/// Several route objects may serve the same hostname on a section; each
/// gets its own `VirtualHost` value and they share the RDS virtual host.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualHost {
    /// Section the route is attached to
    pub section: GatewaySection,
    /// Route object contributing to this virtual host
    pub owner: NamespacedName,
    /// RDS virtual host name, `hostname:port`
    pub route_table_name: String,
    /// Listener port of the section
    pub port: u16,
    /// ECDS name of the owning section
    pub extension_config_name: String,
}

/// One rule of a route object inside one virtual host
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RouteKey {
    /// Virtual host containing the rule
    pub virtual_host: VirtualHost,
    /// Generated RDS route name, see [`route_name`]
    pub route_name: String,
}

/// RDS route name of one rule, `namespace.route.rule`
///
/// Qualified by the owning route so rules with the same name on different
/// routes sharing a virtual host stay distinct.
pub fn route_name(owner: &NamespacedName, rule: &str) -> String {
    format!("{}.{}.{}", owner.namespace, owner.name, rule)
}

/// How a policy attached to its target
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyScope {
    /// Targets one named rule of a route
    Route,
    /// Targets a whole route object or a gateway
    Host,
}

impl fmt::Display for PolicyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Route => write!(f, "route"),
            Self::Host => write!(f, "host"),
        }
    }
}

/// Output category a plugin contributes to
///
/// Declaration order is the order patches are emitted in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    /// Gateway-level golang plugins served through ECDS
    ExtensionConfigGolang,
    /// Listener filters served through ECDS
    ExtensionConfigListener,
    /// Network filters served through ECDS
    ExtensionConfigNetwork,
    /// Native HTTP filters inserted into the listener's filter chain
    Listener,
    /// Route action fields
    Route,
    /// Per-route filter configuration
    RouteFilter,
}

impl Category {
    /// Whether the category is rendered at gateway level
    pub fn is_gateway_level(self) -> bool {
        !matches!(self, Self::Route | Self::RouteFilter)
    }

    /// Whether the category is rendered as an `EXTENSION_CONFIG` patch
    pub fn is_extension_config(self) -> bool {
        matches!(
            self,
            Self::ExtensionConfigGolang | Self::ExtensionConfigListener | Self::ExtensionConfigNetwork
        )
    }
}

/// Make a string usable inside a Kubernetes object name
///
/// Lowercases, turns a `*` wildcard into `wildcard`, and replaces anything
/// outside `[a-z0-9.-]` with `-`.
pub fn sanitize_name(raw: &str) -> String {
    raw.replace('*', "wildcard")
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

// =============================================================================
// Topology
// =============================================================================

/// Gateway sections, virtual hosts, and rules known to one pass
#[derive(Clone, Debug, Default)]
pub struct Topology {
    /// Every gateway listener
    pub gateways: BTreeMap<GatewaySection, Gateway>,
    /// Virtual hosts per route object
    pub virtual_hosts: BTreeMap<NamespacedName, Vec<VirtualHost>>,
    /// Rule names per route object, in rule order
    pub rules: BTreeMap<NamespacedName, Vec<String>>,
}

impl Topology {
    /// Build the topology from the gateways and routes of a snapshot
    ///
    /// Routes whose parent gateway or listener is missing are skipped. Routes
    /// sharing a hostname on one section share its route table.
    pub fn build(
        gateways: &[GatewayObject],
        routes: &[HttpRoute],
    ) -> Result<Self, TranslationError> {
        let mut topology = Topology::default();
        let mut listeners_by_gateway: BTreeMap<NamespacedName, Vec<(String, u16, Option<String>)>> =
            BTreeMap::new();

        for gw in gateways {
            let id = NamespacedName::new(&gw.metadata.namespace, &gw.metadata.name);
            if listeners_by_gateway.contains_key(&id) {
                return Err(TranslationError::DuplicateGateway {
                    gateway: id.to_string(),
                });
            }

            let mut listeners = Vec::with_capacity(gw.spec.listeners.len());
            for listener in &gw.spec.listeners {
                let section = GatewaySection::new(&id.namespace, &id.name, &listener.name);
                if let Some(existing) = topology.gateways.get(&section) {
                    if existing.port != listener.port {
                        return Err(TranslationError::DuplicateListener {
                            gateway: id.to_string(),
                            section: listener.name.clone(),
                            first: existing.port,
                            second: listener.port,
                        });
                    }
                    continue;
                }
                topology.gateways.insert(
                    section.clone(),
                    Gateway {
                        has_filter_manager: gw.has_filter_manager(&listener.name),
                        section,
                        port: listener.port,
                    },
                );
                listeners.push((listener.name.clone(), listener.port, listener.hostname.clone()));
            }
            listeners_by_gateway.insert(id, listeners);
        }

        let mut sorted_routes: Vec<&HttpRoute> = routes.iter().collect();
        sorted_routes.sort_by(|a, b| {
            (&a.metadata.namespace, &a.metadata.name).cmp(&(&b.metadata.namespace, &b.metadata.name))
        });

        for route in sorted_routes {
            let owner = NamespacedName::new(&route.metadata.namespace, &route.metadata.name);
            let rules = route
                .spec
                .rules
                .iter()
                .enumerate()
                .map(|(i, rule)| {
                    rule.name
                        .clone()
                        .unwrap_or_else(|| format!("{}-{}", owner.name, i))
                })
                .collect();
            topology.rules.insert(owner.clone(), rules);

            let mut hosts = Vec::new();
            for parent in route.spec.parent_refs.iter().filter(|p| p.is_gateway()) {
                let gw_id = NamespacedName::new(
                    parent.namespace.as_deref().unwrap_or(&owner.namespace),
                    &parent.name,
                );
                let Some(listeners) = listeners_by_gateway.get(&gw_id) else {
                    debug!(route = %owner, gateway = %gw_id, "parent gateway not found");
                    continue;
                };

                for (section_name, port, listener_host) in listeners {
                    if parent
                        .section_name
                        .as_deref()
                        .is_some_and(|s| s != section_name)
                    {
                        continue;
                    }
                    let section = GatewaySection::new(&gw_id.namespace, &gw_id.name, section_name);
                    let hostnames: Vec<&str> = if route.spec.hostnames.is_empty() {
                        vec![listener_host.as_deref().unwrap_or("*")]
                    } else {
                        route.spec.hostnames.iter().map(String::as_str).collect()
                    };

                    for hostname in hostnames {
                        hosts.push(VirtualHost {
                            extension_config_name: section.extension_config_name(),
                            section: section.clone(),
                            owner: owner.clone(),
                            route_table_name: format!("{}:{}", hostname, port),
                            port: *port,
                        });
                    }
                }
            }
            hosts.sort();
            hosts.dedup();
            topology.virtual_hosts.insert(owner, hosts);
        }

        debug!(
            sections = topology.gateways.len(),
            routes = topology.rules.len(),
            "topology built"
        );
        Ok(topology)
    }

    /// All sections of a gateway, in name order
    pub fn sections_of(&self, namespace: &str, gateway_name: &str) -> Vec<&Gateway> {
        self.gateways
            .values()
            .filter(|g| g.section.namespace == namespace && g.section.gateway_name == gateway_name)
            .collect()
    }

    /// Route keys of a route object, optionally restricted to one rule
    ///
    /// Returns `None` when the route object is unknown or the rule does not exist.
    pub fn route_keys(&self, owner: &NamespacedName, rule: Option<&str>) -> Option<Vec<RouteKey>> {
        let rules = self.rules.get(owner)?;
        let selected: Vec<&String> = match rule {
            Some(name) => {
                let found: Vec<&String> = rules.iter().filter(|r| r.as_str() == name).collect();
                if found.is_empty() {
                    return None;
                }
                found
            }
            None => rules.iter().collect(),
        };

        let hosts = self.virtual_hosts.get(owner).map(Vec::as_slice).unwrap_or(&[]);
        Some(
            hosts
                .iter()
                .flat_map(|vh| {
                    selected.iter().map(move |r| RouteKey {
                        virtual_host: vh.clone(),
                        route_name: route_name(owner, r),
                    })
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshfilter_common::kube_utils::ObjectMeta;
    use meshfilter_common::network::gateway_api::{
        GatewayListener, GatewaySpec, HttpRouteRule, HttpRouteSpec, ParentRef,
    };

    fn gateway(name: &str, listeners: Vec<GatewayListener>) -> GatewayObject {
        GatewayObject::new(
            ObjectMeta::bare(name, "default"),
            GatewaySpec {
                gateway_class_name: "istio".to_string(),
                listeners,
            },
        )
    }

    fn route(name: &str, hostnames: &[&str], section: Option<&str>, rules: usize) -> HttpRoute {
        HttpRoute::new(
            ObjectMeta::bare(name, "default"),
            HttpRouteSpec {
                parent_refs: vec![ParentRef {
                    group: None,
                    kind: None,
                    name: "ingress".to_string(),
                    namespace: None,
                    section_name: section.map(str::to_string),
                }],
                hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
                rules: (0..rules).map(|_| HttpRouteRule::default()).collect(),
            },
        )
    }

    #[test]
    fn builds_virtual_hosts_per_section_and_hostname() {
        let gws = vec![gateway(
            "ingress",
            vec![GatewayListener::http("http", 80), GatewayListener::http("alt", 8080)],
        )];
        let routes = vec![route("shop", &["shop.example.com"], None, 2)];
        let topo = Topology::build(&gws, &routes).unwrap();

        let owner = NamespacedName::new("default", "shop");
        let hosts = &topo.virtual_hosts[&owner];
        let names: Vec<&str> = hosts.iter().map(|h| h.route_table_name.as_str()).collect();
        assert_eq!(names, vec!["shop.example.com:8080", "shop.example.com:80"]);
        assert_eq!(topo.rules[&owner], vec!["shop-0", "shop-1"]);
    }

    #[test]
    fn section_name_restricts_parent_listener() {
        let gws = vec![gateway(
            "ingress",
            vec![GatewayListener::http("http", 80), GatewayListener::http("alt", 8080)],
        )];
        let routes = vec![route("shop", &[], Some("http"), 1)];
        let topo = Topology::build(&gws, &routes).unwrap();
        let hosts = &topo.virtual_hosts[&NamespacedName::new("default", "shop")];
        assert_eq!(hosts.len(), 1);
        assert_eq!(hosts[0].route_table_name, "*:80");
    }

    #[test]
    fn duplicate_gateway_is_integrity_error() {
        let gws = vec![
            gateway("ingress", vec![GatewayListener::http("http", 80)]),
            gateway("ingress", vec![GatewayListener::http("http", 80)]),
        ];
        let err = Topology::build(&gws, &[]).unwrap_err();
        assert!(matches!(err, TranslationError::DuplicateGateway { .. }));
    }

    #[test]
    fn inconsistent_listener_is_integrity_error() {
        let gws = vec![gateway(
            "ingress",
            vec![GatewayListener::http("http", 80), GatewayListener::http("http", 81)],
        )];
        let err = Topology::build(&gws, &[]).unwrap_err();
        assert!(matches!(err, TranslationError::DuplicateListener { first: 80, second: 81, .. }));
    }

    #[test]
    fn routes_sharing_a_hostname_share_the_route_table() {
        let gws = vec![gateway("ingress", vec![GatewayListener::http("http", 80)])];
        let routes = vec![
            route("a", &["shop.example.com"], None, 1),
            route("b", &["shop.example.com"], None, 1),
        ];
        let topo = Topology::build(&gws, &routes).unwrap();

        let a = topo
            .route_keys(&NamespacedName::new("default", "a"), None)
            .unwrap();
        let b = topo
            .route_keys(&NamespacedName::new("default", "b"), None)
            .unwrap();
        assert_eq!(a[0].virtual_host.route_table_name, "shop.example.com:80");
        assert_eq!(b[0].virtual_host.route_table_name, "shop.example.com:80");
        assert_eq!(a[0].route_name, "default.a.a-0");
        assert_eq!(b[0].route_name, "default.b.b-0");
        assert_ne!(a[0], b[0]);
    }

    #[test]
    fn route_keys_for_missing_rule_is_none() {
        let gws = vec![gateway("ingress", vec![GatewayListener::http("http", 80)])];
        let routes = vec![route("shop", &["shop.example.com"], None, 1)];
        let topo = Topology::build(&gws, &routes).unwrap();
        let owner = NamespacedName::new("default", "shop");
        assert!(topo.route_keys(&owner, Some("login")).is_none());
        let keys = topo.route_keys(&owner, Some("shop-0")).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].route_name, "default.shop.shop-0");
        assert_eq!(keys[0].virtual_host.port, 80);
        assert!(topo.route_keys(&NamespacedName::new("default", "nope"), None).is_none());
    }

    #[test]
    fn sanitize_name_handles_wildcards_and_ports() {
        assert_eq!(sanitize_name("*.Example.com:80"), "wildcard.example.com-80");
        assert_eq!(sanitize_name("default/ingress"), "default-ingress");
    }

    #[test]
    fn category_levels() {
        assert!(Category::Listener.is_gateway_level());
        assert!(!Category::Listener.is_extension_config());
        assert!(!Category::RouteFilter.is_gateway_level());
        assert!(Category::ExtensionConfigGolang < Category::RouteFilter);
    }
}
