//! Patch generator
//!
//! Renders resolved buckets and consumer records into Istio EnvoyFilters:
//!
//! - one EnvoyFilter per gateway section with gateway-level plugins
//! - one EnvoyFilter per gateway section and route table with route-level plugins
//! - one consumer aggregate carrying every valid consumer
//!
//! All maps are ordered, so identical inputs render byte-identical output.

use std::collections::BTreeMap;

use meshfilter_common::kube_utils::ObjectMeta;
use meshfilter_common::policy::{
    ApplyTo, ConfigPatch, EnvoyFilter, EnvoyFilterSpec, FilterChainMatch, FilterMatch,
    ListenerMatch, Operation, PatchContext, PatchMatch, PatchValue, RouteConfigurationMatch,
    RouteMatch, SubFilterMatch, VirtualHostMatch,
};
use meshfilter_common::INFO_ANNOTATION;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::consumer::{sorted, ConsumerRecord};
use crate::model::{sanitize_name, Category, Gateway, GatewaySection, Topology};
use crate::plugin::{PluginRegistry, PluginType, GOLANG_FILTER_NAME};
use crate::provenance::ProvenanceSet;
use crate::resolver::{Bucket, Resolution};
use crate::{TranslationConfig, TranslationError};

/// Type URL of the golang filter configuration
pub const GOLANG_CONFIG_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.Config";
/// Type URL of the golang filter per-route configuration
pub const GOLANG_PER_ROUTE_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.golang.v3alpha.ConfigsPerRoute";
/// Type URL wrapping untyped plugin configuration
pub const TYPED_STRUCT_TYPE: &str = "type.googleapis.com/xds.type.v3.TypedStruct";

const HTTP_CONNECTION_MANAGER: &str = "envoy.filters.network.http_connection_manager";
const ROUTER_FILTER: &str = "envoy.filters.http.router";

/// Golang plugin name of the filter manager running gateway and route plugins
const FILTER_MANAGER: &str = "fm";
/// Golang plugin name of the consumer manager
const CONSUMER_MANAGER: &str = "cm";

/// Renders EnvoyFilters for one pass
pub struct PatchGenerator<'a> {
    config: &'a TranslationConfig,
    registry: &'a PluginRegistry,
}

impl<'a> PatchGenerator<'a> {
    /// Create a generator
    pub fn new(config: &'a TranslationConfig, registry: &'a PluginRegistry) -> Self {
        Self { config, registry }
    }

    // =========================================================================
    // Gateway level
    // =========================================================================

    /// One EnvoyFilter per gateway section with any emitted patch
    pub fn gateway_filters(
        &self,
        topology: &Topology,
        resolution: &Resolution,
    ) -> Result<Vec<EnvoyFilter>, TranslationError> {
        let mut by_section: BTreeMap<&GatewaySection, Vec<(Category, &Bucket)>> = BTreeMap::new();
        for ((section, category), bucket) in &resolution.gateway_buckets {
            by_section
                .entry(section)
                .or_default()
                .push((*category, bucket));
        }

        let mut filters = Vec::new();
        for (section, buckets) in by_section {
            let Some(gateway) = topology.gateways.get(section) else {
                continue;
            };

            let mut patches = Vec::new();
            let mut provenance = ProvenanceSet::new();
            for (category, bucket) in buckets {
                if category.is_extension_config() && gateway.has_filter_manager {
                    debug!(section = %section, ?category, "filter manager installed, skipping extension config");
                    continue;
                }
                let rendered = self.render_gateway_bucket(gateway, category, bucket)?;
                if !rendered.is_empty() {
                    provenance.merge(&bucket.provenance);
                    patches.extend(rendered);
                }
            }
            if patches.is_empty() {
                continue;
            }

            let name = format!("meshfilter-gw-{}", section_slug(section));
            filters.push(self.envoy_filter(name, section, patches, &provenance)?);
        }
        Ok(filters)
    }

    fn render_gateway_bucket(
        &self,
        gateway: &Gateway,
        category: Category,
        bucket: &Bucket,
    ) -> Result<Vec<ConfigPatch>, TranslationError> {
        let ecds = gateway.section.extension_config_name();
        match category {
            Category::ExtensionConfigGolang => Ok(vec![extension_config_patch(json!({
                "name": ecds,
                "typed_config": self.golang_config(FILTER_MANAGER, golang_plugins(bucket))
            }))]),
            Category::ExtensionConfigListener | Category::ExtensionConfigNetwork => bucket
                .plugins
                .iter()
                .map(|(name, contribution)| -> Result<ConfigPatch, TranslationError> {
                    let typed_config = self.render_plugin(name, &contribution.config)?;
                    Ok(extension_config_patch(json!({
                        "name": format!("{ecds}-{name}"),
                        "typed_config": typed_config
                    })))
                })
                .collect(),
            Category::Listener => bucket
                .plugins
                .iter()
                .map(|(name, contribution)| -> Result<ConfigPatch, TranslationError> {
                    let typed_config = self.render_plugin(name, &contribution.config)?;
                    Ok(ConfigPatch {
                        apply_to: ApplyTo::HttpFilter,
                        match_: Some(PatchMatch {
                            context: Some(PatchContext::Gateway),
                            listener: Some(ListenerMatch {
                                port_number: Some(u32::from(gateway.port)),
                                filter_chain: Some(FilterChainMatch {
                                    filter: Some(FilterMatch {
                                        name: HTTP_CONNECTION_MANAGER.to_string(),
                                        sub_filter: Some(SubFilterMatch {
                                            name: ROUTER_FILTER.to_string(),
                                        }),
                                    }),
                                }),
                            }),
                            route_configuration: None,
                        }),
                        patch: PatchValue {
                            operation: Operation::InsertBefore,
                            value: json!({
                                "name": self.envoy_filter_name(name),
                                "typed_config": typed_config
                            }),
                        },
                    })
                })
                .collect(),
            Category::Route | Category::RouteFilter => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Route level
    // =========================================================================

    /// One EnvoyFilter per gateway section and route table with any route bucket
    ///
    /// Route names are qualified by the owning route object, so every
    /// (route, category) bucket renders its own patch.
    pub fn route_filters(&self, resolution: &Resolution) -> Result<Vec<EnvoyFilter>, TranslationError> {
        struct RouteTable<'r> {
            port: u16,
            patches: BTreeMap<(&'r str, Category), Value>,
            provenance: ProvenanceSet,
        }

        let mut tables: BTreeMap<(&GatewaySection, &str), RouteTable<'_>> = BTreeMap::new();
        for ((key, category), bucket) in &resolution.route_buckets {
            let value = match category {
                Category::RouteFilter => self.route_filter_value(bucket)?,
                Category::Route => self.route_action_value(bucket)?,
                _ => continue,
            };
            let vhost = &key.virtual_host;
            let table = tables
                .entry((&vhost.section, vhost.route_table_name.as_str()))
                .or_insert_with(|| RouteTable {
                    port: vhost.port,
                    patches: BTreeMap::new(),
                    provenance: ProvenanceSet::new(),
                });
            table.provenance.merge(&bucket.provenance);
            table.patches.insert((key.route_name.as_str(), *category), value);
        }

        let mut filters = Vec::with_capacity(tables.len());
        for ((section, route_table), table) in tables {
            let port = u32::from(table.port);
            let patches = table
                .patches
                .into_iter()
                .map(|((route_name, _), value)| ConfigPatch {
                    apply_to: ApplyTo::HttpRoute,
                    match_: Some(PatchMatch {
                        context: Some(PatchContext::Gateway),
                        listener: None,
                        route_configuration: Some(RouteConfigurationMatch {
                            port_number: Some(port),
                            vhost: Some(VirtualHostMatch {
                                name: route_table.to_string(),
                                route: Some(RouteMatch {
                                    name: route_name.to_string(),
                                }),
                            }),
                        }),
                    }),
                    patch: PatchValue {
                        operation: Operation::Merge,
                        value,
                    },
                })
                .collect();
            let name = format!(
                "meshfilter-host-{}-{}",
                section_slug(section),
                sanitize_name(route_table)
            );
            filters.push(self.envoy_filter(name, section, patches, &table.provenance)?);
        }
        Ok(filters)
    }

    fn route_filter_value(&self, bucket: &Bucket) -> Result<Value, TranslationError> {
        let mut per_filter = Map::new();
        let golang = golang_plugins_of(self.registry, bucket);
        if !golang.is_empty() {
            per_filter.insert(
                GOLANG_FILTER_NAME.to_string(),
                json!({
                    "@type": GOLANG_PER_ROUTE_TYPE,
                    "plugins_config": {
                        FILTER_MANAGER: {
                            "config": {
                                "@type": TYPED_STRUCT_TYPE,
                                "value": { "plugins": golang }
                            }
                        }
                    }
                }),
            );
        }
        for (name, contribution) in &bucket.plugins {
            if self.plugin_type(name) == Some(PluginType::Native) {
                per_filter.insert(
                    self.envoy_filter_name(name),
                    self.render_plugin(name, &contribution.config)?,
                );
            }
        }
        Ok(json!({ "typed_per_filter_config": per_filter }))
    }

    fn route_action_value(&self, bucket: &Bucket) -> Result<Value, TranslationError> {
        let mut merged = Value::Object(Map::new());
        for (name, contribution) in &bucket.plugins {
            merge_json(&mut merged, self.render_plugin(name, &contribution.config)?);
        }
        Ok(merged)
    }

    // =========================================================================
    // Consumers
    // =========================================================================

    /// The consumer aggregate, or `None` when no consumer is valid
    ///
    /// `records` must be in identity order. An entry of `previous` is reused
    /// verbatim when its fingerprint matches the rebuilt one.
    pub fn consumer_filter(
        &self,
        records: &[ConsumerRecord],
        previous: Option<&EnvoyFilter>,
    ) -> Result<Option<EnvoyFilter>, TranslationError> {
        let previous_entries = previous.and_then(consumer_entries);

        let mut namespaces: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        let mut has_auth = false;
        let mut reused = 0usize;
        for record in records.iter().filter(|r| r.valid) {
            let (Some(payload), Some(fingerprint)) = (&record.payload, &record.fingerprint) else {
                continue;
            };
            has_auth |= record.has_auth;

            let previous_entry = previous_entries
                .and_then(|entries| entries.get(&record.id.namespace))
                .and_then(|ns| ns.get(&record.id.name))
                .filter(|entry| entry.get("v").and_then(Value::as_str) == Some(fingerprint.as_str()));
            let entry = match previous_entry {
                Some(entry) => {
                    reused += 1;
                    entry.clone()
                }
                None => json!({ "d": payload, "v": fingerprint }),
            };
            namespaces
                .entry(record.id.namespace.clone())
                .or_default()
                .insert(record.id.name.clone(), entry);
        }

        if namespaces.is_empty() {
            return Ok(None);
        }
        debug!(
            namespaces = namespaces.len(),
            reused, has_auth, "consumer aggregate rendered"
        );

        let value: Map<String, Value> = namespaces
            .into_iter()
            .map(|(ns, consumers)| (ns, Value::Object(consumers)))
            .collect();
        let name = &self.config.consumer_filter_name;

        let mut patches = vec![extension_config_patch(json!({
            "name": name,
            "typed_config": self.golang_config(CONSUMER_MANAGER, Value::Object(value))
        }))];
        if has_auth {
            patches.push(ConfigPatch {
                apply_to: ApplyTo::HttpFilter,
                match_: Some(PatchMatch {
                    context: Some(PatchContext::Gateway),
                    listener: Some(ListenerMatch {
                        port_number: None,
                        filter_chain: Some(FilterChainMatch {
                            filter: Some(FilterMatch {
                                name: HTTP_CONNECTION_MANAGER.to_string(),
                                sub_filter: None,
                            }),
                        }),
                    }),
                    route_configuration: None,
                }),
                patch: PatchValue {
                    operation: Operation::InsertFirst,
                    value: json!({
                        "name": name,
                        "config_discovery": {
                            "config_source": { "ads": {} },
                            "type_urls": [GOLANG_CONFIG_TYPE]
                        }
                    }),
                },
            });
        }

        Ok(Some(EnvoyFilter::new(
            ObjectMeta::new(name.as_str(), self.config.root_namespace.as_str()),
            EnvoyFilterSpec::new(patches),
        )))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn golang_config(&self, plugin_name: &str, value: Value) -> Value {
        json!({
            "@type": GOLANG_CONFIG_TYPE,
            "library_id": self.config.golang_library_id,
            "library_path": self.config.golang_library_path,
            "plugin_name": plugin_name,
            "plugin_config": {
                "@type": TYPED_STRUCT_TYPE,
                "value": value
            }
        })
    }

    /// EnvoyFilter bound to the proxies of `section`'s gateway
    fn envoy_filter(
        &self,
        name: String,
        section: &GatewaySection,
        patches: Vec<ConfigPatch>,
        provenance: &ProvenanceSet,
    ) -> Result<EnvoyFilter, TranslationError> {
        let info = provenance
            .to_annotation()
            .map_err(|e| TranslationError::serialization(&name, e))?;
        let metadata = ObjectMeta::new(name, self.config.root_namespace.as_str())
            .with_annotation(INFO_ANNOTATION, info);
        Ok(EnvoyFilter::new(
            metadata,
            EnvoyFilterSpec::new(patches).for_gateway(&section.gateway_name),
        ))
    }

    fn plugin_type(&self, name: &str) -> Option<PluginType> {
        self.registry.get(name).ok().map(|p| p.plugin_type())
    }

    fn envoy_filter_name(&self, name: &str) -> String {
        self.registry
            .get(name)
            .ok()
            .and_then(|p| p.envoy_filter_name())
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }

    fn render_plugin(&self, name: &str, config: &Value) -> Result<Value, TranslationError> {
        let plugin = self
            .registry
            .get(name)
            .map_err(|e| TranslationError::render(name, e))?;
        plugin
            .render(config)
            .map(|v| sorted(&v))
            .map_err(|e| TranslationError::render(name, e))
    }
}

fn section_slug(section: &GatewaySection) -> String {
    sanitize_name(&format!(
        "{}-{}-{}",
        section.namespace, section.gateway_name, section.section_name
    ))
}

fn extension_config_patch(value: Value) -> ConfigPatch {
    ConfigPatch {
        apply_to: ApplyTo::ExtensionConfig,
        match_: None,
        patch: PatchValue {
            operation: Operation::Add,
            value,
        },
    }
}

/// `{"plugins": [...]}` for every plugin of a gateway golang bucket
fn golang_plugins(bucket: &Bucket) -> Value {
    let plugins: Vec<Value> = bucket
        .plugins
        .iter()
        .map(|(name, c)| json!({ "name": name, "config": sorted(&c.config) }))
        .collect();
    json!({ "plugins": plugins })
}

/// Golang plugins of a mixed route filter bucket
fn golang_plugins_of(registry: &PluginRegistry, bucket: &Bucket) -> Vec<Value> {
    bucket
        .plugins
        .iter()
        .filter(|(name, _)| {
            registry
                .get(name)
                .is_ok_and(|p| p.plugin_type() == PluginType::Golang)
        })
        .map(|(name, c)| json!({ "name": name, "config": sorted(&c.config) }))
        .collect()
}

/// Deep-merge `patch` into `target`; objects merge key by key, anything else replaces
fn merge_json(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(target.entry(key).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch,
    }
}

/// `namespace -> name -> entry` of a previously generated aggregate
fn consumer_entries(filter: &EnvoyFilter) -> Option<&Map<String, Value>> {
    filter
        .spec
        .config_patches
        .iter()
        .find(|p| p.apply_to == ApplyTo::ExtensionConfig)
        .and_then(|p| p.patch.value.pointer("/typed_config/plugin_config/value"))
        .and_then(Value::as_object)
}
