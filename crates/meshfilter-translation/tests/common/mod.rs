//! Snapshot fixtures shared by the integration tests

#![allow(dead_code)]

use std::collections::BTreeMap;

use meshfilter_common::crd::{
    Consumer, ConsumerSpec, FilterConfig, HttpFilterPolicy, HttpFilterPolicySpec,
    PolicyTargetReference,
};
use meshfilter_common::kube_utils::ObjectMeta;
use meshfilter_common::network::gateway_api::{
    Gateway, GatewayListener, GatewaySpec, HttpRoute, HttpRouteRule, HttpRouteSpec, ParentRef,
};
use meshfilter_translation::{translate, PluginRegistry, Snapshot, TranslationConfig, TranslationOutput};
use serde_json::Value;

pub fn gateway(name: &str, listeners: &[(&str, u16)]) -> Gateway {
    Gateway::new(
        ObjectMeta::bare(name, "default"),
        GatewaySpec {
            gateway_class_name: "istio".to_string(),
            listeners: listeners
                .iter()
                .map(|(n, p)| GatewayListener::http(*n, *p))
                .collect(),
        },
    )
}

pub fn route(name: &str, gateway: &str, hostname: &str, rules: &[&str]) -> HttpRoute {
    HttpRoute::new(
        ObjectMeta::bare(name, "default"),
        HttpRouteSpec {
            parent_refs: vec![ParentRef {
                group: None,
                kind: None,
                name: gateway.to_string(),
                namespace: None,
                section_name: None,
            }],
            hostnames: vec![hostname.to_string()],
            rules: rules.iter().map(|r| HttpRouteRule::named(*r)).collect(),
        },
    )
}

pub fn policy(name: &str, target: PolicyTargetReference, filters: Value) -> HttpFilterPolicy {
    let filters: BTreeMap<String, FilterConfig> = filters
        .as_object()
        .map(|m| {
            m.iter()
                .map(|(k, v)| (k.clone(), FilterConfig::new(v.clone())))
                .collect()
        })
        .unwrap_or_default();
    HttpFilterPolicy {
        metadata: kube::api::ObjectMeta {
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

pub fn consumer(name: &str, spec: Value) -> Consumer {
    let spec: ConsumerSpec = serde_json::from_value(spec).expect("consumer spec fixture");
    Consumer {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// One gateway with an `http` listener and a `shop` route with two rules
pub fn shop_snapshot() -> Snapshot {
    Snapshot {
        gateways: vec![gateway("ingress", &[("http", 80)])],
        routes: vec![route("shop", "ingress", "shop.example.com", &["login", "cart"])],
        ..Default::default()
    }
}

pub fn run(snapshot: &Snapshot) -> TranslationOutput {
    translate(
        snapshot,
        &PluginRegistry::with_builtin(),
        &TranslationConfig::default(),
    )
    .expect("translation pass")
}

/// Entries of the consumer aggregate, `namespace -> name -> {d, v}`
pub fn consumer_entries(output: &TranslationOutput) -> Value {
    output
        .consumer_filter
        .as_ref()
        .expect("consumer aggregate")
        .spec
        .config_patches[0]
        .patch
        .value["typed_config"]["plugin_config"]["value"]
        .clone()
}
