//! Listener and network filter plugins, delivered through ECDS

use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_config, Plugin, PluginError, PluginType};

/// Inspects TLS client hellos on the listener
#[derive(Debug, Clone, Copy)]
pub struct TlsInspector;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TlsInspectorConfig {}

impl Plugin for TlsInspector {
    fn name(&self) -> &'static str {
        "tls_inspector"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Listener
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        let TlsInspectorConfig {} = parse_config(self.name(), config)?;
        Ok(())
    }

    fn envoy_filter_name(&self) -> Option<&'static str> {
        Some("envoy.filters.listener.tls_inspector")
    }

    fn render(&self, config: &Value) -> Result<Value, PluginError> {
        self.validate(config)?;
        Ok(json!({
            "@type": "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector"
        }))
    }
}

/// Caps concurrent downstream connections
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimit;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConnectionLimitConfig {
    max_connections: u64,
}

fn parse_connection_limit(config: &Value) -> Result<u64, PluginError> {
    let plugin = ConnectionLimit.name();
    let config: ConnectionLimitConfig = parse_config(plugin, config)?;
    if config.max_connections == 0 {
        return Err(PluginError::invalid(plugin, "max_connections must be at least 1"));
    }
    Ok(config.max_connections)
}

impl Plugin for ConnectionLimit {
    fn name(&self) -> &'static str {
        "connection_limit"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Network
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        parse_connection_limit(config).map(|_| ())
    }

    fn envoy_filter_name(&self) -> Option<&'static str> {
        Some("envoy.filters.network.connection_limit")
    }

    fn render(&self, config: &Value) -> Result<Value, PluginError> {
        Ok(json!({
            "@type": "type.googleapis.com/envoy.extensions.filters.network.connection_limit.v3.ConnectionLimit",
            "stat_prefix": "connection_limit",
            "max_connections": parse_connection_limit(config)?
        }))
    }
}
