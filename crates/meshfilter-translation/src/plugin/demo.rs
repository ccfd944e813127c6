//! `demo` golang plugin, sets an upstream header from its `host_name`

use serde::Deserialize;
use serde_json::Value;

use super::{parse_config, Plugin, PluginError, PluginType};

/// Example golang plugin
#[derive(Debug, Clone, Copy)]
pub struct Demo;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DemoConfig {
    host_name: String,
}

impl Plugin for Demo {
    fn name(&self) -> &'static str {
        "demo"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Golang
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        let config: DemoConfig = parse_config(self.name(), config)?;
        if config.host_name.is_empty() {
            return Err(PluginError::invalid(self.name(), "host_name must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requires_host_name() {
        assert!(Demo.validate(&json!({ "host_name": "rick" })).is_ok());
        assert!(Demo.validate(&json!({ "host_name": "" })).is_err());
        assert!(Demo.validate(&json!({})).is_err());
        assert!(Demo.validate_consumer(&json!({})).is_err());
        assert!(!Demo.accepts_consumer());
    }

    #[test]
    fn renders_config_unchanged() {
        let config = json!({ "host_name": "rick" });
        assert_eq!(Demo.render(&config).unwrap(), config);
    }
}
