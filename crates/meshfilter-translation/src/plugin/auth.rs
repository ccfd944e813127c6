//! Authentication plugins
//!
//! Both run inside the golang filter. Their policy configuration says where
//! to look for credentials; each consumer carries the credential itself.

use serde::Deserialize;
use serde_json::Value;

use super::{parse_config, Plugin, PluginError, PluginType};

// =============================================================================
// key_auth
// =============================================================================

/// Authenticates a consumer by an API key in a header or query parameter
#[derive(Debug, Clone, Copy)]
pub struct KeyAuth;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyAuthConfig {
    keys: Vec<KeyLocation>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyLocation {
    name: String,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyAuthConsumer {
    key: String,
}

impl Plugin for KeyAuth {
    fn name(&self) -> &'static str {
        "key_auth"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Golang
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        let config: KeyAuthConfig = parse_config(self.name(), config)?;
        if config.keys.is_empty() {
            return Err(PluginError::invalid(self.name(), "keys must not be empty"));
        }
        for key in &config.keys {
            if key.name.is_empty() {
                return Err(PluginError::invalid(self.name(), "key name must not be empty"));
            }
            match key.source.as_deref() {
                None | Some("header") | Some("query") => {}
                Some(other) => {
                    return Err(PluginError::invalid(
                        self.name(),
                        format!("unsupported key source '{other}', expected header or query"),
                    ))
                }
            }
        }
        Ok(())
    }

    fn accepts_consumer(&self) -> bool {
        true
    }

    fn validate_consumer(&self, config: &Value) -> Result<(), PluginError> {
        let consumer: KeyAuthConsumer = parse_config(self.name(), config)?;
        if consumer.key.is_empty() {
            return Err(PluginError::invalid(self.name(), "key must not be empty"));
        }
        Ok(())
    }
}

// =============================================================================
// basic_auth
// =============================================================================

/// Authenticates a consumer by HTTP basic credentials
#[derive(Debug, Clone, Copy)]
pub struct BasicAuth;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BasicAuthConfig {}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BasicAuthConsumer {
    username: String,
    password: String,
}

impl Plugin for BasicAuth {
    fn name(&self) -> &'static str {
        "basic_auth"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Golang
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        let BasicAuthConfig {} = parse_config(self.name(), config)?;
        Ok(())
    }

    fn accepts_consumer(&self) -> bool {
        true
    }

    fn validate_consumer(&self, config: &Value) -> Result<(), PluginError> {
        let consumer: BasicAuthConsumer = parse_config(self.name(), config)?;
        if consumer.username.is_empty() || consumer.password.is_empty() {
            return Err(PluginError::invalid(
                self.name(),
                "username and password must not be empty",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_auth_policy_config() {
        assert!(KeyAuth
            .validate(&json!({ "keys": [{ "name": "Authorization" }] }))
            .is_ok());
        assert!(KeyAuth
            .validate(&json!({ "keys": [{ "name": "ak", "source": "query" }] }))
            .is_ok());
        assert!(KeyAuth.validate(&json!({ "keys": [] })).is_err());
        assert!(KeyAuth
            .validate(&json!({ "keys": [{ "name": "ak", "source": "cookie" }] }))
            .is_err());
        assert!(KeyAuth.validate(&json!({})).is_err());
    }

    #[test]
    fn key_auth_consumer_config() {
        assert!(KeyAuth.validate_consumer(&json!({ "key": "rick" })).is_ok());
        assert!(KeyAuth.validate_consumer(&json!({ "key": "" })).is_err());
        assert!(KeyAuth.validate_consumer(&json!({ "key": 1 })).is_err());
        assert!(KeyAuth
            .validate_consumer(&json!({ "key": "rick", "extra": true }))
            .is_err());
    }

    #[test]
    fn basic_auth_configs() {
        assert!(BasicAuth.validate(&json!({})).is_ok());
        assert!(BasicAuth.validate(&json!({ "realm": "x" })).is_err());
        assert!(BasicAuth
            .validate_consumer(&json!({ "username": "rick", "password": "morty" }))
            .is_ok());
        assert!(BasicAuth
            .validate_consumer(&json!({ "username": "rick" }))
            .is_err());
    }
}
