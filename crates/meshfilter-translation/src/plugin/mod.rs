//! Plugin registry
//!
//! Plugins are looked up by name. Each plugin validates its own policy
//! configuration (and consumer configuration, for authentication plugins)
//! and renders the Envoy-facing value the patch generator embeds.

mod auth;
mod demo;
mod listener;
mod traffic;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::model::Category;

pub use auth::{BasicAuth, KeyAuth};
pub use demo::Demo;
pub use listener::{ConnectionLimit, TlsInspector};
pub use traffic::{RateLimit, Timeout};

/// Envoy filter executing golang plugins
pub const GOLANG_FILTER_NAME: &str = "envoy.filters.http.golang";

// =============================================================================
// Plugin types
// =============================================================================

/// How a plugin is delivered to the proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PluginType {
    /// Runs inside the golang filter
    Golang,
    /// A native Envoy HTTP filter
    Native,
    /// Sets route action fields
    Route,
    /// A listener filter
    Listener,
    /// A network filter
    Network,
}

/// Level a policy attaches at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetLevel {
    /// A gateway or one of its listeners
    Gateway,
    /// A route object or one of its rules
    Route,
}

impl fmt::Display for TargetLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gateway => write!(f, "gateway"),
            Self::Route => write!(f, "route"),
        }
    }
}

impl PluginType {
    /// Output category of this plugin type at a target level
    ///
    /// `None` means the plugin type cannot be configured at that level.
    pub fn category(self, level: TargetLevel) -> Option<Category> {
        match (level, self) {
            (TargetLevel::Gateway, PluginType::Golang) => Some(Category::ExtensionConfigGolang),
            (TargetLevel::Gateway, PluginType::Native) => Some(Category::Listener),
            (TargetLevel::Gateway, PluginType::Listener) => Some(Category::ExtensionConfigListener),
            (TargetLevel::Gateway, PluginType::Network) => Some(Category::ExtensionConfigNetwork),
            (TargetLevel::Gateway, PluginType::Route) => None,
            (TargetLevel::Route, PluginType::Golang | PluginType::Native) => {
                Some(Category::RouteFilter)
            }
            (TargetLevel::Route, PluginType::Route) => Some(Category::Route),
            (TargetLevel::Route, PluginType::Listener | PluginType::Network) => None,
        }
    }
}

/// Configuration rejected by a plugin or the registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    /// No plugin registered under the name
    #[error("unknown plugin '{name}'")]
    UnknownPlugin {
        /// Requested plugin name
        name: String,
    },

    /// The configuration does not match the plugin's schema
    #[error("invalid configuration for plugin '{plugin}': {message}")]
    InvalidConfig {
        /// Plugin name
        plugin: String,
        /// What is wrong
        message: String,
    },

    /// The plugin does not take consumer credentials
    #[error("plugin '{plugin}' does not accept consumer configuration")]
    ConsumerUnsupported {
        /// Plugin name
        plugin: String,
    },

    /// The plugin type cannot be configured at the target level
    #[error("plugin '{plugin}' cannot be configured at {level} level")]
    NotAllowedAtLevel {
        /// Plugin name
        plugin: String,
        /// Target level
        level: TargetLevel,
    },

    /// The plugin must run inside the golang filter
    #[error("plugin '{plugin}' is not a golang plugin")]
    NotGolang {
        /// Plugin name
        plugin: String,
    },
}

impl PluginError {
    /// Create an invalid configuration error
    pub fn invalid(plugin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            plugin: plugin.into(),
            message: message.into(),
        }
    }
}

/// Deserialize a plugin configuration into its typed form
pub(crate) fn parse_config<T: DeserializeOwned>(
    plugin: &str,
    config: &Value,
) -> Result<T, PluginError> {
    serde_json::from_value(config.clone()).map_err(|e| PluginError::invalid(plugin, e.to_string()))
}

// =============================================================================
// Plugin trait
// =============================================================================

/// A filter plugin known to the engine
pub trait Plugin: fmt::Debug + Send + Sync {
    /// Registered name
    fn name(&self) -> &'static str;

    /// Delivery type
    fn plugin_type(&self) -> PluginType;

    /// Validate a policy configuration
    fn validate(&self, config: &Value) -> Result<(), PluginError>;

    /// Whether consumers may carry credentials for this plugin
    fn accepts_consumer(&self) -> bool {
        false
    }

    /// Validate a consumer credential configuration
    fn validate_consumer(&self, _config: &Value) -> Result<(), PluginError> {
        Err(PluginError::ConsumerUnsupported {
            plugin: self.name().to_string(),
        })
    }

    /// Envoy filter name for native, listener, and network plugins
    fn envoy_filter_name(&self) -> Option<&'static str> {
        None
    }

    /// Envoy-facing value for a validated configuration
    ///
    /// Golang plugins hand their configuration through unchanged.
    fn render(&self, config: &Value) -> Result<Value, PluginError> {
        Ok(config.clone())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Plugins by name
#[derive(Clone, Debug, Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<&'static str, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with every built-in plugin
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(KeyAuth));
        registry.register(Arc::new(BasicAuth));
        registry.register(Arc::new(Demo));
        registry.register(Arc::new(RateLimit));
        registry.register(Arc::new(Timeout));
        registry.register(Arc::new(TlsInspector));
        registry.register(Arc::new(ConnectionLimit));
        registry
    }

    /// Register a plugin, replacing any plugin with the same name
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(plugin.name(), plugin);
    }

    /// Look up a plugin
    pub fn get(&self, name: &str) -> Result<&Arc<dyn Plugin>, PluginError> {
        self.plugins.get(name).ok_or_else(|| PluginError::UnknownPlugin {
            name: name.to_string(),
        })
    }

    /// Registered plugin names in order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.keys().copied()
    }

    /// Validate a policy entry and return its category at the target level
    pub fn validate_policy_entry(
        &self,
        name: &str,
        config: &Value,
        level: TargetLevel,
    ) -> Result<Category, PluginError> {
        let plugin = self.get(name)?;
        let category =
            plugin
                .plugin_type()
                .category(level)
                .ok_or_else(|| PluginError::NotAllowedAtLevel {
                    plugin: name.to_string(),
                    level,
                })?;
        plugin.validate(config)?;
        Ok(category)
    }
}
