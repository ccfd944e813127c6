//! Traffic plugins: native local rate limiting and route timeouts

use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_config, Plugin, PluginError, PluginType};

// =============================================================================
// rate_limit
// =============================================================================

const LOCAL_RATELIMIT_FILTER: &str = "envoy.filters.http.local_ratelimit";
const LOCAL_RATELIMIT_TYPE: &str =
    "type.googleapis.com/envoy.extensions.filters.http.local_ratelimit.v3.LocalRateLimit";

/// Token bucket rate limiting through Envoy's local rate limit filter
#[derive(Debug, Clone, Copy)]
pub struct RateLimit;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RateLimitConfig {
    requests_per_unit: u32,
    unit: String,
    #[serde(default)]
    burst: Option<u32>,
}

impl RateLimitConfig {
    fn fill_interval(&self) -> Option<&'static str> {
        match self.unit.as_str() {
            "second" => Some("1s"),
            "minute" => Some("60s"),
            "hour" => Some("3600s"),
            _ => None,
        }
    }
}

fn parse_rate_limit(config: &Value) -> Result<(RateLimitConfig, &'static str), PluginError> {
    let plugin = RateLimit.name();
    let config: RateLimitConfig = parse_config(plugin, config)?;
    if config.requests_per_unit == 0 {
        return Err(PluginError::invalid(plugin, "requests_per_unit must be at least 1"));
    }
    let interval = config.fill_interval().ok_or_else(|| {
        PluginError::invalid(
            plugin,
            format!("unit '{}' must be one of second, minute, hour", config.unit),
        )
    })?;
    if config.burst.is_some_and(|b| b < config.requests_per_unit) {
        return Err(PluginError::invalid(plugin, "burst must not be below requests_per_unit"));
    }
    Ok((config, interval))
}

impl Plugin for RateLimit {
    fn name(&self) -> &'static str {
        "rate_limit"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Native
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        parse_rate_limit(config).map(|_| ())
    }

    fn envoy_filter_name(&self) -> Option<&'static str> {
        Some(LOCAL_RATELIMIT_FILTER)
    }

    fn render(&self, config: &Value) -> Result<Value, PluginError> {
        let (config, interval) = parse_rate_limit(config)?;
        let fraction = json!({
            "default_value": { "numerator": 100, "denominator": "HUNDRED" },
            "runtime_key": "local_rate_limit_enabled"
        });
        Ok(json!({
            "@type": LOCAL_RATELIMIT_TYPE,
            "stat_prefix": "http_local_rate_limiter",
            "token_bucket": {
                "max_tokens": config.burst.unwrap_or(config.requests_per_unit),
                "tokens_per_fill": config.requests_per_unit,
                "fill_interval": interval
            },
            "filter_enabled": fraction.clone(),
            "filter_enforced": fraction
        }))
    }
}

// =============================================================================
// timeout
// =============================================================================

/// Sets the route timeout
#[derive(Debug, Clone, Copy)]
pub struct Timeout;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TimeoutConfig {
    duration: String,
}

fn parse_timeout(config: &Value) -> Result<String, PluginError> {
    let plugin = Timeout.name();
    let config: TimeoutConfig = parse_config(plugin, config)?;
    let valid = config
        .duration
        .strip_suffix('s')
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
    if !valid {
        return Err(PluginError::invalid(
            plugin,
            format!("duration '{}' must be a whole number of seconds like \"5s\"", config.duration),
        ));
    }
    Ok(config.duration)
}

impl Plugin for Timeout {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn plugin_type(&self) -> PluginType {
        PluginType::Route
    }

    fn validate(&self, config: &Value) -> Result<(), PluginError> {
        parse_timeout(config).map(|_| ())
    }

    fn render(&self, config: &Value) -> Result<Value, PluginError> {
        Ok(json!({ "route": { "timeout": parse_timeout(config)? } }))
    }
}
