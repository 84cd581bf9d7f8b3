//! Configuration data structures for gatehouse.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and to
//! `GATEHOUSE_*` environment variables. Every field carries a default so the gateway
//! runs the demo routes with no configuration file at all.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Placeholder substituted with [`GatewayConfig::httpbin`] inside route URIs.
pub const HTTPBIN_PLACEHOLDER: &str = "${httpbin}";

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_httpbin() -> String {
    "http://httpbin.org:80".to_string()
}

fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig {
            id: "path_route".to_string(),
            path: Some("/get".to_string()),
            host: None,
            filters: vec![FilterConfig::AddRequestHeader {
                name: "Hello".to_string(),
                value: "World".to_string(),
            }],
            uri: None,
        },
        RouteConfig {
            id: "host_route".to_string(),
            path: None,
            host: Some("*.circuitbreaker.com".to_string()),
            filters: vec![FilterConfig::CircuitBreaker {
                name: "mycmd".to_string(),
                fallback_uri: Some("forward:/fallback".to_string()),
            }],
            uri: None,
        },
    ]
}

/// Top level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GatewayConfig {
    pub listen_addr: String,
    /// Base URI of the upstream service the default routes forward to.
    pub httpbin: String,
    pub log: LogConfig,
    pub circuit_breaker: CircuitBreakerSection,
    /// Ordered route list; the first matching route wins.
    pub routes: Vec<RouteConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            httpbin: default_httpbin(),
            log: LogConfig::default(),
            circuit_breaker: CircuitBreakerSection::default(),
            routes: default_routes(),
        }
    }
}

impl GatewayConfig {
    /// Resolve the target URI of a route, expanding [`HTTPBIN_PLACEHOLDER`].
    /// Routes without an explicit `uri` forward to `httpbin`.
    pub fn resolve_route_uri(&self, route: &RouteConfig) -> String {
        match &route.uri {
            Some(uri) => uri.replace(HTTPBIN_PLACEHOLDER, &self.httpbin),
            None => self.httpbin.clone(),
        }
    }
}

/// Output format of the structured logger.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Circuit breaker tunables. Durations are humantime strings ("1s", "250ms").
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CircuitBreakerProperties {
    /// Consecutive failures in CLOSED that open the circuit.
    pub failure_threshold: u32,
    /// Deadline for a single upstream call.
    pub timeout: String,
    /// How long the circuit stays OPEN before a probe is let through.
    pub wait_duration_in_open_state: String,
}

impl Default for CircuitBreakerProperties {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: "1s".to_string(),
            wait_duration_in_open_state: "30s".to_string(),
        }
    }
}

/// Per-instance overrides; unset fields inherit from the defaults.
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CircuitBreakerOverrides {
    pub failure_threshold: Option<u32>,
    pub timeout: Option<String>,
    pub wait_duration_in_open_state: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct CircuitBreakerSection {
    pub defaults: CircuitBreakerProperties,
    /// Keyed by breaker name.
    pub instances: HashMap<String, CircuitBreakerOverrides>,
}

impl CircuitBreakerSection {
    /// Effective properties for a named breaker.
    pub fn properties_for(&self, name: &str) -> CircuitBreakerProperties {
        let mut props = self.defaults.clone();
        if let Some(overrides) = self.instances.get(name) {
            if let Some(threshold) = overrides.failure_threshold {
                props.failure_threshold = threshold;
            }
            if let Some(timeout) = &overrides.timeout {
                props.timeout = timeout.clone();
            }
            if let Some(wait) = &overrides.wait_duration_in_open_state {
                props.wait_duration_in_open_state = wait.clone();
            }
        }
        props
    }
}

/// A single route. `path` and `host` are ANDed; at least one must be set.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RouteConfig {
    pub id: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub filters: Vec<FilterConfig>,
    /// Target URI; may contain `${httpbin}`. Defaults to `httpbin`.
    #[serde(default)]
    pub uri: Option<String>,
}

/// Filter definitions (tagged enum), applied in declaration order.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum FilterConfig {
    AddRequestHeader {
        name: String,
        value: String,
    },
    RemoveRequestHeader {
        name: String,
    },
    AddResponseHeader {
        name: String,
        value: String,
    },
    RemoveResponseHeader {
        name: String,
    },
    CircuitBreaker {
        name: String,
        #[serde(default)]
        fallback_uri: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_carries_demo_routes() {
        let config = GatewayConfig::default();
        assert_eq!(config.httpbin, "http://httpbin.org:80");
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].path.as_deref(), Some("/get"));
        assert_eq!(
            config.routes[1].host.as_deref(),
            Some("*.circuitbreaker.com")
        );
    }

    #[test]
    fn test_resolve_route_uri() {
        let mut config = GatewayConfig {
            httpbin: "http://localhost:9000".to_string(),
            ..GatewayConfig::default()
        };
        config.routes[0].uri = Some("${httpbin}".to_string());
        config.routes[1].uri = Some("http://other:1234".to_string());

        assert_eq!(
            config.resolve_route_uri(&config.routes[0]),
            "http://localhost:9000"
        );
        assert_eq!(
            config.resolve_route_uri(&config.routes[1]),
            "http://other:1234"
        );

        config.routes[0].uri = None;
        assert_eq!(
            config.resolve_route_uri(&config.routes[0]),
            "http://localhost:9000"
        );
    }

    #[test]
    fn test_instance_overrides_inherit_defaults() {
        let mut section = CircuitBreakerSection::default();
        section.instances.insert(
            "mycmd".to_string(),
            CircuitBreakerOverrides {
                timeout: Some("250ms".to_string()),
                ..Default::default()
            },
        );

        let props = section.properties_for("mycmd");
        assert_eq!(props.timeout, "250ms");
        assert_eq!(props.failure_threshold, 5);
        assert_eq!(props.wait_duration_in_open_state, "30s");

        let other = section.properties_for("unknown");
        assert_eq!(other.timeout, "1s");
    }

    #[test]
    fn test_filter_config_tagged_deserialize() {
        let json = r#"[
            {"type": "add_request_header", "name": "Hello", "value": "World"},
            {"type": "circuit_breaker", "name": "mycmd", "fallback_uri": "forward:/fallback"}
        ]"#;
        let filters: Vec<FilterConfig> = serde_json::from_str(json).unwrap();
        assert_eq!(
            filters[1],
            FilterConfig::CircuitBreaker {
                name: "mycmd".to_string(),
                fallback_uri: Some("forward:/fallback".to_string()),
            }
        );
    }
}
