use std::{collections::HashSet, net::SocketAddr};

use crate::{
    config::models::{CircuitBreakerProperties, GatewayConfig, RouteConfig},
    core::{
        backend::BackendUrl,
        circuit_breaker::CircuitBreakerSettings,
        filter::{Filter, FilterChain},
        predicate::Predicate,
    },
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid route '{id}': {message}")]
    InvalidRoute { id: String, message: String },

    #[error("Duplicate route id '{id}'")]
    DuplicateRouteId { id: String },

    #[error("Invalid circuit breaker '{name}': {message}")]
    InvalidCircuitBreaker { name: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator.
///
/// Checks everything that would otherwise fail at startup and reports all
/// problems at once instead of stopping at the first.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(e) = Self::validate_url(&config.httpbin, "httpbin") {
            errors.push(e);
        }

        if let Err(e) = Self::validate_log_level(&config.log.level) {
            errors.push(e);
        }

        if config.routes.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes".to_string(),
            });
        }

        let mut seen_ids = HashSet::new();
        for route in &config.routes {
            if !seen_ids.insert(route.id.as_str()) {
                errors.push(ValidationError::DuplicateRouteId {
                    id: route.id.clone(),
                });
            }
            errors.extend(Self::validate_route(config, route));
        }

        if let Err(e) = Self::validate_breaker("defaults", &config.circuit_breaker.defaults) {
            errors.push(e);
        }
        let mut instance_names: Vec<&String> = config.circuit_breaker.instances.keys().collect();
        instance_names.sort();
        for name in instance_names {
            let props = config.circuit_breaker.properties_for(name);
            if let Err(e) = Self::validate_breaker(name, &props) {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8080' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Validate URL format
    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: format!(
                            "URL scheme must be 'http' or 'https', got '{}'",
                            url.scheme()
                        ),
                    });
                }

                if url.host().is_none() {
                    return Err(ValidationError::InvalidField {
                        field: context.to_string(),
                        message: "URL must have a valid host".to_string(),
                    });
                }

                Ok(())
            }
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL format: {e}"),
            }),
        }
    }

    fn validate_log_level(level: &str) -> ValidationResult<()> {
        tracing_subscriber::EnvFilter::try_new(level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "log.level".to_string(),
                message: e.to_string(),
            })
    }

    /// Validate a single route: predicates, filters and target URI
    fn validate_route(config: &GatewayConfig, route: &RouteConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let invalid = |message: String| ValidationError::InvalidRoute {
            id: route.id.clone(),
            message,
        };

        if route.id.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "routes[].id".to_string(),
            });
        }

        if route.path.is_none() && route.host.is_none() {
            errors.push(invalid(
                "at least one of 'path' or 'host' is required".to_string(),
            ));
        }
        if let Some(path) = &route.path {
            if let Err(e) = Predicate::path(path.as_str()) {
                errors.push(invalid(e.to_string()));
            }
        }
        if let Some(host) = &route.host {
            if let Err(e) = Predicate::host(host) {
                errors.push(invalid(e.to_string()));
            }
        }

        let mut filters = Vec::with_capacity(route.filters.len());
        for filter in &route.filters {
            match Filter::from_config(filter) {
                Ok(filter) => filters.push(filter),
                Err(e) => errors.push(invalid(e.to_string())),
            }
        }
        if let Err(e) = FilterChain::new(filters) {
            errors.push(invalid(e.to_string()));
        }

        let uri = config.resolve_route_uri(route);
        if let Err(e) = BackendUrl::new(&uri) {
            errors.push(invalid(e.to_string()));
        }

        errors
    }

    fn validate_breaker(name: &str, props: &CircuitBreakerProperties) -> ValidationResult<()> {
        CircuitBreakerSettings::from_properties(props)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidCircuitBreaker {
                name: name.to_string(),
                message: e.to_string(),
            })
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{CircuitBreakerOverrides, FilterConfig};

    fn route(id: &str) -> RouteConfig {
        RouteConfig {
            id: id.to_string(),
            path: Some("/get".to_string()),
            host: None,
            filters: vec![],
            uri: None,
        }
    }

    fn message(config: &GatewayConfig) -> String {
        match GatewayConfigValidator::validate(config) {
            Err(ValidationError::ValidationFailed { message }) => message,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_default_config() {
        assert!(GatewayConfigValidator::validate(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn validate_rejects_bad_listen_addr_and_httpbin() {
        let config = GatewayConfig {
            listen_addr: "localhost".to_string(),
            httpbin: "ftp://example.com".to_string(),
            ..GatewayConfig::default()
        };
        let message = message(&config);
        assert!(message.starts_with("Found "));
        assert!(message.contains("Invalid listen address 'localhost'"));
        assert!(message.contains("httpbin"));
    }

    #[test]
    fn validate_rejects_route_without_predicate() {
        let mut config = GatewayConfig::default();
        config.routes = vec![RouteConfig {
            path: None,
            ..route("bare")
        }];
        assert!(message(&config).contains("Invalid route 'bare'"));
    }

    #[test]
    fn validate_rejects_bad_predicates() {
        let mut config = GatewayConfig::default();
        config.routes = vec![
            RouteConfig {
                path: Some("get".to_string()),
                ..route("relative")
            },
            RouteConfig {
                path: None,
                host: Some("foo*.example.com".to_string()),
                ..route("partial_glob")
            },
        ];
        let message = message(&config);
        assert!(message.contains("'relative'"));
        assert!(message.contains("'partial_glob'"));
    }

    #[test]
    fn validate_rejects_bad_filters() {
        let mut config = GatewayConfig::default();
        config.routes = vec![RouteConfig {
            filters: vec![
                FilterConfig::AddRequestHeader {
                    name: "bad header".to_string(),
                    value: "x".to_string(),
                },
                FilterConfig::CircuitBreaker {
                    name: "cb".to_string(),
                    fallback_uri: Some("http://elsewhere/fallback".to_string()),
                },
            ],
            ..route("filters")
        }];
        let message = message(&config);
        assert!(message.contains("bad header"));
        assert!(message.contains("http://elsewhere/fallback"));
    }

    #[test]
    fn validate_rejects_duplicate_route_ids() {
        let mut config = GatewayConfig::default();
        config.routes = vec![route("same"), route("same")];
        assert!(message(&config).contains("Duplicate route id 'same'"));
    }

    #[test]
    fn validate_rejects_empty_routes() {
        let mut config = GatewayConfig::default();
        config.routes.clear();
        assert!(message(&config).contains("routes"));
    }

    #[test]
    fn validate_rejects_bad_breaker_settings() {
        let mut config = GatewayConfig::default();
        config.circuit_breaker.defaults.failure_threshold = 0;
        config.circuit_breaker.instances.insert(
            "mycmd".to_string(),
            CircuitBreakerOverrides {
                timeout: Some("soon".to_string()),
                ..Default::default()
            },
        );
        let message = message(&config);
        assert!(message.contains("'defaults'"));
        assert!(message.contains("'mycmd'"));
    }

    #[test]
    fn validate_rejects_bad_log_level() {
        let mut config = GatewayConfig::default();
        config.log.level = "info,gatehouse=loud".to_string();
        assert!(message(&config).contains("log.level"));
    }
}
