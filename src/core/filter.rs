//! Per-route filter chain.
//!
//! Header filters are pure transformations of a [`HeaderMap`]; the circuit breaker
//! filter only tags the route so the handler wraps the upstream call. Filters run in
//! declaration order in both phases.
use http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::config::models::FilterConfig;

/// Scheme prefix of an in-process fallback target.
pub const FORWARD_SCHEME: &str = "forward:";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FilterError {
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(String),

    #[error("Invalid value for header '{name}'")]
    InvalidHeaderValue { name: String },

    #[error("Unsupported fallback URI '{0}', expected 'forward:/<path>'")]
    InvalidFallbackUri(String),

    #[error("Circuit breaker name must not be empty")]
    EmptyBreakerName,

    #[error("At most one circuit breaker filter per route")]
    DuplicateCircuitBreaker,
}

/// Where a breaker-wrapped route goes when the upstream call is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackUri {
    /// Local endpoint path, dispatched in-process.
    Forward(String),
}

impl FallbackUri {
    pub fn parse(uri: &str) -> Result<Self, FilterError> {
        match uri.strip_prefix(FORWARD_SCHEME) {
            Some(path) if path.starts_with('/') => Ok(FallbackUri::Forward(path.to_string())),
            _ => Err(FilterError::InvalidFallbackUri(uri.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerFilter {
    pub name: String,
    pub fallback: Option<FallbackUri>,
}

#[derive(Debug, Clone)]
pub enum Filter {
    AddRequestHeader(HeaderName, HeaderValue),
    RemoveRequestHeader(HeaderName),
    AddResponseHeader(HeaderName, HeaderValue),
    RemoveResponseHeader(HeaderName),
    CircuitBreaker(CircuitBreakerFilter),
}

fn header_name(name: &str) -> Result<HeaderName, FilterError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| FilterError::InvalidHeaderName(name.to_string()))
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, FilterError> {
    HeaderValue::from_str(value).map_err(|_| FilterError::InvalidHeaderValue {
        name: name.to_string(),
    })
}

impl Filter {
    pub fn add_request_header(name: &str, value: &str) -> Result<Self, FilterError> {
        Ok(Filter::AddRequestHeader(
            header_name(name)?,
            header_value(name, value)?,
        ))
    }

    pub fn remove_request_header(name: &str) -> Result<Self, FilterError> {
        Ok(Filter::RemoveRequestHeader(header_name(name)?))
    }

    pub fn add_response_header(name: &str, value: &str) -> Result<Self, FilterError> {
        Ok(Filter::AddResponseHeader(
            header_name(name)?,
            header_value(name, value)?,
        ))
    }

    pub fn remove_response_header(name: &str) -> Result<Self, FilterError> {
        Ok(Filter::RemoveResponseHeader(header_name(name)?))
    }

    pub fn circuit_breaker(name: &str, fallback_uri: Option<&str>) -> Result<Self, FilterError> {
        if name.trim().is_empty() {
            return Err(FilterError::EmptyBreakerName);
        }
        Ok(Filter::CircuitBreaker(CircuitBreakerFilter {
            name: name.to_string(),
            fallback: fallback_uri.map(FallbackUri::parse).transpose()?,
        }))
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterError> {
        match config {
            FilterConfig::AddRequestHeader { name, value } => Self::add_request_header(name, value),
            FilterConfig::RemoveRequestHeader { name } => Self::remove_request_header(name),
            FilterConfig::AddResponseHeader { name, value } => {
                Self::add_response_header(name, value)
            }
            FilterConfig::RemoveResponseHeader { name } => Self::remove_response_header(name),
            FilterConfig::CircuitBreaker { name, fallback_uri } => {
                Self::circuit_breaker(name, fallback_uri.as_deref())
            }
        }
    }
}

/// Ordered filters of a single route.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Result<Self, FilterError> {
        let breakers = filters
            .iter()
            .filter(|f| matches!(f, Filter::CircuitBreaker(_)))
            .count();
        if breakers > 1 {
            return Err(FilterError::DuplicateCircuitBreaker);
        }
        Ok(Self { filters })
    }

    /// Request phase. Adding a header replaces every existing value (last write wins).
    pub fn apply_request(&self, headers: &mut HeaderMap) {
        for filter in &self.filters {
            match filter {
                Filter::AddRequestHeader(name, value) => {
                    headers.insert(name.clone(), value.clone());
                }
                Filter::RemoveRequestHeader(name) => {
                    headers.remove(name);
                }
                _ => {}
            }
        }
    }

    /// Response phase, applied to upstream and fallback responses alike.
    pub fn apply_response(&self, headers: &mut HeaderMap) {
        for filter in &self.filters {
            match filter {
                Filter::AddResponseHeader(name, value) => {
                    headers.insert(name.clone(), value.clone());
                }
                Filter::RemoveResponseHeader(name) => {
                    headers.remove(name);
                }
                _ => {}
            }
        }
    }

    pub fn circuit_breaker(&self) -> Option<&CircuitBreakerFilter> {
        self.filters.iter().find_map(|f| match f {
            Filter::CircuitBreaker(cb) => Some(cb),
            _ => None,
        })
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}
