//! Route predicates.
//!
//! A predicate is a pure function of the request path and host. Host patterns are
//! compiled once into anchored regular expressions; a `*` label matches one or more
//! labels, so `*.circuitbreaker.com` accepts `www.circuitbreaker.com` and
//! `a.b.circuitbreaker.com` but never the bare `circuitbreaker.com`.
use std::fmt;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PredicateError {
    #[error("Path predicate must start with '/', got: {0}")]
    InvalidPath(String),

    #[error("Invalid host pattern '{pattern}': {reason}")]
    InvalidHostPattern { pattern: String, reason: String },

    #[error("A route needs at least one predicate")]
    Empty,
}

/// Compiled host glob.
#[derive(Clone)]
pub struct HostPattern {
    pattern: String,
    regex: Regex,
}

impl HostPattern {
    pub fn new(pattern: &str) -> Result<Self, PredicateError> {
        let invalid = |reason: &str| PredicateError::InvalidHostPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };

        let normalized = pattern.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(invalid("pattern is empty"));
        }

        let mut parts = Vec::new();
        for label in normalized.split('.') {
            match label {
                "" => return Err(invalid("empty label")),
                "*" => parts.push(r"[^.]+(?:\.[^.]+)*".to_string()),
                _ if label.contains('*') => {
                    return Err(invalid("'*' must occupy a whole label"));
                }
                _ => parts.push(regex::escape(label)),
            }
        }

        let regex = Regex::new(&format!("^{}$", parts.join(r"\.")))
            .map_err(|e| invalid(&e.to_string()))?;

        Ok(Self {
            pattern: normalized,
            regex,
        })
    }

    /// Match a Host header value. Case-insensitive; a `:port` suffix is ignored.
    pub fn matches(&self, host: &str) -> bool {
        let host = strip_port(host).to_ascii_lowercase();
        self.regex.is_match(&host)
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for HostPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HostPattern").field(&self.pattern).finish()
    }
}

fn strip_port(host: &str) -> &str {
    // Bracketed IPv6 literals keep their colons.
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

#[derive(Debug, Clone)]
pub enum Predicate {
    /// Exact path equality.
    Path(String),
    Host(HostPattern),
    All(Vec<Predicate>),
}

impl Predicate {
    pub fn path(path: impl Into<String>) -> Result<Self, PredicateError> {
        let path = path.into();
        if !path.starts_with('/') {
            return Err(PredicateError::InvalidPath(path));
        }
        Ok(Predicate::Path(path))
    }

    pub fn host(pattern: &str) -> Result<Self, PredicateError> {
        HostPattern::new(pattern).map(Predicate::Host)
    }

    /// AND-compose predicates. A single predicate is returned as-is.
    pub fn all(mut predicates: Vec<Predicate>) -> Result<Self, PredicateError> {
        match predicates.len() {
            0 => Err(PredicateError::Empty),
            1 => Ok(predicates.remove(0)),
            _ => Ok(Predicate::All(predicates)),
        }
    }

    /// Evaluate against a request. A missing host never satisfies a host predicate.
    pub fn matches(&self, path: &str, host: Option<&str>) -> bool {
        match self {
            Predicate::Path(expected) => expected == path,
            Predicate::Host(pattern) => host.is_some_and(|h| pattern.matches(h)),
            Predicate::All(predicates) => predicates.iter().all(|p| p.matches(path, host)),
        }
    }
}
