use std::{fmt, str::FromStr};

use http::Uri;
use thiserror::Error;
use url::Url;

/// Errors related to upstream target URIs
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BackendError {
    /// Error when URL is invalid
    #[error("Invalid backend URL: {0}")]
    InvalidUrl(String),

    /// The joined request URI could not be built
    #[error("Cannot build upstream URI from '{base}' and '{path}': {reason}")]
    InvalidRequestUri {
        base: String,
        path: String,
        reason: String,
    },
}

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// A type-safe representation of a route's upstream URL.
///
/// Only the scheme and authority are used when forwarding; the inbound request's
/// path and query are appended unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BackendUrl {
    url: String,
    /// `scheme://host[:port]` without a trailing slash
    origin: String,
    is_secure: bool,
}

impl BackendUrl {
    /// Creates a new BackendUrl if the provided string is an absolute http(s) URL
    pub fn new(url: &str) -> BackendResult<Self> {
        let parsed = Url::parse(url).map_err(|e| BackendError::InvalidUrl(format!("{url}: {e}")))?;

        let is_secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(BackendError::InvalidUrl(format!(
                    "Backend URL must use http:// or https://, got scheme '{other}' in {url}"
                )));
            }
        };

        let host = parsed
            .host_str()
            .ok_or_else(|| BackendError::InvalidUrl(format!("Backend URL has no host: {url}")))?;

        // `Url` drops default ports, keep what the user wrote otherwise.
        let origin = match parsed.port() {
            Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
            None => format!("{}://{host}", parsed.scheme()),
        };

        Ok(BackendUrl {
            url: url.to_string(),
            origin,
            is_secure,
        })
    }

    /// Get the underlying URL as a string reference
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Check if the URL is using HTTPS
    pub fn is_secure(&self) -> bool {
        self.is_secure
    }

    /// Build the outbound URI for an inbound `path?query`.
    pub fn join(&self, path_and_query: &str) -> BackendResult<Uri> {
        let path = if path_and_query.is_empty() {
            "/"
        } else {
            path_and_query
        };
        format!("{}{}", self.origin, path)
            .parse()
            .map_err(|e: http::uri::InvalidUri| BackendError::InvalidRequestUri {
                base: self.origin.clone(),
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

impl FromStr for BackendUrl {
    type Err = BackendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendUrl::new(s)
    }
}

impl fmt::Display for BackendUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_url_valid() {
        let url = "http://httpbin.org:80";
        let backend_url = BackendUrl::new(url).expect("Valid HTTP URL should parse");
        assert_eq!(backend_url.as_str(), url);
        assert_eq!(backend_url.origin(), "http://httpbin.org");
        assert!(!backend_url.is_secure());

        let secure_url = "https://secure.example.com:8443/base";
        let secure_backend_url = BackendUrl::new(secure_url).expect("Valid HTTPS URL should parse");
        assert_eq!(secure_backend_url.origin(), "https://secure.example.com:8443");
        assert!(secure_backend_url.is_secure());
    }

    #[test]
    fn test_backend_url_invalid() {
        assert!(BackendUrl::new("example.com").is_err());
        assert!(BackendUrl::new("ftp://example.com").is_err());
        assert!(BackendUrl::new("").is_err());
    }

    #[test]
    fn test_backend_url_from_str() {
        let backend_url: BackendUrl = "http://localhost:8081"
            .parse()
            .expect("Parsing valid URL string should succeed");
        assert_eq!(backend_url.origin(), "http://localhost:8081");
    }

    #[test]
    fn test_join_keeps_path_and_query() {
        let backend_url = BackendUrl::new("http://localhost:8081/ignored").unwrap();
        let uri = backend_url.join("/delay/3?x=1").unwrap();
        assert_eq!(uri.to_string(), "http://localhost:8081/delay/3?x=1");

        let uri = backend_url.join("").unwrap();
        assert_eq!(uri.to_string(), "http://localhost:8081/");
    }
}
