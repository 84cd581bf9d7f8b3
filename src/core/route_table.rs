//! Ordered route table.
//!
//! Routes are resolved strictly in declaration order: the first route whose
//! predicate accepts `(path, host)` wins. The table is immutable once built.
use thiserror::Error;

use crate::{
    config::models::{GatewayConfig, RouteConfig},
    core::{
        backend::{BackendError, BackendUrl},
        filter::{Filter, FilterChain, FilterError},
        predicate::{Predicate, PredicateError},
    },
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouteError {
    #[error("Route '{id}': {source}")]
    Predicate {
        id: String,
        #[source]
        source: PredicateError,
    },

    #[error("Route '{id}': {source}")]
    Filter {
        id: String,
        #[source]
        source: FilterError,
    },

    #[error("Route '{id}': {source}")]
    Uri {
        id: String,
        #[source]
        source: BackendError,
    },

    #[error("Route '{id}' has no target URI")]
    MissingUri { id: String },

    #[error("Duplicate route id '{0}'")]
    DuplicateId(String),
}

#[derive(Debug, Clone)]
pub struct Route {
    id: String,
    predicate: Predicate,
    filters: FilterChain,
    uri: BackendUrl,
}

impl Route {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn uri(&self) -> &BackendUrl {
        &self.uri
    }

    pub fn matches(&self, path: &str, host: Option<&str>) -> bool {
        self.predicate.matches(path, host)
    }
}

/// Fluent description of one route. Errors are deferred until [`RouteTableBuilder::build`].
pub struct RouteBuilder {
    id: String,
    predicates: Vec<Predicate>,
    filters: Vec<Filter>,
    uri: Option<String>,
    error: Option<RouteError>,
}

impl RouteBuilder {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            predicates: Vec::new(),
            filters: Vec::new(),
            uri: None,
            error: None,
        }
    }

    fn predicate(mut self, result: Result<Predicate, PredicateError>) -> Self {
        match result {
            Ok(p) => self.predicates.push(p),
            Err(source) => {
                self.error.get_or_insert(RouteError::Predicate {
                    id: self.id.clone(),
                    source,
                });
            }
        }
        self
    }

    fn filter(mut self, result: Result<Filter, FilterError>) -> Self {
        match result {
            Ok(f) => self.filters.push(f),
            Err(source) => {
                self.error.get_or_insert(RouteError::Filter {
                    id: self.id.clone(),
                    source,
                });
            }
        }
        self
    }

    pub fn path(self, path: &str) -> Self {
        self.predicate(Predicate::path(path))
    }

    pub fn host(self, pattern: &str) -> Self {
        self.predicate(Predicate::host(pattern))
    }

    pub fn add_request_header(self, name: &str, value: &str) -> Self {
        self.filter(Filter::add_request_header(name, value))
    }

    pub fn remove_request_header(self, name: &str) -> Self {
        self.filter(Filter::remove_request_header(name))
    }

    pub fn add_response_header(self, name: &str, value: &str) -> Self {
        self.filter(Filter::add_response_header(name, value))
    }

    pub fn remove_response_header(self, name: &str) -> Self {
        self.filter(Filter::remove_response_header(name))
    }

    pub fn circuit_breaker(self, name: &str, fallback_uri: Option<&str>) -> Self {
        self.filter(Filter::circuit_breaker(name, fallback_uri))
    }

    pub fn uri(mut self, uri: &str) -> Self {
        self.uri = Some(uri.to_string());
        self
    }

    fn build(self) -> Result<Route, RouteError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        let id = self.id;

        let predicate = Predicate::all(self.predicates).map_err(|source| RouteError::Predicate {
            id: id.clone(),
            source,
        })?;
        let filters = FilterChain::new(self.filters).map_err(|source| RouteError::Filter {
            id: id.clone(),
            source,
        })?;
        let uri = self
            .uri
            .ok_or_else(|| RouteError::MissingUri { id: id.clone() })?;
        let uri = BackendUrl::new(&uri).map_err(|source| RouteError::Uri {
            id: id.clone(),
            source,
        })?;

        Ok(Route {
            id,
            predicate,
            filters,
            uri,
        })
    }
}

#[derive(Default)]
pub struct RouteTableBuilder {
    routes: Vec<RouteBuilder>,
}

impl RouteTableBuilder {
    /// Append a route; declaration order is resolution order.
    pub fn route(mut self, id: &str, f: impl FnOnce(RouteBuilder) -> RouteBuilder) -> Self {
        self.routes.push(f(RouteBuilder::new(id)));
        self
    }

    pub fn build(self) -> Result<RouteTable, RouteError> {
        let mut routes: Vec<Route> = Vec::with_capacity(self.routes.len());
        for builder in self.routes {
            let route = builder.build()?;
            if routes.iter().any(|r| r.id == route.id) {
                return Err(RouteError::DuplicateId(route.id));
            }
            routes.push(route);
        }
        Ok(RouteTable { routes })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn builder() -> RouteTableBuilder {
        RouteTableBuilder::default()
    }

    /// Build the table from configuration, expanding `${httpbin}` in target URIs.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, RouteError> {
        config
            .routes
            .iter()
            .fold(Self::builder(), |table, route| {
                table.route(&route.id, |builder| {
                    Self::configure(builder, route, config.resolve_route_uri(route))
                })
            })
            .build()
    }

    fn configure(mut builder: RouteBuilder, route: &RouteConfig, uri: String) -> RouteBuilder {
        if let Some(path) = &route.path {
            builder = builder.path(path);
        }
        if let Some(host) = &route.host {
            builder = builder.host(host);
        }
        for filter in &route.filters {
            builder = builder.filter(Filter::from_config(filter));
        }
        builder.uri(&uri)
    }

    /// First matching route in declaration order.
    pub fn resolve(&self, path: &str, host: Option<&str>) -> Option<&Route> {
        self.routes.iter().find(|route| route.matches(path, host))
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
