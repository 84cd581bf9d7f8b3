//! Core gateway state.
//!
//! The `GatewayService` aggregates immutable configuration (`GatewayConfig`) and
//! the route table built from it with the runtime circuit breaker registry. It
//! provides:
//! * First-match route resolution
//! * Access to named circuit breakers and their snapshots
//!
//! This layer avoids I/O and only manipulates in-memory data so it remains fast
//! and easily testable in isolation.
use std::sync::Arc;

use eyre::{Result, WrapErr};

use crate::{
    config::models::GatewayConfig,
    core::{
        circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitBreakerSnapshot},
        route_table::{Route, RouteTable},
    },
};

/// Central state shared by every request. Cheap to share behind an `Arc`.
pub struct GatewayService {
    config: Arc<GatewayConfig>,
    routes: RouteTable,
    breakers: CircuitBreakerRegistry,
}

impl GatewayService {
    /// Build the route table and breaker registry from configuration.
    ///
    /// Any invalid route or breaker setting fails construction; nothing is
    /// skipped silently.
    pub fn new(config: Arc<GatewayConfig>) -> Result<Self> {
        let routes =
            RouteTable::from_config(&config).wrap_err("Failed to build route table")?;
        let breakers = CircuitBreakerRegistry::new(&config.circuit_breaker)
            .wrap_err("Invalid circuit breaker configuration")?;

        for route in routes.routes() {
            tracing::info!(
                route = route.id(),
                predicate = ?route.predicate(),
                uri = %route.uri(),
                filters = route.filters().len(),
                "Configured route"
            );
        }

        Ok(Self {
            config,
            routes,
            breakers,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    /// First route (in declaration order) matching the request path and host.
    pub fn find_matching_route(&self, path: &str, host: Option<&str>) -> Option<&Route> {
        self.routes.resolve(path, host)
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub async fn circuit_breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers.get_or_create(name).await
    }

    pub async fn circuit_breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        self.breakers.snapshots().await
    }
}
