//! Gatehouse - a small route-table API gateway with named circuit breakers.
//!
//! Gatehouse keeps an ordered table of routes. Each route pairs a predicate
//! (exact path, host glob, or both) with a chain of header filters and an
//! upstream URI. A route may wrap its upstream call in a process-wide, named
//! circuit breaker that enforces a deadline and answers from an in-process
//! fallback endpoint when the call times out or the circuit is open.
//!
//! # Features
//! - First-match routing on exact path and `*.example.com` host globs
//! - Request / response header mutation filters (add / remove)
//! - Named circuit breakers shared across routes (CLOSED / OPEN / HALF_OPEN)
//! - `forward:/fallback` local fallback dispatch
//! - Layered configuration (file, `GATEHOUSE_*` environment, CLI) with validation
//! - Structured tracing via `tracing` & graceful shutdown
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use gatehouse::{GatewayService, HttpClientAdapter, HttpHandler, config::loader::load_config};
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let cfg = load_config(Some("gatehouse.toml"), None).await?;
//! let gateway = Arc::new(GatewayService::new(Arc::new(cfg))?);
//! let handler = Arc::new(HttpHandler::new(gateway, Arc::new(HttpClientAdapter::new()?)));
//! let app = gatehouse::adapters::router(handler);
//! # let _ = app;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! routing, filtering and circuit breaking inside `core`, free of I/O.
//!
//! # Error Handling
//! Library modules return domain error types built with `thiserror`; application-level
//! code returns `eyre::Result<T>` with `WrapErr` context attached.
//!
//! # Concurrency & Data Structures
//! Breakers live in an `scc::HashMap` keyed by name; each breaker guards its own small
//! state cell. Routes and configuration are immutable after startup.
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::GatewayService,
    ports::http_client::HttpClient,
    utils::GracefulShutdown,
};
