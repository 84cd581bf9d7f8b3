pub mod backend;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod error;
pub mod filter;
pub mod gateway;
pub mod predicate;
pub mod route_table;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerRegistry, CircuitState, Rejected};
pub use dispatcher::{DispatchError, UpstreamDispatcher};
pub use error::GatewayError;
pub use gateway::GatewayService;
pub use route_table::{Route, RouteTable};
