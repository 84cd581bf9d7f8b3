use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body as AxumBody,
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use eyre::{Result, WrapErr};
use hyper::{Request, Response};

use crate::{
    core::{
        GatewayError, GatewayService, Rejected, UpstreamDispatcher,
        filter::{CircuitBreakerFilter, FallbackUri},
    },
    ports::http_client::HttpClient,
};

/// Path of the built-in fallback endpoint.
pub const FALLBACK_PATH: &str = "/fallback";
/// Fixed body served by the fallback endpoint.
pub const FALLBACK_BODY: &str = "fallback";
pub const CIRCUIT_BREAKERS_PATH: &str = "/gateway/circuitbreakers";
pub const HEALTH_PATH: &str = "/gateway/health";

/// HTTP handler for the gateway.
///
/// Local endpoints are served first; everything else goes through
/// route resolution, the request filters, the optional circuit breaker,
/// the upstream dispatcher and finally the response filters.
#[derive(Clone)]
pub struct HttpHandler {
    gateway_service: Arc<GatewayService>,
    dispatcher: UpstreamDispatcher,
}

impl HttpHandler {
    pub fn new(gateway_service: Arc<GatewayService>, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            gateway_service,
            dispatcher: UpstreamDispatcher::new(http_client),
        }
    }

    pub fn gateway_service(&self) -> &Arc<GatewayService> {
        &self.gateway_service
    }

    /// Main request handler. Never fails: errors are rendered as responses.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Response<AxumBody> {
        let path = req.uri().path().to_string();

        if let Some(response) = self.handle_local(&path).await {
            return response;
        }

        match self.proxy_request(req, client_addr).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        }
    }

    /// Serve a built-in endpoint, if `path` names one.
    async fn handle_local(&self, path: &str) -> Option<Response<AxumBody>> {
        let result = match path {
            FALLBACK_PATH => Self::handle_fallback(),
            CIRCUIT_BREAKERS_PATH => self.handle_circuit_breakers().await,
            HEALTH_PATH => self.handle_health(),
            _ => return None,
        };

        Some(result.unwrap_or_else(|e| {
            tracing::error!("Failed to build local response for {}: {:?}", path, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }))
    }

    fn handle_fallback() -> Result<Response<AxumBody>> {
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(AxumBody::from(FALLBACK_BODY))
            .wrap_err("Failed to build fallback response")
    }

    async fn handle_circuit_breakers(&self) -> Result<Response<AxumBody>> {
        let snapshots = self.gateway_service.circuit_breaker_snapshots().await;
        let body = serde_json::json!({ "circuit_breakers": snapshots });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(body.to_string()))
            .wrap_err("Failed to build circuit breaker status response")
    }

    fn handle_health(&self) -> Result<Response<AxumBody>> {
        let body = serde_json::json!({
            "status": "UP",
            "routes": self.gateway_service.routes().len(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(body.to_string()))
            .wrap_err("Failed to build health response")
    }

    async fn proxy_request(
        &self,
        req: Request<AxumBody>,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, GatewayError> {
        let host = request_host(&req);
        let path = req.uri().path().to_string();

        let route = self
            .gateway_service
            .find_matching_route(&path, host.as_deref())
            .ok_or_else(|| GatewayError::NoRouteMatched {
                method: req.method().to_string(),
                path: path.clone(),
            })?;

        tracing::debug!(route = route.id(), %path, host = ?host, "Route matched");

        let (mut parts, body) = req.into_parts();
        route.filters().apply_request(&mut parts.headers);
        let req = Request::from_parts(parts, body);

        let mut response = match route.filters().circuit_breaker() {
            None => self.dispatcher.dispatch(req, route.uri(), client_addr).await?,
            Some(cb) => {
                let breaker = self.gateway_service.circuit_breaker(&cb.name).await;
                breaker
                    .call_with_fallback(
                        async {
                            self.dispatcher
                                .dispatch(req, route.uri(), client_addr)
                                .await
                                .map_err(GatewayError::from)
                        },
                        |outcome| match outcome {
                            Ok(response) => response.status().is_server_error(),
                            Err(_) => true,
                        },
                        |rejected| self.fallback(cb, rejected),
                    )
                    .await?
            }
        };

        route.filters().apply_response(response.headers_mut());
        Ok(response)
    }

    /// Resolve a rejected breaker call: forward to the local fallback endpoint, or
    /// surface the rejection when the route has none.
    async fn fallback(
        &self,
        cb: &CircuitBreakerFilter,
        rejected: Rejected,
    ) -> Result<Response<AxumBody>, GatewayError> {
        match &cb.fallback {
            Some(FallbackUri::Forward(path)) => {
                tracing::info!(breaker = %cb.name, ?rejected, fallback = %path, "Serving fallback");
                self.handle_local(path)
                    .await
                    .ok_or_else(|| GatewayError::FallbackNotFound(path.clone()))
            }
            None => Err(match rejected {
                Rejected::Open => GatewayError::CircuitOpen(cb.name.clone()),
                Rejected::Timeout(timeout) => GatewayError::UpstreamTimeout {
                    breaker: cb.name.clone(),
                    timeout,
                },
            }),
        }
    }
}

/// Host used by predicates: the `Host` header, else the request URI authority.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    host_from_headers(req.headers()).or_else(|| req.uri().host().map(str::to_string))
}

fn host_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Client socket address recorded by `into_make_service_with_connect_info`.
pub fn client_addr<B>(req: &Request<B>) -> Option<SocketAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}
