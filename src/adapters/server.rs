//! Axum wiring: the catch-all router and the serve loop.
use std::{future::IntoFuture, net::SocketAddr, sync::Arc};

use axum::{
    Router,
    extract::Request,
    middleware,
    response::Response,
    routing::{MethodRouter, any},
};
use eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::{
    adapters::{
        http_handler::{HttpHandler, client_addr},
        middleware::{access_log_middleware, request_id_middleware},
    },
    utils::graceful_shutdown::GracefulShutdown,
};

fn proxy_route(handler: Arc<HttpHandler>) -> MethodRouter {
    any(move |req: Request| {
        let handler = handler.clone();
        async move {
            let addr = client_addr(&req);
            let response: Response = handler.handle_request(req, addr).await;
            response
        }
    })
}

/// Build the gateway router. Every path and method goes to `handler`.
pub fn router(handler: Arc<HttpHandler>) -> Router {
    Router::new()
        .route("/", proxy_route(handler.clone()))
        .route("/{*path}", proxy_route(handler))
        .layer(middleware::from_fn(access_log_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_id_middleware))
}

/// Serve `router` on `listener` until `shutdown` fires, then drain in-flight
/// requests for at most the shutdown's drain timeout.
pub async fn serve(
    listener: TcpListener,
    router: Router,
    shutdown: Arc<GracefulShutdown>,
) -> Result<()> {
    let addr = listener
        .local_addr()
        .wrap_err("Failed to read listener address")?;
    tracing::info!("Gatehouse listening on {}", addr);

    let signal = {
        let shutdown = shutdown.clone();
        async move {
            let reason = shutdown.wait_for_shutdown_signal().await;
            tracing::info!("Shutdown signal received: {:?}", reason);
        }
    };

    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .into_future();

    let drain_timeout = shutdown.drain_timeout();
    let forced = async move {
        shutdown.wait_for_shutdown_signal().await;
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => {
            result.wrap_err("Server error")?;
            tracing::info!("Graceful shutdown completed");
        }
        _ = forced => {
            tracing::warn!("In-flight requests did not finish within {:?}, forcing shutdown", drain_timeout);
        }
    }

    Ok(())
}
