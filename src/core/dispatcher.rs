//! Upstream dispatcher.
//!
//! Readdresses an already-filtered request to a route's upstream and sends it
//! through the [`HttpClient`] port. The upstream response is returned as-is;
//! transport failures become [`DispatchError`] and are never retried.
use std::{net::SocketAddr, sync::Arc};

use axum::body::Body as AxumBody;
use http::{HeaderMap, HeaderValue, header};
use hyper::{Request, Response};
use thiserror::Error;

use crate::{
    core::backend::{BackendError, BackendUrl},
    ports::http_client::{HttpClient, HttpClientError},
};

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Connection-scoped headers that must not be forwarded.
const HOP_BY_HOP: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DispatchError {
    #[error(transparent)]
    InvalidTarget(#[from] BackendError),

    #[error(transparent)]
    Client(#[from] HttpClientError),
}

#[derive(Clone)]
pub struct UpstreamDispatcher {
    client: Arc<dyn HttpClient>,
}

impl UpstreamDispatcher {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }

    /// Forward `req` to `target`, preserving method, body, path and query.
    pub async fn dispatch(
        &self,
        mut req: Request<AxumBody>,
        target: &BackendUrl,
        client_addr: Option<SocketAddr>,
    ) -> Result<Response<AxumBody>, DispatchError> {
        let path_and_query = req
            .uri()
            .path_and_query()
            .map_or("/", |pq| pq.as_str())
            .to_string();
        let original_host = req
            .headers()
            .get(header::HOST)
            .cloned()
            .or_else(|| {
                req.uri()
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });

        *req.uri_mut() = target.join(&path_and_query)?;

        let headers = req.headers_mut();
        strip_hop_by_hop(headers);
        // The client sets Host from the upstream authority.
        headers.remove(header::HOST);
        add_forwarded_headers(headers, client_addr, original_host);

        tracing::debug!(
            upstream = %target,
            uri = %req.uri(),
            method = %req.method(),
            "Dispatching request upstream"
        );

        let response = self.client.send_request(req).await?;
        Ok(response)
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers named by `Connection` are hop-by-hop too.
    let listed: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    for name in listed.iter().map(String::as_str).chain(HOP_BY_HOP) {
        headers.remove(name);
    }
}

fn add_forwarded_headers(
    headers: &mut HeaderMap,
    client_addr: Option<SocketAddr>,
    original_host: Option<HeaderValue>,
) {
    if let Some(addr) = client_addr {
        let ip = addr.ip().to_string();
        let chain = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(existing) => format!("{existing}, {ip}"),
            None => ip,
        };
        if let Ok(value) = HeaderValue::from_str(&chain) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
    if let Some(host) = original_host {
        headers.insert(X_FORWARDED_HOST, host);
    }
    headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("http"));
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use http::{Method, StatusCode, Uri};

    use super::*;
    use crate::ports::http_client::HttpClientResult;

    #[derive(Default)]
    struct RecordingClient {
        seen: Mutex<Vec<(Method, Uri, HeaderMap)>>,
        fail: bool,
    }

    #[async_trait]
    impl HttpClient for RecordingClient {
        async fn send_request(
            &self,
            req: Request<AxumBody>,
        ) -> HttpClientResult<Response<AxumBody>> {
            if self.fail {
                return Err(HttpClientError::ConnectionError("refused".to_string()));
            }
            self.seen.lock().unwrap().push((
                req.method().clone(),
                req.uri().clone(),
                req.headers().clone(),
            ));
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .body(AxumBody::from("upstream"))
                .unwrap())
        }
    }

    #[tokio::test]
    async fn test_dispatch_rewrites_uri_and_headers() {
        let client = Arc::new(RecordingClient::default());
        let dispatcher = UpstreamDispatcher::new(client.clone());
        let target = BackendUrl::new("http://upstream.local:9000").unwrap();

        let req = Request::builder()
            .method(Method::POST)
            .uri("/delay/3?debug=1")
            .header(header::HOST, "www.circuitbreaker.com")
            .header(header::CONNECTION, "keep-alive, x-secret")
            .header("x-secret", "hop")
            .header("keep-alive", "timeout=5")
            .header("hello", "World")
            .body(AxumBody::empty())
            .unwrap();

        let response = dispatcher
            .dispatch(req, &target, Some("10.0.0.7:5555".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let seen = client.seen.lock().unwrap();
        let (method, uri, headers) = &seen[0];
        assert_eq!(*method, Method::POST);
        assert_eq!(uri.to_string(), "http://upstream.local:9000/delay/3?debug=1");
        assert_eq!(headers.get("hello").unwrap(), "World");
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("x-secret"));
        assert!(!headers.contains_key("keep-alive"));
        assert!(!headers.contains_key(header::HOST));
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.0.0.7");
        assert_eq!(
            headers.get(X_FORWARDED_HOST).unwrap(),
            "www.circuitbreaker.com"
        );
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
    }

    #[tokio::test]
    async fn test_forwarded_for_is_appended() {
        let client = Arc::new(RecordingClient::default());
        let dispatcher = UpstreamDispatcher::new(client.clone());
        let target = BackendUrl::new("http://upstream.local").unwrap();

        let req = Request::builder()
            .uri("/get")
            .header(X_FORWARDED_FOR, "203.0.113.1")
            .body(AxumBody::empty())
            .unwrap();
        dispatcher
            .dispatch(req, &target, Some("10.0.0.7:5555".parse().unwrap()))
            .await
            .unwrap();

        let seen = client.seen.lock().unwrap();
        assert_eq!(
            seen[0].2.get(X_FORWARDED_FOR).unwrap(),
            "203.0.113.1, 10.0.0.7"
        );
    }

    #[tokio::test]
    async fn test_transport_error_is_reported() {
        let client = Arc::new(RecordingClient {
            fail: true,
            ..Default::default()
        });
        let dispatcher = UpstreamDispatcher::new(client);
        let target = BackendUrl::new("http://upstream.local").unwrap();

        let req = Request::builder()
            .uri("/get")
            .body(AxumBody::empty())
            .unwrap();
        let err = dispatcher.dispatch(req, &target, None).await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Client(HttpClientError::ConnectionError(_))
        ));
    }
}
