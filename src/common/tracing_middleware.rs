//! Request tracing for the node HTTP API
//!
//! Every request gets an `X-Request-ID` (echoed back, generated when the
//! client did not send one) and runs inside an `http_request` span, so blob
//! store and synchronizer logs emitted while serving a peer download can be
//! correlated with the peer that asked for it.

use crate::node::http::PEER_HEADER;
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

fn header_or(headers: &HeaderMap, name: &str, fallback: impl FnOnce() -> String) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(fallback)
}

pub async fn request_tracing_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();
    let request_id = header_or(request.headers(), REQUEST_ID_HEADER, generate_request_id);
    let peer = header_or(request.headers(), PEER_HEADER, || "-".to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %request.method(),
        path = %request.uri().path(),
        peer = %peer,
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    let status = response.status().as_u16();
    let elapsed_ms = start.elapsed().as_millis() as u64;
    span.in_scope(|| {
        // 404 is routine while peers probe for blobs they are missing.
        if response.status().is_server_error() {
            tracing::warn!(status, elapsed_ms, "request failed");
        } else if response.status().is_client_error() && status != 404 {
            tracing::info!(status, elapsed_ms, "request rejected");
        } else {
            tracing::debug!(status, elapsed_ms, "request served");
        }
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn(request_tracing_middleware))
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let resp = app()
            .oneshot(
                Request::get("/")
                    .header(REQUEST_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()[REQUEST_ID_HEADER], "abc-123");
    }

    #[tokio::test]
    async fn test_request_id_is_generated() {
        let resp = app()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let id = resp.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(id).is_ok());
    }
}
