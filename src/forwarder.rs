//! This module is responsible for the I/O layer of the application.
//!
//! It handles the task of rewriting an inbound request onto a backend's
//! base URL, performing the outbound call through the shared
//! `reqwest::Client`, and streaming the backend's response back to the
//! original caller. Relay failures are recovered here and surfaced as
//! gateway-style error responses, never as propagated errors.

use axum::body::Body;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use reqwest::{Client, Url};
use thiserror::Error;
use tracing::error;

use crate::metrics::{RELAY_ERRORS, REQUESTS_FORWARDED, REQUEST_LATENCY_PER_UPSTREAM};

/// Internal classification of relay failures, used to pick the gateway
/// status surfaced to the caller.
#[derive(Debug, Error)]
enum RelayError {
    #[error("failed to read request body: {0}")]
    BodyRead(hyper::Error),
    #[error("upstream request failed: {0}")]
    Upstream(reqwest::Error),
    #[error("failed to assemble response: {0}")]
    Response(axum::http::Error),
}

/// Connection-scoped headers that must not travel through a relay.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// Copies the end-to-end headers from `headers`, dropping hop-by-hop
/// headers and `Host` (the client derives `Host` from the destination URL).
fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name.as_str()) || name == &header::HOST {
            continue;
        }
        filtered.append(name.clone(), value.clone());
    }
    filtered
}

/// Relays `req` to the backend at `base` and returns the backend's response.
///
/// On failure the caller receives a gateway-style error response (504 for a
/// timed-out backend, 502 otherwise) and the failure is recorded against
/// `upstream_addr` in the metrics.
pub async fn relay(
    client: &Client,
    base: &Url,
    upstream_addr: &str,
    req: Request<Body>,
) -> Response {
    let timer = REQUEST_LATENCY_PER_UPSTREAM.with_label_values(&[upstream_addr]).start_timer();
    let result = try_relay(client, base, req).await;
    timer.observe_duration();

    match result {
        Ok(response) => {
            REQUESTS_FORWARDED.with_label_values(&[upstream_addr]).inc();
            response
        }
        Err(e) => {
            RELAY_ERRORS.with_label_values(&[upstream_addr]).inc();
            error!(upstream = %upstream_addr, error = %e, "Relay to upstream failed");
            gateway_error(&e)
        }
    }
}

/// Performs the relay steps:
/// 1. Rewrite the destination: the upstream's scheme + authority with the
///    inbound request's path and query.
/// 2. Buffer the inbound body and send it with the original method and the
///    end-to-end headers.
/// 3. Map the backend response (status, end-to-end headers, streamed body)
///    back into a server response.
async fn try_relay(client: &Client, base: &Url, req: Request<Body>) -> Result<Response, RelayError> {
    let (parts, body) = req.into_parts();

    let mut target = base.clone();
    target.set_path(parts.uri.path());
    target.set_query(parts.uri.query());

    let body_bytes = hyper::body::to_bytes(body).await.map_err(RelayError::BodyRead)?;

    let upstream_response = client
        .request(parts.method, target)
        .headers(end_to_end_headers(&parts.headers))
        .body(body_bytes)
        .send()
        .await
        .map_err(RelayError::Upstream)?;

    let mut builder = axum::http::Response::builder().status(upstream_response.status());
    if let Some(headers) = builder.headers_mut() {
        *headers = end_to_end_headers(upstream_response.headers());
    }
    builder
        .body(Body::wrap_stream(upstream_response.bytes_stream()))
        .map(|response| response.map(axum::body::boxed))
        .map_err(RelayError::Response)
}

fn gateway_error(err: &RelayError) -> Response {
    let status = match err {
        RelayError::Upstream(e) if e.is_timeout() => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, status.canonical_reason().unwrap_or("gateway error").to_string()).into_response()
}
