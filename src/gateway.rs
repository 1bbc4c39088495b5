use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;

use crate::limiter::{Decision, RateLimitDecider};

/// Largest request body the gateway will buffer for forwarding
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Shared state for the admission gate and the upstream forwarder
#[derive(Clone)]
pub struct GatewayState {
    pub decider: Arc<RateLimitDecider>,
    pub client: reqwest::Client,
    pub upstream_url: String,
}

/// Admission gate middleware
///
/// Every gated request passes through here before reaching the downstream
/// handler. The client address comes from the connection, never from request
/// content. Rejected requests are answered with 429 and never forwarded.
pub async fn admission_gate(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    match state.decider.decide(&path, addr.ip()).await {
        Decision::Admit => next.run(request).await,
        Decision::Reject => StatusCode::TOO_MANY_REQUESTS.into_response(),
    }
}

/// Forwards an admitted request to the upstream service unaltered
pub async fn proxy_handler(
    State(state): State<GatewayState>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("{}{}", state.upstream_url.trim_end_matches('/'), path_and_query);

    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read request body: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // The upstream gets its own Host header from the target URL
    let mut headers = parts.headers.clone();
    headers.remove(http::header::HOST);

    let upstream = state
        .client
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(body)
        .send()
        .await;

    let upstream = match upstream {
        Ok(response) => response,
        Err(e) => {
            warn!("Upstream request failed: {}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let status = upstream.status();
    let headers = upstream.headers().clone();

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read upstream response body: {}", e);
            return StatusCode::BAD_GATEWAY.into_response();
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in headers.iter() {
        // The body was buffered, so framing headers no longer apply
        if name == http::header::TRANSFER_ENCODING || name == http::header::CONNECTION {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from(bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
