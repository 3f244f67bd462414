//! Rate limiting middleware for mutating endpoints.
//!
//! Keys buckets by client IP. Denied requests short-circuit with 429
//! and a Retry-After header before any validation or scheduling work
//! happens.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::net::SocketAddr;
use tracing::warn;

use super::super::metrics::RATE_LIMIT_HITS_TOTAL;
use super::super::state::ServerState;

pub async fn rate_limit_middleware(
    State(state): State<ServerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let client_id = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| format!("ip:{}", addr.ip()))
        .unwrap_or_else(|| "ip:unknown".to_string());

    let decision = state.limiter.check(&client_id, 1);
    if decision.allowed {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    warn!(
        "Rate limit exceeded: {} {} ({})",
        request.method(),
        path,
        client_id
    );
    RATE_LIMIT_HITS_TOTAL.with_label_values(&[&path]).inc();

    let retry_after = decision.retry_after_seconds.ceil().max(1.0) as u64;
    (
        StatusCode::TOO_MANY_REQUESTS,
        [("Retry-After", retry_after.to_string())],
        axum::Json(json!({
            "error": "Rate limit exceeded",
            "error_code": "RATE_LIMITED",
            "message": "Rate limit exceeded",
            "retry_after_seconds": retry_after,
        })),
    )
        .into_response()
}
