//! Router assembly and server entrypoint.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, State},
    middleware,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use super::admin_routes::{cache_clear, cache_status, security_scan};
use super::batch_routes::{
    batch_cancel, batch_cleanup, batch_progress, batch_start, batch_status,
};
use super::convert_routes::{
    convert_from_base64, convert_to_base64, convert_to_base64_advanced, validate_base64,
};
use super::http_layers::{log_requests, rate_limit_middleware};
use super::metrics::metrics_handler;
use super::state::ServerState;
use super::websocket::ws_handler;

#[derive(Serialize)]
struct ServerStats {
    status: &'static str,
    uptime: String,
    version: &'static str,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        status: "ok",
        uptime: format_uptime(state.start_time.elapsed()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Assemble the full application router.
pub fn make_app(state: ServerState) -> Router {
    // Mutating operations sit behind the rate limiter; denied requests
    // never reach validation or scheduling.
    let rate_limited: Router = Router::new()
        .route("/api/convert/to-base64", post(convert_to_base64))
        .route(
            "/api/convert/to-base64-advanced",
            post(convert_to_base64_advanced),
        )
        .route("/api/convert/from-base64", post(convert_from_base64))
        .route("/api/validate-base64", post(validate_base64))
        .route("/api/convert/batch-start", post(batch_start))
        .route("/api/security/scan", post(security_scan))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit_middleware,
        ))
        .with_state(state.clone());

    let open: Router = Router::new()
        .route(
            "/api/convert/batch-progress/{queue_id}",
            get(batch_progress),
        )
        .route("/api/convert/batch-cancel/{queue_id}", delete(batch_cancel))
        .route("/api/convert/batch-status", get(batch_status))
        .route("/api/convert/batch-cleanup", post(batch_cleanup))
        .route("/api/cache/status", get(cache_status))
        .route("/api/cache/clear", delete(cache_clear))
        .route("/api/ws", get(ws_handler))
        .with_state(state.clone());

    let home_router: Router = match &state.config.frontend_dir_path {
        Some(frontend_path) => {
            let static_files_service =
                ServeDir::new(frontend_path).append_index_html_on_directories(true);
            Router::new().fallback_service(static_files_service)
        }
        None => Router::new()
            .route("/", get(home))
            .with_state(state.clone()),
    };

    home_router
        .merge(rate_limited)
        .merge(open)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
}

/// Bind the API and metrics listeners and serve until `shutdown` fires.
pub async fn run_server(state: ServerState, shutdown: CancellationToken) -> Result<()> {
    let port = state.config.port;
    let metrics_port = state.config.metrics_port;
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    let metrics_listener = tokio::net::TcpListener::bind(("0.0.0.0", metrics_port)).await?;
    info!("Serving API on port {}, metrics on port {}", port, metrics_port);

    let metrics_app: Router = Router::new().route("/metrics", get(metrics_handler));

    let api = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let metrics = axum::serve(metrics_listener, metrics_app.into_make_service())
        .with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(api, metrics)?;
    Ok(())
}
