//! Test server lifecycle management.
//!
//! Each test gets an isolated server on a random port with its own
//! in-memory cache and a generous rate-limit budget (individual tests
//! tighten settings through `spawn_with`).

use super::constants::*;
use convert_server::config::{AppConfig, CacheBackendKind, CliConfig};
use convert_server::server::{make_app, metrics, RequestsLoggingLevel, ServerState};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub struct TestServer {
    /// Base URL for making requests (e.g. "http://127.0.0.1:12345").
    pub base_url: String,
    pub port: u16,
    /// Direct access to the component graph for assertions.
    pub state: ServerState,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawn with test-friendly defaults: memory cache, no request
    /// logging, rate limits high enough to stay invisible.
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    /// Spawn with a hook to adjust the resolved configuration first.
    pub async fn spawn_with(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = AppConfig::resolve(&CliConfig::default(), None)
            .expect("default config must resolve");
        config.logging_level = RequestsLoggingLevel::None;
        config.cache.backend = CacheBackendKind::Memory;
        config.security.rate_limit_burst_size = 10_000;
        config.security.rate_limit_requests_per_minute = 600_000;
        adjust(&mut config);

        metrics::init_metrics();

        let shutdown = CancellationToken::new();
        let state = ServerState::build(&config, shutdown.clone())
            .await
            .expect("failed to build server state");

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let app = make_app(state.clone());
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await
            .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            state,
            shutdown,
        };
        server.wait_for_ready().await;
        server
    }

    pub fn ws_url(&self) -> String {
        format!("ws://127.0.0.1:{}/api/ws", self.port)
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(250))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }
            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
