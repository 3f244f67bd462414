mod admin_routes;
mod batch_routes;
pub mod config;
mod convert_routes;
mod error;
mod http_layers;
pub mod metrics;
#[allow(clippy::module_inception)]
pub mod server;
pub mod state;
pub mod websocket;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use http_layers::{log_requests, RequestsLoggingLevel};
pub use server::{make_app, run_server};
pub use state::ServerState;
