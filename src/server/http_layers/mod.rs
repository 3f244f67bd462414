mod rate_limit;
mod requests_logging;

pub use rate_limit::rate_limit_middleware;
pub use requests_logging::{log_requests, RequestsLoggingLevel};
