//! Timeouts and defaults shared by the e2e suites.

/// How long to wait for the server to accept requests after spawn.
pub const SERVER_READY_TIMEOUT_MS: u64 = 5_000;

/// Poll interval while waiting for server readiness.
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Per-request timeout for the test client.
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// How long to poll for a batch to reach a terminal state.
pub const BATCH_TERMINAL_TIMEOUT_MS: u64 = 10_000;

/// Poll interval while waiting for batch progress changes.
pub const BATCH_POLL_INTERVAL_MS: u64 = 25;
