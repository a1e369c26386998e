//! Structured logging setup.
//!
//! The connector logs with `tracing`, emitted as JSON so it can be shipped
//! alongside the host framework's own logs without a translation step.
//! Verbosity is controlled the usual way, via `RUST_LOG`.

use tracing_subscriber::{EnvFilter, FmtSubscriber};

// ==== Logging field-name constants ====
pub const COMPONENT_KEY: &str = "component";
pub const BLOCK_HEIGHT_KEY: &str = "block_height";
pub const REQUEST_NAME_KEY: &str = "request_name";
pub const ATTEMPT_KEY: &str = "attempt";

/// Installs the global `tracing` subscriber. Call once, from the binary entrypoint.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).json().finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        tracing::debug!("global tracing subscriber already set");
    }
}
