//! Prometheus metrics.
//!
//! The connector is embedded in a host process rather than run as its own
//! server, so this module only maintains the registry and renders it on
//! demand - the host decides how (or whether) to expose [`render`] on its
//! own HTTP surface.

use lazy_static::lazy_static;
use prometheus::{IntCounterVec, Opts, Registry};

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();

    /// Outcome of each RPC attempt, labelled by method and outcome (ok/error/timeout).
    pub static ref RPC_RETRY_COUNTER: IntCounterVec = IntCounterVec::new(
        Opts::new("connector_rpc_attempts_total", "Count of RPC attempts made by the retry engine"),
        &["method", "outcome"],
    ).expect("metric succesfully created");

    /// Block cache hit/miss, labelled by lookup key kind (height/hash).
    pub static ref CACHE_LOOKUP_COUNTER: IntCounterVec = IntCounterVec::new(
        Opts::new("connector_block_cache_lookups_total", "Count of block cache lookups"),
        &["key_kind", "outcome"],
    ).expect("metric succesfully created");

    /// Outcome of each chain-tracker reconcile pass (duplicate/replace/append/rebuild).
    pub static ref RECONCILE_OUTCOME_COUNTER: IntCounterVec = IntCounterVec::new(
        Opts::new("connector_reconcile_outcomes_total", "Count of chain tracker reconcile outcomes"),
        &["outcome"],
    ).expect("metric succesfully created");
}

pub fn register_metrics() {
    REGISTRY
        .register(Box::new(RPC_RETRY_COUNTER.clone()))
        .expect("metric succesfully registered");
    REGISTRY
        .register(Box::new(CACHE_LOOKUP_COUNTER.clone()))
        .expect("metric succesfully registered");
    REGISTRY
        .register(Box::new(RECONCILE_OUTCOME_COUNTER.clone()))
        .expect("metric succesfully registered");
}

/// Renders the registry in the Prometheus text exposition format.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("could not encode metrics: {e}");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_metric_names() {
        register_metrics();
        RPC_RETRY_COUNTER.with_label_values(&["get_block", "ok"]).inc();
        let text = render();
        assert!(text.contains("connector_rpc_attempts_total"));
    }
}
