//! Useful metrics that all relayer tasks track.

use std::sync::Arc;

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};

/// Process metrics, shared by every task.
///
/// There is deliberately no scrape server: the relayer exposes no external
/// API. The registry is still gatherable for tests and debugging dumps.
#[derive(Debug)]
pub struct CoreMetrics {
    chain_height: Box<IntGaugeVec>,
    stored_events: Box<IntCounterVec>,
    relayed_transactions: Box<IntCounterVec>,
    registry: Arc<Registry>,
}

impl CoreMetrics {
    /// Create and register the metric families.
    pub fn new(registry: Arc<Registry>) -> prometheus::Result<CoreMetrics> {
        let metrics = CoreMetrics {
            chain_height: Box::new(IntGaugeVec::new(
                Opts::new("chain_height", "Last fully handled block height")
                    .namespace("relayer")
                    .const_label("VERSION", env!("CARGO_PKG_VERSION")),
                &["chain"],
            )?),
            stored_events: Box::new(IntCounterVec::new(
                Opts::new("stored_events", "Cross-chain events persisted since boot")
                    .namespace("relayer")
                    .const_label("VERSION", env!("CARGO_PKG_VERSION")),
                &["chain"],
            )?),
            relayed_transactions: Box::new(IntCounterVec::new(
                Opts::new(
                    "relayed_transactions",
                    "Transactions submitted to the opposite chain since boot",
                )
                .namespace("relayer")
                .const_label("VERSION", env!("CARGO_PKG_VERSION")),
                &["chain"],
            )?),
            registry,
        };

        metrics.registry.register(metrics.chain_height.clone())?;
        metrics.registry.register(metrics.stored_events.clone())?;
        metrics
            .registry
            .register(metrics.relayed_transactions.clone())?;

        Ok(metrics)
    }

    /// Record the last handled height for a chain.
    pub fn set_chain_height(&self, chain: &str, height: u64) {
        self.chain_height
            .with_label_values(&[chain])
            .set(height as i64);
    }

    /// Count a persisted cross-chain event.
    pub fn event_stored(&self, chain: &str) {
        self.stored_events.with_label_values(&[chain]).inc();
    }

    /// Count a submitted transaction.
    pub fn transaction_relayed(&self, chain: &str) {
        self.relayed_transactions.with_label_values(&[chain]).inc();
    }

    /// Gather the current metric values.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_and_records() {
        let metrics = CoreMetrics::new(Arc::new(Registry::new())).unwrap();
        metrics.set_chain_height("poly", 42);
        metrics.event_stored("heco");
        metrics.transaction_relayed("heco");
        assert_eq!(metrics.gather().len(), 3);
    }
}
