//! Prometheus metrics for Bloodbridge
//!
//! ## Table of Contents
//! - **BridgeMetrics**: Counters for proposals, expiry, alerts and sweeps

use crate::error::{BridgeError, Result};
use prometheus::{Counter, CounterVec, Encoder, Opts, Registry, TextEncoder};

/// Core metrics, registered in a private registry
pub struct BridgeMetrics {
    registry: Registry,

    // Matching
    pub proposals_created: CounterVec,
    pub proposals_confirmed: Counter,
    pub proposals_expired: Counter,

    // Inventory
    pub items_expired: Counter,
    pub units_consumed: CounterVec,

    // Alerts
    pub alerts_emitted: CounterVec,
    pub notifier_failures: CounterVec,

    // Scheduler
    pub sweep_runs: CounterVec,
    pub entity_failures: CounterVec,
}

impl BridgeMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let proposals_created = CounterVec::new(
            Opts::new("bloodbridge_proposals_created_total", "Proposals sent to donors"),
            &["source"],
        )?;
        let proposals_confirmed =
            Counter::new("bloodbridge_proposals_confirmed_total", "Proposals confirmed by donors")?;
        let proposals_expired =
            Counter::new("bloodbridge_proposals_expired_total", "Proposals that lapsed")?;

        let items_expired = Counter::new("bloodbridge_items_expired_total", "Inventory items expired")?;
        let units_consumed = CounterVec::new(
            Opts::new("bloodbridge_units_consumed_total", "Units consumed from inventory"),
            &["kind"],
        )?;

        let alerts_emitted = CounterVec::new(
            Opts::new("bloodbridge_alerts_emitted_total", "Alerts emitted"),
            &["event"],
        )?;
        let notifier_failures = CounterVec::new(
            Opts::new("bloodbridge_notifier_failures_total", "Notifier calls that failed or timed out"),
            &["channel"],
        )?;

        let sweep_runs = CounterVec::new(
            Opts::new("bloodbridge_sweep_runs_total", "Periodic task runs"),
            &["task", "outcome"],
        )?;
        let entity_failures = CounterVec::new(
            Opts::new("bloodbridge_entity_failures_total", "Per-entity failures inside sweeps"),
            &["task"],
        )?;

        registry.register(Box::new(proposals_created.clone()))?;
        registry.register(Box::new(proposals_confirmed.clone()))?;
        registry.register(Box::new(proposals_expired.clone()))?;
        registry.register(Box::new(items_expired.clone()))?;
        registry.register(Box::new(units_consumed.clone()))?;
        registry.register(Box::new(alerts_emitted.clone()))?;
        registry.register(Box::new(notifier_failures.clone()))?;
        registry.register(Box::new(sweep_runs.clone()))?;
        registry.register(Box::new(entity_failures.clone()))?;

        Ok(Self {
            registry,
            proposals_created,
            proposals_confirmed,
            proposals_expired,
            items_expired,
            units_consumed,
            alerts_emitted,
            notifier_failures,
            sweep_runs,
            entity_failures,
        })
    }

    /// Get the registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Record a proposal
    pub fn record_proposal(&self, source: &str) {
        self.proposals_created.with_label_values(&[source]).inc();
    }

    /// Record a sweep outcome
    pub fn record_sweep(&self, task: &str, ok: bool) {
        let outcome = if ok { "ok" } else { "error" };
        self.sweep_runs.with_label_values(&[task, outcome]).inc();
    }

    /// Text exposition format
    pub fn gather_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| BridgeError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = BridgeMetrics::new().unwrap();
        metrics.record_proposal("intake");
        metrics.proposals_confirmed.inc();
        assert_eq!(metrics.proposals_created.with_label_values(&["intake"]).get(), 1.0);
    }

    #[test]
    fn test_gather_text() {
        let metrics = BridgeMetrics::new().unwrap();
        metrics.record_sweep("expiry", true);
        let text = metrics.gather_text().unwrap();
        assert!(text.contains("bloodbridge_sweep_runs_total"));
    }
}
