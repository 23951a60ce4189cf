//! CoordinatorBuilder for wiring collaborators into a Coordinator
//!
//! ## Table of Contents
//! - **CoordinatorBuilder**: Builder pattern for Coordinator construction

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::clock::{BoxedClock, SystemClock};
use crate::config::BridgeConfig;
use crate::coordinator::Coordinator;
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::geo::{BoxedGeocoder, NominatimGeocoder};
use crate::inventory::InventoryService;
use crate::matching::MatchingEngine;
use crate::metrics::BridgeMetrics;
use crate::notifier::{BoxedNotifier, Dispatcher, LogNotifier};
use crate::proposal::ProposalService;
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::shortage::ShortageAnalyzer;
use crate::storage::{BoxedStore, MemoryStore};

/// Builder for constructing Coordinator instances
pub struct CoordinatorBuilder {
    config: BridgeConfig,
    store: Option<BoxedStore>,
    notifier: Option<BoxedNotifier>,
    geocoder: Option<BoxedGeocoder>,
    clock: Option<BoxedClock>,
    metrics_enabled: bool,
}

impl CoordinatorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: BridgeConfig::default(),
            store: None,
            notifier: None,
            geocoder: None,
            clock: None,
            metrics_enabled: true,
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set a custom record store
    pub fn with_store(mut self, store: BoxedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the notifier
    pub fn with_notifier(mut self, notifier: BoxedNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Set the geocoder
    pub fn with_geocoder(mut self, geocoder: BoxedGeocoder) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    /// Set the clock
    pub fn with_clock(mut self, clock: BoxedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Enable or disable metrics
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics_enabled = enabled;
        self
    }

    /// Build the Coordinator
    pub fn build(self) -> Result<Coordinator> {
        self.config.validate()?;
        let config = self.config;

        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let notifier = self.notifier.unwrap_or_else(|| Arc::new(LogNotifier));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let geocoder: BoxedGeocoder = match self.geocoder {
            Some(g) => g,
            None => Arc::new(NominatimGeocoder::new(&config.geocoder)?),
        };

        let metrics = if self.metrics_enabled {
            Some(Arc::new(BridgeMetrics::new()?))
        } else {
            None
        };

        info!(store = store.name(), metrics = metrics.is_some(), "Building coordinator");

        let dispatcher = Dispatcher::new(
            notifier,
            Duration::from_millis(config.notifier.timeout_ms),
            metrics.clone(),
        );

        let shortage = Arc::new(ShortageAnalyzer::new(config.shortage.clone(), dispatcher.clone()));
        let inventory = Arc::new(InventoryService::new(
            store.clone(),
            clock.clone(),
            shortage.clone(),
            dispatcher.clone(),
            metrics.clone(),
        ));
        let matching = Arc::new(MatchingEngine::new(
            store.clone(),
            clock.clone(),
            dispatcher.clone(),
            config.matching.clone(),
            metrics.clone(),
        ));
        let proposals = Arc::new(ProposalService::new(
            store.clone(),
            clock.clone(),
            dispatcher,
            config.appointments.clone(),
            metrics.clone(),
        ));
        let registry = Registry::new(
            store.clone(),
            geocoder,
            clock.clone(),
            matching.clone(),
            config.geocoder.default_country.clone(),
        );
        let scheduler = Arc::new(Scheduler::new(
            inventory.clone(),
            matching.clone(),
            proposals.clone(),
            config.scheduler.clone(),
            metrics.clone(),
        ));

        let dashboard = Dashboard::new(store.clone());

        Ok(Coordinator::new(
            config, store, clock, shortage, inventory, matching, proposals, registry, dashboard, scheduler,
            metrics,
        ))
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
