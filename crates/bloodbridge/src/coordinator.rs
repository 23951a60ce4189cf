//! Coordinator runtime
//!
//! ## Table of Contents
//! - **RuntimeState**: Lifecycle of the periodic scheduler
//! - **Coordinator**: Composition root exposing every upward operation

use chrono::NaiveDate;
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::BoxedClock;
use crate::config::BridgeConfig;
use crate::dashboard::{CreatedRange, Dashboard, HospitalOverview, MatchFunnel};
use crate::error::Result;
use crate::inventory::{
    DiscardReason, ExpiringReport, ExpirySweep, InventoryService, InventorySummary, ItemDraft, Ledger,
    StockSnapshot, UsagePoint,
};
use crate::matching::{MatchingEngine, NearbyDonor, NearbyFilter, RecheckReport, SosRequest};
use crate::metrics::BridgeMetrics;
use crate::model::{Appointment, Availability, Donor, Hospital, Proposal};
use crate::proposal::{Confirmation, ProposalService};
use crate::registry::{DemandIntake, DonorRegistration, HospitalRegistration, Registry};
use crate::scheduler::Scheduler;
use crate::shortage::{ShortageAnalyzer, ShortageReport};
use crate::storage::BoxedStore;
use crate::types::{AppointmentId, BloodType, DemandId, DonorId, HospitalId, ItemId, LedgerId, ProposalId};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    /// Periodic tasks not running
    Stopped,
    /// Periodic tasks running
    Running,
    /// Stopping periodic tasks
    ShuttingDown,
}

/// Main Bloodbridge runtime (use CoordinatorBuilder to create one)
pub struct Coordinator {
    config: BridgeConfig,
    state: Arc<RwLock<RuntimeState>>,

    store: BoxedStore,
    clock: BoxedClock,
    shortage: Arc<ShortageAnalyzer>,
    inventory: Arc<InventoryService>,
    matching: Arc<MatchingEngine>,
    proposals: Arc<ProposalService>,
    registry: Registry,
    dashboard: Dashboard,
    scheduler: Arc<Scheduler>,
    metrics: Option<Arc<BridgeMetrics>>,

    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: BridgeConfig,
        store: BoxedStore,
        clock: BoxedClock,
        shortage: Arc<ShortageAnalyzer>,
        inventory: Arc<InventoryService>,
        matching: Arc<MatchingEngine>,
        proposals: Arc<ProposalService>,
        registry: Registry,
        dashboard: Dashboard,
        scheduler: Arc<Scheduler>,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: Arc::new(RwLock::new(RuntimeState::Stopped)),
            store,
            clock,
            shortage,
            inventory,
            matching,
            proposals,
            registry,
            dashboard,
            scheduler,
            metrics,
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Active configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current runtime state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Get metrics instance
    pub fn metrics(&self) -> Option<&Arc<BridgeMetrics>> {
        self.metrics.as_ref()
    }

    /// Get the record store
    pub fn store(&self) -> &BoxedStore {
        &self.store
    }

    /// Get the scheduler
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Number of scheduler tasks currently held
    pub fn scheduler_handles(&self) -> usize {
        self.tasks.lock().len()
    }

    // Lifecycle

    /// Start the periodic tasks. Calling it while they run is a no-op.
    pub fn spawn_scheduler(&self) {
        let mut tasks = self.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        tasks.extend(self.scheduler.spawn(&self.shutdown_tx));
        if let Ok(mut state) = self.state.try_write() {
            *state = RuntimeState::Running;
        }
        info!(tasks = tasks.len(), "Scheduler started");
    }

    /// Start the periodic tasks and wait for a shutdown signal
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        self.spawn_scheduler();
        info!("Bloodbridge coordinator running");

        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received");
        self.shutdown().await
    }

    /// Stop the periodic tasks and wait for them to finish
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state == RuntimeState::Stopped && self.scheduler_handles() == 0 {
                return Ok(());
            }
            *state = RuntimeState::ShuttingDown;
        }

        info!("Shutting down coordinator");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
        }

        *self.state.write().await = RuntimeState::Stopped;
        info!("Coordinator stopped");
        Ok(())
    }

    /// Signal shutdown without waiting
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    // Registry

    /// Register a hospital
    pub async fn register_hospital(&self, registration: HospitalRegistration) -> Result<Hospital> {
        self.registry.register_hospital(registration).await
    }

    /// Register a donor
    pub async fn register_donor(&self, registration: DonorRegistration) -> Result<Donor> {
        self.registry.register_donor(registration).await
    }

    /// Set a donor's availability
    pub async fn set_availability(&self, donor_id: DonorId, availability: Availability) -> Result<Donor> {
        self.registry.set_availability(donor_id, availability).await
    }

    /// Set a donor's verification flag
    pub async fn set_verified(&self, donor_id: DonorId, verified: bool) -> Result<Donor> {
        self.registry.set_verified(donor_id, verified).await
    }

    /// Record a demand and propose donors for it
    pub async fn create_demand_unit(
        &self,
        hospital_id: HospitalId,
        patient: &str,
        blood_type: BloodType,
        units_needed: u32,
    ) -> Result<DemandIntake> {
        self.registry
            .create_demand_unit(hospital_id, patient, blood_type, units_needed)
            .await
    }

    // Matching and proposals

    /// Available donors around a hospital
    pub async fn list_nearby_donors(&self, hospital_id: HospitalId, filter: NearbyFilter) -> Result<Vec<NearbyDonor>> {
        self.matching.list_nearby_donors(hospital_id, filter).await
    }

    /// Emergency proposals
    pub async fn create_sos_proposals(&self, request: SosRequest) -> Result<Vec<Proposal>> {
        self.matching.create_sos_proposals(request).await
    }

    /// Run the unmet-demand recheck now
    pub async fn recheck_unfulfilled(&self) -> Result<RecheckReport> {
        self.matching.recheck_unfulfilled().await
    }

    /// Confirm a proposal by token
    pub async fn confirm_proposal(&self, token: &str) -> Result<Confirmation> {
        self.proposals.confirm(token).await
    }

    /// Set an appointment's status from its wire label
    pub async fn update_appointment_status(&self, id: AppointmentId, status: &str) -> Result<Appointment> {
        self.proposals.update_appointment_status(id, status).await
    }

    /// Expire lapsed proposals now
    pub async fn expire_stale_proposals(&self) -> Result<Vec<ProposalId>> {
        self.proposals.expire_stale().await
    }

    /// Proposals made for a demand
    pub async fn proposals_for_demand(&self, demand_id: DemandId) -> Result<Vec<Proposal>> {
        self.store.proposals_for_demand(demand_id).await
    }

    // Inventory

    /// Create a hospital's ledger
    pub async fn create_ledger(&self, hospital_id: HospitalId) -> Result<Ledger> {
        self.inventory.create_ledger(hospital_id).await
    }

    /// Get a ledger
    pub async fn ledger(&self, id: LedgerId) -> Result<Ledger> {
        self.inventory.ledger(id).await
    }

    /// Get a hospital's ledger
    pub async fn ledger_for_hospital(&self, hospital_id: HospitalId) -> Result<Ledger> {
        self.inventory.ledger_for_hospital(hospital_id).await
    }

    /// Add a batch of items
    pub async fn add_items(&self, ledger_id: LedgerId, drafts: Vec<ItemDraft>) -> Result<Ledger> {
        self.inventory.add_items(ledger_id, drafts).await
    }

    /// Consume units from an item
    pub async fn consume_item(
        &self,
        ledger_id: LedgerId,
        item_id: ItemId,
        quantity: u32,
        demand_id: Option<DemandId>,
    ) -> Result<Ledger> {
        self.inventory.consume(ledger_id, item_id, quantity, demand_id).await
    }

    /// Discard an item
    pub async fn discard_item(&self, ledger_id: LedgerId, item_id: ItemId, reason: DiscardReason) -> Result<Ledger> {
        self.inventory.discard(ledger_id, item_id, reason).await
    }

    /// Stock snapshot, recomputed from items
    pub async fn get_stock_snapshot(&self, ledger_id: LedgerId) -> Result<StockSnapshot> {
        self.inventory.snapshot(ledger_id).await
    }

    /// Dashboard summary
    pub async fn inventory_summary(&self, ledger_id: LedgerId) -> Result<InventorySummary> {
        self.inventory.summary(ledger_id).await
    }

    /// Items expiring within `days`
    pub async fn expiring_items(&self, ledger_id: LedgerId, days: u32) -> Result<ExpiringReport> {
        self.inventory.expiring(ledger_id, days).await
    }

    /// Daily consumption series
    pub async fn usage_series(
        &self,
        ledger_id: LedgerId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<UsagePoint>> {
        self.inventory.usage_series(ledger_id, from, to).await
    }

    /// Run the expiry sweep now
    pub async fn sweep_expired(&self) -> Result<ExpirySweep> {
        self.inventory.sweep_expired().await
    }

    // Dashboard

    /// Pending demand against blood on hand
    pub async fn hospital_overview(&self, hospital_id: HospitalId) -> Result<HospitalOverview> {
        self.dashboard.hospital_overview(hospital_id).await
    }

    /// Proposal and appointment counts by status
    pub async fn match_funnel(&self, hospital_id: HospitalId, range: CreatedRange) -> Result<MatchFunnel> {
        self.dashboard.match_funnel(hospital_id, range).await
    }

    /// Evaluate both shortage checks for one ledger now
    pub async fn evaluate_shortages(&self, ledger_id: LedgerId) -> Result<ShortageReport> {
        let ledger = self.inventory.ledger(ledger_id).await?;
        Ok(self.shortage.evaluate(&ledger, self.clock.now()).await)
    }
}
