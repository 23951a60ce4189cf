//! Hospital dashboard read models
//!
//! ## Table of Contents
//! - **HospitalOverview**: Pending demand against blood on hand
//! - **MatchFunnel**: Proposal and appointment counts by status
//! - **Dashboard**: Builds both from the record store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::inventory::Ledger;
use crate::model::{Appointment, DemandStatus, DemandUnit, Proposal, ProposalStatus};
use crate::storage::BoxedStore;
use crate::types::{HospitalId, Supply};

/// Pending demand against blood on hand
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalOverview {
    /// Units requested by PENDING demands
    pub pending_units: u64,
    /// AVAILABLE blood units in the hospital's ledger
    pub available_units: u64,
    /// `pending / max(available, 1)`, 2 decimals
    pub urgency_ratio: f64,
    /// PROPOSED proposals for the hospital's demands
    pub pending_matches: u64,
}

/// Inclusive `created_at` bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedRange {
    /// Lower bound
    pub from: Option<DateTime<Utc>>,
    /// Upper bound
    pub to: Option<DateTime<Utc>>,
}

impl CreatedRange {
    /// Whether `at` falls inside the range
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

/// Proposal and appointment counts keyed by status label
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchFunnel {
    /// Proposals per status, e.g. `"CONFIRMED"`
    pub proposals: BTreeMap<String, u64>,
    /// Appointments per status, e.g. `"COMPLETED"`
    pub appointments: BTreeMap<String, u64>,
}

impl MatchFunnel {
    /// Proposals in a status
    pub fn proposals_in(&self, status: ProposalStatus) -> u64 {
        self.proposals.get(&status.to_string()).copied().unwrap_or(0)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn available_blood(ledger: &Ledger) -> u64 {
    ledger
        .items
        .iter()
        .filter(|item| item.is_available() && matches!(item.supply, Supply::Blood(_)))
        .map(|item| u64::from(item.quantity))
        .sum()
}

/// Proposals attached to one of `demands`; SOS proposals without a demand are left out
fn for_demands<'a>(proposals: &'a [Proposal], demands: &[DemandUnit]) -> impl Iterator<Item = &'a Proposal> {
    let ids: HashSet<_> = demands.iter().map(|d| d.id).collect();
    proposals
        .iter()
        .filter(move |p| p.demand_id.is_some_and(|id| ids.contains(&id)))
}

/// Build the overview
pub fn overview(demands: &[DemandUnit], ledger: Option<&Ledger>, proposals: &[Proposal]) -> HospitalOverview {
    let pending_units: u64 = demands
        .iter()
        .filter(|d| d.status == DemandStatus::Pending)
        .map(|d| u64::from(d.units_needed))
        .sum();
    let available_units = ledger.map_or(0, available_blood);
    let pending_matches = for_demands(proposals, demands)
        .filter(|p| p.status == ProposalStatus::Proposed)
        .count() as u64;

    HospitalOverview {
        pending_units,
        available_units,
        urgency_ratio: round2(pending_units as f64 / available_units.max(1) as f64),
        pending_matches,
    }
}

/// Build the funnel over records created inside `range`
pub fn funnel(
    demands: &[DemandUnit],
    proposals: &[Proposal],
    appointments: &[Appointment],
    range: CreatedRange,
) -> MatchFunnel {
    let mut out = MatchFunnel::default();
    for proposal in for_demands(proposals, demands).filter(|p| range.contains(p.created_at)) {
        *out.proposals.entry(proposal.status.to_string()).or_insert(0) += 1;
    }
    for appointment in appointments.iter().filter(|a| range.contains(a.created_at)) {
        *out.appointments.entry(appointment.status.to_string()).or_insert(0) += 1;
    }
    out
}

/// Builds dashboard read models from the store
pub struct Dashboard {
    store: BoxedStore,
}

impl Dashboard {
    /// Create the dashboard
    pub fn new(store: BoxedStore) -> Self {
        Self { store }
    }

    async fn demands(&self, hospital_id: HospitalId) -> Result<Vec<DemandUnit>> {
        if self.store.get_hospital(hospital_id).await?.is_none() {
            return Err(BridgeError::not_found("hospital", hospital_id));
        }
        self.store.demands_for_hospital(hospital_id).await
    }

    /// Pending demand against blood on hand
    pub async fn hospital_overview(&self, hospital_id: HospitalId) -> Result<HospitalOverview> {
        let demands = self.demands(hospital_id).await?;
        let ledger = match self.store.ledger_for_hospital(hospital_id).await? {
            Some(id) => self.store.get_ledger(id).await?,
            None => None,
        };
        let proposals = self.store.proposals_for_hospital(hospital_id).await?;

        let overview = overview(&demands, ledger.as_ref(), &proposals);
        debug!(
            hospital_id = %hospital_id,
            pending_units = overview.pending_units,
            available_units = overview.available_units,
            "Hospital overview built"
        );
        Ok(overview)
    }

    /// Proposal and appointment counts by status
    pub async fn match_funnel(&self, hospital_id: HospitalId, range: CreatedRange) -> Result<MatchFunnel> {
        let demands = self.demands(hospital_id).await?;
        let proposals = self.store.proposals_for_hospital(hospital_id).await?;
        let appointments = self.store.appointments_for_hospital(hospital_id).await?;
        Ok(funnel(&demands, &proposals, &appointments, range))
    }
}
