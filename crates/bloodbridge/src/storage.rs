//! Record storage for Bloodbridge
//!
//! ## Table of Contents
//! - **RecordStore**: Trait for storage backends, including the conditional
//!   updates the matching and proposal flows depend on
//! - **MemoryStore**: In-memory store (default)

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{BridgeError, Result};
use crate::geo::GeoPoint;
use crate::inventory::Ledger;
use crate::model::{
    Appointment, AppointmentStatus, DemandStatus, DemandUnit, Donor, Hospital, Proposal,
    ProposalStatus,
};
use crate::types::{AppointmentId, DemandId, DonorId, HospitalId, LedgerId, ProposalId};

/// Trait for record storage backends
#[async_trait]
pub trait RecordStore: Send + Sync {
    // Hospitals

    /// Insert a hospital
    async fn insert_hospital(&self, hospital: Hospital) -> Result<()>;

    /// Get a hospital
    async fn get_hospital(&self, id: HospitalId) -> Result<Option<Hospital>>;

    // Donors

    /// Insert or replace a donor
    async fn put_donor(&self, donor: Donor) -> Result<()>;

    /// Get a donor
    async fn get_donor(&self, id: DonorId) -> Result<Option<Donor>>;

    /// Donors within `radius_km` of `center`, with their distance in km
    async fn donors_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<(Donor, f64)>>;

    /// Set `last_pinged_at = now` only if the donor is outside the cooldown.
    /// Returns whether the claim succeeded.
    async fn claim_donor_ping(&self, id: DonorId, now: DateTime<Utc>, cooldown: Duration) -> Result<bool>;

    /// Set `last_pinged_at = now` unconditionally
    async fn touch_donor_ping(&self, id: DonorId, now: DateTime<Utc>) -> Result<()>;

    // Demand

    /// Insert or replace a demand unit
    async fn put_demand(&self, demand: DemandUnit) -> Result<()>;

    /// Get a demand unit
    async fn get_demand(&self, id: DemandId) -> Result<Option<DemandUnit>>;

    /// Every PENDING demand unit
    async fn pending_demands(&self) -> Result<Vec<DemandUnit>>;

    /// Every demand unit raised by a hospital
    async fn demands_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<DemandUnit>>;

    /// Atomically count one confirmation; the demand becomes FULFILLED
    /// once confirmations reach the units needed
    async fn record_confirmation(&self, id: DemandId, now: DateTime<Utc>) -> Result<Option<DemandUnit>>;

    // Ledgers

    /// Insert a new ledger; fails with `Conflict` if the hospital already has one
    async fn insert_ledger(&self, ledger: Ledger) -> Result<()>;

    /// Get a ledger
    async fn get_ledger(&self, id: LedgerId) -> Result<Option<Ledger>>;

    /// Replace an existing ledger
    async fn put_ledger(&self, ledger: Ledger) -> Result<()>;

    /// Every ledger id
    async fn ledger_ids(&self) -> Result<Vec<LedgerId>>;

    /// Ledger owned by a hospital
    async fn ledger_for_hospital(&self, hospital_id: HospitalId) -> Result<Option<LedgerId>>;

    // Proposals

    /// Insert a proposal; tokens must be unique
    async fn insert_proposal(&self, proposal: Proposal) -> Result<()>;

    /// Get a proposal
    async fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>>;

    /// Every proposal made for a demand
    async fn proposals_for_demand(&self, demand_id: DemandId) -> Result<Vec<Proposal>>;

    /// Every proposal naming a hospital, SOS proposals included
    async fn proposals_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<Proposal>>;

    /// Compare-and-swap keyed by token: moves the proposal from `from` to
    /// `to` only if it is in `from` and not past its expiry at `now`.
    /// Returns the updated proposal, or `None` if the swap did not happen.
    async fn transition_proposal(
        &self,
        token: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Proposal>>;

    /// Move every PROPOSED proposal past its expiry to EXPIRED
    async fn expire_proposals(&self, now: DateTime<Utc>) -> Result<Vec<ProposalId>>;

    // Appointments

    /// Insert an appointment
    async fn insert_appointment(&self, appointment: Appointment) -> Result<()>;

    /// Get an appointment
    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>>;

    /// Every appointment booked at a hospital
    async fn appointments_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<Appointment>>;

    /// Set an appointment's status
    async fn set_appointment_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>>;

    /// Store name for logging
    fn name(&self) -> &str;
}

/// Shared store handle
pub type BoxedStore = Arc<dyn RecordStore>;

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    hospitals: DashMap<HospitalId, Hospital>,
    donors: DashMap<DonorId, Donor>,
    demands: DashMap<DemandId, DemandUnit>,
    ledgers: DashMap<LedgerId, Ledger>,
    hospital_ledgers: DashMap<HospitalId, LedgerId>,
    proposals: DashMap<ProposalId, Proposal>,
    tokens: DashMap<String, ProposalId>,
    appointments: DashMap<AppointmentId, Appointment>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_hospital(&self, hospital: Hospital) -> Result<()> {
        match self.hospitals.entry(hospital.id) {
            Entry::Occupied(_) => Err(BridgeError::conflict(format!("hospital {} already exists", hospital.id))),
            Entry::Vacant(slot) => {
                slot.insert(hospital);
                Ok(())
            }
        }
    }

    async fn get_hospital(&self, id: HospitalId) -> Result<Option<Hospital>> {
        Ok(self.hospitals.get(&id).map(|h| h.clone()))
    }

    async fn put_donor(&self, donor: Donor) -> Result<()> {
        self.donors.insert(donor.id, donor);
        Ok(())
    }

    async fn get_donor(&self, id: DonorId) -> Result<Option<Donor>> {
        Ok(self.donors.get(&id).map(|d| d.clone()))
    }

    async fn donors_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<(Donor, f64)>> {
        let found: Vec<(Donor, f64)> = self
            .donors
            .iter()
            .filter_map(|entry| {
                let distance = center.distance_km(&entry.location);
                (distance <= radius_km).then(|| (entry.value().clone(), distance))
            })
            .collect();
        debug!(radius_km, found = found.len(), "Spatial donor query");
        Ok(found)
    }

    async fn claim_donor_ping(&self, id: DonorId, now: DateTime<Utc>, cooldown: Duration) -> Result<bool> {
        let mut donor = self
            .donors
            .get_mut(&id)
            .ok_or_else(|| BridgeError::not_found("donor", id))?;
        if !donor.is_pingable(now, cooldown) {
            return Ok(false);
        }
        donor.last_pinged_at = Some(now);
        Ok(true)
    }

    async fn touch_donor_ping(&self, id: DonorId, now: DateTime<Utc>) -> Result<()> {
        let mut donor = self
            .donors
            .get_mut(&id)
            .ok_or_else(|| BridgeError::not_found("donor", id))?;
        donor.last_pinged_at = Some(now);
        Ok(())
    }

    async fn put_demand(&self, demand: DemandUnit) -> Result<()> {
        self.demands.insert(demand.id, demand);
        Ok(())
    }

    async fn get_demand(&self, id: DemandId) -> Result<Option<DemandUnit>> {
        Ok(self.demands.get(&id).map(|d| d.clone()))
    }

    async fn pending_demands(&self) -> Result<Vec<DemandUnit>> {
        let mut pending: Vec<DemandUnit> = self
            .demands
            .iter()
            .filter(|d| d.status == DemandStatus::Pending)
            .map(|d| d.clone())
            .collect();
        pending.sort_by_key(|d| d.created_at);
        Ok(pending)
    }

    async fn demands_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<DemandUnit>> {
        Ok(self
            .demands
            .iter()
            .filter(|d| d.hospital_id == hospital_id)
            .map(|d| d.clone())
            .collect())
    }

    async fn record_confirmation(&self, id: DemandId, now: DateTime<Utc>) -> Result<Option<DemandUnit>> {
        let Some(mut demand) = self.demands.get_mut(&id) else {
            return Ok(None);
        };
        demand.confirmed_count += 1;
        if demand.status == DemandStatus::Pending && demand.confirmed_count >= demand.units_needed {
            demand.status = DemandStatus::Fulfilled;
            demand.fulfilled_at = Some(now);
        }
        Ok(Some(demand.clone()))
    }

    async fn insert_ledger(&self, ledger: Ledger) -> Result<()> {
        match self.hospital_ledgers.entry(ledger.hospital_id) {
            Entry::Occupied(_) => Err(BridgeError::conflict(format!(
                "hospital {} already has a ledger",
                ledger.hospital_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(ledger.id);
                self.ledgers.insert(ledger.id, ledger);
                Ok(())
            }
        }
    }

    async fn get_ledger(&self, id: LedgerId) -> Result<Option<Ledger>> {
        Ok(self.ledgers.get(&id).map(|l| l.clone()))
    }

    async fn put_ledger(&self, ledger: Ledger) -> Result<()> {
        match self.ledgers.get_mut(&ledger.id) {
            Some(mut slot) => {
                *slot = ledger;
                Ok(())
            }
            None => Err(BridgeError::not_found("ledger", ledger.id)),
        }
    }

    async fn ledger_ids(&self) -> Result<Vec<LedgerId>> {
        Ok(self.ledgers.iter().map(|l| *l.key()).collect())
    }

    async fn ledger_for_hospital(&self, hospital_id: HospitalId) -> Result<Option<LedgerId>> {
        Ok(self.hospital_ledgers.get(&hospital_id).map(|id| *id))
    }

    async fn insert_proposal(&self, proposal: Proposal) -> Result<()> {
        match self.tokens.entry(proposal.token.clone()) {
            Entry::Occupied(_) => Err(BridgeError::conflict("duplicate proposal token")),
            Entry::Vacant(slot) => {
                slot.insert(proposal.id);
                self.proposals.insert(proposal.id, proposal);
                Ok(())
            }
        }
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        Ok(self.proposals.get(&id).map(|p| p.clone()))
    }

    async fn proposals_for_demand(&self, demand_id: DemandId) -> Result<Vec<Proposal>> {
        Ok(self
            .proposals
            .iter()
            .filter(|p| p.demand_id == Some(demand_id))
            .map(|p| p.clone())
            .collect())
    }

    async fn proposals_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<Proposal>> {
        Ok(self
            .proposals
            .iter()
            .filter(|p| p.hospital_id == hospital_id)
            .map(|p| p.clone())
            .collect())
    }

    async fn transition_proposal(
        &self,
        token: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Proposal>> {
        let Some(id) = self.tokens.get(token).map(|id| *id) else {
            return Ok(None);
        };
        let Some(mut proposal) = self.proposals.get_mut(&id) else {
            return Ok(None);
        };
        if proposal.status != from || now > proposal.expires_at {
            return Ok(None);
        }
        proposal.status = to;
        proposal.resolved_at = Some(now);
        Ok(Some(proposal.clone()))
    }

    async fn expire_proposals(&self, now: DateTime<Utc>) -> Result<Vec<ProposalId>> {
        let mut expired = Vec::new();
        for mut proposal in self.proposals.iter_mut() {
            if proposal.status == ProposalStatus::Proposed && now > proposal.expires_at {
                proposal.status = ProposalStatus::Expired;
                proposal.resolved_at = Some(now);
                expired.push(proposal.id);
            }
        }
        Ok(expired)
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<()> {
        self.appointments.insert(appointment.id, appointment);
        Ok(())
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        Ok(self.appointments.get(&id).map(|a| a.clone()))
    }

    async fn appointments_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<Appointment>> {
        Ok(self
            .appointments
            .iter()
            .filter(|a| a.hospital_id == hospital_id)
            .map(|a| a.clone())
            .collect())
    }

    async fn set_appointment_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>> {
        Ok(self.appointments.get_mut(&id).map(|mut a| {
            a.status = status;
            a.clone()
        }))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Store double for failure-isolation tests: wraps a [`MemoryStore`] and
/// fails reads of selected ledgers.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct FaultyStore {
    inner: MemoryStore,
    broken_ledgers: parking_lot::Mutex<std::collections::HashSet<LedgerId>>,
}

#[cfg(test)]
impl FaultyStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn break_ledger(&self, id: LedgerId) {
        self.broken_ledgers.lock().insert(id);
    }
}

#[cfg(test)]
#[async_trait]
impl RecordStore for FaultyStore {
    async fn insert_hospital(&self, hospital: Hospital) -> Result<()> {
        self.inner.insert_hospital(hospital).await
    }

    async fn get_hospital(&self, id: HospitalId) -> Result<Option<Hospital>> {
        self.inner.get_hospital(id).await
    }

    async fn put_donor(&self, donor: Donor) -> Result<()> {
        self.inner.put_donor(donor).await
    }

    async fn get_donor(&self, id: DonorId) -> Result<Option<Donor>> {
        self.inner.get_donor(id).await
    }

    async fn donors_within(&self, center: GeoPoint, radius_km: f64) -> Result<Vec<(Donor, f64)>> {
        self.inner.donors_within(center, radius_km).await
    }

    async fn claim_donor_ping(&self, id: DonorId, now: DateTime<Utc>, cooldown: Duration) -> Result<bool> {
        self.inner.claim_donor_ping(id, now, cooldown).await
    }

    async fn touch_donor_ping(&self, id: DonorId, now: DateTime<Utc>) -> Result<()> {
        self.inner.touch_donor_ping(id, now).await
    }

    async fn put_demand(&self, demand: DemandUnit) -> Result<()> {
        self.inner.put_demand(demand).await
    }

    async fn get_demand(&self, id: DemandId) -> Result<Option<DemandUnit>> {
        self.inner.get_demand(id).await
    }

    async fn pending_demands(&self) -> Result<Vec<DemandUnit>> {
        self.inner.pending_demands().await
    }

    async fn demands_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<DemandUnit>> {
        self.inner.demands_for_hospital(hospital_id).await
    }

    async fn record_confirmation(&self, id: DemandId, now: DateTime<Utc>) -> Result<Option<DemandUnit>> {
        self.inner.record_confirmation(id, now).await
    }

    async fn insert_ledger(&self, ledger: Ledger) -> Result<()> {
        self.inner.insert_ledger(ledger).await
    }

    async fn get_ledger(&self, id: LedgerId) -> Result<Option<Ledger>> {
        if self.broken_ledgers.lock().contains(&id) {
            return Err(BridgeError::store(format!("ledger {} unreadable", id)));
        }
        self.inner.get_ledger(id).await
    }

    async fn put_ledger(&self, ledger: Ledger) -> Result<()> {
        self.inner.put_ledger(ledger).await
    }

    async fn ledger_ids(&self) -> Result<Vec<LedgerId>> {
        self.inner.ledger_ids().await
    }

    async fn ledger_for_hospital(&self, hospital_id: HospitalId) -> Result<Option<LedgerId>> {
        self.inner.ledger_for_hospital(hospital_id).await
    }

    async fn insert_proposal(&self, proposal: Proposal) -> Result<()> {
        self.inner.insert_proposal(proposal).await
    }

    async fn get_proposal(&self, id: ProposalId) -> Result<Option<Proposal>> {
        self.inner.get_proposal(id).await
    }

    async fn proposals_for_demand(&self, demand_id: DemandId) -> Result<Vec<Proposal>> {
        self.inner.proposals_for_demand(demand_id).await
    }

    async fn proposals_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<Proposal>> {
        self.inner.proposals_for_hospital(hospital_id).await
    }

    async fn transition_proposal(
        &self,
        token: &str,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Proposal>> {
        self.inner.transition_proposal(token, from, to, now).await
    }

    async fn expire_proposals(&self, now: DateTime<Utc>) -> Result<Vec<ProposalId>> {
        self.inner.expire_proposals(now).await
    }

    async fn insert_appointment(&self, appointment: Appointment) -> Result<()> {
        self.inner.insert_appointment(appointment).await
    }

    async fn get_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>> {
        self.inner.get_appointment(id).await
    }

    async fn appointments_for_hospital(&self, hospital_id: HospitalId) -> Result<Vec<Appointment>> {
        self.inner.appointments_for_hospital(hospital_id).await
    }

    async fn set_appointment_status(
        &self,
        id: AppointmentId,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>> {
        self.inner.set_appointment_status(id, status).await
    }

    fn name(&self) -> &str {
        "faulty"
    }
}
