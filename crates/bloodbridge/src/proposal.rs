//! Proposal lifecycle: confirmation, appointments and expiry

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::BoxedClock;
use crate::config::AppointmentConfig;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use crate::model::{Appointment, AppointmentStatus, DemandStatus, Proposal, ProposalStatus};
use crate::notifier::{AppointmentEvent, Dispatcher, Event};
use crate::storage::BoxedStore;
use crate::types::{AppointmentId, ProposalId};

/// Result of a successful confirmation
#[derive(Debug, Clone)]
pub struct Confirmation {
    /// The proposal, now CONFIRMED
    pub proposal: Proposal,
    /// Appointment booked for the donor
    pub appointment: Appointment,
}

/// Drives proposals from PROPOSED to a terminal state
pub struct ProposalService {
    store: BoxedStore,
    clock: BoxedClock,
    dispatcher: Dispatcher,
    config: AppointmentConfig,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl ProposalService {
    /// Create the service
    pub fn new(
        store: BoxedStore,
        clock: BoxedClock,
        dispatcher: Dispatcher,
        config: AppointmentConfig,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            store,
            clock,
            dispatcher,
            config,
            metrics,
        }
    }

    fn appointment_slot(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        Duration::try_days(self.config.offset_days)
            .and_then(|offset| now.checked_add_signed(offset))
            .ok_or_else(|| BridgeError::config("appointments.offset_days out of range"))?
            .date_naive()
            .and_hms_opt(self.config.hour_utc, 0, 0)
            .map(|slot| slot.and_utc())
            .ok_or_else(|| BridgeError::config("appointments.hour_utc out of range"))
    }

    /// Confirm a proposal by its token.
    ///
    /// The PROPOSED → CONFIRMED swap is atomic in the store, so of several
    /// concurrent calls with the same token exactly one succeeds. The rest,
    /// and any call on an unknown or lapsed token, get
    /// [`BridgeError::InvalidOrExpiredToken`].
    pub async fn confirm(&self, token: &str) -> Result<Confirmation> {
        let now = self.clock.now();
        let proposal = self
            .store
            .transition_proposal(token, ProposalStatus::Proposed, ProposalStatus::Confirmed, now)
            .await?
            .ok_or(BridgeError::InvalidOrExpiredToken)?;

        let appointment = Appointment {
            id: AppointmentId::new(),
            proposal_id: proposal.id,
            donor_id: proposal.donor_id,
            hospital_id: proposal.hospital_id,
            scheduled_at: self.appointment_slot(now)?,
            status: AppointmentStatus::Scheduled,
            created_at: now,
        };
        self.store.insert_appointment(appointment.clone()).await?;

        if let Some(demand_id) = proposal.demand_id {
            match self.store.record_confirmation(demand_id, now).await? {
                Some(demand) if demand.status == DemandStatus::Fulfilled => {
                    info!(demand_id = %demand_id, confirmed = demand.confirmed_count, "Demand fulfilled");
                }
                Some(demand) => {
                    debug!(demand_id = %demand_id, deficit = demand.deficit(), "Demand confirmation recorded");
                }
                None => {
                    debug!(demand_id = %demand_id, "Confirmed proposal references a missing demand");
                }
            }
        }

        info!(
            proposal_id = %proposal.id,
            donor_id = %proposal.donor_id,
            appointment_id = %appointment.id,
            scheduled_at = %appointment.scheduled_at,
            "Proposal confirmed"
        );
        if let Some(metrics) = &self.metrics {
            metrics.proposals_confirmed.inc();
        }

        self.dispatcher
            .dispatch(Event::AppointmentScheduled(AppointmentEvent {
                appointment_id: appointment.id,
                donor_id: appointment.donor_id,
                hospital_id: appointment.hospital_id,
                scheduled_at: appointment.scheduled_at,
            }))
            .await;

        Ok(Confirmation { proposal, appointment })
    }

    /// Set an appointment's status from its wire label
    pub async fn update_appointment_status(&self, id: AppointmentId, status: &str) -> Result<Appointment> {
        let status: AppointmentStatus = status.parse()?;
        self.set_appointment_status(id, status).await
    }

    /// Set an appointment's status. COMPLETED records the donation on the
    /// donor, restarting the rest period.
    pub async fn set_appointment_status(&self, id: AppointmentId, status: AppointmentStatus) -> Result<Appointment> {
        let appointment = self
            .store
            .set_appointment_status(id, status)
            .await?
            .ok_or_else(|| BridgeError::not_found("appointment", id))?;

        if status == AppointmentStatus::Completed {
            let now = self.clock.now();
            if let Some(mut donor) = self.store.get_donor(appointment.donor_id).await? {
                donor.last_donation_at = Some(now);
                self.store.put_donor(donor).await?;
            }
        }

        info!(appointment_id = %id, status = ?status, "Appointment updated");
        Ok(appointment)
    }

    /// Move every lapsed PROPOSED proposal to EXPIRED
    pub async fn expire_stale(&self) -> Result<Vec<ProposalId>> {
        let expired = self.store.expire_proposals(self.clock.now()).await?;
        if !expired.is_empty() {
            info!(count = expired.len(), "Proposals expired");
            if let Some(metrics) = &self.metrics {
                metrics.proposals_expired.inc_by(expired.len() as f64);
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::error::ErrorKind;
    use crate::geo::GeoPoint;
    use crate::model::{Availability, DemandUnit, Donor};
    use crate::notifier::{Channel, MemoryNotifier};
    use crate::storage::{MemoryStore, RecordStore};
    use crate::types::{BloodType, DemandId, DonorId, HospitalId};
    use chrono::{TimeZone, Timelike};
    use std::collections::BTreeSet;

    struct Fixture {
        service: Arc<ProposalService>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        notifier: Arc<MemoryNotifier>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 10, 15, 30, 0).unwrap()));
        let notifier = Arc::new(MemoryNotifier::new());
        let dispatcher = Dispatcher::new(notifier.clone(), std::time::Duration::from_secs(1), None);
        let service = Arc::new(ProposalService::new(
            store.clone(),
            clock.clone(),
            dispatcher,
            AppointmentConfig::default(),
            None,
        ));
        Fixture {
            service,
            store,
            clock,
            notifier,
        }
    }

    async fn seed(f: &Fixture, units: u32) -> (DemandUnit, Donor) {
        let now = f.clock.now();
        let hospital_id = HospitalId::new();
        let donor = Donor {
            id: DonorId::new(),
            name: "Asha".into(),
            contact: "555-0101".into(),
            blood_type: BloodType::ONeg,
            organ_donation: BTreeSet::new(),
            location: GeoPoint::new(0.0, 0.0).unwrap(),
            verified: true,
            availability: Availability::Available,
            last_donation_at: None,
            last_pinged_at: None,
            created_at: now,
        };
        f.store.put_donor(donor.clone()).await.unwrap();
        let demand = DemandUnit {
            id: DemandId::new(),
            hospital_id,
            patient: "bed 4".into(),
            blood_type: BloodType::APos,
            units_needed: units,
            status: DemandStatus::Pending,
            confirmed_count: 0,
            created_at: now,
            fulfilled_at: None,
        };
        f.store.put_demand(demand.clone()).await.unwrap();
        (demand, donor)
    }

    async fn propose(f: &Fixture, demand: &DemandUnit, donor: &Donor, token: &str) -> Proposal {
        let now = f.clock.now();
        let proposal = Proposal {
            id: ProposalId::new(),
            demand_id: Some(demand.id),
            hospital_id: demand.hospital_id,
            donor_id: donor.id,
            status: ProposalStatus::Proposed,
            token: token.into(),
            created_at: now,
            expires_at: now + Duration::hours(24),
            resolved_at: None,
        };
        f.store.insert_proposal(proposal.clone()).await.unwrap();
        proposal
    }

    #[tokio::test]
    async fn test_confirm_books_next_day_slot_and_fulfils() {
        let f = fixture();
        let (demand, donor) = seed(&f, 1).await;
        propose(&f, &demand, &donor, "tok-1").await;

        let confirmation = f.service.confirm("tok-1").await.unwrap();
        assert_eq!(confirmation.proposal.status, ProposalStatus::Confirmed);

        let slot = confirmation.appointment.scheduled_at;
        assert_eq!(slot.date_naive(), (f.clock.now() + Duration::days(1)).date_naive());
        assert_eq!(slot.hour(), 10);
        assert_eq!(slot.minute(), 0);

        let demand = f.store.get_demand(demand.id).await.unwrap().unwrap();
        assert_eq!(demand.confirmed_count, 1);
        assert_eq!(demand.status, DemandStatus::Fulfilled);
        assert_eq!(f.notifier.on_channel(Channel::Donor).len(), 1);
    }

    #[tokio::test]
    async fn test_second_confirm_fails() {
        let f = fixture();
        let (demand, donor) = seed(&f, 2).await;
        propose(&f, &demand, &donor, "tok-2").await;

        f.service.confirm("tok-2").await.unwrap();
        let err = f.service.confirm("tok-2").await.unwrap_err();
        assert!(matches!(err, BridgeError::InvalidOrExpiredToken));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_concurrent_confirm_succeeds_once() {
        let f = fixture();
        let (demand, donor) = seed(&f, 5).await;
        propose(&f, &demand, &donor, "tok-race").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let service = f.service.clone();
            handles.push(tokio::spawn(async move { service.confirm("tok-race").await.is_ok() }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        let demand = f.store.get_demand(demand.id).await.unwrap().unwrap();
        assert_eq!(demand.confirmed_count, 1);
    }

    #[tokio::test]
    async fn test_expired_token_rejected_and_swept() {
        let f = fixture();
        let (demand, donor) = seed(&f, 1).await;
        let proposal = propose(&f, &demand, &donor, "tok-old").await;

        f.clock.advance(Duration::hours(25));
        assert!(matches!(
            f.service.confirm("tok-old").await,
            Err(BridgeError::InvalidOrExpiredToken)
        ));

        let expired = f.service.expire_stale().await.unwrap();
        assert_eq!(expired, vec![proposal.id]);
        let stored = f.store.get_proposal(proposal.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ProposalStatus::Expired);
        assert!(f.service.expire_stale().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_completed_appointment_records_donation() {
        let f = fixture();
        let (demand, donor) = seed(&f, 1).await;
        propose(&f, &demand, &donor, "tok-done").await;
        let confirmation = f.service.confirm("tok-done").await.unwrap();

        f.clock.advance(Duration::days(1));
        let updated = f
            .service
            .update_appointment_status(confirmation.appointment.id, "COMPLETED")
            .await
            .unwrap();
        assert_eq!(updated.status, AppointmentStatus::Completed);

        let donor = f.store.get_donor(donor.id).await.unwrap().unwrap();
        assert_eq!(donor.last_donation_at, Some(f.clock.now()));
    }

    #[tokio::test]
    async fn test_appointment_status_validation() {
        let f = fixture();
        let err = f
            .service
            .update_appointment_status(AppointmentId::new(), "done")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = f
            .service
            .update_appointment_status(AppointmentId::new(), "CANCELLED")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
