//! Donor matching
//!
//! ## Table of Contents
//! - **MatchingEngine**: Proposes eligible donors for demand units
//! - **NearbyFilter / NearbyDonor**: Donor listing around a hospital
//! - **SosRequest**: Emergency proposals to the nearest exact-type donors
//! - **generate_token**: Secure proposal token

use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::BoxedClock;
use crate::compatibility::compatible_donor_types;
use crate::config::MatchingConfig;
use crate::error::{BridgeError, Result};
use crate::geo::GeoPoint;
use crate::metrics::BridgeMetrics;
use crate::model::{Availability, DemandStatus, DemandUnit, Donor, Hospital, Proposal, ProposalStatus};
use crate::notifier::{Dispatcher, DonorProposalEvent, Event};
use crate::storage::BoxedStore;
use crate::types::{BloodType, DemandId, DonorId, HospitalId, ProposalId};

/// 32 bytes from the OS CSPRNG, hex encoded
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Filters for [`MatchingEngine::list_nearby_donors`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyFilter {
    /// Search radius; defaults to the configured nearby radius
    pub radius_km: Option<f64>,
    /// Exact blood type
    pub blood_type: Option<BloodType>,
    /// Only vetted donors
    pub verified_only: bool,
}

/// A donor near a hospital
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyDonor {
    /// Donor
    pub id: DonorId,
    /// Name
    pub name: String,
    /// Blood type
    pub blood_type: BloodType,
    /// Vetted
    pub verified: bool,
    /// Distance, 2 decimals
    pub distance_km: f64,
    /// Last donation
    pub last_donation_at: Option<DateTime<Utc>>,
}

/// Emergency proposal request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SosRequest {
    /// Requesting hospital
    pub hospital_id: HospitalId,
    /// Exact blood type wanted
    pub blood_type: BloodType,
    /// Search radius
    pub radius_km: f64,
    /// Maximum proposals
    pub limit: usize,
    /// Demand to attach; defaults to the hospital's first pending demand of that type
    pub demand_id: Option<DemandId>,
}

impl SosRequest {
    /// Request with the default radius (25 km) and limit (5)
    pub fn new(hospital_id: HospitalId, blood_type: BloodType) -> Self {
        Self {
            hospital_id,
            blood_type,
            radius_km: 25.0,
            limit: 5,
            demand_id: None,
        }
    }

    /// Set the radius
    pub fn radius_km(mut self, radius_km: f64) -> Self {
        self.radius_km = radius_km;
        self
    }

    /// Set the limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Attach to a demand
    pub fn for_demand(mut self, demand_id: DemandId) -> Self {
        self.demand_id = Some(demand_id);
        self
    }
}

/// Outcome of one unmet-demand recheck
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecheckReport {
    /// Demands with a positive deficit
    pub demands: usize,
    /// Proposals created
    pub proposals: usize,
    /// Demands that failed and were skipped
    pub failures: usize,
}

/// Ranks by distance, then last donation (never-donated first), then a
/// uniform random key.
fn rank(candidates: Vec<(Donor, f64)>) -> Vec<(Donor, f64)> {
    let mut rng = rand::thread_rng();
    let mut keyed: Vec<(u64, Donor, f64)> = candidates
        .into_iter()
        .map(|(donor, distance)| (rng.gen(), donor, distance))
        .collect();
    keyed.sort_by(|a, b| {
        a.2.total_cmp(&b.2)
            .then_with(|| a.1.last_donation_at.cmp(&b.1.last_donation_at))
            .then_with(|| a.0.cmp(&b.0))
    });
    keyed.into_iter().map(|(_, donor, distance)| (donor, distance)).collect()
}

/// Proposes donors for demand
pub struct MatchingEngine {
    store: BoxedStore,
    clock: BoxedClock,
    dispatcher: Dispatcher,
    config: MatchingConfig,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl MatchingEngine {
    /// Create the engine
    pub fn new(
        store: BoxedStore,
        clock: BoxedClock,
        dispatcher: Dispatcher,
        config: MatchingConfig,
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

    /// Matching parameters
    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    async fn hospital(&self, id: HospitalId) -> Result<Hospital> {
        self.store
            .get_hospital(id)
            .await?
            .ok_or_else(|| BridgeError::not_found("hospital", id))
    }

    /// Eligible donors within `radius_km`, ranked and capped at `limit`
    async fn find_candidates(
        &self,
        center: GeoPoint,
        recipient: BloodType,
        radius_km: f64,
        exclude: &HashSet<DonorId>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Donor, f64)>> {
        let compatible = compatible_donor_types(recipient);
        let rest = self.config.rest_period();
        let cooldown = self.config.ping_cooldown();

        let eligible: Vec<(Donor, f64)> = self
            .store
            .donors_within(center, radius_km)
            .await?
            .into_iter()
            .filter(|(d, _)| {
                d.availability == Availability::Available
                    && d.verified
                    && compatible.contains(&d.blood_type)
                    && d.is_rested(now, rest)
                    && d.is_pingable(now, cooldown)
                    && !exclude.contains(&d.id)
            })
            .collect();

        let mut ranked = rank(eligible);
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn notify_donor(&self, donor: &Donor, proposal: &Proposal) {
        self.dispatcher
            .dispatch(Event::DonorProposal(DonorProposalEvent {
                proposal_id: proposal.id,
                demand_id: proposal.demand_id,
                hospital_id: proposal.hospital_id,
                donor_id: donor.id,
                contact: donor.contact.clone(),
                token: proposal.token.clone(),
                expires_at: proposal.expires_at,
            }))
            .await;
    }

    fn new_proposal(&self, demand_id: Option<DemandId>, hospital_id: HospitalId, donor_id: DonorId, now: DateTime<Utc>) -> Proposal {
        Proposal {
            id: ProposalId::new(),
            demand_id,
            hospital_id,
            donor_id,
            status: ProposalStatus::Proposed,
            token: generate_token(),
            created_at: now,
            expires_at: now + self.config.proposal_ttl(),
            resolved_at: None,
        }
    }

    /// Propose up to `target` donors for a demand within the intake radius
    pub async fn propose_donors(&self, demand: &DemandUnit, target: usize) -> Result<Vec<Proposal>> {
        self.propose_within(
            demand,
            target,
            self.config.initial_radius_km,
            self.config.candidate_limit,
            &HashSet::new(),
            "intake",
        )
        .await
    }

    async fn propose_within(
        &self,
        demand: &DemandUnit,
        target: usize,
        radius_km: f64,
        pool: usize,
        exclude: &HashSet<DonorId>,
        source: &str,
    ) -> Result<Vec<Proposal>> {
        if target == 0 {
            return Ok(Vec::new());
        }
        let hospital = self.hospital(demand.hospital_id).await?;
        let Some(center) = hospital.location else {
            warn!(demand_id = %demand.id, hospital_id = %hospital.id, "Hospital has no location; skipping matching");
            return Ok(Vec::new());
        };

        let now = self.clock.now();
        let cooldown = self.config.ping_cooldown();
        let candidates = self
            .find_candidates(center, demand.blood_type, radius_km, exclude, pool, now)
            .await?;

        let mut created = Vec::new();
        for (donor, distance) in candidates {
            if created.len() >= target {
                break;
            }
            // Another matcher may have pinged this donor since the query.
            if !self.store.claim_donor_ping(donor.id, now, cooldown).await? {
                debug!(donor_id = %donor.id, "Ping claim lost");
                continue;
            }

            let proposal = self.new_proposal(Some(demand.id), demand.hospital_id, donor.id, now);
            self.store.insert_proposal(proposal.clone()).await?;
            info!(
                proposal_id = %proposal.id,
                demand_id = %demand.id,
                donor_id = %donor.id,
                distance_km = distance,
                source,
                "Proposal created"
            );
            self.notify_donor(&donor, &proposal).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_proposal(source);
            }
            created.push(proposal);
        }

        if created.is_empty() {
            debug!(demand_id = %demand.id, radius_km, "No eligible donors");
        }
        Ok(created)
    }

    /// Widen the search for every pending demand still short of confirmations
    pub async fn recheck_unfulfilled(&self) -> Result<RecheckReport> {
        let mut report = RecheckReport::default();

        for demand in self.store.pending_demands().await? {
            let deficit = demand.deficit();
            if deficit == 0 {
                continue;
            }
            report.demands += 1;
            match self.recheck_demand(&demand, deficit).await {
                Ok(n) => report.proposals += n,
                Err(e) => {
                    report.failures += 1;
                    warn!(demand_id = %demand.id, error = %e, "Recheck failed for demand");
                    if let Some(metrics) = &self.metrics {
                        metrics.entity_failures.with_label_values(&["recheck"]).inc();
                    }
                }
            }
        }

        debug!(
            demands = report.demands,
            proposals = report.proposals,
            failures = report.failures,
            "Recheck finished"
        );
        Ok(report)
    }

    async fn recheck_demand(&self, demand: &DemandUnit, deficit: u32) -> Result<usize> {
        let exclude: HashSet<DonorId> = self
            .store
            .proposals_for_demand(demand.id)
            .await?
            .into_iter()
            .map(|p| p.donor_id)
            .collect();
        let pool = deficit as usize * self.config.recheck_buffer_factor as usize;

        let created = self
            .propose_within(
                demand,
                deficit as usize,
                self.config.recheck_radius_km,
                pool,
                &exclude,
                "recheck",
            )
            .await?;
        Ok(created.len())
    }

    /// Available donors near a hospital, nearest first
    pub async fn list_nearby_donors(&self, hospital_id: HospitalId, filter: NearbyFilter) -> Result<Vec<NearbyDonor>> {
        let hospital = self.hospital(hospital_id).await?;
        let Some(center) = hospital.location else {
            return Ok(Vec::new());
        };
        let radius_km = filter.radius_km.unwrap_or(self.config.nearby_default_radius_km);

        let mut donors: Vec<(Donor, f64)> = self
            .store
            .donors_within(center, radius_km)
            .await?
            .into_iter()
            .filter(|(d, _)| {
                d.availability == Availability::Available
                    && filter.blood_type.map_or(true, |bt| d.blood_type == bt)
                    && (!filter.verified_only || d.verified)
            })
            .collect();
        donors.sort_by(|a, b| a.1.total_cmp(&b.1));
        donors.truncate(self.config.nearby_limit);

        Ok(donors
            .into_iter()
            .map(|(d, distance)| NearbyDonor {
                id: d.id,
                name: d.name,
                blood_type: d.blood_type,
                verified: d.verified,
                distance_km: (distance * 100.0).round() / 100.0,
                last_donation_at: d.last_donation_at,
            })
            .collect())
    }

    /// Emergency proposals to the nearest available, verified donors of the
    /// exact blood type
    pub async fn create_sos_proposals(&self, request: SosRequest) -> Result<Vec<Proposal>> {
        let hospital = self.hospital(request.hospital_id).await?;
        let center = hospital
            .location
            .ok_or_else(|| BridgeError::validation("location", "hospital location missing"))?;
        if request.radius_km <= 0.0 {
            return Err(BridgeError::validation("radiusKm", "must be positive"));
        }

        let demand_id = match request.demand_id {
            Some(id) => {
                self.store
                    .get_demand(id)
                    .await?
                    .ok_or_else(|| BridgeError::not_found("demand", id))?;
                Some(id)
            }
            None => self
                .store
                .pending_demands()
                .await?
                .into_iter()
                .find(|d| {
                    d.hospital_id == request.hospital_id
                        && d.blood_type == request.blood_type
                        && d.status == DemandStatus::Pending
                })
                .map(|d| d.id),
        };

        let mut donors: Vec<(Donor, f64)> = self
            .store
            .donors_within(center, request.radius_km)
            .await?
            .into_iter()
            .filter(|(d, _)| {
                d.availability == Availability::Available && d.verified && d.blood_type == request.blood_type
            })
            .collect();
        donors.sort_by(|a, b| a.1.total_cmp(&b.1));
        donors.truncate(request.limit);

        let now = self.clock.now();
        let mut created = Vec::with_capacity(donors.len());
        for (donor, distance) in donors {
            let proposal = self.new_proposal(demand_id, request.hospital_id, donor.id, now);
            self.store.insert_proposal(proposal.clone()).await?;
            self.store.touch_donor_ping(donor.id, now).await?;
            info!(
                proposal_id = %proposal.id,
                hospital_id = %request.hospital_id,
                donor_id = %donor.id,
                distance_km = distance,
                "SOS proposal created"
            );
            self.notify_donor(&donor, &proposal).await;
            if let Some(metrics) = &self.metrics {
                metrics.record_proposal("sos");
            }
            created.push(proposal);
        }
        Ok(created)
    }
}
