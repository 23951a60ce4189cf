//! Hospital and donor registration, donor flags and demand intake
//!
//! ## Table of Contents
//! - **HospitalRegistration / DonorRegistration**: Intake shapes
//! - **DemandIntake**: A new demand with the proposals it triggered
//! - **Registry**: Registration operations

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clock::BoxedClock;
use crate::error::{BridgeError, Result};
use crate::geo::{BoxedGeocoder, GeoPoint};
use crate::matching::MatchingEngine;
use crate::model::{Availability, DemandStatus, DemandUnit, Donor, Hospital, Proposal};
use crate::storage::BoxedStore;
use crate::types::{BloodType, DemandId, DonorId, HospitalId, OrganType};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 120;

/// New hospital
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalRegistration {
    /// Display name, 2 to 120 characters
    pub name: String,
    /// Explicit coordinates; wins over the postal code
    pub location: Option<GeoPoint>,
    /// Postal code to resolve when no coordinates are given
    pub postal_code: Option<String>,
    /// Country for the postal code
    pub country: Option<String>,
}

/// New donor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorRegistration {
    /// Name
    pub name: String,
    /// Phone number
    pub contact: String,
    /// Blood type
    pub blood_type: BloodType,
    /// Organs the donor pledges
    #[serde(default)]
    pub organ_donation: BTreeSet<OrganType>,
    /// Postal code of the donor's address
    pub postal_code: String,
    /// Country; defaults to the geocoder's default country
    pub country: Option<String>,
}

/// A new demand and the proposals created for it
#[derive(Debug, Clone)]
pub struct DemandIntake {
    /// Stored demand
    pub demand: DemandUnit,
    /// Proposals sent during intake; empty when matching failed
    pub proposals: Vec<Proposal>,
}

fn require(field: &str, value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BridgeError::validation(field, "required"));
    }
    Ok(trimmed.to_string())
}

/// Registration and intake
pub struct Registry {
    store: BoxedStore,
    geocoder: BoxedGeocoder,
    clock: BoxedClock,
    matching: Arc<MatchingEngine>,
    default_country: String,
}

impl Registry {
    /// Create the registry
    pub fn new(
        store: BoxedStore,
        geocoder: BoxedGeocoder,
        clock: BoxedClock,
        matching: Arc<MatchingEngine>,
        default_country: impl Into<String>,
    ) -> Self {
        Self {
            store,
            geocoder,
            clock,
            matching,
            default_country: default_country.into(),
        }
    }

    fn country_or_default(&self, country: Option<&str>) -> String {
        country
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .unwrap_or(&self.default_country)
            .to_uppercase()
    }

    /// Register a hospital
    pub async fn register_hospital(&self, registration: HospitalRegistration) -> Result<Hospital> {
        let name = registration.name.trim().to_string();
        let len = name.chars().count();
        if !(NAME_MIN..=NAME_MAX).contains(&len) {
            return Err(BridgeError::validation(
                "name",
                format!("must be {}..={} characters", NAME_MIN, NAME_MAX),
            ));
        }

        let postal_code = registration
            .postal_code
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string);
        let country = registration.country.as_deref().map(|c| self.country_or_default(Some(c)));

        let location = match (registration.location, &postal_code) {
            (Some(point), _) => point,
            (None, Some(code)) => {
                let country = self.country_or_default(country.as_deref());
                self.geocoder.resolve(code, &country).await?
            }
            (None, None) => {
                return Err(BridgeError::validation(
                    "location",
                    "coordinates or postal code required",
                ))
            }
        };

        let hospital = Hospital {
            id: HospitalId::new(),
            name,
            location: Some(location),
            postal_code,
            country,
            active: true,
            created_at: self.clock.now(),
        };
        self.store.insert_hospital(hospital.clone()).await?;
        info!(hospital_id = %hospital.id, name = %hospital.name, "Hospital registered");
        Ok(hospital)
    }

    /// Register a donor. New donors start unverified and unavailable.
    pub async fn register_donor(&self, registration: DonorRegistration) -> Result<Donor> {
        let name = require("name", &registration.name)?;
        let contact = require("contact", &registration.contact)?;
        let postal_code = require("postalCode", &registration.postal_code)?;
        let country = self.country_or_default(registration.country.as_deref());

        let location = self.geocoder.resolve(&postal_code, &country).await.map_err(|e| {
            warn!(postal_code = %postal_code, error = %e, "Donor postal code not resolved");
            BridgeError::InvalidPostalCode(postal_code.clone())
        })?;

        let donor = Donor {
            id: DonorId::new(),
            name,
            contact,
            blood_type: registration.blood_type,
            organ_donation: registration.organ_donation,
            location,
            verified: false,
            availability: Availability::Unavailable,
            last_donation_at: None,
            last_pinged_at: None,
            created_at: self.clock.now(),
        };
        self.store.put_donor(donor.clone()).await?;
        info!(donor_id = %donor.id, blood_type = %donor.blood_type, "Donor registered");
        Ok(donor)
    }

    async fn donor(&self, id: DonorId) -> Result<Donor> {
        self.store
            .get_donor(id)
            .await?
            .ok_or_else(|| BridgeError::not_found("donor", id))
    }

    /// Toggle whether the donor may be contacted
    pub async fn set_availability(&self, id: DonorId, availability: Availability) -> Result<Donor> {
        let mut donor = self.donor(id).await?;
        donor.availability = availability;
        self.store.put_donor(donor.clone()).await?;
        info!(donor_id = %id, availability = ?availability, "Donor availability changed");
        Ok(donor)
    }

    /// Mark a donor vetted or not
    pub async fn set_verified(&self, id: DonorId, verified: bool) -> Result<Donor> {
        let mut donor = self.donor(id).await?;
        donor.verified = verified;
        self.store.put_donor(donor.clone()).await?;
        info!(donor_id = %id, verified, "Donor verification changed");
        Ok(donor)
    }

    /// Record a demand and propose donors for it right away
    pub async fn create_demand_unit(
        &self,
        hospital_id: HospitalId,
        patient: &str,
        blood_type: BloodType,
        units_needed: u32,
    ) -> Result<DemandIntake> {
        if units_needed < 1 {
            return Err(BridgeError::validation("unitsNeeded", "must be at least 1"));
        }
        let patient = require("patient", patient)?;
        if self.store.get_hospital(hospital_id).await?.is_none() {
            return Err(BridgeError::not_found("hospital", hospital_id));
        }

        let demand = DemandUnit {
            id: DemandId::new(),
            hospital_id,
            patient,
            blood_type,
            units_needed,
            status: DemandStatus::Pending,
            confirmed_count: 0,
            created_at: self.clock.now(),
            fulfilled_at: None,
        };
        self.store.put_demand(demand.clone()).await?;
        info!(demand_id = %demand.id, hospital_id = %hospital_id, blood_type = %blood_type, units_needed, "Demand created");

        let proposals = match self.matching.propose_donors(&demand, units_needed as usize).await {
            Ok(proposals) => proposals,
            Err(e) => {
                warn!(demand_id = %demand.id, error = %e, "Initial matching failed");
                Vec::new()
            }
        };
        Ok(DemandIntake { demand, proposals })
    }
}
