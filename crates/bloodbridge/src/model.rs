//! Domain records shared between components
//!
//! ## Table of Contents
//! - **Hospital**: Owner of a ledger and origin of demand
//! - **Donor**: Person who can be proposed to fulfil demand
//! - **DemandUnit**: A hospital's request on behalf of a patient
//! - **Proposal**: Time-boxed offer to one donor
//! - **Appointment**: Scheduled donation following a confirmed proposal

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::BridgeError;
use crate::geo::GeoPoint;
use crate::types::{
    AppointmentId, BloodType, DemandId, DonorId, HospitalId, OrganType, ProposalId,
};

/// A hospital, blood bank or clinic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hospital {
    /// Identifier
    pub id: HospitalId,
    /// Display name
    pub name: String,
    /// Resolved location; matching is impossible without it
    pub location: Option<GeoPoint>,
    /// Postal code the location was resolved from
    pub postal_code: Option<String>,
    /// Country (upper-cased)
    pub country: Option<String>,
    /// Soft-delete flag
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Donor availability as set by the donor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    /// Willing to be contacted
    Available,
    /// Not currently donating
    Unavailable,
}

impl FromStr for Availability {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "available" => Ok(Availability::Available),
            "unavailable" => Ok(Availability::Unavailable),
            other => Err(BridgeError::validation(
                "availabilityStatus",
                format!("invalid availability '{}'", other),
            )),
        }
    }
}

/// A registered donor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donor {
    /// Identifier
    pub id: DonorId,
    /// Display name
    pub name: String,
    /// Phone number used for outbound proposals
    pub contact: String,
    /// Blood type
    pub blood_type: BloodType,
    /// Organs the donor has pledged
    pub organ_donation: BTreeSet<OrganType>,
    /// Resolved home location
    pub location: GeoPoint,
    /// Vetted by a hospital
    pub verified: bool,
    /// Self-declared availability
    pub availability: Availability,
    /// Last completed donation
    pub last_donation_at: Option<DateTime<Utc>>,
    /// Last time a proposal was sent
    pub last_pinged_at: Option<DateTime<Utc>>,
    /// Registration time
    pub created_at: DateTime<Utc>,
}

impl Donor {
    /// Rested: never donated or donated at least `rest` ago
    pub fn is_rested(&self, now: DateTime<Utc>, rest: Duration) -> bool {
        self.last_donation_at.map_or(true, |at| at <= now - rest)
    }

    /// Outside the ping cooldown window
    pub fn is_pingable(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_pinged_at.map_or(true, |at| at <= now - cooldown)
    }
}

/// Demand unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DemandStatus {
    /// Still collecting confirmations
    Pending,
    /// Enough donors confirmed
    Fulfilled,
}

/// A hospital's request for units of one blood type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DemandUnit {
    /// Identifier
    pub id: DemandId,
    /// Requesting hospital
    pub hospital_id: HospitalId,
    /// Patient label
    pub patient: String,
    /// Recipient blood type
    pub blood_type: BloodType,
    /// Units requested
    pub units_needed: u32,
    /// Status
    pub status: DemandStatus,
    /// Confirmed proposals so far
    pub confirmed_count: u32,
    /// Intake time
    pub created_at: DateTime<Utc>,
    /// Time the demand became fulfilled
    pub fulfilled_at: Option<DateTime<Utc>>,
}

impl DemandUnit {
    /// Units still missing
    pub fn deficit(&self) -> u32 {
        self.units_needed.saturating_sub(self.confirmed_count)
    }
}

/// Proposal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalStatus {
    /// Waiting on the donor
    Proposed,
    /// Donor accepted
    Confirmed,
    /// Lapsed without response
    Expired,
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProposalStatus::Proposed => f.write_str("PROPOSED"),
            ProposalStatus::Confirmed => f.write_str("CONFIRMED"),
            ProposalStatus::Expired => f.write_str("EXPIRED"),
        }
    }
}

/// An offer extended to one donor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    /// Identifier
    pub id: ProposalId,
    /// Demand being served; SOS proposals may have none
    pub demand_id: Option<DemandId>,
    /// Hospital the donor should report to
    pub hospital_id: HospitalId,
    /// Donor contacted
    pub donor_id: DonorId,
    /// Status
    pub status: ProposalStatus,
    /// Opaque confirmation token
    pub token: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Confirmation deadline
    pub expires_at: DateTime<Utc>,
    /// Time the proposal left PROPOSED
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Proposal {
    /// Whether the proposal can still be confirmed at `now`
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == ProposalStatus::Proposed && now <= self.expires_at
    }
}

/// Appointment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AppointmentStatus {
    /// Booked
    Scheduled,
    /// Donation happened
    Completed,
    /// Called off
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => f.write_str("SCHEDULED"),
            AppointmentStatus::Completed => f.write_str("COMPLETED"),
            AppointmentStatus::Cancelled => f.write_str("CANCELLED"),
        }
    }
}

impl FromStr for AppointmentStatus {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(AppointmentStatus::Scheduled),
            "COMPLETED" => Ok(AppointmentStatus::Completed),
            "CANCELLED" => Ok(AppointmentStatus::Cancelled),
            other => Err(BridgeError::validation("status", format!("invalid status '{}'", other))),
        }
    }
}

/// A scheduled donation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Identifier
    pub id: AppointmentId,
    /// Confirmed proposal
    pub proposal_id: ProposalId,
    /// Donor
    pub donor_id: DonorId,
    /// Hospital
    pub hospital_id: HospitalId,
    /// Scheduled time
    pub scheduled_at: DateTime<Utc>,
    /// Status
    pub status: AppointmentStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
