//! Core types for Bloodbridge
//!
//! ## Table of Contents
//! - **Ids**: Typed UUID identifiers for every entity
//! - **BloodType**: The closed set of eight ABO/Rh blood types
//! - **OrganType**: Organs a hospital may stock or a donor may pledge
//! - **Supply**: Tagged stock sub-type (blood XOR organ)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BridgeError;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $entity:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random id
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = BridgeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| BridgeError::validation($entity, format!("'{}' is not a valid id", s)))
            }
        }
    };
}

define_id!(
    /// Hospital identifier
    HospitalId, "hospitalId"
);
define_id!(
    /// Donor identifier
    DonorId, "donorId"
);
define_id!(
    /// Demand unit (patient need) identifier
    DemandId, "demandId"
);
define_id!(
    /// Inventory ledger identifier
    LedgerId, "ledgerId"
);
define_id!(
    /// Inventory item identifier
    ItemId, "itemId"
);
define_id!(
    /// Proposal identifier
    ProposalId, "proposalId"
);
define_id!(
    /// Appointment identifier
    AppointmentId, "appointmentId"
);

/// ABO/Rh blood type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BloodType {
    /// A positive
    #[serde(rename = "A+")]
    APos,
    /// A negative
    #[serde(rename = "A-")]
    ANeg,
    /// B positive
    #[serde(rename = "B+")]
    BPos,
    /// B negative
    #[serde(rename = "B-")]
    BNeg,
    /// AB positive
    #[serde(rename = "AB+")]
    AbPos,
    /// AB negative
    #[serde(rename = "AB-")]
    AbNeg,
    /// O positive
    #[serde(rename = "O+")]
    OPos,
    /// O negative
    #[serde(rename = "O-")]
    ONeg,
}

impl BloodType {
    /// Every blood type, in label order
    pub const ALL: [BloodType; 8] = [
        BloodType::APos,
        BloodType::ANeg,
        BloodType::BPos,
        BloodType::BNeg,
        BloodType::AbPos,
        BloodType::AbNeg,
        BloodType::OPos,
        BloodType::ONeg,
    ];

    /// Canonical label, e.g. `"AB-"`
    pub fn label(&self) -> &'static str {
        match self {
            BloodType::APos => "A+",
            BloodType::ANeg => "A-",
            BloodType::BPos => "B+",
            BloodType::BNeg => "B-",
            BloodType::AbPos => "AB+",
            BloodType::AbNeg => "AB-",
            BloodType::OPos => "O+",
            BloodType::ONeg => "O-",
        }
    }
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BloodType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase();
        BloodType::ALL
            .into_iter()
            .find(|bt| bt.label() == normalized)
            .ok_or_else(|| BridgeError::validation("bloodType", format!("unknown blood type '{}'", s)))
    }
}

/// Organ type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OrganType {
    /// Kidney
    Kidney,
    /// Liver
    Liver,
    /// Heart
    Heart,
    /// Lungs
    Lungs,
    /// Pancreas
    Pancreas,
    /// Cornea
    Cornea,
    /// Bone marrow
    #[serde(rename = "Bone Marrow")]
    BoneMarrow,
    /// Anything else
    Other,
}

impl OrganType {
    /// Every organ type
    pub const ALL: [OrganType; 8] = [
        OrganType::Kidney,
        OrganType::Liver,
        OrganType::Heart,
        OrganType::Lungs,
        OrganType::Pancreas,
        OrganType::Cornea,
        OrganType::BoneMarrow,
        OrganType::Other,
    ];

    /// Canonical label, e.g. `"Bone Marrow"`
    pub fn label(&self) -> &'static str {
        match self {
            OrganType::Kidney => "Kidney",
            OrganType::Liver => "Liver",
            OrganType::Heart => "Heart",
            OrganType::Lungs => "Lungs",
            OrganType::Pancreas => "Pancreas",
            OrganType::Cornea => "Cornea",
            OrganType::BoneMarrow => "Bone Marrow",
            OrganType::Other => "Other",
        }
    }
}

impl fmt::Display for OrganType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OrganType {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        OrganType::ALL
            .into_iter()
            .find(|ot| ot.label().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| BridgeError::validation("organType", format!("unknown organ type '{}'", s)))
    }
}

/// Top-level stock kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SupplyKind {
    /// Blood units
    Blood,
    /// Organs
    Organ,
}

impl fmt::Display for SupplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupplyKind::Blood => f.write_str("BLOOD"),
            SupplyKind::Organ => f.write_str("ORGAN"),
        }
    }
}

impl FromStr for SupplyKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BLOOD" => Ok(SupplyKind::Blood),
            "ORGAN" => Ok(SupplyKind::Organ),
            _ => Err(BridgeError::validation("type", format!("invalid item type '{}'", s))),
        }
    }
}

/// Stock sub-type: a blood type or an organ type, never both
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "subType", rename_all = "UPPERCASE")]
pub enum Supply {
    /// Blood of the given type
    Blood(BloodType),
    /// Organ of the given type
    Organ(OrganType),
}

impl Supply {
    /// Kind of this supply
    pub fn kind(&self) -> SupplyKind {
        match self {
            Supply::Blood(_) => SupplyKind::Blood,
            Supply::Organ(_) => SupplyKind::Organ,
        }
    }

    /// Every known sub-type (8 blood + 8 organ)
    pub fn all() -> impl Iterator<Item = Supply> {
        BloodType::ALL
            .into_iter()
            .map(Supply::Blood)
            .chain(OrganType::ALL.into_iter().map(Supply::Organ))
    }

    /// Sub-type label without the kind
    pub fn label(&self) -> &'static str {
        match self {
            Supply::Blood(bt) => bt.label(),
            Supply::Organ(ot) => ot.label(),
        }
    }
}

impl fmt::Display for Supply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind(), self.label())
    }
}
