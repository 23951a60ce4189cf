//! Inventory items and the raw shape they arrive in

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};
use crate::types::{BloodType, DemandId, DonorId, ItemId, OrganType, Supply, SupplyKind};

/// Item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemStatus {
    /// In stock
    Available,
    /// Fully consumed
    Used,
    /// Past expiry or discarded
    Expired,
}

/// A unit batch held by a ledger. Items are never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    /// Identifier
    pub id: ItemId,
    /// Sub-type
    pub supply: Supply,
    /// Remaining units
    pub quantity: u32,
    /// Receipt time
    pub received_at: DateTime<Utc>,
    /// Expiry time
    pub expires_at: DateTime<Utc>,
    /// Status
    pub status: ItemStatus,
    /// Donor the units came from
    pub donor_id: Option<DonorId>,
    /// Demand that last consumed from this item
    pub used_for: Option<DemandId>,
}

impl InventoryItem {
    /// Expired at `now` (expiry instant inclusive)
    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Counted in the stock snapshot
    pub fn is_available(&self) -> bool {
        self.status == ItemStatus::Available
    }
}

/// Why an item was discarded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiscardReason {
    /// Expired on the shelf
    Expired,
    /// Physically damaged
    Damaged,
    /// Unspecified
    #[default]
    Other,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscardReason::Expired => f.write_str("EXPIRED"),
            DiscardReason::Damaged => f.write_str("DAMAGED"),
            DiscardReason::Other => f.write_str("OTHER"),
        }
    }
}

impl FromStr for DiscardReason {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "EXPIRED" => Ok(DiscardReason::Expired),
            "DAMAGED" => Ok(DiscardReason::Damaged),
            "OTHER" => Ok(DiscardReason::Other),
            _ => Err(BridgeError::validation("reason", format!("invalid discard reason '{}'", s))),
        }
    }
}

/// Item as submitted by a client, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemDraft {
    /// `BLOOD` or `ORGAN`
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Required for blood, absent for organs
    pub blood_type: Option<String>,
    /// Required for organs, absent for blood
    pub organ_type: Option<String>,
    /// Units, at least 1
    pub quantity: Option<i64>,
    /// Required
    pub expires_at: Option<DateTime<Utc>>,
    /// Defaults to now
    pub received_at: Option<DateTime<Utc>>,
    /// Optional donor back-reference
    pub donated_by: Option<DonorId>,
}

impl ItemDraft {
    /// Blood batch
    pub fn blood(blood_type: BloodType, quantity: i64, expires_at: DateTime<Utc>) -> Self {
        Self {
            kind: Some(SupplyKind::Blood.to_string()),
            blood_type: Some(blood_type.label().to_string()),
            quantity: Some(quantity),
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    /// Organ
    pub fn organ(organ_type: OrganType, quantity: i64, expires_at: DateTime<Utc>) -> Self {
        Self {
            kind: Some(SupplyKind::Organ.to_string()),
            organ_type: Some(organ_type.label().to_string()),
            quantity: Some(quantity),
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    /// Set the receipt time
    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }

    /// Set the donor
    pub fn donated_by(mut self, donor: DonorId) -> Self {
        self.donated_by = Some(donor);
        self
    }

    /// Validate and build an item; `index` is used in error field paths
    pub fn into_item(self, index: usize, now: DateTime<Utc>) -> Result<InventoryItem> {
        let field = |name: &str| format!("items[{}].{}", index, name);

        let kind: SupplyKind = self
            .kind
            .as_deref()
            .ok_or_else(|| BridgeError::validation(field("type"), "item type is required"))?
            .parse()
            .map_err(|_| BridgeError::validation(field("type"), "must be BLOOD or ORGAN"))?;

        let supply = match kind {
            SupplyKind::Blood => {
                if self.organ_type.is_some() {
                    return Err(BridgeError::validation(field("organType"), "must be absent for BLOOD"));
                }
                let bt = self
                    .blood_type
                    .as_deref()
                    .ok_or_else(|| BridgeError::validation(field("bloodType"), "required for BLOOD"))?
                    .parse::<BloodType>()
                    .map_err(|_| BridgeError::validation(field("bloodType"), "not a valid blood type"))?;
                Supply::Blood(bt)
            }
            SupplyKind::Organ => {
                if self.blood_type.is_some() {
                    return Err(BridgeError::validation(field("bloodType"), "must be absent for ORGAN"));
                }
                let ot = self
                    .organ_type
                    .as_deref()
                    .ok_or_else(|| BridgeError::validation(field("organType"), "required for ORGAN"))?
                    .parse::<OrganType>()
                    .map_err(|_| BridgeError::validation(field("organType"), "not a valid organ type"))?;
                Supply::Organ(ot)
            }
        };

        let quantity = match self.quantity {
            Some(q) if q >= 1 => u32::try_from(q)
                .map_err(|_| BridgeError::validation(field("quantity"), "too large"))?,
            _ => return Err(BridgeError::validation(field("quantity"), "must be >= 1")),
        };

        let expires_at = self
            .expires_at
            .ok_or_else(|| BridgeError::validation(field("expiresAt"), "required"))?;

        Ok(InventoryItem {
            id: ItemId::new(),
            supply,
            quantity,
            received_at: self.received_at.unwrap_or(now),
            expires_at,
            status: ItemStatus::Available,
            donor_id: self.donated_by,
            used_for: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn field_of(err: BridgeError) -> String {
        match err {
            BridgeError::Validation { field, .. } => field,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_valid_blood_draft() {
        let now = Utc::now();
        let item = ItemDraft::blood(BloodType::OPos, 5, now + Duration::days(30))
            .into_item(0, now)
            .unwrap();
        assert_eq!(item.supply, Supply::Blood(BloodType::OPos));
        assert_eq!(item.quantity, 5);
        assert_eq!(item.received_at, now);
        assert_eq!(item.status, ItemStatus::Available);
    }

    #[test]
    fn test_blood_with_organ_type_rejected() {
        let now = Utc::now();
        let mut draft = ItemDraft::blood(BloodType::APos, 1, now);
        draft.organ_type = Some("Kidney".into());
        assert_eq!(field_of(draft.into_item(2, now).unwrap_err()), "items[2].organType");
    }

    #[test]
    fn test_missing_and_invalid_fields_are_named() {
        let now = Utc::now();
        let no_kind = ItemDraft::default();
        assert_eq!(field_of(no_kind.into_item(0, now).unwrap_err()), "items[0].type");

        let mut bad_kind = ItemDraft::blood(BloodType::APos, 1, now);
        bad_kind.kind = Some("PLASMA".into());
        assert_eq!(field_of(bad_kind.into_item(0, now).unwrap_err()), "items[0].type");

        let mut bad_organ = ItemDraft::organ(OrganType::Heart, 1, now);
        bad_organ.organ_type = Some("Spleen".into());
        assert_eq!(field_of(bad_organ.into_item(1, now).unwrap_err()), "items[1].organType");

        let zero = ItemDraft::blood(BloodType::APos, 0, now);
        assert_eq!(field_of(zero.into_item(3, now).unwrap_err()), "items[3].quantity");

        let mut no_expiry = ItemDraft::blood(BloodType::APos, 1, now);
        no_expiry.expires_at = None;
        assert_eq!(field_of(no_expiry.into_item(4, now).unwrap_err()), "items[4].expiresAt");
    }

    #[test]
    fn test_draft_from_json() {
        let draft: ItemDraft = serde_json::from_value(serde_json::json!({
            "type": "ORGAN",
            "organType": "Bone Marrow",
            "quantity": 1,
            "expiresAt": "2030-01-01T00:00:00Z"
        }))
        .unwrap();
        let item = draft.into_item(0, Utc::now()).unwrap();
        assert_eq!(item.supply, Supply::Organ(OrganType::BoneMarrow));
    }

    #[test]
    fn test_discard_reason_default() {
        assert_eq!(DiscardReason::default(), DiscardReason::Other);
        assert_eq!("damaged".parse::<DiscardReason>().unwrap(), DiscardReason::Damaged);
    }
}
