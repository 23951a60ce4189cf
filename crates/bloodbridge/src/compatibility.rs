//! Transfusion compatibility rules
//!
//! Fixed lookup over the eight ABO/Rh types: O- donates to everyone, AB+
//! receives from everyone.

use crate::types::BloodType;

/// Recipient types each donor type may give to
fn recipients_of(donor: BloodType) -> &'static [BloodType] {
    use BloodType::*;
    match donor {
        ONeg => &[ONeg, OPos, ANeg, APos, BNeg, BPos, AbNeg, AbPos],
        OPos => &[OPos, APos, BPos, AbPos],
        ANeg => &[ANeg, APos, AbNeg, AbPos],
        APos => &[APos, AbPos],
        BNeg => &[BNeg, BPos, AbNeg, AbPos],
        BPos => &[BPos, AbPos],
        AbNeg => &[AbNeg, AbPos],
        AbPos => &[AbPos],
    }
}

/// Whether `donor` blood can be transfused into `recipient`
pub fn is_compatible(donor: BloodType, recipient: BloodType) -> bool {
    recipients_of(donor).contains(&recipient)
}

/// Label-based variant; unknown labels are never compatible
pub fn is_compatible_label(donor: &str, recipient: &str) -> bool {
    match (donor.parse::<BloodType>(), recipient.parse::<BloodType>()) {
        (Ok(d), Ok(r)) => is_compatible(d, r),
        _ => false,
    }
}

/// All donor types that can give to `recipient`
pub fn compatible_donor_types(recipient: BloodType) -> Vec<BloodType> {
    BloodType::ALL
        .into_iter()
        .filter(|donor| is_compatible(*donor, recipient))
        .collect()
}
