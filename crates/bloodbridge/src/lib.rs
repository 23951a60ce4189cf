//! # Bloodbridge
//!
//! Coordination core for emergency blood and organ supply: per-hospital
//! inventory ledgers, shortage analytics, and matching of compatible donors
//! to outstanding demand through time-boxed proposals.
//!
//! ## Features
//!
//! - **Inventory**: Append-only item ledgers with a derived stock snapshot
//! - **Shortage Analysis**: Threshold and days-of-stock alerts
//! - **Donor Matching**: Compatibility, rest period and ping cooldown aware
//! - **Proposals**: Token confirmation, appointments, expiry
//! - **Scheduler**: Periodic recheck, expiry and shortage sweeps
//! - **Dashboard**: Hospital overview and match funnel
//! - **Metrics**: Prometheus-compatible counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bloodbridge::{BloodType, CoordinatorBuilder, HospitalRegistration, GeoPoint};
//!
//! #[tokio::main]
//! async fn main() -> bloodbridge::Result<()> {
//!     let coordinator = CoordinatorBuilder::new().build()?;
//!
//!     let hospital = coordinator
//!         .register_hospital(HospitalRegistration {
//!             name: "City General".into(),
//!             location: Some(GeoPoint::new(77.59, 12.97)?),
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     coordinator
//!         .create_demand_unit(hospital.id, "ICU bed 4", BloodType::APos, 2)
//!         .await?;
//!     coordinator.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod builder;
pub mod clock;
pub mod compatibility;
pub mod config;
pub mod coordinator;
pub mod dashboard;
pub mod error;
pub mod geo;
pub mod inventory;
pub mod matching;
pub mod metrics;
pub mod model;
pub mod notifier;
pub mod proposal;
pub mod registry;
pub mod scheduler;
pub mod shortage;
pub mod storage;
pub mod types;

// Re-exports for ergonomic API
pub use builder::CoordinatorBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use compatibility::{compatible_donor_types, is_compatible, is_compatible_label};
pub use config::{BridgeConfig, MatchingConfig, SchedulerConfig, ShortageConfig};
pub use coordinator::{Coordinator, RuntimeState};
pub use dashboard::{CreatedRange, HospitalOverview, MatchFunnel};
pub use error::{BridgeError, ErrorKind, Result};
pub use geo::{GeoPoint, Geocoder, NominatimGeocoder, StaticGeocoder};
pub use inventory::{DiscardReason, InventoryItem, ItemDraft, ItemStatus, Ledger, StockSnapshot};
pub use matching::{NearbyDonor, NearbyFilter, SosRequest};
pub use metrics::BridgeMetrics;
pub use model::{Appointment, AppointmentStatus, Availability, DemandStatus, DemandUnit, Donor, Hospital, Proposal, ProposalStatus};
pub use notifier::{Channel, Event, LogNotifier, MemoryNotifier, Notifier, WebhookNotifier};
pub use registry::{DonorRegistration, HospitalRegistration};
pub use shortage::{ProjectedShortageAlert, ShortageAlert};
pub use storage::{MemoryStore, RecordStore};
pub use types::{BloodType, OrganType, Supply, SupplyKind};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::CoordinatorBuilder;
    pub use crate::coordinator::Coordinator;
    pub use crate::error::Result;
    pub use crate::inventory::ItemDraft;
    pub use crate::registry::{DonorRegistration, HospitalRegistration};
    pub use crate::types::{BloodType, OrganType, Supply};
}
