//! Configuration for Bloodbridge
//!
//! ## Table of Contents
//! - **BridgeConfig**: Top-level configuration, loadable from env or TOML
//! - **MatchingConfig**: Radii, rest period and proposal TTL
//! - **ShortageConfig**: Stock thresholds and projection window
//! - **SchedulerConfig**: Periodic task intervals
//! - **NotifierConfig**: Webhook URLs per channel
//! - **GeocoderConfig**: Postal-code lookup service
//! - **AppointmentConfig**: Slot assigned on confirmation

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{BridgeError, Result};
use crate::types::{BloodType, OrganType, Supply};

/// Upper bound for the shortage lookback window
pub const MAX_LOOKBACK_DAYS: u32 = 3650;

/// Upper bound for the rest period and ping cooldown
pub const MAX_WINDOW_DAYS: i64 = 3650;

/// Upper bound for a proposal's lifetime
pub const MAX_PROPOSAL_TTL_HOURS: i64 = 24 * 365;

/// Upper bound for the appointment offset
pub const MAX_APPOINTMENT_OFFSET_DAYS: i64 = 365;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Donor matching
    pub matching: MatchingConfig,
    /// Shortage analysis
    pub shortage: ShortageConfig,
    /// Periodic tasks
    pub scheduler: SchedulerConfig,
    /// Outbound notifications
    pub notifier: NotifierConfig,
    /// Geocoding
    pub geocoder: GeocoderConfig,
    /// Appointment slots
    pub appointments: AppointmentConfig,
}

impl BridgeConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var::<u64, _>(&lookup, "SHORTAGE_THRESHOLD_DEFAULT_BLOOD")? {
            config.shortage.default_blood_threshold = v;
        }
        if let Some(raw) = lookup("SHORTAGE_THRESHOLD_BLOOD_JSON") {
            // Malformed JSON falls back to the default for every type.
            match serde_json::from_str::<BTreeMap<String, u64>>(&raw) {
                Ok(overrides) => {
                    config.shortage.blood_overrides = overrides
                        .into_iter()
                        .filter_map(|(label, threshold)| match label.parse::<BloodType>() {
                            Ok(bt) => Some((bt.label().to_string(), threshold)),
                            Err(_) => {
                                warn!(label = %label, "Ignoring threshold for unknown blood type");
                                None
                            }
                        })
                        .collect();
                }
                Err(e) => warn!(error = %e, "Ignoring invalid SHORTAGE_THRESHOLD_BLOOD_JSON"),
            }
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SHORTAGE_THRESHOLD_ORGAN")? {
            config.shortage.organ_threshold = v;
        }
        if let Some(v) = parse_var::<f64, _>(&lookup, "FUTURE_SHORTAGE_DAYS")? {
            config.shortage.projected_days_threshold = v;
        }
        if let Some(v) = parse_var::<u32, _>(&lookup, "FUTURE_SHORTAGE_LOOKBACK_DAYS")? {
            config.shortage.lookback_days = v;
        }

        config.notifier.shortage_url = lookup("WEBHOOK_URL_SHORTAGE").filter(|s| !s.is_empty());
        config.notifier.projected_shortage_url =
            lookup("WEBHOOK_URL_FUTURE_SHORTAGE").filter(|s| !s.is_empty());
        config.notifier.expired_url = lookup("WEBHOOK_URL_EXPIRED").filter(|s| !s.is_empty());
        config.notifier.donor_url = lookup("WEBHOOK_URL_DONOR").filter(|s| !s.is_empty());

        if let Some(url) = lookup("GEOCODER_URL") {
            config.geocoder.base_url = url;
        }
        if let Some(country) = lookup("GEOCODER_COUNTRY") {
            config.geocoder.default_country = country;
        }

        if let Some(v) = parse_var::<u64, _>(&lookup, "RECHECK_INTERVAL_SECS")? {
            config.scheduler.recheck_interval_secs = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "EXPIRY_INTERVAL_SECS")? {
            config.scheduler.expiry_interval_secs = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "SHORTAGE_INTERVAL_SECS")? {
            config.scheduler.shortage_interval_secs = v;
        }
        if let Some(v) = parse_var::<u64, _>(&lookup, "FUTURE_SHORTAGE_INTERVAL_SECS")? {
            config.scheduler.projected_shortage_interval_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject nonsensical values
    pub fn validate(&self) -> Result<()> {
        let m = &self.matching;
        if m.initial_radius_km <= 0.0 || m.recheck_radius_km <= 0.0 || m.nearby_default_radius_km <= 0.0 {
            return Err(BridgeError::config("matching radii must be positive"));
        }
        if !(1..=MAX_PROPOSAL_TTL_HOURS).contains(&m.proposal_ttl_hours) {
            return Err(BridgeError::config(format!(
                "matching.proposal_ttl_hours must be 1..={}",
                MAX_PROPOSAL_TTL_HOURS
            )));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&m.rest_period_days) {
            return Err(BridgeError::config(format!(
                "matching.rest_period_days must be 1..={}",
                MAX_WINDOW_DAYS
            )));
        }
        if !(1..=MAX_WINDOW_DAYS).contains(&m.ping_cooldown_days) {
            return Err(BridgeError::config(format!(
                "matching.ping_cooldown_days must be 1..={}",
                MAX_WINDOW_DAYS
            )));
        }
        if m.candidate_limit == 0 || m.nearby_limit == 0 {
            return Err(BridgeError::config("matching limits must be at least 1"));
        }
        if m.recheck_buffer_factor == 0 {
            return Err(BridgeError::config("matching.recheck_buffer_factor must be at least 1"));
        }
        for label in self.shortage.blood_overrides.keys() {
            label.parse::<BloodType>()?;
        }
        for label in self.shortage.organ_overrides.keys() {
            label.parse::<OrganType>()?;
        }
        if !(1..=MAX_LOOKBACK_DAYS).contains(&self.shortage.lookback_days) {
            return Err(BridgeError::config(format!(
                "shortage.lookback_days must be 1..={}",
                MAX_LOOKBACK_DAYS
            )));
        }
        if !(self.shortage.projected_days_threshold > 0.0) {
            return Err(BridgeError::config("shortage.projected_days_threshold must be positive"));
        }
        let s = &self.scheduler;
        if [
            s.recheck_interval_secs,
            s.expiry_interval_secs,
            s.shortage_interval_secs,
            s.projected_shortage_interval_secs,
        ]
        .contains(&0)
        {
            return Err(BridgeError::config("scheduler intervals must be non-zero"));
        }
        if !(0..=MAX_APPOINTMENT_OFFSET_DAYS).contains(&self.appointments.offset_days) {
            return Err(BridgeError::config(format!(
                "appointments.offset_days must be 0..={}",
                MAX_APPOINTMENT_OFFSET_DAYS
            )));
        }
        if self.appointments.hour_utc > 23 {
            return Err(BridgeError::config("appointments.hour_utc must be 0..=23"));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BridgeError::config(format!("{} has invalid value '{}'", key, raw))),
    }
}

/// Donor matching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Radius for proposals made at demand intake
    pub initial_radius_km: f64,
    /// Radius for the periodic recheck
    pub recheck_radius_km: f64,
    /// Default radius for nearby-donor listings
    pub nearby_default_radius_km: f64,
    /// Minimum days between donations
    pub rest_period_days: i64,
    /// Minimum days between proposals to the same donor
    pub ping_cooldown_days: i64,
    /// Proposal lifetime
    pub proposal_ttl_hours: i64,
    /// Candidate pool cap at intake
    pub candidate_limit: usize,
    /// Recheck fetches `factor × deficit` candidates
    pub recheck_buffer_factor: u32,
    /// Cap on nearby-donor listings
    pub nearby_limit: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            initial_radius_km: 10.0,
            recheck_radius_km: 25.0,
            nearby_default_radius_km: 25.0,
            rest_period_days: 90,
            ping_cooldown_days: 14,
            proposal_ttl_hours: 24,
            candidate_limit: 30,
            recheck_buffer_factor: 2,
            nearby_limit: 100,
        }
    }
}

impl MatchingConfig {
    /// Minimum time between donations
    pub fn rest_period(&self) -> chrono::Duration {
        chrono::Duration::days(self.rest_period_days)
    }

    /// Minimum time between proposals to one donor
    pub fn ping_cooldown(&self) -> chrono::Duration {
        chrono::Duration::days(self.ping_cooldown_days)
    }

    /// Proposal lifetime
    pub fn proposal_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.proposal_ttl_hours)
    }
}

/// Shortage thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShortageConfig {
    /// Threshold for blood types without an override
    pub default_blood_threshold: u64,
    /// Per-blood-type overrides keyed by label, e.g. `"O-"`
    pub blood_overrides: BTreeMap<String, u64>,
    /// Threshold for organ types without an override
    pub organ_threshold: u64,
    /// Per-organ-type overrides keyed by label, e.g. `"Kidney"`
    pub organ_overrides: BTreeMap<String, u64>,
    /// Alert when projected days of stock fall below this
    pub projected_days_threshold: f64,
    /// Days of usage history averaged
    pub lookback_days: u32,
    /// Re-emit alerts on every evaluation instead of on entry only
    pub repeat_alerts: bool,
}

impl Default for ShortageConfig {
    fn default() -> Self {
        Self {
            default_blood_threshold: 3,
            blood_overrides: BTreeMap::new(),
            organ_threshold: 1,
            organ_overrides: BTreeMap::new(),
            projected_days_threshold: 3.0,
            lookback_days: 7,
            repeat_alerts: false,
        }
    }
}

impl ShortageConfig {
    /// Effective threshold for a sub-type
    pub fn threshold_for(&self, supply: Supply) -> u64 {
        match supply {
            Supply::Blood(bt) => self
                .blood_overrides
                .get(bt.label())
                .copied()
                .unwrap_or(self.default_blood_threshold),
            Supply::Organ(ot) => self
                .organ_overrides
                .get(ot.label())
                .copied()
                .unwrap_or(self.organ_threshold),
        }
    }
}

/// Periodic task intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Unmet-demand recheck
    pub recheck_interval_secs: u64,
    /// Item expiry sweep
    pub expiry_interval_secs: u64,
    /// Current-shortage sweep
    pub shortage_interval_secs: u64,
    /// Projected-shortage sweep
    pub projected_shortage_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recheck_interval_secs: 30 * 60,
            expiry_interval_secs: 10 * 60,
            shortage_interval_secs: 30,
            projected_shortage_interval_secs: 30,
        }
    }
}

impl SchedulerConfig {
    /// Recheck interval
    pub fn recheck_interval(&self) -> Duration {
        Duration::from_secs(self.recheck_interval_secs)
    }

    /// Expiry interval
    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    /// Shortage interval
    pub fn shortage_interval(&self) -> Duration {
        Duration::from_secs(self.shortage_interval_secs)
    }

    /// Projected-shortage interval
    pub fn projected_shortage_interval(&self) -> Duration {
        Duration::from_secs(self.projected_shortage_interval_secs)
    }
}

/// Notifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Webhook for current shortages
    pub shortage_url: Option<String>,
    /// Webhook for projected shortages
    pub projected_shortage_url: Option<String>,
    /// Webhook for expired items
    pub expired_url: Option<String>,
    /// Webhook for donor proposals and appointments
    pub donor_url: Option<String>,
    /// Per-call timeout
    pub timeout_ms: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            shortage_url: None,
            projected_shortage_url: None,
            expired_url: None,
            donor_url: None,
            timeout_ms: 5_000,
        }
    }
}

/// Geocoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    /// Service base URL
    pub base_url: String,
    /// User-Agent sent with every request
    pub user_agent: String,
    /// Country used when a registration omits one
    pub default_country: String,
    /// Request timeout
    pub timeout_ms: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: format!("bloodbridge/{}", env!("CARGO_PKG_VERSION")),
            default_country: "India".to_string(),
            timeout_ms: 10_000,
        }
    }
}

/// Appointment slot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppointmentConfig {
    /// Days after confirmation
    pub offset_days: i64,
    /// Hour of day (UTC)
    pub hour_utc: u32,
}

impl Default for AppointmentConfig {
    fn default() -> Self {
        Self {
            offset_days: 1,
            hour_utc: 10,
        }
    }
}
