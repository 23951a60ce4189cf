//! Shortage analysis
//!
//! ## Table of Contents
//! - **check_current**: Sub-types whose available stock is below threshold
//! - **check_projected**: Sub-types whose days of stock fall below threshold
//! - **ShortageAnalyzer**: Runs both checks and emits alerts on entry into shortage

use chrono::{DateTime, Duration, NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ShortageConfig;
use crate::inventory::Ledger;
use crate::notifier::{Dispatcher, Event};
use crate::types::{HospitalId, LedgerId, Supply};

/// Available stock is below threshold
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortageAlert {
    /// Ledger
    pub ledger_id: LedgerId,
    /// Hospital
    pub hospital_id: HospitalId,
    /// Sub-type
    pub supply: Supply,
    /// Units available
    pub available: u64,
    /// Effective threshold
    pub threshold: u64,
}

/// Projected days of stock are below threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedShortageAlert {
    /// Ledger
    pub ledger_id: LedgerId,
    /// Hospital
    pub hospital_id: HospitalId,
    /// Sub-type
    pub supply: Supply,
    /// Units available
    pub available: u64,
    /// Average units used per day, 2 decimals
    pub avg_daily_usage: f64,
    /// `available / avg_daily_usage`, 2 decimals
    pub days_of_stock: f64,
}

/// Alerts that hold for a ledger at one point in time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShortageReport {
    /// Current shortages
    pub current: Vec<ShortageAlert>,
    /// Projected shortages
    pub projected: Vec<ProjectedShortageAlert>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Every known sub-type whose available stock is below its threshold
pub fn check_current(ledger: &Ledger, config: &ShortageConfig) -> Vec<ShortageAlert> {
    let snapshot = ledger.compute_snapshot();
    Supply::all()
        .filter_map(|supply| {
            let available = snapshot.available(supply);
            let threshold = config.threshold_for(supply);
            (available < threshold).then(|| ShortageAlert {
                ledger_id: ledger.id,
                hospital_id: ledger.hospital_id,
                supply,
                available,
                threshold,
            })
        })
        .collect()
}

/// Average daily consumption of `supply`.
///
/// The window starts at UTC midnight `lookback_days` before `now`; the sum
/// is divided by the number of usage-day records inside the window.
pub fn average_daily_usage(ledger: &Ledger, supply: Supply, lookback_days: u32, now: DateTime<Utc>) -> f64 {
    let window_start = now
        .checked_sub_signed(Duration::days(i64::from(lookback_days)))
        .map_or(NaiveDate::MIN, |start| start.date_naive());

    let mut days = 0u32;
    let mut total = 0u64;
    for day in ledger.daily_usage.iter().filter(|d| d.date >= window_start) {
        days += 1;
        total += day
            .entries
            .iter()
            .filter(|e| ledger.supply_of(e.item_id) == Some(supply))
            .map(|e| u64::from(e.quantity))
            .sum::<u64>();
    }

    if days == 0 {
        0.0
    } else {
        total as f64 / f64::from(days)
    }
}

/// Every known sub-type whose projected days of stock are below threshold.
/// Sub-types with no usage in the window are exempt.
pub fn check_projected(ledger: &Ledger, config: &ShortageConfig, now: DateTime<Utc>) -> Vec<ProjectedShortageAlert> {
    let snapshot = ledger.compute_snapshot();
    Supply::all()
        .filter_map(|supply| {
            let avg = average_daily_usage(ledger, supply, config.lookback_days, now);
            if avg <= 0.0 {
                return None;
            }
            let available = snapshot.available(supply);
            let days_of_stock = available as f64 / avg;
            (days_of_stock < config.projected_days_threshold).then(|| ProjectedShortageAlert {
                ledger_id: ledger.id,
                hospital_id: ledger.hospital_id,
                supply,
                available,
                avg_daily_usage: round2(avg),
                days_of_stock: round2(days_of_stock),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AlertKind {
    Current,
    Projected,
}

/// Evaluates ledgers and emits alerts
pub struct ShortageAnalyzer {
    config: ShortageConfig,
    dispatcher: Dispatcher,
    // (ledger, sub-type, kind) currently in shortage
    active: DashMap<(LedgerId, Supply, AlertKind), ()>,
}

impl ShortageAnalyzer {
    /// Create an analyzer
    pub fn new(config: ShortageConfig, dispatcher: Dispatcher) -> Self {
        Self {
            config,
            dispatcher,
            active: DashMap::new(),
        }
    }

    /// Thresholds in use
    pub fn config(&self) -> &ShortageConfig {
        &self.config
    }

    /// Run both checks
    pub async fn evaluate(&self, ledger: &Ledger, now: DateTime<Utc>) -> ShortageReport {
        ShortageReport {
            current: self.evaluate_current(ledger).await,
            projected: self.evaluate_projected(ledger, now).await,
        }
    }

    /// Run the current-stock check and emit alerts for sub-types entering shortage
    pub async fn evaluate_current(&self, ledger: &Ledger) -> Vec<ShortageAlert> {
        let alerts = check_current(ledger, &self.config);
        let fresh = self.transition(
            ledger.id,
            AlertKind::Current,
            alerts.iter().map(|a| a.supply).collect(),
        );

        for alert in alerts.iter().filter(|a| fresh.contains(&a.supply)) {
            info!(
                ledger_id = %alert.ledger_id,
                hospital_id = %alert.hospital_id,
                supply = %alert.supply,
                available = alert.available,
                threshold = alert.threshold,
                "Shortage"
            );
            self.dispatcher.dispatch(Event::Shortage(alert.clone())).await;
        }
        alerts
    }

    /// Run the projected check and emit alerts for sub-types entering shortage
    pub async fn evaluate_projected(&self, ledger: &Ledger, now: DateTime<Utc>) -> Vec<ProjectedShortageAlert> {
        let alerts = check_projected(ledger, &self.config, now);
        let fresh = self.transition(
            ledger.id,
            AlertKind::Projected,
            alerts.iter().map(|a| a.supply).collect(),
        );

        for alert in alerts.iter().filter(|a| fresh.contains(&a.supply)) {
            info!(
                ledger_id = %alert.ledger_id,
                hospital_id = %alert.hospital_id,
                supply = %alert.supply,
                days_of_stock = alert.days_of_stock,
                avg_daily_usage = alert.avg_daily_usage,
                available = alert.available,
                "Projected shortage"
            );
            self.dispatcher.dispatch(Event::FutureShortage(alert.clone())).await;
        }
        alerts
    }

    /// Update the active set; returns the sub-types that should be emitted
    fn transition(&self, ledger_id: LedgerId, kind: AlertKind, short: Vec<Supply>) -> Vec<Supply> {
        for supply in Supply::all() {
            if !short.contains(&supply) {
                self.active.remove(&(ledger_id, supply, kind));
            }
        }

        let fresh: Vec<Supply> = short
            .into_iter()
            .filter(|supply| {
                let entered = self.active.insert((ledger_id, *supply, kind), ()).is_none();
                entered || self.config.repeat_alerts
            })
            .collect();

        debug!(ledger_id = %ledger_id, kind = ?kind, emitted = fresh.len(), "Shortage state updated");
        fresh
    }
}
