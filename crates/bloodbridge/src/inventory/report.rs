//! Read-only ledger reports: summary, expiry radar and usage series

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::ledger::Ledger;
use crate::types::Supply;

/// Totals for one supply kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindTotals {
    /// Units available across all sub-types
    pub total_available: u64,
    /// Units available per sub-type label
    pub by_type: BTreeMap<String, u64>,
}

/// AVAILABLE items by expiry bucket; each item lands in exactly one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiryBuckets {
    /// Expiring within 24 hours
    pub in_24h: u64,
    /// Expiring within 3 days, after 24 hours
    pub in_3d: u64,
    /// Expiring within 7 days, after 3 days
    pub in_7d: u64,
}

/// Units moved today (UTC)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodayTotals {
    /// Units consumed
    pub used: u64,
    /// Units received
    pub received: u64,
}

/// Dashboard summary of a ledger
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySummary {
    /// Blood totals
    pub blood: KindTotals,
    /// Organ totals
    pub organs: KindTotals,
    /// Expiry buckets
    pub expiring: ExpiryBuckets,
    /// Today's movement
    pub today: TodayTotals,
}

/// AVAILABLE items expiring within a window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringReport {
    /// Number of items
    pub count: u64,
    /// Items per sub-type label
    pub breakdown_by_type: BTreeMap<String, u64>,
}

/// Units consumed on one date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsagePoint {
    /// UTC date
    pub date: NaiveDate,
    /// Units consumed
    pub used: u64,
}

/// Build the dashboard summary
pub fn summarize(ledger: &Ledger, now: DateTime<Utc>) -> InventorySummary {
    let mut summary = InventorySummary::default();
    let today = now.date_naive();
    let h24 = now + Duration::hours(24);
    let d3 = now + Duration::days(3);
    let d7 = now + Duration::days(7);

    for item in &ledger.items {
        if item.is_available() {
            let totals = match item.supply {
                Supply::Blood(_) => &mut summary.blood,
                Supply::Organ(_) => &mut summary.organs,
            };
            let qty = u64::from(item.quantity);
            totals.total_available += qty;
            *totals.by_type.entry(item.supply.label().to_string()).or_insert(0) += qty;

            if item.expires_at <= h24 {
                summary.expiring.in_24h += 1;
            } else if item.expires_at <= d3 {
                summary.expiring.in_3d += 1;
            } else if item.expires_at <= d7 {
                summary.expiring.in_7d += 1;
            }
        }
        if item.received_at.date_naive() == today {
            summary.today.received += u64::from(item.quantity);
        }
    }

    summary.today.used = ledger
        .daily_usage
        .iter()
        .filter(|d| d.date == today)
        .map(|d| d.total())
        .sum();

    summary
}

/// Widest expiry window a report will look ahead
pub const MAX_EXPIRING_DAYS: u32 = 3650;

/// AVAILABLE items expiring within `days`, clamped to `1..=MAX_EXPIRING_DAYS`
pub fn expiring_within(ledger: &Ledger, days: u32, now: DateTime<Utc>) -> ExpiringReport {
    let window = Duration::days(i64::from(days.clamp(1, MAX_EXPIRING_DAYS)));
    let cutoff = now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC);
    let mut report = ExpiringReport::default();
    for item in ledger.items.iter().filter(|i| i.is_available() && i.expires_at <= cutoff) {
        report.count += 1;
        *report
            .breakdown_by_type
            .entry(item.supply.label().to_string())
            .or_insert(0) += 1;
    }
    report
}

/// Per-day consumption, ascending by date, optionally bounded (inclusive)
pub fn usage_series(ledger: &Ledger, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Vec<UsagePoint> {
    let mut series: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for day in &ledger.daily_usage {
        if from.is_some_and(|f| day.date < f) || to.is_some_and(|t| day.date > t) {
            continue;
        }
        *series.entry(day.date).or_insert(0) += day.total();
    }
    series
        .into_iter()
        .map(|(date, used)| UsagePoint { date, used })
        .collect()
}
