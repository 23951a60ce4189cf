//! Ledger: a hospital's items, usage history and derived stock snapshot

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::item::{InventoryItem, ItemStatus};
use crate::types::{HospitalId, ItemId, LedgerId, Supply};

/// Units consumed from one item on one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    /// Item consumed from
    pub item_id: ItemId,
    /// Units taken
    pub quantity: u32,
}

/// All consumption recorded on one UTC date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// UTC date
    pub date: NaiveDate,
    /// Entries in consumption order
    pub entries: Vec<UsageEntry>,
}

impl DailyUsage {
    /// Units consumed on this date
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|e| u64::from(e.quantity)).sum()
    }
}

/// One row of the snapshot's wire form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockEntry {
    /// Sub-type
    pub supply: Supply,
    /// Units available
    pub available_quantity: u64,
}

/// Available quantity per sub-type. Derived data, always rebuildable from items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<StockEntry>", into = "Vec<StockEntry>")]
pub struct StockSnapshot {
    levels: BTreeMap<Supply, u64>,
}

impl StockSnapshot {
    /// Build from items, counting only AVAILABLE ones
    pub fn from_items<'a>(items: impl IntoIterator<Item = &'a InventoryItem>) -> Self {
        let mut levels = BTreeMap::new();
        for item in items.into_iter().filter(|i| i.is_available()) {
            *levels.entry(item.supply).or_insert(0) += u64::from(item.quantity);
        }
        Self { levels }
    }

    /// Available units; sub-types absent from the snapshot have zero
    pub fn available(&self, supply: Supply) -> u64 {
        self.levels.get(&supply).copied().unwrap_or(0)
    }

    /// Sub-types with stock
    pub fn iter(&self) -> impl Iterator<Item = (Supply, u64)> + '_ {
        self.levels.iter().map(|(s, q)| (*s, *q))
    }

    /// Nothing in stock
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl From<Vec<StockEntry>> for StockSnapshot {
    fn from(entries: Vec<StockEntry>) -> Self {
        let mut levels = BTreeMap::new();
        for entry in entries {
            *levels.entry(entry.supply).or_insert(0) += entry.available_quantity;
        }
        Self { levels }
    }
}

impl From<StockSnapshot> for Vec<StockEntry> {
    fn from(snapshot: StockSnapshot) -> Self {
        snapshot
            .levels
            .into_iter()
            .map(|(supply, available_quantity)| StockEntry {
                supply,
                available_quantity,
            })
            .collect()
    }
}

/// A hospital's inventory ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    /// Identifier
    pub id: LedgerId,
    /// Owning hospital
    pub hospital_id: HospitalId,
    /// Every item ever received
    pub items: Vec<InventoryItem>,
    /// Usage history, one record per UTC date, ascending
    pub daily_usage: Vec<DailyUsage>,
    /// Last persisted snapshot
    pub snapshot: StockSnapshot,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl Ledger {
    /// Empty ledger
    pub fn new(hospital_id: HospitalId, now: DateTime<Utc>) -> Self {
        Self {
            id: LedgerId::new(),
            hospital_id,
            items: Vec::new(),
            daily_usage: Vec::new(),
            snapshot: StockSnapshot::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Look up an item
    pub fn item(&self, id: ItemId) -> Option<&InventoryItem> {
        self.items.iter().find(|i| i.id == id)
    }

    /// Look up an item mutably
    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut InventoryItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Snapshot computed from scratch
    pub fn compute_snapshot(&self) -> StockSnapshot {
        StockSnapshot::from_items(&self.items)
    }

    /// Rebuild the stored snapshot
    pub fn refresh_snapshot(&mut self) -> &StockSnapshot {
        self.snapshot = self.compute_snapshot();
        &self.snapshot
    }

    /// Append a usage entry under `date`
    pub fn record_usage(&mut self, date: NaiveDate, entry: UsageEntry) {
        match self.daily_usage.binary_search_by(|d| d.date.cmp(&date)) {
            Ok(pos) => self.daily_usage[pos].entries.push(entry),
            Err(pos) => self.daily_usage.insert(
                pos,
                DailyUsage {
                    date,
                    entries: vec![entry],
                },
            ),
        }
    }

    /// Sub-type of an item
    pub fn supply_of(&self, item_id: ItemId) -> Option<Supply> {
        self.item(item_id).map(|i| i.supply)
    }

    /// Mark AVAILABLE items past expiry as EXPIRED, returning them
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<InventoryItem> {
        let mut expired = Vec::new();
        for item in self.items.iter_mut() {
            if item.is_available() && item.is_past_expiry(now) {
                item.status = ItemStatus::Expired;
                expired.push(item.clone());
            }
        }
        expired
    }
}
