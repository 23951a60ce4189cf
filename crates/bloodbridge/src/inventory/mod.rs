//! Inventory ledgers
//!
//! ## Table of Contents
//! - **item**: Inventory items, drafts and validation
//! - **ledger**: Ledger, daily usage and the derived stock snapshot
//! - **report**: Summary, expiry radar and usage series
//! - **InventoryService**: Serialized ledger mutations and the expiry sweep

mod item;
mod ledger;
mod report;

pub use item::{DiscardReason, InventoryItem, ItemDraft, ItemStatus};
pub use ledger::{DailyUsage, Ledger, StockEntry, StockSnapshot, UsageEntry};
pub use report::{
    ExpiringReport, ExpiryBuckets, InventorySummary, KindTotals, TodayTotals, UsagePoint,
};

use chrono::NaiveDate;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::BoxedClock;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use crate::notifier::{Dispatcher, Event, ItemExpiredEvent};
use crate::shortage::ShortageAnalyzer;
use crate::storage::BoxedStore;
use crate::types::{DemandId, HospitalId, ItemId, LedgerId};

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySweep {
    /// Ledgers inspected
    pub ledgers: usize,
    /// Items moved to EXPIRED
    pub expired: usize,
    /// Ledgers that failed and were skipped
    pub failures: usize,
}

/// Owns every ledger mutation.
///
/// Mutations of one ledger are serialized through a per-ledger async mutex
/// held across the whole read-modify-write; different ledgers proceed in
/// parallel.
pub struct InventoryService {
    store: BoxedStore,
    clock: BoxedClock,
    shortage: Arc<ShortageAnalyzer>,
    dispatcher: Dispatcher,
    metrics: Option<Arc<BridgeMetrics>>,
    locks: DashMap<LedgerId, Arc<Mutex<()>>>,
}

impl InventoryService {
    /// Create the service
    pub fn new(
        store: BoxedStore,
        clock: BoxedClock,
        shortage: Arc<ShortageAnalyzer>,
        dispatcher: Dispatcher,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            store,
            clock,
            shortage,
            dispatcher,
            metrics,
            locks: DashMap::new(),
        }
    }

    /// Lock guarding one ledger. Entries are only created for ledgers that
    /// exist in the store.
    async fn lock_for(&self, id: LedgerId) -> Result<Arc<Mutex<()>>> {
        if let Some(lock) = self.locks.get(&id) {
            return Ok(lock.clone());
        }
        if self.store.get_ledger(id).await?.is_none() {
            return Err(BridgeError::not_found("ledger", id));
        }
        Ok(self.locks.entry(id).or_default().clone())
    }

    async fn load(&self, id: LedgerId) -> Result<Ledger> {
        self.store
            .get_ledger(id)
            .await?
            .ok_or_else(|| BridgeError::not_found("ledger", id))
    }

    /// Run `mutate` on a ledger under its lock, then persist the ledger with
    /// a fresh snapshot and re-evaluate shortages.
    async fn mutate<T, F>(&self, id: LedgerId, mutate: F) -> Result<(Ledger, T)>
    where
        F: FnOnce(&mut Ledger) -> Result<T>,
    {
        let lock = self.lock_for(id).await?;
        let (ledger, out) = {
            let _guard = lock.lock().await;
            let mut ledger = self.load(id).await?;
            let out = mutate(&mut ledger)?;
            ledger.updated_at = self.clock.now();
            ledger.refresh_snapshot();
            self.store.put_ledger(ledger.clone()).await?;
            (ledger, out)
        };

        self.shortage.evaluate(&ledger, self.clock.now()).await;
        Ok((ledger, out))
    }

    /// Create the ledger for a hospital
    pub async fn create_ledger(&self, hospital_id: HospitalId) -> Result<Ledger> {
        if self.store.get_hospital(hospital_id).await?.is_none() {
            return Err(BridgeError::not_found("hospital", hospital_id));
        }
        let ledger = Ledger::new(hospital_id, self.clock.now());
        self.store.insert_ledger(ledger.clone()).await?;
        info!(ledger_id = %ledger.id, hospital_id = %hospital_id, "Ledger created");
        Ok(ledger)
    }

    /// Get a ledger as stored
    pub async fn ledger(&self, id: LedgerId) -> Result<Ledger> {
        self.load(id).await
    }

    /// Ledger owned by a hospital
    pub async fn ledger_for_hospital(&self, hospital_id: HospitalId) -> Result<Ledger> {
        let id = self
            .store
            .ledger_for_hospital(hospital_id)
            .await?
            .ok_or_else(|| BridgeError::not_found("ledger", hospital_id))?;
        self.load(id).await
    }

    /// Validate and append a batch of items. The batch is all-or-nothing.
    pub async fn add_items(&self, id: LedgerId, drafts: Vec<ItemDraft>) -> Result<Ledger> {
        if drafts.is_empty() {
            return Err(BridgeError::validation("items", "items array is required"));
        }
        let now = self.clock.now();
        let items = drafts
            .into_iter()
            .enumerate()
            .map(|(index, draft)| draft.into_item(index, now))
            .collect::<Result<Vec<_>>>()?;
        let count = items.len();

        let (ledger, ()) = self
            .mutate(id, move |ledger| {
                ledger.items.extend(items);
                Ok(())
            })
            .await?;

        info!(ledger_id = %id, count, "Items added");
        Ok(ledger)
    }

    /// Consume up to `quantity` units from an item
    pub async fn consume(
        &self,
        id: LedgerId,
        item_id: ItemId,
        quantity: u32,
        demand: Option<DemandId>,
    ) -> Result<Ledger> {
        if quantity < 1 {
            return Err(BridgeError::validation("quantity", "must be >= 1"));
        }
        let now = self.clock.now();

        let (ledger, (taken, supply)) = self
            .mutate(id, |ledger| {
                let item = ledger
                    .item_mut(item_id)
                    .ok_or_else(|| BridgeError::not_found("item", item_id))?;
                if item.status != ItemStatus::Available {
                    return Err(BridgeError::conflict(format!("item {} is not AVAILABLE", item_id)));
                }
                if item.is_past_expiry(now) {
                    return Err(BridgeError::conflict(format!("item {} has expired", item_id)));
                }

                let taken = quantity.min(item.quantity);
                item.quantity -= taken;
                if item.quantity == 0 {
                    item.status = ItemStatus::Used;
                }
                if demand.is_some() {
                    item.used_for = demand;
                }
                let supply = item.supply;

                ledger.record_usage(now.date_naive(), UsageEntry { item_id, quantity: taken });
                Ok((taken, supply))
            })
            .await?;

        if let Some(metrics) = &self.metrics {
            metrics
                .units_consumed
                .with_label_values(&[&supply.kind().to_string()])
                .inc_by(f64::from(taken));
        }
        info!(ledger_id = %id, item_id = %item_id, supply = %supply, taken, "Item consumed");
        Ok(ledger)
    }

    /// Force an item to EXPIRED
    pub async fn discard(&self, id: LedgerId, item_id: ItemId, reason: DiscardReason) -> Result<Ledger> {
        let (ledger, ()) = self
            .mutate(id, |ledger| {
                let item = ledger
                    .item_mut(item_id)
                    .ok_or_else(|| BridgeError::not_found("item", item_id))?;
                item.status = ItemStatus::Expired;
                Ok(())
            })
            .await?;

        info!(ledger_id = %id, item_id = %item_id, reason = %reason, "Item discarded");
        Ok(ledger)
    }

    /// Rebuild and persist the snapshot
    pub async fn recompute_snapshot(&self, id: LedgerId) -> Result<StockSnapshot> {
        let lock = self.lock_for(id).await?;
        let _guard = lock.lock().await;
        let mut ledger = self.load(id).await?;
        let snapshot = ledger.refresh_snapshot().clone();
        self.store.put_ledger(ledger).await?;
        Ok(snapshot)
    }

    /// Current snapshot, recomputed on read
    pub async fn snapshot(&self, id: LedgerId) -> Result<StockSnapshot> {
        self.recompute_snapshot(id).await
    }

    /// Dashboard summary
    pub async fn summary(&self, id: LedgerId) -> Result<InventorySummary> {
        let ledger = self.load(id).await?;
        Ok(report::summarize(&ledger, self.clock.now()))
    }

    /// AVAILABLE items expiring within `days` (minimum 1)
    pub async fn expiring(&self, id: LedgerId, days: u32) -> Result<ExpiringReport> {
        let ledger = self.load(id).await?;
        Ok(report::expiring_within(&ledger, days, self.clock.now()))
    }

    /// Per-day consumption totals
    pub async fn usage_series(
        &self,
        id: LedgerId,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<UsagePoint>> {
        let ledger = self.load(id).await?;
        Ok(report::usage_series(&ledger, from, to))
    }

    /// Expire every AVAILABLE item past its expiry, across all ledgers.
    /// A failing ledger is logged and skipped.
    pub async fn sweep_expired(&self) -> Result<ExpirySweep> {
        let ids = self.store.ledger_ids().await?;
        let mut sweep = ExpirySweep {
            ledgers: ids.len(),
            ..ExpirySweep::default()
        };

        for id in ids {
            match self.expire_ledger(id).await {
                Ok(n) => sweep.expired += n,
                Err(e) => {
                    sweep.failures += 1;
                    warn!(ledger_id = %id, error = %e, "Expiry sweep failed for ledger");
                    if let Some(metrics) = &self.metrics {
                        metrics.entity_failures.with_label_values(&["expiry"]).inc();
                    }
                }
            }
        }

        debug!(ledgers = sweep.ledgers, expired = sweep.expired, "Expiry sweep finished");
        Ok(sweep)
    }

    async fn expire_ledger(&self, id: LedgerId) -> Result<usize> {
        let now = self.clock.now();
        let lock = self.lock_for(id).await?;
        let (ledger, expired) = {
            let _guard = lock.lock().await;
            let mut ledger = self.load(id).await?;
            let expired = ledger.expire_due(now);
            if expired.is_empty() {
                return Ok(0);
            }
            ledger.updated_at = now;
            ledger.refresh_snapshot();
            self.store.put_ledger(ledger.clone()).await?;
            (ledger, expired)
        };

        for item in &expired {
            info!(ledger_id = %id, item_id = %item.id, supply = %item.supply, "Item expired");
            self.dispatcher
                .dispatch(Event::ItemExpired(ItemExpiredEvent {
                    ledger_id: id,
                    item_id: item.id,
                    supply: item.supply,
                    expired_at: item.expires_at,
                }))
                .await;
        }
        if let Some(metrics) = &self.metrics {
            metrics.items_expired.inc_by(expired.len() as f64);
        }

        self.shortage.evaluate(&ledger, now).await;
        Ok(expired.len())
    }

    /// Current-shortage pass over every ledger
    pub async fn sweep_current_shortages(&self) -> Result<usize> {
        let mut failures = 0;
        for id in self.store.ledger_ids().await? {
            match self.load(id).await {
                Ok(ledger) => {
                    self.shortage.evaluate_current(&ledger).await;
                }
                Err(e) => {
                    failures += 1;
                    warn!(ledger_id = %id, error = %e, "Shortage check failed for ledger");
                }
            }
        }
        Ok(failures)
    }

    /// Projected-shortage pass over every ledger
    pub async fn sweep_projected_shortages(&self) -> Result<usize> {
        let now = self.clock.now();
        let mut failures = 0;
        for id in self.store.ledger_ids().await? {
            match self.load(id).await {
                Ok(ledger) => {
                    self.shortage.evaluate_projected(&ledger, now).await;
                }
                Err(e) => {
                    failures += 1;
                    warn!(ledger_id = %id, error = %e, "Projected shortage check failed for ledger");
                }
            }
        }
        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::ShortageConfig;
    use crate::geo::GeoPoint;
    use crate::model::Hospital;
    use crate::notifier::{Channel, MemoryNotifier};
    use crate::storage::{FaultyStore, MemoryStore, RecordStore};
    use crate::types::{BloodType, Supply};
    use chrono::{Duration, Utc};

    struct Fixture {
        service: Arc<InventoryService>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        notifier: Arc<MemoryNotifier>,
        hospital_id: HospitalId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let dispatcher = Dispatcher::new(notifier.clone(), std::time::Duration::from_secs(1), None);
        let shortage = Arc::new(ShortageAnalyzer::new(ShortageConfig::default(), dispatcher.clone()));

        let hospital_id = HospitalId::new();
        store
            .insert_hospital(Hospital {
                id: hospital_id,
                name: "City General".into(),
                location: Some(GeoPoint::new(77.59, 12.97).unwrap()),
                postal_code: None,
                country: None,
                active: true,
                created_at: clock.now(),
            })
            .await
            .unwrap();

        let service = Arc::new(InventoryService::new(
            store.clone(),
            clock.clone(),
            shortage,
            dispatcher,
            None,
        ));
        Fixture {
            service,
            store,
            clock,
            notifier,
            hospital_id,
        }
    }

    #[tokio::test]
    async fn test_create_ledger_requires_hospital_and_is_unique() {
        let f = fixture().await;
        assert!(matches!(
            f.service.create_ledger(HospitalId::new()).await.unwrap_err(),
            BridgeError::NotFound { .. }
        ));
        f.service.create_ledger(f.hospital_id).await.unwrap();
        assert!(matches!(
            f.service.create_ledger(f.hospital_id).await.unwrap_err(),
            BridgeError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn test_add_items_is_all_or_nothing() {
        let f = fixture().await;
        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        let expiry = f.clock.now() + Duration::days(30);

        let err = f
            .service
            .add_items(
                ledger.id,
                vec![
                    ItemDraft::blood(BloodType::OPos, 2, expiry),
                    ItemDraft::blood(BloodType::OPos, 0, expiry),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Validation { ref field, .. } if field == "items[1].quantity"));
        assert!(f.service.ledger(ledger.id).await.unwrap().items.is_empty());

        assert!(f.service.add_items(ledger.id, vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_consume_clamps_and_marks_used() {
        let f = fixture().await;
        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        let expiry = f.clock.now() + Duration::days(30);
        let ledger = f
            .service
            .add_items(ledger.id, vec![ItemDraft::blood(BloodType::APos, 2, expiry)])
            .await
            .unwrap();
        let item_id = ledger.items[0].id;

        let after = f.service.consume(ledger.id, item_id, 5, None).await.unwrap();
        let item = after.item(item_id).unwrap();
        assert_eq!(item.quantity, 0);
        assert_eq!(item.status, ItemStatus::Used);
        assert_eq!(after.daily_usage[0].entries[0].quantity, 2);
        assert_eq!(after.snapshot, after.compute_snapshot());

        let err = f.service.consume(ledger.id, item_id, 1, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
        let err = f.service.consume(ledger.id, item_id, 0, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Validation { .. }));
        let err = f.service.consume(ledger.id, ItemId::new(), 1, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_consume_rejects_expired_item() {
        let f = fixture().await;
        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        let expiry = f.clock.now() + Duration::hours(1);
        let ledger = f
            .service
            .add_items(ledger.id, vec![ItemDraft::blood(BloodType::APos, 2, expiry)])
            .await
            .unwrap();

        f.clock.advance(Duration::hours(2));
        let err = f.service.consume(ledger.id, ledger.items[0].id, 1, None).await.unwrap_err();
        assert!(matches!(err, BridgeError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_discard_removes_from_snapshot() {
        let f = fixture().await;
        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        let expiry = f.clock.now() + Duration::days(3);
        let ledger = f
            .service
            .add_items(ledger.id, vec![ItemDraft::blood(BloodType::BNeg, 4, expiry)])
            .await
            .unwrap();

        let after = f
            .service
            .discard(ledger.id, ledger.items[0].id, DiscardReason::Damaged)
            .await
            .unwrap();
        assert_eq!(after.snapshot.available(Supply::Blood(BloodType::BNeg)), 0);
    }

    #[tokio::test]
    async fn test_sweep_expires_and_notifies() {
        let f = fixture().await;
        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        let now = f.clock.now();
        f.service
            .add_items(
                ledger.id,
                vec![
                    ItemDraft::blood(BloodType::ONeg, 1, now + Duration::hours(1)),
                    ItemDraft::blood(BloodType::ONeg, 6, now + Duration::days(10)),
                ],
            )
            .await
            .unwrap();

        f.clock.advance(Duration::hours(2));
        let sweep = f.service.sweep_expired().await.unwrap();
        assert_eq!(sweep.expired, 1);
        assert_eq!(f.notifier.on_channel(Channel::Expired).len(), 1);

        let stored = f.store.get_ledger(ledger.id).await.unwrap().unwrap();
        assert_eq!(stored.snapshot.available(Supply::Blood(BloodType::ONeg)), 6);

        assert_eq!(f.service.sweep_expired().await.unwrap().expired, 0);
    }

    #[tokio::test]
    async fn test_unknown_ledger_leaves_no_lock_behind() {
        let f = fixture().await;
        for _ in 0..5 {
            let err = f.service.consume(LedgerId::new(), ItemId::new(), 1, None).await.unwrap_err();
            assert!(matches!(err, BridgeError::NotFound { entity: "ledger", .. }));
            assert!(f.service.snapshot(LedgerId::new()).await.is_err());
        }
        assert_eq!(f.service.locks.len(), 0);

        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        f.service.snapshot(ledger.id).await.unwrap();
        assert_eq!(f.service.locks.len(), 1);
    }

    #[tokio::test]
    async fn test_sweeps_skip_failing_ledger() {
        let store = Arc::new(FaultyStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let dispatcher = Dispatcher::new(notifier.clone(), std::time::Duration::from_secs(1), None);
        let shortage = Arc::new(ShortageAnalyzer::new(ShortageConfig::default(), dispatcher.clone()));
        let service = InventoryService::new(store.clone(), clock.clone(), shortage, dispatcher, None);

        let mut ledgers = Vec::new();
        for name in ["North", "South", "East"] {
            let hospital_id = HospitalId::new();
            store
                .insert_hospital(Hospital {
                    id: hospital_id,
                    name: name.into(),
                    location: None,
                    postal_code: None,
                    country: None,
                    active: true,
                    created_at: clock.now(),
                })
                .await
                .unwrap();
            let ledger = service.create_ledger(hospital_id).await.unwrap();
            service
                .add_items(
                    ledger.id,
                    vec![ItemDraft::blood(BloodType::AbPos, 2, clock.now() + Duration::hours(1))],
                )
                .await
                .unwrap();
            ledgers.push(ledger.id);
        }
        store.break_ledger(ledgers[1]);
        clock.advance(Duration::hours(2));

        let sweep = service.sweep_expired().await.unwrap();
        assert_eq!(sweep, ExpirySweep { ledgers: 3, expired: 2, failures: 1 });
        assert_eq!(notifier.on_channel(Channel::Expired).len(), 2);
        for id in [ledgers[0], ledgers[2]] {
            let stored = store.get_ledger(id).await.unwrap().unwrap();
            assert_eq!(stored.items[0].status, ItemStatus::Expired);
        }

        assert_eq!(service.sweep_current_shortages().await.unwrap(), 1);
        assert_eq!(service.sweep_projected_shortages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_consumes_are_serialized() {
        let f = fixture().await;
        let ledger = f.service.create_ledger(f.hospital_id).await.unwrap();
        let expiry = f.clock.now() + Duration::days(30);
        let ledger = f
            .service
            .add_items(ledger.id, vec![ItemDraft::blood(BloodType::OPos, 20, expiry)])
            .await
            .unwrap();
        let item_id = ledger.items[0].id;

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let service = f.service.clone();
                let id = ledger.id;
                tokio::spawn(async move { service.consume(id, item_id, 1, None).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let stored = f.service.ledger(ledger.id).await.unwrap();
        assert_eq!(stored.item(item_id).unwrap().quantity, 10);
        assert_eq!(stored.snapshot.available(Supply::Blood(BloodType::OPos)), 10);
        assert_eq!(stored.daily_usage.iter().map(|d| d.total()).sum::<u64>(), 10);
    }
}
