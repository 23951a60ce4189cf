//! Periodic background tasks
//!
//! ## Table of Contents
//! - **Task**: The four periodic jobs
//! - **Scheduler**: Runs each job on its own interval until shutdown

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::Result;
use crate::inventory::InventoryService;
use crate::matching::MatchingEngine;
use crate::metrics::BridgeMetrics;
use crate::proposal::ProposalService;

/// Periodic job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    /// Expire stale proposals, then widen the search for unmet demand
    Recheck,
    /// Expire inventory items
    Expiry,
    /// Current-shortage pass
    Shortage,
    /// Projected-shortage pass
    ProjectedShortage,
}

impl Task {
    /// Every task
    pub const ALL: [Task; 4] = [Task::Recheck, Task::Expiry, Task::Shortage, Task::ProjectedShortage];

    /// Metric and log label
    pub fn name(&self) -> &'static str {
        match self {
            Task::Recheck => "recheck",
            Task::Expiry => "expiry",
            Task::Shortage => "shortage",
            Task::ProjectedShortage => "projected_shortage",
        }
    }
}

/// Owns the periodic jobs; each gets its dependencies from here rather than
/// from globals
pub struct Scheduler {
    inventory: Arc<InventoryService>,
    matching: Arc<MatchingEngine>,
    proposals: Arc<ProposalService>,
    config: SchedulerConfig,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl Scheduler {
    /// Create the scheduler
    pub fn new(
        inventory: Arc<InventoryService>,
        matching: Arc<MatchingEngine>,
        proposals: Arc<ProposalService>,
        config: SchedulerConfig,
        metrics: Option<Arc<BridgeMetrics>>,
    ) -> Self {
        Self {
            inventory,
            matching,
            proposals,
            config,
            metrics,
        }
    }

    /// Period of a task
    pub fn period(&self, task: Task) -> Duration {
        match task {
            Task::Recheck => self.config.recheck_interval(),
            Task::Expiry => self.config.expiry_interval(),
            Task::Shortage => self.config.shortage_interval(),
            Task::ProjectedShortage => self.config.projected_shortage_interval(),
        }
    }

    /// Run one iteration of a task
    pub async fn run_once(&self, task: Task) -> Result<()> {
        match task {
            Task::Recheck => {
                self.proposals.expire_stale().await?;
                self.matching.recheck_unfulfilled().await?;
            }
            Task::Expiry => {
                self.inventory.sweep_expired().await?;
            }
            Task::Shortage => {
                let failures = self.inventory.sweep_current_shortages().await?;
                self.count_failures(task, failures);
            }
            Task::ProjectedShortage => {
                let failures = self.inventory.sweep_projected_shortages().await?;
                self.count_failures(task, failures);
            }
        }
        Ok(())
    }

    fn count_failures(&self, task: Task, failures: usize) {
        if failures == 0 {
            return;
        }
        if let Some(metrics) = &self.metrics {
            metrics
                .entity_failures
                .with_label_values(&[task.name()])
                .inc_by(failures as f64);
        }
    }

    /// Spawn every task; each stops when `shutdown` fires
    pub fn spawn(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        Task::ALL
            .iter()
            .map(|&task| {
                let scheduler = Arc::clone(self);
                let rx = shutdown.subscribe();
                tokio::spawn(async move { scheduler.run_task(task, rx).await })
            })
            .collect()
    }

    async fn run_task(&self, task: Task, mut shutdown: broadcast::Receiver<()>) {
        let period = self.period(task);
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(task = task.name(), period_secs = period.as_secs(), "Scheduler task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ok = match self.run_once(task).await {
                        Ok(()) => {
                            debug!(task = task.name(), "Scheduler tick finished");
                            true
                        }
                        Err(e) => {
                            warn!(task = task.name(), error = %e, "Scheduler tick failed");
                            false
                        }
                    };
                    if let Some(metrics) = &self.metrics {
                        metrics.record_sweep(task.name(), ok);
                    }
                }
                _ = shutdown.recv() => {
                    info!(task = task.name(), "Scheduler task stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::CoordinatorBuilder;
    use crate::clock::{Clock, ManualClock};
    use crate::geo::{GeoPoint, StaticGeocoder};
    use crate::inventory::{ItemDraft, ItemStatus};
    use crate::notifier::{Channel, MemoryNotifier};
    use crate::registry::HospitalRegistration;
    use crate::storage::FaultyStore;
    use crate::types::BloodType;
    use chrono::Utc;

    #[test]
    fn test_task_names() {
        let names: Vec<&str> = Task::ALL.iter().map(Task::name).collect();
        assert_eq!(names, vec!["recheck", "expiry", "shortage", "projected_shortage"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_task_runs_and_stops() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let coordinator = CoordinatorBuilder::new()
            .with_clock(clock.clone())
            .with_notifier(notifier.clone())
            .with_geocoder(Arc::new(StaticGeocoder::new()))
            .build()
            .unwrap();

        let hospital = coordinator
            .register_hospital(HospitalRegistration {
                name: "Harbor".into(),
                location: Some(GeoPoint::new(10.0, 10.0).unwrap()),
                ..Default::default()
            })
            .await
            .unwrap();
        let ledger = coordinator.create_ledger(hospital.id).await.unwrap();
        let added = coordinator
            .add_items(
                ledger.id,
                vec![ItemDraft::blood(BloodType::APos, 10, clock.now() + chrono::Duration::hours(1))],
            )
            .await
            .unwrap();
        let item_id = added.items[0].id;

        coordinator.spawn_scheduler();
        clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(Duration::from_secs(601)).await;

        let ledger = coordinator.ledger(ledger.id).await.unwrap();
        assert_eq!(ledger.item(item_id).unwrap().status, ItemStatus::Expired);
        assert_eq!(notifier.on_channel(Channel::Expired).len(), 1);

        coordinator.shutdown().await.unwrap();
        assert_eq!(coordinator.scheduler_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_ledger_does_not_stop_tasks() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let notifier = Arc::new(MemoryNotifier::new());
        let store = Arc::new(FaultyStore::new());
        let coordinator = CoordinatorBuilder::new()
            .with_clock(clock.clone())
            .with_notifier(notifier.clone())
            .with_store(store.clone())
            .with_geocoder(Arc::new(StaticGeocoder::new()))
            .build()
            .unwrap();

        let mut ledgers = Vec::new();
        for (name, lon) in [("Harbor", 10.0), ("Ridge", 11.0)] {
            let hospital = coordinator
                .register_hospital(HospitalRegistration {
                    name: name.into(),
                    location: Some(GeoPoint::new(lon, 10.0).unwrap()),
                    ..Default::default()
                })
                .await
                .unwrap();
            let ledger = coordinator.create_ledger(hospital.id).await.unwrap();
            let ledger = coordinator
                .add_items(
                    ledger.id,
                    vec![ItemDraft::blood(BloodType::ONeg, 4, clock.now() + chrono::Duration::hours(1))],
                )
                .await
                .unwrap();
            ledgers.push((ledger.id, ledger.items[0].id));
        }
        let (broken, _) = ledgers[0];
        let (healthy, healthy_item) = ledgers[1];
        store.break_ledger(broken);

        coordinator.spawn_scheduler();
        clock.advance(chrono::Duration::hours(2));
        tokio::time::sleep(Duration::from_secs(601)).await;

        let ledger = coordinator.ledger(healthy).await.unwrap();
        assert_eq!(ledger.item(healthy_item).unwrap().status, ItemStatus::Expired);
        assert_eq!(notifier.on_channel(Channel::Expired).len(), 1);

        let metrics = coordinator.metrics().unwrap();
        assert_eq!(metrics.entity_failures.with_label_values(&["expiry"]).get(), 1.0);
        assert!(metrics.entity_failures.with_label_values(&["shortage"]).get() >= 1.0);
        assert!(metrics.entity_failures.with_label_values(&["projected_shortage"]).get() >= 1.0);
        assert_eq!(metrics.sweep_runs.with_label_values(&["expiry", "ok"]).get(), 1.0);

        // Next period: the expiry task is still alive.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(metrics.sweep_runs.with_label_values(&["expiry", "ok"]).get(), 2.0);
        assert_eq!(coordinator.scheduler_handles(), 4);

        coordinator.shutdown().await.unwrap();
        assert_eq!(coordinator.scheduler_handles(), 0);
    }
}
