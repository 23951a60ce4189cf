//! Outbound notifications
//!
//! ## Table of Contents
//! - **Event**: Every notification the system emits, serialized as `{event, payload}`
//! - **Notifier**: Best-effort delivery trait
//! - **WebhookNotifier**: One webhook URL per channel, logs when unset
//! - **LogNotifier**: Logs every event
//! - **MemoryNotifier**: Records events for assertions
//! - **Dispatcher**: Timeout-bounded, failure-swallowing front for a notifier

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::NotifierConfig;
use crate::error::{BridgeError, Result};
use crate::metrics::BridgeMetrics;
use crate::shortage::{ProjectedShortageAlert, ShortageAlert};
use crate::types::{
    AppointmentId, DemandId, DonorId, HospitalId, ItemId, LedgerId, ProposalId, Supply,
};

/// Delivery channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Current shortages
    Shortage,
    /// Projected shortages
    ProjectedShortage,
    /// Expired inventory
    Expired,
    /// Messages addressed to donors
    Donor,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Shortage => "shortage",
            Channel::ProjectedShortage => "projected_shortage",
            Channel::Expired => "expired",
            Channel::Donor => "donor",
        };
        f.write_str(name)
    }
}

/// Item passed its expiry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemExpiredEvent {
    /// Ledger holding the item
    pub ledger_id: LedgerId,
    /// Item
    pub item_id: ItemId,
    /// Sub-type
    pub supply: Supply,
    /// Expiry time
    pub expired_at: DateTime<Utc>,
}

/// Proposal sent to a donor, carrying the confirmation token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorProposalEvent {
    /// Proposal
    pub proposal_id: ProposalId,
    /// Demand served, if any
    pub demand_id: Option<DemandId>,
    /// Hospital
    pub hospital_id: HospitalId,
    /// Donor
    pub donor_id: DonorId,
    /// Donor phone number
    pub contact: String,
    /// Confirmation token
    pub token: String,
    /// Confirmation deadline
    pub expires_at: DateTime<Utc>,
}

/// Appointment booked after confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentEvent {
    /// Appointment
    pub appointment_id: AppointmentId,
    /// Donor
    pub donor_id: DonorId,
    /// Hospital
    pub hospital_id: HospitalId,
    /// Slot
    pub scheduled_at: DateTime<Utc>,
}

/// Notification payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Event {
    /// Stock below threshold
    Shortage(ShortageAlert),
    /// Projected days of stock below threshold
    FutureShortage(ProjectedShortageAlert),
    /// Item expired
    ItemExpired(ItemExpiredEvent),
    /// Proposal sent to a donor
    DonorProposal(DonorProposalEvent),
    /// Appointment booked
    AppointmentScheduled(AppointmentEvent),
}

impl Event {
    /// Channel this event is delivered on
    pub fn channel(&self) -> Channel {
        match self {
            Event::Shortage(_) => Channel::Shortage,
            Event::FutureShortage(_) => Channel::ProjectedShortage,
            Event::ItemExpired(_) => Channel::Expired,
            Event::DonorProposal(_) | Event::AppointmentScheduled(_) => Channel::Donor,
        }
    }

    /// Wire name, e.g. `SHORTAGE`
    pub fn name(&self) -> &'static str {
        match self {
            Event::Shortage(_) => "SHORTAGE",
            Event::FutureShortage(_) => "FUTURE_SHORTAGE",
            Event::ItemExpired(_) => "ITEM_EXPIRED",
            Event::DonorProposal(_) => "DONOR_PROPOSAL",
            Event::AppointmentScheduled(_) => "APPOINTMENT_SCHEDULED",
        }
    }
}

/// Best-effort notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event
    async fn emit(&self, channel: Channel, event: &Event) -> Result<()>;
}

/// Shared notifier handle
pub type BoxedNotifier = Arc<dyn Notifier>;

/// Logs every event at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn emit(&self, channel: Channel, event: &Event) -> Result<()> {
        let payload = serde_json::to_string(event)?;
        info!(channel = %channel, event = event.name(), payload = %payload, "Notification");
        Ok(())
    }
}

/// POSTs `{event, payload}` to the channel's webhook
pub struct WebhookNotifier {
    client: reqwest::Client,
    config: NotifierConfig,
}

impl WebhookNotifier {
    /// Create from configuration
    pub fn new(config: NotifierConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self { client, config })
    }

    fn url_for(&self, channel: Channel) -> Option<&str> {
        match channel {
            Channel::Shortage => self.config.shortage_url.as_deref(),
            Channel::ProjectedShortage => self.config.projected_shortage_url.as_deref(),
            Channel::Expired => self.config.expired_url.as_deref(),
            Channel::Donor => self.config.donor_url.as_deref(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn emit(&self, channel: Channel, event: &Event) -> Result<()> {
        let Some(url) = self.url_for(channel) else {
            return LogNotifier.emit(channel, event).await;
        };

        let result = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        if let Err(e) = result {
            // Delivery failed; keep the payload in the log.
            LogNotifier.emit(channel, event).await?;
            return Err(BridgeError::upstream(format!("webhook {}: {}", event.name(), e)));
        }
        Ok(())
    }
}

/// Records every event in memory
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    events: Mutex<Vec<(Channel, Event)>>,
}

impl MemoryNotifier {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded events, oldest first
    pub fn events(&self) -> Vec<(Channel, Event)> {
        self.events.lock().clone()
    }

    /// Events recorded on one channel
    pub fn on_channel(&self, channel: Channel) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn emit(&self, channel: Channel, event: &Event) -> Result<()> {
        self.events.lock().push((channel, event.clone()));
        Ok(())
    }
}

/// Delivers events without ever failing the caller
#[derive(Clone)]
pub struct Dispatcher {
    notifier: BoxedNotifier,
    timeout: Duration,
    metrics: Option<Arc<BridgeMetrics>>,
}

impl Dispatcher {
    /// Wrap a notifier
    pub fn new(notifier: BoxedNotifier, timeout: Duration, metrics: Option<Arc<BridgeMetrics>>) -> Self {
        Self {
            notifier,
            timeout,
            metrics,
        }
    }

    /// Deliver an event; failures and timeouts are logged
    pub async fn dispatch(&self, event: Event) {
        let channel = event.channel();
        if let Some(metrics) = &self.metrics {
            metrics.alerts_emitted.with_label_values(&[event.name()]).inc();
        }

        let failure = match tokio::time::timeout(self.timeout, self.notifier.emit(channel, &event)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.timeout),
        };

        warn!(channel = %channel, event = event.name(), error = %failure, "Notification failed");
        if let Some(metrics) = &self.metrics {
            metrics.notifier_failures.with_label_values(&[&channel.to_string()]).inc();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BloodType;

    fn expired_event() -> Event {
        Event::ItemExpired(ItemExpiredEvent {
            ledger_id: LedgerId::new(),
            item_id: ItemId::new(),
            supply: Supply::Blood(BloodType::ONeg),
            expired_at: Utc::now(),
        })
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn emit(&self, _channel: Channel, _event: &Event) -> Result<()> {
            Err(BridgeError::upstream("connection refused"))
        }
    }

    struct HangingNotifier;

    #[async_trait]
    impl Notifier for HangingNotifier {
        async fn emit(&self, _channel: Channel, _event: &Event) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(expired_event()).unwrap();
        assert_eq!(json["event"], "ITEM_EXPIRED");
        assert_eq!(json["payload"]["supply"]["subType"], "O-");
        assert!(json["payload"]["itemId"].is_string());
    }

    #[tokio::test]
    async fn test_memory_notifier_records_channel() {
        let memory = Arc::new(MemoryNotifier::new());
        let dispatcher = Dispatcher::new(memory.clone(), Duration::from_secs(1), None);
        dispatcher.dispatch(expired_event()).await;

        assert_eq!(memory.on_channel(Channel::Expired).len(), 1);
        assert!(memory.on_channel(Channel::Shortage).is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_swallows_failures() {
        let metrics = Arc::new(BridgeMetrics::new().unwrap());
        let dispatcher = Dispatcher::new(Arc::new(FailingNotifier), Duration::from_secs(1), Some(metrics.clone()));
        dispatcher.dispatch(expired_event()).await;
        assert_eq!(metrics.notifier_failures.with_label_values(&["expired"]).get(), 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_times_out() {
        let dispatcher = Dispatcher::new(Arc::new(HangingNotifier), Duration::from_millis(50), None);
        dispatcher.dispatch(expired_event()).await;
    }

    #[tokio::test]
    async fn test_webhook_without_url_logs() {
        let notifier = WebhookNotifier::new(NotifierConfig::default()).unwrap();
        assert!(notifier.emit(Channel::Expired, &expired_event()).await.is_ok());
    }
}
