use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::NotificationConfig;
use crate::core::AlertEvent;
use crate::db::SharedDatabase;

/// A destination for alert events.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("alert channel closed")]
    ChannelClosed,
    #[error("history write failed: {0}")]
    History(#[from] rusqlite::Error),
}

/// Outcome of fanning one event out to every sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

/// Fans each event out to every sink. A failing sink is logged and skipped.
#[derive(Clone, Default)]
pub struct AlertDispatcher {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl AlertDispatcher {
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub async fn dispatch(&self, event: &AlertEvent) -> Delivery {
        let mut outcome = Delivery::default();
        for sink in &self.sinks {
            match sink.deliver(event).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    outcome.failed += 1;
                    warn!(
                        sink = sink.name(),
                        subscriber = %event.subscriber_id,
                        address = %event.address,
                        hash = %event.transfer.hash,
                        "Alert delivery failed: {e}"
                    );
                }
            }
        }
        outcome
    }
}

/// Hands events to the chat layer over an in-process channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<AlertEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<AlertEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AlertSink for ChannelSink {
    fn name(&self) -> &str {
        "channel"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        self.tx
            .send(event.clone())
            .map_err(|_| DeliveryError::ChannelClosed)
    }
}

/// Appends every alert to the SQLite history.
pub struct HistorySink {
    db: SharedDatabase,
}

impl HistorySink {
    pub fn new(db: SharedDatabase) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AlertSink for HistorySink {
    fn name(&self) -> &str {
        "history"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        self.db.store_alert(event)?;
        Ok(())
    }
}

/// Desktop notification sender with cooldown to prevent spam.
pub struct Notifier {
    enabled: bool,
    min_amount: Decimal,
    cooldown: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl Notifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            enabled: config.enabled,
            min_amount: Decimal::from(config.min_amount),
            cooldown: Duration::from_secs(config.cooldown_seconds),
            last_sent: Mutex::new(None),
        }
    }

    /// Send a desktop notification for an alert unless it is disabled, too
    /// small or inside the cooldown. Returns whether one was sent.
    pub fn notify(&self, event: &AlertEvent) -> bool {
        if !self.admits(event) {
            return false;
        }
        self.send_notification(event);
        true
    }

    /// Amount gate first, so a small transfer never starts the cooldown.
    fn admits(&self, event: &AlertEvent) -> bool {
        self.enabled && event.transfer.raw_amount >= self.min_amount && self.take_cooldown_slot()
    }

    fn take_cooldown_slot(&self) -> bool {
        let mut last = match self.last_sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        if let Some(prev) = *last {
            if now.duration_since(prev) < self.cooldown {
                return false;
            }
        }
        *last = Some(now);
        true
    }

    /// Fire-and-forget: send the actual desktop notification.
    fn send_notification(&self, event: &AlertEvent) {
        let title = format!("trontrace: {} {}", event.transfer.direction, event.transfer.asset);
        let body = event.summary();

        // Off the async runtime; notification backends block.
        std::thread::spawn(move || {
            if let Err(e) = notify_rust::Notification::new()
                .summary(&title)
                .body(&body)
                .show()
            {
                tracing::debug!("Desktop notification failed: {e}");
            }
        });
    }
}

#[async_trait]
impl AlertSink for Notifier {
    fn name(&self) -> &str {
        "desktop"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        if !self.notify(event) {
            debug!(hash = %event.transfer.hash, "Desktop notification skipped");
        }
        Ok(())
    }
}
