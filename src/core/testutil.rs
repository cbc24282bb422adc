//! Fakes shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use rust_decimal::Decimal;

use super::{AlertEvent, Asset, Balance, Clock, Direction, Leg, TransferPage, TransferRecord};
use crate::notifications::{AlertSink, DeliveryError};
use crate::rpc::{BalanceSource, TransferSource};

pub const FOCAL: &str = "TFocalAddressFocalAddressFocal001";

/// A transfer of `amount` whole units between [`FOCAL`] and `other`.
pub fn transfer(other: &str, asset: Asset, direction: Direction, amount: i64, timestamp_ms: i64) -> TransferRecord {
    transfer_for(FOCAL, other, asset, direction, amount, timestamp_ms)
}

pub fn transfer_for(
    address: &str,
    other: &str,
    asset: Asset,
    direction: Direction,
    amount: i64,
    timestamp_ms: i64,
) -> TransferRecord {
    let (from, to) = match direction {
        Direction::In => (other, address),
        Direction::Out => (address, other),
    };
    Leg {
        from: from.to_string(),
        to: to.to_string(),
        amount: Decimal::from(amount),
        timestamp_ms,
        hash: format!("{asset}-{timestamp_ms}-{other}-{amount}"),
    }
    .relative_to(address, asset, FixedOffset::east_opt(0).unwrap())
}

pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self(AtomicI64::new(now_ms))
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: i64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-memory ledger serving offset-paginated, newest-first transfer lists.
#[derive(Default)]
pub struct FakeLedger {
    transfers: Mutex<HashMap<(String, Asset), Vec<TransferRecord>>>,
    failing_assets: Mutex<HashSet<Asset>>,
    panicking_balances: Mutex<HashSet<String>>,
    latency: Duration,
    calls: Mutex<Vec<(String, Asset, usize)>>,
    balance_calls: Mutex<Vec<String>>,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Record a transfer as seen from `address`.
    pub fn push(&self, address: &str, record: TransferRecord) {
        let mut transfers = self.transfers.lock().unwrap();
        let list = transfers.entry((address.to_string(), record.asset)).or_default();
        list.push(record);
        list.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
    }

    pub fn fail_asset(&self, asset: Asset) {
        self.failing_assets.lock().unwrap().insert(asset);
    }

    pub fn panic_on_balance(&self, address: &str) {
        self.panicking_balances.lock().unwrap().insert(address.to_string());
    }

    /// Start offsets of every page request for `asset`, in call order.
    pub fn offsets(&self, asset: Asset) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, a, _)| *a == asset)
            .map(|(_, _, start)| *start)
            .collect()
    }

    pub fn calls_for(&self, address: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|(a, _, _)| a == address).count()
    }

    pub fn balance_calls(&self) -> usize {
        self.balance_calls.lock().unwrap().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl TransferSource for FakeLedger {
    async fn fetch_page(&self, asset: Asset, address: &str, limit: usize, start: usize) -> TransferPage {
        self.calls.lock().unwrap().push((address.to_string(), asset, start));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.failing_assets.lock().unwrap().contains(&asset) {
            return TransferPage::empty();
        }
        let transfers = self.transfers.lock().unwrap();
        let records: Vec<TransferRecord> = transfers
            .get(&(address.to_string(), asset))
            .map(|list| list.iter().skip(start).take(limit).cloned().collect())
            .unwrap_or_default();
        TransferPage {
            fetched: records.len(),
            records,
        }
    }
}

#[async_trait]
impl BalanceSource for FakeLedger {
    async fn balance(&self, address: &str) -> Balance {
        self.balance_calls.lock().unwrap().push(address.to_string());
        if self.panicking_balances.lock().unwrap().contains(address) {
            panic!("balance backend exploded for {address}");
        }
        Balance {
            trx: Decimal::from(100),
            usdt: Decimal::new(123456, 2),
            created_at_ms: None,
        }
    }
}

/// Captures delivered alerts; refuses delivery for chosen subscribers.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AlertEvent>>,
    refuse: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse(&self, subscriber: &str) {
        self.refuse.lock().unwrap().insert(subscriber.to_string());
    }

    pub fn events(&self) -> Vec<AlertEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &AlertEvent) -> Result<(), DeliveryError> {
        if self.refuse.lock().unwrap().contains(&event.subscriber_id) {
            return Err(DeliveryError::ChannelClosed);
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
