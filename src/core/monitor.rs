//! Recurring watch-list poller that turns newly arrived transfers into alerts.
//!
//! Each address is enrolled silently the first time it is seen. From then on
//! a transfer is only reported if it is newer than both the enrollment time
//! and the last check that produced alerts, so history that predates the
//! subscription never fires and nothing fires twice.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, watch};
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use super::aggregate::{AggregateRequest, Aggregator};
use super::stats::DailyStats;
use super::{AlertEvent, Clock, TransferRecord, day_start_ms, utc_day};
use crate::config::MonitorConfig;
use crate::notifications::AlertDispatcher;
use crate::rpc::BalanceSource;
use crate::store::WatchListSource;

/// Per-address watermark. Both fields only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    pub added_at_ms: i64,
    pub last_check_ms: i64,
}

impl Watermark {
    pub fn new(now_ms: i64) -> Self {
        Self {
            added_at_ms: now_ms,
            last_check_ms: now_ms,
        }
    }

    /// True if a transfer at `timestamp_ms` has not been seen yet.
    pub fn admits(&self, timestamp_ms: i64) -> bool {
        timestamp_ms > self.added_at_ms && timestamp_ms > self.last_check_ms
    }

    pub fn high(&self) -> i64 {
        self.added_at_ms.max(self.last_check_ms)
    }

    pub fn advance(&mut self, to_ms: i64) {
        self.last_check_ms = self.last_check_ms.max(to_ms);
    }
}

#[derive(Debug)]
struct AddressState {
    watermark: Watermark,
    stats: Option<DailyStats>,
}

/// What one address check did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressOutcome {
    Enrolled,
    Idle,
    Alerted { transfers: usize, delivered: usize, failed: usize },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub checked: usize,
    pub enrolled: usize,
    pub transfers: usize,
    pub delivered: usize,
    pub failed_deliveries: usize,
    pub faulted: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: AddressOutcome) {
        self.checked += 1;
        match outcome {
            AddressOutcome::Enrolled => self.enrolled += 1,
            AddressOutcome::Idle => {}
            AddressOutcome::Alerted {
                transfers,
                delivered,
                failed,
            } => {
                self.transfers += transfers;
                self.delivered += delivered;
                self.failed_deliveries += failed;
            }
        }
    }
}

pub struct Monitor {
    aggregator: Arc<Aggregator>,
    balances: Arc<dyn BalanceSource>,
    watch_list: Arc<dyn WatchListSource>,
    dispatcher: AlertDispatcher,
    clock: Arc<dyn Clock>,
    config: MonitorConfig,
    states: DashMap<String, Arc<Mutex<AddressState>>>,
}

impl Monitor {
    pub fn new(
        aggregator: Arc<Aggregator>,
        balances: Arc<dyn BalanceSource>,
        watch_list: Arc<dyn WatchListSource>,
        dispatcher: AlertDispatcher,
        clock: Arc<dyn Clock>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            aggregator,
            balances,
            watch_list,
            dispatcher,
            clock,
            config,
            states: DashMap::new(),
        }
    }

    /// Poll until `shutdown` flips. Ticks never overlap; a slow tick delays
    /// the next one instead of bunching.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            initial_delay_secs = self.config.initial_delay_secs,
            "Monitor started"
        );

        tokio::select! {
            _ = sleep(self.config.initial_delay()) => {}
            _ = shutdown.changed() => {
                info!("Monitor stopped before first tick");
                return;
            }
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let summary = self.tick().await;
                    if summary.transfers > 0 || summary.faulted > 0 {
                        info!(
                            checked = summary.checked,
                            transfers = summary.transfers,
                            delivered = summary.delivered,
                            faulted = summary.faulted,
                            "Monitor tick"
                        );
                    } else {
                        debug!(checked = summary.checked, enrolled = summary.enrolled, "Monitor tick");
                    }
                }
                _ = shutdown.changed() => {
                    info!("Monitor stopping");
                    break;
                }
            }
        }
    }

    /// One pass over the watch-list.
    pub async fn tick(self: &Arc<Self>) -> TickSummary {
        let mut summary = TickSummary::default();
        let list = match self.watch_list.load().await {
            Ok(list) => list,
            Err(e) => {
                warn!("Watch-list load failed, skipping tick: {e}");
                return summary;
            }
        };

        self.states.retain(|address, _| list.contains(address));
        if list.is_empty() {
            debug!("Watch-list is empty");
            return summary;
        }

        for (i, (address, subscribers)) in list.iter().enumerate() {
            if i > 0 {
                sleep(self.config.address_delay()).await;
            }

            let monitor = Arc::clone(self);
            let task_address = address.clone();
            let subscribers = subscribers.clone();
            let handle = tokio::spawn(async move { monitor.check_address(&task_address, &subscribers).await });

            match handle.await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    summary.faulted += 1;
                    error!(address = %address, "Address check failed: {e}");
                }
            }
        }

        summary
    }

    /// Check one address and alert its subscribers about anything new.
    pub async fn check_address(&self, address: &str, subscribers: &[String]) -> AddressOutcome {
        let now = self.clock.now_ms();
        let state = match self.states.entry(address.to_string()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(AddressState {
                    watermark: Watermark::new(now),
                    stats: None,
                })));
                info!(address, subscribers = subscribers.len(), "Enrolled address");
                return AddressOutcome::Enrolled;
            }
        };
        let mut state = state.lock().await;

        let recent = self
            .aggregator
            .aggregate(address, &AggregateRequest::unfiltered(self.config.recent_count))
            .await;
        if recent.is_empty() {
            return AddressOutcome::Idle;
        }

        let floor = Decimal::from(self.config.noise_floor);
        let mut fresh: Vec<TransferRecord> = recent
            .into_iter()
            .filter(|tx| state.watermark.admits(tx.timestamp_ms) && tx.raw_amount >= floor)
            .collect();
        if fresh.is_empty() {
            return AddressOutcome::Idle;
        }
        fresh.sort_by_key(|tx| tx.timestamp_ms);

        let balance = self.balances.balance(address).await;
        let today = self.clock.today();
        let mut stats = match state.stats.take() {
            Some(stats) if stats.is_current(today) => stats,
            _ => self.rebuild_stats(address, today, state.watermark).await,
        };

        let mut delivered = 0;
        let mut failed = 0;
        for tx in &fresh {
            if utc_day(tx.timestamp_ms) == today {
                stats.record(today, self.config.stats_asset, tx);
            } else {
                stats.roll_to(today);
            }
            for subscriber in subscribers {
                let event = AlertEvent {
                    subscriber_id: subscriber.clone(),
                    address: address.to_string(),
                    transfer: tx.clone(),
                    balance: balance.clone(),
                    daily_stats: stats.clone(),
                };
                let outcome = self.dispatcher.dispatch(&event).await;
                delivered += outcome.delivered;
                failed += outcome.failed;
            }
        }
        state.stats = Some(stats);

        let newest = fresh.last().map(|tx| tx.timestamp_ms).unwrap_or(now);
        state.watermark.advance(now.max(newest));

        info!(address, transfers = fresh.len(), delivered, failed, "Alerted new transfers");
        AddressOutcome::Alerted {
            transfers: fresh.len(),
            delivered,
            failed,
        }
    }

    /// Today's totals from a lookback fetch, counting only transfers the
    /// watermark already covers. Newer ones are added as they are alerted.
    async fn rebuild_stats(&self, address: &str, today: chrono::NaiveDate, watermark: Watermark) -> DailyStats {
        let lookback = self
            .aggregator
            .aggregate(address, &AggregateRequest::unfiltered(self.config.stats_lookback_count))
            .await;
        let day_start = day_start_ms(today);
        let high = watermark.high();
        let floor = Decimal::from(self.config.noise_floor);
        let stats = DailyStats::rebuild(today, self.config.stats_asset, &lookback, |tx| {
            tx.timestamp_ms >= day_start && tx.timestamp_ms <= high && tx.raw_amount >= floor
        });
        debug!(
            address,
            income = %stats.income,
            expense = %stats.expense,
            from = lookback.len(),
            "Rebuilt daily stats"
        );
        stats
    }
}

#[cfg(test)]
impl Monitor {
    fn tracked(&self) -> usize {
        self.states.len()
    }

    async fn watermark(&self, address: &str) -> Option<Watermark> {
        let state = self.states.get(address).map(|s| Arc::clone(s.value()))?;
        let guard = state.lock().await;
        Some(guard.watermark)
    }

    async fn stats(&self, address: &str) -> Option<DailyStats> {
        let state = self.states.get(address).map(|s| Arc::clone(s.value()))?;
        let guard = state.lock().await;
        guard.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationConfig;
    use crate::core::testutil::{FakeLedger, ManualClock, RecordingSink, transfer_for};
    use crate::core::{Asset, Direction};
    use crate::store::{StoreError, WatchList};
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    const DAY_MS: i64 = 24 * 60 * 60 * 1000;
    // 2024-03-10T12:00:00Z
    const NOON: i64 = 1_710_072_000_000;

    struct SharedWatchList(StdMutex<Option<WatchList>>);

    impl SharedWatchList {
        fn new(entries: &[(&str, &[&str])]) -> Self {
            let list = Self(StdMutex::new(None));
            list.set(entries);
            list
        }

        fn set(&self, entries: &[(&str, &[&str])]) {
            let mut list = WatchList::new();
            for (address, subscribers) in entries {
                for s in *subscribers {
                    list.add(address, s);
                }
            }
            *self.0.lock().unwrap() = Some(list);
        }

        fn break_store(&self) {
            *self.0.lock().unwrap() = None;
        }
    }

    #[async_trait]
    impl WatchListSource for SharedWatchList {
        async fn load(&self) -> Result<WatchList, StoreError> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .ok_or(StoreError::NotConfigured("test store offline"))
        }
    }

    struct Harness {
        ledger: Arc<FakeLedger>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
        watch: Arc<SharedWatchList>,
        monitor: Arc<Monitor>,
    }

    fn harness(entries: &[(&str, &[&str])]) -> Harness {
        let ledger = Arc::new(FakeLedger::new());
        let clock = Arc::new(ManualClock::new(NOON));
        let sink = Arc::new(RecordingSink::new());
        let watch = Arc::new(SharedWatchList::new(entries));
        let aggregator = Arc::new(Aggregator::new(ledger.clone(), clock.clone(), AggregationConfig::default()));
        let monitor = Arc::new(Monitor::new(
            aggregator,
            ledger.clone(),
            watch.clone(),
            AlertDispatcher::new(vec![sink.clone()]),
            clock.clone(),
            MonitorConfig::default(),
        ));
        Harness {
            ledger,
            clock,
            sink,
            watch,
            monitor,
        }
    }

    fn usdt(address: &str, other: &str, direction: Direction, amount: i64, ts: i64) -> crate::core::TransferRecord {
        transfer_for(address, other, Asset::Usdt, direction, amount, ts)
    }

    #[tokio::test(start_paused = true)]
    async fn first_sight_enrolls_without_alerting() {
        let h = harness(&[("TA", &["1"])]);
        h.ledger.push("TA", usdt("TA", "TOld", Direction::In, 500, NOON - 1_000));

        let summary = h.monitor.tick().await;
        assert_eq!(summary.enrolled, 1);
        assert!(h.sink.events().is_empty());
        assert_eq!(h.ledger.calls_for("TA"), 0);
        assert_eq!(h.monitor.watermark("TA").await, Some(Watermark::new(NOON)));
    }

    #[tokio::test(start_paused = true)]
    async fn history_before_enrollment_never_alerts() {
        let h = harness(&[("TA", &["1"])]);
        h.ledger.push("TA", usdt("TA", "TOld", Direction::In, 500, NOON - 1_000));
        h.monitor.tick().await;

        h.clock.advance(30_000);
        let summary = h.monitor.tick().await;
        assert_eq!(summary.transfers, 0);
        assert!(h.sink.events().is_empty());
        assert_eq!(h.ledger.balance_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn new_transfer_alerts_exactly_once() {
        let h = harness(&[("TA", &["1"])]);
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 250, NOON + 5_000));
        h.clock.advance(30_000);
        let summary = h.monitor.tick().await;
        assert_eq!(summary.transfers, 1);
        assert_eq!(summary.delivered, 1);

        h.clock.advance(30_000);
        h.monitor.tick().await;
        h.clock.advance(30_000);
        h.monitor.tick().await;

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].subscriber_id, "1");
        assert_eq!(events[0].transfer.other_party, "TPeer");
        assert_eq!(events[0].balance.usdt, Decimal::new(123456, 2));
        assert_eq!(h.ledger.balance_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dust_below_noise_floor_is_ignored() {
        let h = harness(&[("TA", &["1"])]);
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TDust", Direction::In, 0, NOON + 1_000));
        h.clock.advance(30_000);
        let summary = h.monitor.tick().await;
        assert_eq!(summary.transfers, 0);
        assert!(h.sink.events().is_empty());
        assert_eq!(h.ledger.balance_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn alerts_arrive_oldest_first_for_every_subscriber() {
        let h = harness(&[("TA", &["1", "2"])]);
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TFirst", Direction::In, 10, NOON + 1_000));
        h.ledger.push("TA", usdt("TA", "TThird", Direction::Out, 30, NOON + 3_000));
        h.ledger.push("TA", usdt("TA", "TSecond", Direction::In, 20, NOON + 2_000));
        h.clock.advance(30_000);
        h.monitor.tick().await;

        let events = h.sink.events();
        let seen: Vec<(&str, &str)> = events
            .iter()
            .map(|e| (e.transfer.other_party.as_str(), e.subscriber_id.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("TFirst", "1"),
                ("TFirst", "2"),
                ("TSecond", "1"),
                ("TSecond", "2"),
                ("TThird", "1"),
                ("TThird", "2"),
            ]
        );
        assert_eq!(h.ledger.balance_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_subscriber_does_not_block_others() {
        let h = harness(&[("TA", &["1", "2", "3"])]);
        h.sink.refuse("2");
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 10, NOON + 1_000));
        h.clock.advance(30_000);
        let summary = h.monitor.tick().await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(summary.failed_deliveries, 1);
        let subs: Vec<String> = h.sink.events().into_iter().map(|e| e.subscriber_id).collect();
        assert_eq!(subs, vec!["1", "3"]);

        h.clock.advance(30_000);
        h.monitor.tick().await;
        assert_eq!(h.sink.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_address_does_not_stop_the_tick() {
        let h = harness(&[("TA", &["1"]), ("TB", &["2"])]);
        h.ledger.panic_on_balance("TA");
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 10, NOON + 1_000));
        h.ledger.push("TB", usdt("TB", "TPeer", Direction::In, 10, NOON + 1_000));
        h.clock.advance(30_000);
        let summary = h.monitor.tick().await;

        assert_eq!(summary.faulted, 1);
        assert_eq!(summary.checked, 1);
        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].address, "TB");

        // Unadvanced watermark: the address retries once it recovers.
        assert_eq!(h.monitor.watermark("TA").await, Some(Watermark::new(NOON)));
    }

    #[tokio::test(start_paused = true)]
    async fn watermark_never_moves_backwards() {
        let h = harness(&[("TA", &["1"])]);
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 10, NOON + 10_000));
        h.clock.advance(60_000);
        h.monitor.tick().await;
        let after_alert = h.monitor.watermark("TA").await.unwrap();
        assert_eq!(after_alert.last_check_ms, NOON + 60_000);

        h.clock.set(NOON + 5_000);
        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 10, NOON + 20_000));
        h.monitor.tick().await;
        let later = h.monitor.watermark("TA").await.unwrap();
        assert_eq!(later, after_alert);
        assert_eq!(h.sink.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn removed_address_is_dropped_and_reenrolled() {
        let h = harness(&[("TA", &["1"]), ("TB", &["1"])]);
        h.monitor.tick().await;
        assert_eq!(h.monitor.tracked(), 2);

        h.watch.set(&[("TB", &["1"])]);
        h.clock.advance(30_000);
        h.monitor.tick().await;
        assert_eq!(h.monitor.tracked(), 1);
        assert!(h.monitor.watermark("TA").await.is_none());

        h.watch.set(&[("TA", &["1"]), ("TB", &["1"])]);
        h.clock.advance(30_000);
        let summary = h.monitor.tick().await;
        assert_eq!(summary.enrolled, 1);
        assert_eq!(h.monitor.watermark("TA").await, Some(Watermark::new(NOON + 60_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn emptied_watch_list_drops_every_address() {
        let h = harness(&[("TA", &["1"]), ("TB", &["2"])]);
        h.monitor.tick().await;
        assert_eq!(h.monitor.tracked(), 2);

        h.watch.set(&[]);
        let summary = h.monitor.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(h.monitor.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_watch_list_load_skips_the_tick() {
        let h = harness(&[("TA", &["1"])]);
        h.monitor.tick().await;

        h.watch.break_store();
        let summary = h.monitor.tick().await;
        assert_eq!(summary, TickSummary::default());
        assert_eq!(h.monitor.tracked(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stats_rebuild_counts_only_covered_transfers_of_today() {
        let h = harness(&[("TA", &["1"])]);
        h.ledger.push("TA", usdt("TA", "TYesterday", Direction::In, 1_000, NOON - DAY_MS));
        h.ledger.push("TA", usdt("TA", "TMorning", Direction::In, 100, NOON - 3_600_000));
        h.ledger.push("TA", usdt("TA", "TSpent", Direction::Out, 40, NOON - 1_800_000));
        h.ledger.push(
            "TA",
            transfer_for("TA", "TTrx", Asset::Trx, Direction::In, 9_999, NOON - 600_000),
        );
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TNew", Direction::In, 5, NOON + 1_000));
        h.clock.advance(30_000);
        h.monitor.tick().await;

        let events = h.sink.events();
        assert_eq!(events.len(), 1);
        let stats = &events[0].daily_stats;
        assert_eq!(stats.income, Decimal::from(105));
        assert_eq!(stats.expense, Decimal::from(40));
        assert_eq!(stats.profit(), Decimal::from(65));
    }

    #[tokio::test(start_paused = true)]
    async fn stats_roll_over_at_utc_midnight() {
        let h = harness(&[("TA", &["1"])]);
        h.monitor.tick().await;

        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 100, NOON + 1_000));
        h.clock.advance(30_000);
        h.monitor.tick().await;
        assert_eq!(h.monitor.stats("TA").await.map(|s| s.income), Some(Decimal::from(100)));

        let next_day = NOON + DAY_MS;
        h.ledger.push("TA", usdt("TA", "TPeer", Direction::In, 7, next_day));
        h.clock.set(next_day + 30_000);
        h.monitor.tick().await;

        let stats = h.monitor.stats("TA").await.unwrap();
        assert_eq!(stats.date, utc_day(next_day));
        assert_eq!(stats.income, Decimal::from(7));
        assert_eq!(h.sink.events()[1].daily_stats.income, Decimal::from(7));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let h = harness(&[("TA", &["1"])]);
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&h.monitor).run(rx));

        tokio::time::sleep(std::time::Duration::from_secs(11)).await;
        assert_eq!(h.monitor.tracked(), 1);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
