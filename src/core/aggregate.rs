use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::{Instant, sleep_until, timeout_at};
use tracing::debug;

use super::filter::FilterSettings;
use super::{Asset, Clock, TransferRecord};
use crate::config::AggregationConfig;
use crate::rpc::TransferSource;

/// What to aggregate for one address.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRequest {
    pub target_count: usize,
    pub settings: FilterSettings,
    /// Drop records older than `now - recency`.
    pub recency: Option<Duration>,
}

impl AggregateRequest {
    pub fn new(target_count: usize, settings: FilterSettings) -> Self {
        Self {
            target_count,
            settings,
            recency: None,
        }
    }

    /// Newest transfers regardless of amount.
    pub fn unfiltered(target_count: usize) -> Self {
        Self::new(target_count, FilterSettings::unfiltered())
    }

    pub fn within(mut self, window: Duration) -> Self {
        self.recency = Some(window);
        self
    }

    /// Window of whole days. Absurd day counts saturate to "everything".
    pub fn within_days(self, days: u64) -> Self {
        self.within(Duration::from_secs(days.saturating_mul(SECS_PER_DAY)))
    }
}

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Why paging stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Target,
    Budget,
    Exhausted,
    Deadline,
}

/// Identity of one transfer. A transaction hash alone is not enough: one
/// transaction can carry several token transfers touching the same address.
#[derive(Debug, PartialEq, Eq, Hash)]
struct TransferKey {
    asset: Asset,
    hash: String,
    from: String,
    to: String,
    amount: Decimal,
    timestamp_ms: i64,
}

impl TransferKey {
    fn of(record: &TransferRecord) -> Self {
        Self {
            asset: record.asset,
            hash: record.hash.clone(),
            from: record.from.clone(),
            to: record.to.clone(),
            amount: record.raw_amount.normalize(),
            timestamp_ms: record.timestamp_ms,
        }
    }
}

/// Independent pagination state for one asset source.
struct Cursor {
    asset: Asset,
    offset: usize,
    exhausted: bool,
    last_call: Option<Instant>,
}

impl Cursor {
    fn new(asset: Asset) -> Self {
        Self {
            asset,
            offset: 0,
            exhausted: false,
            last_call: None,
        }
    }
}

/// Pages both asset sources round-robin, filters, merges and ranks.
pub struct Aggregator {
    source: Arc<dyn TransferSource>,
    clock: Arc<dyn Clock>,
    config: AggregationConfig,
}

impl Aggregator {
    pub fn new(source: Arc<dyn TransferSource>, clock: Arc<dyn Clock>, config: AggregationConfig) -> Self {
        Self { source, clock, config }
    }

    /// At most `target_count` records, newest first. Never fails: upstream
    /// errors and the deadline both just end paging early.
    pub async fn aggregate(&self, address: &str, req: &AggregateRequest) -> Vec<TransferRecord> {
        if req.target_count == 0 {
            return Vec::new();
        }

        let deadline = Instant::now() + self.config.deadline();
        let call_delay = self.config.call_delay();
        let page_size = self.config.page_size.max(1);
        let cutoff = req.recency.map(|window| {
            let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
            self.clock.now_ms().saturating_sub(window_ms)
        });

        let mut cursors: Vec<Cursor> = Asset::ALL.into_iter().map(Cursor::new).collect();
        let mut accumulated: Vec<TransferRecord> = Vec::new();
        let mut seen: HashSet<TransferKey> = HashSet::new();
        let mut examined = 0usize;

        let stop = 'paging: loop {
            for cursor in cursors.iter_mut().filter(|c| !c.exhausted) {
                if let Some(last) = cursor.last_call {
                    let ready = last + call_delay;
                    if ready >= deadline {
                        break 'paging Stop::Deadline;
                    }
                    sleep_until(ready).await;
                }
                if Instant::now() >= deadline {
                    break 'paging Stop::Deadline;
                }

                cursor.last_call = Some(Instant::now());
                let fetch = self
                    .source
                    .fetch_page(cursor.asset, address, page_size, cursor.offset);
                let Ok(page) = timeout_at(deadline, fetch).await else {
                    break 'paging Stop::Deadline;
                };

                cursor.offset += page.fetched;
                examined += page.fetched;
                if page.fetched < page_size {
                    cursor.exhausted = true;
                }

                // Pages arrive newest-first, so once a page reaches past the
                // cutoff every later page is older still.
                if let Some(cutoff) = cutoff {
                    if page.records.iter().any(|r| r.timestamp_ms < cutoff) {
                        cursor.exhausted = true;
                    }
                }

                let filter = req.settings.effective(cursor.asset);
                for record in page.records {
                    if cutoff.is_some_and(|c| record.timestamp_ms < c) {
                        continue;
                    }
                    if !filter.matches(record.raw_amount) {
                        continue;
                    }
                    if !seen.insert(TransferKey::of(&record)) {
                        continue;
                    }
                    accumulated.push(record);
                }
            }

            if accumulated.len() >= req.target_count {
                break Stop::Target;
            }
            if examined >= self.config.max_raw_records {
                break Stop::Budget;
            }
            if cursors.iter().all(|c| c.exhausted) {
                break Stop::Exhausted;
            }
        };

        debug!(
            address,
            ?stop,
            examined,
            matched = accumulated.len(),
            target = req.target_count,
            "Aggregation finished"
        );

        accumulated.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        accumulated.truncate(req.target_count);
        accumulated
    }
}
