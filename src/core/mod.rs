pub mod aggregate;
pub mod filter;
pub mod format;
pub mod graph;
pub mod monitor;
pub mod stats;
#[cfg(test)]
pub mod testutil;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use self::stats::DailyStats;

/// Assets tracked per address. Both are fetched from separate upstream endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Asset {
    #[serde(rename = "TRX")]
    Trx,
    #[serde(rename = "USDT")]
    Usdt,
}

impl Asset {
    pub const ALL: [Asset; 2] = [Asset::Trx, Asset::Usdt];

    /// Fixed base-unit precision (sun for TRX, TRC-20 decimals for USDT).
    pub fn decimals(&self) -> u32 {
        match self {
            Asset::Trx => 6,
            Asset::Usdt => 6,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Asset::Trx => "TRX",
            Asset::Usdt => "USDT",
        }
    }

    /// Convert an integer base-unit amount into display units.
    pub fn from_base_units(&self, units: i128) -> Option<Decimal> {
        Decimal::try_from_i128_with_scale(units, self.decimals())
            .ok()
            .map(|d| d.normalize())
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Asset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TRX" => Ok(Asset::Trx),
            "USDT" => Ok(Asset::Usdt),
            other => Err(format!("unknown asset {other:?}")),
        }
    }
}

/// Direction of a transfer relative to the address being queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side-neutral transfer as reported by an upstream index.
#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub from: String,
    pub to: String,
    pub amount: Decimal,
    pub timestamp_ms: i64,
    pub hash: String,
}

impl Leg {
    /// Resolve the leg against the queried address.
    pub fn relative_to(self, address: &str, asset: Asset, offset: FixedOffset) -> TransferRecord {
        let (direction, other_party) = if self.from == address {
            (Direction::Out, self.to.clone())
        } else {
            (Direction::In, self.from.clone())
        };
        TransferRecord {
            display_amount: format!("{} {}", format::compact_amount(self.amount), asset),
            display_time: format::display_time(self.timestamp_ms, offset),
            from: self.from,
            to: self.to,
            other_party,
            direction,
            raw_amount: self.amount,
            asset,
            timestamp_ms: self.timestamp_ms,
            hash: self.hash,
        }
    }
}

/// A normalized transfer. `other_party` and `direction` are relative to the
/// address that was queried, not absolute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub from: String,
    pub to: String,
    pub other_party: String,
    pub direction: Direction,
    pub raw_amount: Decimal,
    pub display_amount: String,
    pub asset: Asset,
    pub timestamp_ms: i64,
    pub display_time: String,
    pub hash: String,
}

/// One upstream page: normalized records plus the number of raw rows the
/// page held. Cursors and exhaustion are driven by `fetched`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferPage {
    pub records: Vec<TransferRecord>,
    pub fetched: usize,
}

impl TransferPage {
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Balance snapshot of an address. All-zero when the lookup failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub trx: Decimal,
    pub usdt: Decimal,
    pub created_at_ms: Option<i64>,
}

/// Emitted once per new transfer per subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub subscriber_id: String,
    pub address: String,
    pub transfer: TransferRecord,
    pub balance: Balance,
    pub daily_stats: DailyStats,
}

impl AlertEvent {
    /// One-line summary for logs and notifications.
    pub fn summary(&self) -> String {
        let sign = match self.transfer.direction {
            Direction::In => '+',
            Direction::Out => '-',
        };
        format!(
            "{} {sign}{} {} {} {} | today +{} -{} | balance {} USDT",
            format::short_addr(&self.address),
            self.transfer.raw_amount.round_dp(2),
            self.transfer.asset,
            if self.transfer.direction == Direction::In { "from" } else { "to" },
            format::short_addr(&self.transfer.other_party),
            self.daily_stats.income.round_dp(0),
            self.daily_stats.expense.round_dp(0),
            self.balance.usdt.round_dp(2),
        )
    }
}

/// Wall-clock source, injected so tests control "now".
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    fn today(&self) -> NaiveDate {
        utc_day(self.now_ms())
    }
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Calendar day (UTC) containing the given instant.
pub fn utc_day(ms: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.date_naive())
        .unwrap_or(NaiveDate::MIN)
}

/// First millisecond of a UTC calendar day.
pub fn day_start_ms(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp_millis())
        .unwrap_or_default()
}
