use chrono::{DateTime, FixedOffset};
use rust_decimal::{Decimal, RoundingStrategy};

use super::filter::RangeFilter;

/// `TXyz12...abcd` style shortening for addresses and hashes.
pub fn short_addr(addr: &str) -> String {
    if addr.is_empty() {
        return "???".to_string();
    }
    let chars: Vec<char> = addr.chars().collect();
    if chars.len() <= 10 {
        return addr.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

fn two_places(v: Decimal) -> String {
    format!("{:.2}", v.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
}

/// Compact amount: `1.50M`, `12.00K`, `3.25`.
pub fn compact_amount(amount: Decimal) -> String {
    let million = Decimal::from(1_000_000);
    let thousand = Decimal::from(1_000);
    if amount >= million {
        format!("{}M", two_places(amount / million))
    } else if amount >= thousand {
        format!("{}K", two_places(amount / thousand))
    } else {
        two_places(amount)
    }
}

/// Minute-precision display time in the given offset.
pub fn display_time(timestamp_ms: i64, offset: FixedOffset) -> String {
    if timestamp_ms == 0 {
        return "unknown".to_string();
    }
    match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(t) => t.with_timezone(&offset).format("%Y/%m/%d %H:%M").to_string(),
        None => "unknown".to_string(),
    }
}

pub fn range_label(range: &RangeFilter) -> String {
    if range.max > 0 {
        format!("{} ~ {}", range.min, range.max)
    } else {
        format!("{} ~ unlimited", range.min)
    }
}
