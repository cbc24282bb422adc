use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Asset, Direction, TransferRecord};

/// Rolling per-address totals for one calendar day, restricted to one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub income: Decimal,
    pub expense: Decimal,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            income: Decimal::ZERO,
            expense: Decimal::ZERO,
        }
    }

    pub fn profit(&self) -> Decimal {
        self.income - self.expense
    }

    pub fn is_current(&self, today: NaiveDate) -> bool {
        self.date == today
    }

    /// Zero both totals if the day has changed.
    pub fn roll_to(&mut self, today: NaiveDate) {
        if self.date != today {
            *self = Self::new(today);
        }
    }

    /// Add one transfer of `asset` to today's totals. Other assets are ignored.
    pub fn record(&mut self, today: NaiveDate, asset: Asset, tx: &TransferRecord) {
        self.roll_to(today);
        if tx.asset != asset {
            return;
        }
        match tx.direction {
            Direction::In => self.income += tx.raw_amount,
            Direction::Out => self.expense += tx.raw_amount,
        }
    }

    /// Rebuild today's totals from a lookback set. `include` selects which
    /// transfers count (the caller excludes those it will add incrementally).
    pub fn rebuild<'a>(
        today: NaiveDate,
        asset: Asset,
        transfers: impl IntoIterator<Item = &'a TransferRecord>,
        include: impl Fn(&TransferRecord) -> bool,
    ) -> Self {
        let mut stats = Self::new(today);
        for tx in transfers {
            if include(tx) {
                stats.record(today, asset, tx);
            }
        }
        stats
    }
}
