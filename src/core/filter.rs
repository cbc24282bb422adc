use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Asset;

/// Inclusive amount window in display units. `max == 0` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter {
    pub min: u64,
    pub max: u64,
}

impl RangeFilter {
    pub const UNBOUNDED: RangeFilter = RangeFilter { min: 0, max: 0 };

    pub fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }

    pub fn matches(&self, amount: Decimal) -> bool {
        if amount < Decimal::from(self.min) {
            return false;
        }
        self.max == 0 || amount <= Decimal::from(self.max)
    }
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self { min: 1, max: 0 }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Simple,
    Advanced,
}

/// Per-caller filter configuration. In simple mode one window applies to every
/// asset; in advanced mode each asset has its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterSettings {
    pub mode: FilterMode,
    pub unified: RangeFilter,
    pub per_asset: BTreeMap<Asset, RangeFilter>,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            mode: FilterMode::Simple,
            unified: RangeFilter::default(),
            per_asset: Asset::ALL
                .iter()
                .map(|a| (*a, RangeFilter::default()))
                .collect(),
        }
    }
}

impl FilterSettings {
    pub fn simple(unified: RangeFilter) -> Self {
        Self {
            mode: FilterMode::Simple,
            unified,
            ..Self::default()
        }
    }

    pub fn advanced(trx: RangeFilter, usdt: RangeFilter) -> Self {
        Self {
            mode: FilterMode::Advanced,
            unified: RangeFilter::default(),
            per_asset: BTreeMap::from([(Asset::Trx, trx), (Asset::Usdt, usdt)]),
        }
    }

    /// Accept everything, dust included.
    pub fn unfiltered() -> Self {
        Self::simple(RangeFilter::UNBOUNDED)
    }

    pub fn effective(&self, asset: Asset) -> RangeFilter {
        match self.mode {
            FilterMode::Simple => self.unified,
            FilterMode::Advanced => self.per_asset.get(&asset).copied().unwrap_or_default(),
        }
    }

    pub fn matches(&self, asset: Asset, amount: Decimal) -> bool {
        self.effective(asset).matches(amount)
    }
}
