use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::SourceError;
use super::tronscan::base_units;
use crate::core::{Asset, Balance};

#[derive(Debug, Deserialize)]
struct AccountListing {
    #[serde(default)]
    data: Vec<Account>,
}

#[derive(Debug, Deserialize)]
struct Account {
    #[serde(default)]
    balance: Value,
    create_time: Option<i64>,
    /// One single-entry map per held token: `{contract: base-unit amount}`.
    #[serde(default)]
    trc20: Vec<HashMap<String, Value>>,
}

/// Parse `/v1/accounts/{address}`. An unknown (never activated) account has
/// no `data` entry and reads as all-zero.
pub fn parse_account(body: &str, usdt_contract: &str) -> Result<Balance, SourceError> {
    let listing: AccountListing = serde_json::from_str(body)?;
    let Some(account) = listing.data.into_iter().next() else {
        return Ok(Balance::default());
    };

    let trx = base_units(&account.balance)
        .and_then(|units| Asset::Trx.from_base_units(units))
        .unwrap_or_default();
    let usdt = account
        .trc20
        .iter()
        .find_map(|token| token.get(usdt_contract))
        .and_then(base_units)
        .and_then(|units| Asset::Usdt.from_base_units(units))
        .unwrap_or_default();

    Ok(Balance {
        trx,
        usdt,
        created_at_ms: account.create_time,
    })
}
