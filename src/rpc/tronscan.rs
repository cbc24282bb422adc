//! Normalization of TronScan transfer listings.
//!
//! The TRX and USDT endpoints return differently-shaped rows; both are folded
//! into [`crate::core::TransferRecord`]s relative to the queried address.

use chrono::FixedOffset;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::SourceError;
use crate::core::{Asset, Leg, TransferPage};

/// Native TRX transfer contract.
const TRANSFER_CONTRACT: i64 = 1;

#[derive(Debug, Deserialize)]
struct TrxListing {
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrxRow {
    contract_type: Option<i64>,
    owner_address: Option<String>,
    to_address: Option<String>,
    #[serde(default)]
    amount: Value,
    timestamp: Option<i64>,
    hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Trc20Listing {
    #[serde(default)]
    token_transfers: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Trc20Row {
    from_address: Option<String>,
    to_address: Option<String>,
    #[serde(default)]
    quant: Value,
    block_ts: Option<i64>,
    transaction_id: Option<String>,
}

/// Decode one listing row. A row of the wrong shape is logged and dropped so
/// it cannot take the rest of its page down with it.
fn decode_row<T: DeserializeOwned>(row: Value) -> Option<T> {
    match serde_json::from_value(row) {
        Ok(row) => Some(row),
        Err(e) => {
            debug!("Skipping malformed listing row: {e}");
            None
        }
    }
}

/// Parse an integer base-unit amount that may arrive as a number or a string.
/// Missing amounts count as zero.
pub fn base_units(value: &Value) -> Option<i128> {
    match value {
        Value::Null => Some(0),
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i128)),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                return Some(0);
            }
            s.parse::<i128>()
                .ok()
                .or_else(|| s.parse::<Decimal>().ok().and_then(|d| d.trunc().to_i128()))
        }
        _ => None,
    }
}

/// TRX page from `/api/transaction`. Only plain transfer contracts with a
/// recipient become records; `fetched` still counts every row.
pub fn trx_page(body: &str, address: &str, offset: FixedOffset) -> Result<TransferPage, SourceError> {
    let listing: TrxListing = serde_json::from_str(body)?;
    let fetched = listing.data.len();
    let records = listing
        .data
        .into_iter()
        .filter_map(decode_row::<TrxRow>)
        .filter(|row| row.contract_type == Some(TRANSFER_CONTRACT))
        .filter_map(|row| {
            let to = row.to_address.filter(|a| !a.is_empty())?;
            let amount = Asset::Trx.from_base_units(base_units(&row.amount)?)?;
            Some(
                Leg {
                    from: row.owner_address.unwrap_or_default(),
                    to,
                    amount,
                    timestamp_ms: row.timestamp.unwrap_or_default(),
                    hash: row.hash.unwrap_or_default(),
                }
                .relative_to(address, Asset::Trx, offset),
            )
        })
        .collect();
    Ok(TransferPage { records, fetched })
}

/// USDT page from `/api/token_trc20/transfers`.
pub fn usdt_page(body: &str, address: &str, offset: FixedOffset) -> Result<TransferPage, SourceError> {
    let listing: Trc20Listing = serde_json::from_str(body)?;
    let fetched = listing.token_transfers.len();
    let records = listing
        .token_transfers
        .into_iter()
        .filter_map(decode_row::<Trc20Row>)
        .filter_map(|row| {
            let amount = Asset::Usdt.from_base_units(base_units(&row.quant)?)?;
            Some(
                Leg {
                    from: row.from_address.unwrap_or_default(),
                    to: row.to_address.unwrap_or_default(),
                    amount,
                    timestamp_ms: row.block_ts.unwrap_or_default(),
                    hash: row.transaction_id.unwrap_or_default(),
                }
                .relative_to(address, Asset::Usdt, offset),
            )
        })
        .collect();
    Ok(TransferPage { records, fetched })
}
