pub mod trongrid;
pub mod tronscan;

use std::time::Duration;

use async_trait::async_trait;
use chrono::FixedOffset;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::TronConfig;
use crate::core::{Asset, Balance, TransferPage};

/// One page of an address's transfers for one asset.
///
/// Implementations never fail: any upstream problem is reported as an empty
/// page, which callers treat the same as an exhausted source.
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn fetch_page(&self, asset: Asset, address: &str, limit: usize, start: usize) -> TransferPage;
}

/// Current holdings of an address. All-zero on failure.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self, address: &str) -> Balance;
}

/// Client for the TronScan transfer index and the TronGrid account API.
pub struct TronClient {
    client: Client,
    tronscan_url: String,
    trongrid_url: String,
    api_key: Option<String>,
    usdt_contract: String,
    offset: FixedOffset,
}

impl TronClient {
    pub fn new(config: &TronConfig, offset: FixedOffset) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            tronscan_url: config.tronscan_url.trim_end_matches('/').to_string(),
            trongrid_url: config.trongrid_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            usdt_contract: config.usdt_contract.clone(),
            offset,
        })
    }

    async fn get(&self, url: &str, query: &[(&str, String)]) -> Result<String, SourceError> {
        let mut req = self
            .client
            .get(url)
            .query(query)
            .header("Accept", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("TRON-PRO-API-KEY", key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }
        Ok(body)
    }

    /// Fetch one page of transfers, surfacing upstream errors.
    pub async fn transfers(
        &self,
        asset: Asset,
        address: &str,
        limit: usize,
        start: usize,
    ) -> Result<TransferPage, SourceError> {
        match asset {
            Asset::Trx => {
                let url = format!("{}/transaction", self.tronscan_url);
                let body = self
                    .get(
                        &url,
                        &[
                            ("address", address.to_string()),
                            ("limit", limit.to_string()),
                            ("start", start.to_string()),
                        ],
                    )
                    .await?;
                tronscan::trx_page(&body, address, self.offset)
            }
            Asset::Usdt => {
                let url = format!("{}/token_trc20/transfers", self.tronscan_url);
                let body = self
                    .get(
                        &url,
                        &[
                            ("relatedAddress", address.to_string()),
                            ("contract_address", self.usdt_contract.clone()),
                            ("limit", limit.to_string()),
                            ("start", start.to_string()),
                        ],
                    )
                    .await?;
                tronscan::usdt_page(&body, address, self.offset)
            }
        }
    }

    /// Fetch the account record, surfacing upstream errors.
    pub async fn account(&self, address: &str) -> Result<Balance, SourceError> {
        let url = format!("{}/v1/accounts/{address}", self.trongrid_url);
        let body = self.get(&url, &[]).await?;
        trongrid::parse_account(&body, &self.usdt_contract)
    }
}

#[async_trait]
impl TransferSource for TronClient {
    async fn fetch_page(&self, asset: Asset, address: &str, limit: usize, start: usize) -> TransferPage {
        match self.transfers(asset, address, limit, start).await {
            Ok(page) => {
                debug!(%asset, address, start, fetched = page.fetched, "Fetched transfer page");
                page
            }
            Err(e) => {
                warn!(%asset, address, start, "Transfer fetch failed: {e}");
                TransferPage::empty()
            }
        }
    }
}

#[async_trait]
impl BalanceSource for TronClient {
    async fn balance(&self, address: &str) -> Balance {
        match self.account(address).await {
            Ok(balance) => balance,
            Err(e) => {
                warn!(address, "Balance fetch failed: {e}");
                Balance::default()
            }
        }
    }
}

/// Upstream unavailable: network, timeout, non-2xx or malformed payload.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
}
