//! Watch-list reader for the hosted key-value store (PostgREST dialect).
//!
//! The bot's state lives in a single `bot_data` row whose `data` column holds
//! `userData: {userId: {addresses: [...]}}`. Only that part is read here.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{StoreError, WatchList, WatchListSource};
use crate::config::StoreConfig;

#[derive(Debug, Deserialize)]
struct Row {
    #[serde(default)]
    data: Option<BotData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BotData {
    #[serde(default)]
    user_data: BTreeMap<String, UserEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct UserEntry {
    #[serde(default)]
    addresses: Vec<String>,
}

pub struct RestStore {
    client: Client,
    url: String,
    api_key: String,
    bot_id: String,
}

impl RestStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let url = config
            .url
            .as_deref()
            .ok_or(StoreError::NotConfigured("store url"))?;
        let api_key = config
            .api_key
            .clone()
            .ok_or(StoreError::NotConfigured("store api key"))?;
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            bot_id: config.bot_id.clone(),
        })
    }
}

/// Invert the per-user address lists into address -> subscribers.
/// A body with no row is an empty list.
pub fn fold_user_data(body: &str) -> Result<WatchList, StoreError> {
    let body = body.trim();
    if body.is_empty() {
        return Ok(WatchList::new());
    }
    let rows: Vec<Row> = serde_json::from_str(body)?;
    let mut list = WatchList::new();
    if let Some(data) = rows.into_iter().next().and_then(|row| row.data) {
        for (user_id, entry) in &data.user_data {
            for address in &entry.addresses {
                list.add(address, user_id);
            }
        }
    }
    Ok(list)
}

#[async_trait]
impl WatchListSource for RestStore {
    async fn load(&self) -> Result<WatchList, StoreError> {
        let url = format!("{}/rest/v1/bot_data", self.url);
        let resp = self
            .client
            .get(&url)
            .query(&[("bot_id", format!("eq.{}", self.bot_id)), ("select", "data".to_string())])
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(WatchList::new());
        }
        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let list = fold_user_data(&body)?;
        debug!(addresses = list.len(), "Loaded watch-list");
        Ok(list)
    }
}
