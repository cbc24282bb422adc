pub mod rest;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::WatchEntry;

pub use rest::RestStore;

/// Watched addresses and the subscribers of each, in address order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    entries: BTreeMap<String, Vec<String>>,
}

impl WatchList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `subscriber` to `address`. Repeats are ignored.
    pub fn add(&mut self, address: &str, subscriber: &str) {
        let address = address.trim();
        if address.is_empty() {
            return;
        }
        let subscribers = self.entries.entry(address.to_string()).or_default();
        if !subscribers.iter().any(|s| s == subscriber) {
            subscribers.push(subscriber.to_string());
        }
    }

    #[cfg(test)]
    pub fn subscribers(&self, address: &str) -> Option<&[String]> {
        self.entries.get(address).map(Vec::as_slice)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries.contains_key(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where the monitor learns which addresses to poll. Read-only.
#[async_trait]
pub trait WatchListSource: Send + Sync {
    async fn load(&self) -> Result<WatchList, StoreError>;
}

/// Watch-list fixed in the config file.
pub struct StaticWatchList {
    list: WatchList,
}

impl StaticWatchList {
    pub fn new(entries: &[WatchEntry]) -> Self {
        let mut list = WatchList::new();
        for entry in entries {
            for subscriber in &entry.subscribers {
                list.add(&entry.address, subscriber);
            }
        }
        Self { list }
    }
}

#[async_trait]
impl WatchListSource for StaticWatchList {
    async fn load(&self) -> Result<WatchList, StoreError> {
        Ok(self.list.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed store payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("store not configured: {0}")]
    NotConfigured(&'static str),
}
