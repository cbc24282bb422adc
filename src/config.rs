use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::core::Asset;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub tron: TronConfig,
    pub aggregation: AggregationConfig,
    pub monitor: MonitorConfig,
    pub trace: TraceConfig,
    pub display: DisplayConfig,
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub notifications: NotificationConfig,
    /// Static watch-list, used when no remote store is configured.
    pub watch: Vec<WatchEntry>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TronConfig {
    pub tronscan_url: String,
    pub trongrid_url: String,
    pub api_key: Option<String>,
    pub usdt_contract: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    pub page_size: usize,
    /// Ceiling on raw upstream rows examined per aggregation.
    pub max_raw_records: usize,
    pub deadline_secs: u64,
    /// Minimum spacing between successive calls to the same source.
    pub call_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitorConfig {
    pub interval_secs: u64,
    pub initial_delay_secs: u64,
    pub address_delay_ms: u64,
    /// How many recent transfers each tick looks at.
    pub recent_count: usize,
    /// Transfers below this amount never alert.
    pub noise_floor: u64,
    /// Lookback size when daily stats have to be rebuilt.
    pub stats_lookback_count: usize,
    pub stats_asset: Asset,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TraceConfig {
    pub target_count: usize,
    pub lookback_days: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub utc_offset_hours: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    /// Base URL of the REST key-value store. Unset means use `watch` entries.
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub bot_id: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub min_amount: u64,
    pub cooldown_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatchEntry {
    pub address: String,
    #[serde(default)]
    pub subscribers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tron: TronConfig::default(),
            aggregation: AggregationConfig::default(),
            monitor: MonitorConfig::default(),
            trace: TraceConfig::default(),
            display: DisplayConfig::default(),
            store: StoreConfig::default(),
            database: DatabaseConfig::default(),
            notifications: NotificationConfig::default(),
            watch: Vec::new(),
        }
    }
}

impl Default for TronConfig {
    fn default() -> Self {
        Self {
            tronscan_url: "https://apilist.tronscanapi.com/api".into(),
            trongrid_url: "https://api.trongrid.io".into(),
            api_key: None,
            usdt_contract: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".into(),
            request_timeout_secs: 15,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_raw_records: 3000,
            deadline_secs: 15,
            call_delay_ms: 800,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            initial_delay_secs: 10,
            address_delay_ms: 2000,
            recent_count: 10,
            noise_floor: 1,
            stats_lookback_count: 50,
            stats_asset: Asset::Usdt,
        }
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            target_count: 50,
            lookback_days: 180,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { utc_offset_hours: 8 }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            bot_id: "chain_tracker_bot".into(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/alerts.db".into(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_amount: 0,
            cooldown_seconds: 0,
        }
    }
}

impl AggregationConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }

    pub fn call_delay(&self) -> Duration {
        Duration::from_millis(self.call_delay_ms)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn address_delay(&self) -> Duration {
        Duration::from_millis(self.address_delay_ms)
    }
}

impl DisplayConfig {
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix())
    }
}

impl Config {
    /// Load config from a TOML file. Falls back to defaults if file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Secrets come from the environment (after `.env`), overriding the file.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("TRONGRID_API_KEY") {
            if !key.is_empty() {
                self.tron.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("SUPABASE_URL") {
            if !url.is_empty() {
                self.store.url = Some(url);
            }
        }
        if let Ok(key) = std::env::var("SUPABASE_KEY") {
            if !key.is_empty() {
                self.store.api_key = Some(key);
            }
        }
    }
}
