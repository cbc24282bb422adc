mod config;
mod core;
mod db;
mod notifications;
mod rpc;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::aggregate::{AggregateRequest, Aggregator};
use crate::core::filter::{FilterSettings, RangeFilter};
use crate::core::format::{range_label, short_addr};
use crate::core::graph;
use crate::core::monitor::Monitor;
use crate::core::{AlertEvent, Clock, SystemClock};
use crate::db::SharedDatabase;
use crate::notifications::{AlertDispatcher, AlertSink, ChannelSink, HistorySink, Notifier};
use crate::rpc::{BalanceSource, TronClient};
use crate::store::{RestStore, StaticWatchList, WatchListSource};

#[derive(Parser)]
#[command(name = "trontrace", version, about = "TRON address transfer tracker")]
struct Cli {
    /// Path to the TOML config file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the watch-list and alert on new transfers
    Monitor,
    /// Newest transfers of an address that pass the amount filters
    Query {
        address: String,
        #[arg(long, default_value_t = 20)]
        count: usize,
        /// Only transfers from the last N days
        #[arg(long)]
        days: Option<u64>,
        #[command(flatten)]
        filters: FilterArgs,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Fund-flow graph of an address as JSON
    Graph {
        address: String,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Current TRX and USDT holdings
    Balance { address: String },
    /// Alerts recorded by the monitor
    History {
        #[arg(long)]
        address: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

/// Amount windows in whole units; a max of 0 means unlimited. Any per-asset
/// flag switches to advanced mode.
#[derive(Args, Debug, Clone, Default)]
struct FilterArgs {
    #[arg(long)]
    min: Option<u64>,
    #[arg(long)]
    max: Option<u64>,
    #[arg(long)]
    trx_min: Option<u64>,
    #[arg(long)]
    trx_max: Option<u64>,
    #[arg(long)]
    usdt_min: Option<u64>,
    #[arg(long)]
    usdt_max: Option<u64>,
}

impl FilterArgs {
    fn settings(&self) -> FilterSettings {
        let window = |min: Option<u64>, max: Option<u64>| RangeFilter::new(min.unwrap_or(1), max.unwrap_or(0));
        let advanced = self.trx_min.is_some() || self.trx_max.is_some() || self.usdt_min.is_some() || self.usdt_max.is_some();
        if advanced {
            FilterSettings::advanced(window(self.trx_min, self.trx_max), window(self.usdt_min, self.usdt_max))
        } else {
            FilterSettings::simple(window(self.min, self.max))
        }
    }

    /// Graph traces always filter per asset; `--min`/`--max` fill in
    /// whichever per-asset bound is missing.
    fn trace_settings(&self) -> FilterSettings {
        let window = |min: Option<u64>, max: Option<u64>| RangeFilter::new(min.unwrap_or(1), max.unwrap_or(0));
        FilterSettings::advanced(
            window(self.trx_min.or(self.min), self.trx_max.or(self.max)),
            window(self.usdt_min.or(self.min), self.usdt_max.or(self.max)),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("trontrace=info".parse()?))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config);
    config.apply_env();

    match cli.command {
        Command::Monitor => run_monitor(config).await,
        Command::Query {
            address,
            count,
            days,
            filters,
            json,
        } => run_query(&config, &address, count, days, &filters, json).await,
        Command::Graph { address, filters } => run_graph(&config, &address, &filters).await,
        Command::Balance { address } => run_balance(&config, &address).await,
        Command::History { address, limit } => run_history(&config, address.as_deref(), limit),
    }
}

fn build_aggregator(config: &Config, client: Arc<TronClient>) -> Aggregator {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    Aggregator::new(client, clock, config.aggregation.clone())
}

fn open_history(config: &Config) -> anyhow::Result<SharedDatabase> {
    let db_path = Path::new(&config.database.path);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let db = SharedDatabase::open(db_path)
        .with_context(|| format!("opening alert history at {}", config.database.path))?;
    tracing::info!("Alert history opened at {}", config.database.path);
    Ok(db)
}

async fn run_monitor(config: Config) -> anyhow::Result<()> {
    tracing::info!("trontrace monitor starting...");

    let client = Arc::new(TronClient::new(&config.tron, config.display.offset())?);
    let aggregator = Arc::new(build_aggregator(&config, client.clone()));

    let watch_list: Arc<dyn WatchListSource> = if config.store.url.is_some() {
        tracing::info!("Watch-list from REST store (bot {})", config.store.bot_id);
        Arc::new(RestStore::new(&config.store)?)
    } else {
        tracing::info!("Watch-list from config ({} entries)", config.watch.len());
        Arc::new(StaticWatchList::new(&config.watch))
    };

    let (alert_tx, mut alert_rx) = mpsc::unbounded_channel::<AlertEvent>();
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(ChannelSink::new(alert_tx))];
    sinks.push(Arc::new(HistorySink::new(open_history(&config)?)));
    if config.notifications.enabled {
        sinks.push(Arc::new(Notifier::new(&config.notifications)));
    }
    let dispatcher = AlertDispatcher::new(sinks);
    tracing::info!("{} alert sinks configured", dispatcher.len());

    // Hand-off point for the chat layer.
    let consumer = tokio::spawn(async move {
        while let Some(event) = alert_rx.recv().await {
            tracing::info!(subscriber = %event.subscriber_id, "ALERT {}", event.summary());
        }
    });

    let balances: Arc<dyn BalanceSource> = client;
    let monitor = Arc::new(Monitor::new(
        aggregator,
        balances,
        watch_list,
        dispatcher,
        Arc::new(SystemClock),
        config.monitor.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(Arc::clone(&monitor).run(shutdown_rx));

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("Shutdown requested");
    shutdown_tx.send(true).ok();
    runner.await.context("monitor task")?;

    // Dropping the monitor closes the alert channel.
    drop(monitor);
    if tokio::time::timeout(Duration::from_secs(5), consumer).await.is_err() {
        tracing::warn!("Alert consumer did not drain in time");
    }
    Ok(())
}

async fn run_query(
    config: &Config,
    address: &str,
    count: usize,
    days: Option<u64>,
    filters: &FilterArgs,
    json: bool,
) -> anyhow::Result<()> {
    let client = Arc::new(TronClient::new(&config.tron, config.display.offset())?);
    let aggregator = build_aggregator(config, client);
    let settings = filters.settings();

    let mut request = AggregateRequest::new(count, settings.clone());
    if let Some(days) = days {
        request = request.within_days(days);
    }
    let records = aggregator.aggregate(address, &request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    println!(
        "{} | TRX {} | USDT {} | {} transfers",
        short_addr(address),
        range_label(&settings.effective(crate::core::Asset::Trx)),
        range_label(&settings.effective(crate::core::Asset::Usdt)),
        records.len()
    );
    for tx in &records {
        let sign = match tx.direction {
            crate::core::Direction::In => '+',
            crate::core::Direction::Out => '-',
        };
        println!(
            "{}  {sign}{:>14}  {:<4} {}  {}",
            tx.display_time,
            tx.display_amount,
            tx.direction,
            short_addr(&tx.other_party),
            short_addr(&tx.hash)
        );
    }
    Ok(())
}

async fn run_graph(config: &Config, address: &str, filters: &FilterArgs) -> anyhow::Result<()> {
    let client = Arc::new(TronClient::new(&config.tron, config.display.offset())?);
    let aggregator = build_aggregator(config, client);

    let graph = graph::trace(&aggregator, address, filters.trace_settings(), &config.trace).await;
    tracing::info!(
        nodes = graph.nodes.len(),
        edges = graph.edges.len(),
        counterparties = graph.distinct_counterparties(),
        "Graph built"
    );
    println!("{}", serde_json::to_string_pretty(&graph)?);
    Ok(())
}

async fn run_balance(config: &Config, address: &str) -> anyhow::Result<()> {
    let client = TronClient::new(&config.tron, config.display.offset())?;
    let balance = client.account(address).await?;
    let created = balance
        .created_at_ms
        .map(|ms| crate::core::format::display_time(ms, config.display.offset()))
        .unwrap_or_else(|| "unknown".to_string());
    println!("{}", short_addr(address));
    println!("  TRX   {}", balance.trx.round_dp(6));
    println!("  USDT  {}", balance.usdt.round_dp(6));
    println!("  created {created}");
    Ok(())
}

fn run_history(config: &Config, address: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let db = open_history(config)?;
    let alerts = match address {
        Some(address) => db.get_alerts_for_address(address, limit)?,
        None => db.get_recent_alerts(limit)?,
    };
    println!("{} of {} alerts", alerts.len(), db.get_alert_count()?);
    for alert in &alerts {
        println!(
            "{}  {}  {:<3} {} {}  {} -> {}",
            alert.created_at,
            short_addr(&alert.address),
            alert.direction,
            alert.amount.round_dp(2),
            alert.asset,
            short_addr(&alert.other_party),
            alert.subscriber_id
        );
    }
    Ok(())
}
