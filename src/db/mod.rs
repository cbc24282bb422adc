pub mod schema;

use rusqlite::Connection;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::core::AlertEvent;

/// A persisted alert from the history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: i64,
    pub subscriber_id: String,
    pub address: String,
    pub asset: String,
    pub direction: String,
    pub other_party: String,
    pub amount: Decimal,
    pub tx_hash: String,
    pub tx_time_ms: i64,
    pub balance_usdt: Decimal,
    pub created_at: String,
}

pub struct Database {
    conn: Connection,
}

/// Thread-safe wrapper around Database.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let db = Database::open(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(db)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append one delivered alert. Re-delivery of the same transfer to the
    /// same subscriber is ignored.
    pub fn store_alert(&self, event: &AlertEvent) -> Result<bool, rusqlite::Error> {
        self.lock().store_alert(event)
    }

    /// Most recent alerts first.
    pub fn get_recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        self.lock().get_recent_alerts(limit)
    }

    /// Alerts for one watched address, newest transfer first.
    pub fn get_alerts_for_address(&self, address: &str, limit: usize) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        self.lock().get_alerts_for_address(address, limit)
    }

    pub fn get_alert_count(&self) -> Result<usize, rusqlite::Error> {
        self.lock().get_alert_count()
    }
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn store_alert(&self, event: &AlertEvent) -> Result<bool, rusqlite::Error> {
        let tx = &event.transfer;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO alerts (subscriber_id, address, asset, direction, other_party, amount, tx_hash, tx_time_ms, balance_usdt, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, datetime('now'))",
            rusqlite::params![
                event.subscriber_id,
                event.address,
                tx.asset.symbol(),
                tx.direction.as_str(),
                tx.other_party,
                tx.raw_amount.to_string(),
                tx.hash,
                tx.timestamp_ms,
                event.balance.usdt.to_string(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn row_to_alert(row: &rusqlite::Row) -> rusqlite::Result<AlertRecord> {
        Ok(AlertRecord {
            id: row.get(0)?,
            subscriber_id: row.get(1)?,
            address: row.get(2)?,
            asset: row.get(3)?,
            direction: row.get(4)?,
            other_party: row.get(5)?,
            amount: decimal_column(row, 6)?,
            tx_hash: row.get(7)?,
            tx_time_ms: row.get(8)?,
            balance_usdt: decimal_column(row, 9)?,
            created_at: row.get(10)?,
        })
    }

    pub fn get_recent_alerts(&self, limit: usize) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subscriber_id, address, asset, direction, other_party, amount, tx_hash, tx_time_ms, balance_usdt, created_at
             FROM alerts ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64], Self::row_to_alert)?;
        rows.collect()
    }

    pub fn get_alerts_for_address(&self, address: &str, limit: usize) -> Result<Vec<AlertRecord>, rusqlite::Error> {
        let mut stmt = self.conn.prepare(
            "SELECT id, subscriber_id, address, asset, direction, other_party, amount, tx_hash, tx_time_ms, balance_usdt, created_at
             FROM alerts WHERE address = ?1 ORDER BY tx_time_ms DESC, id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![address, limit as i64], Self::row_to_alert)?;
        rows.collect()
    }

    pub fn get_alert_count(&self) -> Result<usize, rusqlite::Error> {
        self.conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| {
            row.get::<_, i64>(0).map(|c| c as usize)
        })
    }
}

fn decimal_column(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stats::DailyStats;
    use crate::core::testutil::{FOCAL, transfer, transfer_for};
    use crate::core::{Asset, Balance, Direction, TransferRecord};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn open_temp_db() -> SharedDatabase {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!(
            "trontrace_test_{}_{}.db",
            std::process::id(),
            id
        ));
        // Remove if leftover from previous run
        let _ = std::fs::remove_file(&path);
        SharedDatabase::open(&path).unwrap()
    }

    fn event(subscriber: &str, transfer: TransferRecord) -> AlertEvent {
        AlertEvent {
            subscriber_id: subscriber.into(),
            address: FOCAL.into(),
            transfer,
            balance: Balance {
                trx: Decimal::ONE,
                usdt: Decimal::new(4250, 2),
                created_at_ms: None,
            },
            daily_stats: DailyStats::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()),
        }
    }

    #[test]
    fn store_and_query_alerts() {
        let db = open_temp_db();
        let tx = transfer("TPeer", Asset::Usdt, Direction::In, 125, 1_000);
        assert!(db.store_alert(&event("1", tx)).unwrap());

        let alerts = db.get_recent_alerts(10).unwrap();
        assert_eq!(alerts.len(), 1);
        let a = &alerts[0];
        assert_eq!(a.subscriber_id, "1");
        assert_eq!(a.asset, "USDT");
        assert_eq!(a.direction, "in");
        assert_eq!(a.other_party, "TPeer");
        assert_eq!(a.amount, Decimal::from(125));
        assert_eq!(a.balance_usdt, Decimal::new(4250, 2));
        assert_eq!(a.tx_time_ms, 1_000);
    }

    #[test]
    fn duplicate_delivery_is_ignored() {
        let db = open_temp_db();
        let tx = transfer("TPeer", Asset::Usdt, Direction::In, 5, 1_000);
        assert!(db.store_alert(&event("1", tx.clone())).unwrap());
        assert!(!db.store_alert(&event("1", tx.clone())).unwrap());
        assert!(db.store_alert(&event("2", tx)).unwrap());
        assert_eq!(db.get_alert_count().unwrap(), 2);
    }

    #[test]
    fn transfers_sharing_a_hash_are_stored_separately() {
        let db = open_temp_db();
        let mut first = transfer("TPeer", Asset::Usdt, Direction::In, 5, 1_000);
        first.hash = "batch_tx".into();
        assert!(db.store_alert(&event("1", first.clone())).unwrap());

        let mut second = first.clone();
        second.raw_amount = Decimal::from(8);
        assert!(db.store_alert(&event("1", second)).unwrap());

        let mut elsewhere = event("1", transfer_for("TOther", "TPeer", Asset::Usdt, Direction::In, 5, 1_000));
        elsewhere.address = "TOther".into();
        elsewhere.transfer.hash = "batch_tx".into();
        assert!(db.store_alert(&elsewhere).unwrap());

        assert!(!db.store_alert(&event("1", first)).unwrap());
        assert_eq!(db.get_alert_count().unwrap(), 3);
        assert_eq!(db.get_alerts_for_address("TOther", 10).unwrap().len(), 1);
    }

    #[test]
    fn alert_count_empty() {
        let db = open_temp_db();
        assert_eq!(db.get_alert_count().unwrap(), 0);
    }

    #[test]
    fn recent_alerts_respect_limit() {
        let db = open_temp_db();
        for i in 0..5 {
            let tx = transfer("TPeer", Asset::Trx, Direction::Out, 10 + i, 1_000 + i);
            db.store_alert(&event("1", tx)).unwrap();
        }
        let alerts = db.get_recent_alerts(3).unwrap();
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].tx_time_ms, 1_004);
    }

    #[test]
    fn alerts_by_address() {
        let db = open_temp_db();
        db.store_alert(&event("1", transfer("TPeer", Asset::Usdt, Direction::In, 1, 1_000))).unwrap();
        db.store_alert(&event("1", transfer("TPeer", Asset::Usdt, Direction::In, 2, 3_000))).unwrap();

        let mut other = event("1", transfer_for("TOther", "TPeer", Asset::Usdt, Direction::In, 3, 2_000));
        other.address = "TOther".into();
        db.store_alert(&other).unwrap();

        let alerts = db.get_alerts_for_address(FOCAL, 10).unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(alerts[0].tx_time_ms, 3_000);
        assert!(db.get_alerts_for_address("TNobody", 10).unwrap().is_empty());
    }
}
