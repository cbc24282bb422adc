use rusqlite::Connection;

pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS alerts (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            subscriber_id TEXT NOT NULL,
            address       TEXT NOT NULL,
            asset         TEXT NOT NULL,
            direction     TEXT NOT NULL,
            other_party   TEXT NOT NULL,
            amount        TEXT NOT NULL, -- decimal string
            tx_hash       TEXT NOT NULL,
            tx_time_ms    INTEGER NOT NULL,
            balance_usdt  TEXT NOT NULL,
            created_at    TEXT NOT NULL
        );

        -- one row per (subscriber, transfer); a tx hash can carry several transfers
        DROP INDEX IF EXISTS idx_alerts_delivery;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_alerts_transfer
            ON alerts(subscriber_id, address, asset, tx_hash, direction, other_party, amount, tx_time_ms);
        CREATE INDEX IF NOT EXISTS idx_alerts_address ON alerts(address, tx_time_ms DESC);
        CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at DESC);
        ",
    )?;
    Ok(())
}
