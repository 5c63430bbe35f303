//! SQLite-backed market event store
//!
//! WAL mode, prepared-statement cache, and INSERT OR IGNORE dedup on the
//! (symbol, exchange, timeframe, bar_ts) composite key. Writes hold a
//! single connection behind a parking_lot mutex; everything serializable
//! is prepared before the lock is taken.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags};
use tracing::{debug, info, warn};

use crate::detectors::Strategy;
use crate::events::{map_results, EventSink, MarketEvent};
use crate::scanner::SignalRow;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS market_events (
    id TEXT PRIMARY KEY,
    symbol TEXT NOT NULL,
    exchange TEXT NOT NULL,
    timeframe TEXT NOT NULL,
    bar_ts TEXT NOT NULL,
    tradingview_link TEXT NOT NULL,
    close REAL NOT NULL DEFAULT 0,
    volume_usd REAL NOT NULL DEFAULT 0,
    close_off_low REAL NOT NULL DEFAULT 0,
    pin_down INTEGER NOT NULL DEFAULT 0,
    confluence INTEGER NOT NULL DEFAULT 0,
    is_engulfing INTEGER NOT NULL DEFAULT 0,
    consolidation_bo INTEGER NOT NULL DEFAULT 0,
    consolidation_bo_direction INTEGER NOT NULL DEFAULT 0,
    consolidation_bo_box_age INTEGER NOT NULL DEFAULT 0,
    consolidation_bo_box_height REAL NOT NULL DEFAULT 0,
    consolidation_bo_strength TEXT NOT NULL DEFAULT '',
    channel_bo INTEGER NOT NULL DEFAULT 0,
    channel_bo_direction INTEGER NOT NULL DEFAULT 0,
    channel_bo_age INTEGER NOT NULL DEFAULT 0,
    channel_bo_slope REAL NOT NULL DEFAULT 0,
    channel_bo_height REAL NOT NULL DEFAULT 0,
    wedge_bo INTEGER NOT NULL DEFAULT 0,
    wedge_bo_direction INTEGER NOT NULL DEFAULT 0,
    wedge_bo_age INTEGER NOT NULL DEFAULT 0,
    wedge_bo_slope REAL NOT NULL DEFAULT 0,
    wedge_bo_height REAL NOT NULL DEFAULT 0,
    sma50_bo INTEGER NOT NULL DEFAULT 0,
    sma50_bo_type TEXT NOT NULL DEFAULT '',
    sma50_bo_strength TEXT NOT NULL DEFAULT '',
    pin_up INTEGER NOT NULL DEFAULT 0,
    trend_bo INTEGER NOT NULL DEFAULT 0,
    loaded_bar INTEGER NOT NULL DEFAULT 0,
    bullish_engulfing INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_market_events_key
    ON market_events(symbol, exchange, timeframe, bar_ts);

CREATE INDEX IF NOT EXISTS idx_market_events_recent
    ON market_events(bar_ts DESC);
"#;

pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = Connection::open_with_flags(db_path, flags)
            .with_context(|| format!("failed to open event database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to initialize event schema")?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM market_events", [], |row| row.get(0))
            .unwrap_or(0);
        info!(db_path, existing_events = count, "event store ready");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert events, ignoring rows whose composite key already exists.
    pub fn insert_events(&self, events: &[MarketEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock();
        conn.execute("BEGIN IMMEDIATE", [])?;

        let mut inserted = 0usize;
        {
            let mut stmt = conn.prepare_cached(
                "INSERT OR IGNORE INTO market_events (
                    id, symbol, exchange, timeframe, bar_ts, tradingview_link,
                    close, volume_usd, close_off_low,
                    pin_down, confluence, is_engulfing,
                    consolidation_bo, consolidation_bo_direction, consolidation_bo_box_age,
                    consolidation_bo_box_height, consolidation_bo_strength,
                    channel_bo, channel_bo_direction, channel_bo_age, channel_bo_slope, channel_bo_height,
                    wedge_bo, wedge_bo_direction, wedge_bo_age, wedge_bo_slope, wedge_bo_height,
                    sma50_bo, sma50_bo_type, sma50_bo_strength,
                    pin_up, trend_bo, loaded_bar, bullish_engulfing
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                    ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29, ?30, ?31, ?32, ?33, ?34
                 )",
            )?;

            for event in events {
                let changes = stmt.execute(params![
                    event.id.to_string(),
                    event.symbol,
                    event.exchange,
                    event.timeframe,
                    event.bar_ts.format("%Y-%m-%d %H:%M:%S").to_string(),
                    event.tradingview_link,
                    event.close,
                    event.volume_usd,
                    event.close_off_low,
                    event.pin_down as i64,
                    event.confluence as i64,
                    event.is_engulfing as i64,
                    event.consolidation_bo as i64,
                    event.consolidation_bo_direction,
                    event.consolidation_bo_box_age,
                    event.consolidation_bo_box_height,
                    event.consolidation_bo_strength,
                    event.channel_bo as i64,
                    event.channel_bo_direction,
                    event.channel_bo_age,
                    event.channel_bo_slope,
                    event.channel_bo_height,
                    event.wedge_bo as i64,
                    event.wedge_bo_direction,
                    event.wedge_bo_age,
                    event.wedge_bo_slope,
                    event.wedge_bo_height,
                    event.sma50_bo as i64,
                    event.sma50_bo_type,
                    event.sma50_bo_strength,
                    event.pin_up as i64,
                    event.trend_bo as i64,
                    event.loaded_bar as i64,
                    event.bullish_engulfing as i64,
                ])?;
                if changes > 0 {
                    inserted += 1;
                } else {
                    debug!(
                        symbol = %event.symbol,
                        exchange = %event.exchange,
                        timeframe = %event.timeframe,
                        "duplicate event ignored"
                    );
                }
            }
        }

        conn.execute("COMMIT", [])?;
        Ok(inserted)
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM market_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl EventSink for SqliteEventStore {
    async fn publish(&self, results: &HashMap<Strategy, Vec<SignalRow>>) -> Result<usize> {
        let events = map_results(results);
        if events.is_empty() {
            return Ok(0);
        }
        match self.insert_events(&events) {
            Ok(inserted) => {
                if inserted > 0 {
                    info!(inserted, total = events.len(), "market events stored");
                }
                Ok(inserted)
            }
            Err(e) => {
                warn!(error = %e, "event insertion failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn event(symbol: &str) -> MarketEvent {
        MarketEvent {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            exchange: "BINANCE_SPOT".to_string(),
            timeframe: "1d".to_string(),
            bar_ts: chrono::NaiveDate::from_ymd_opt(2025, 3, 20)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            tradingview_link: "https://example.test".to_string(),
            close: 1.0,
            volume_usd: 2.0,
            close_off_low: 3.0,
            pin_down: false,
            confluence: true,
            is_engulfing: false,
            consolidation_bo: false,
            consolidation_bo_direction: 0,
            consolidation_bo_box_age: 0,
            consolidation_bo_box_height: 0.0,
            consolidation_bo_strength: String::new(),
            channel_bo: false,
            channel_bo_direction: 0,
            channel_bo_age: 0,
            channel_bo_slope: 0.0,
            channel_bo_height: 0.0,
            wedge_bo: false,
            wedge_bo_direction: 0,
            wedge_bo_age: 0,
            wedge_bo_slope: 0.0,
            wedge_bo_height: 0.0,
            sma50_bo: false,
            sma50_bo_type: String::new(),
            sma50_bo_strength: String::new(),
            pin_up: false,
            trend_bo: false,
            loaded_bar: false,
            bullish_engulfing: false,
        }
    }

    #[test]
    fn duplicate_keys_insert_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = SqliteEventStore::new(path.to_str().unwrap()).unwrap();

        // Same composite key, different ids: second insert is ignored.
        let first = store.insert_events(&[event("BTC")]).unwrap();
        let second = store.insert_events(&[event("BTC")]).unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(store.count().unwrap(), 1);

        // Different symbol is a new record.
        assert_eq!(store.insert_events(&[event("ETH")]).unwrap(), 1);
        assert_eq!(store.count().unwrap(), 2);
    }
}
