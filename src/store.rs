// =============================================================================
// Store — SQLite event log and tabular persistence
// =============================================================================
//
// One database file (WAL mode) holds everything the engine persists:
//   swap_events     — append-only, UNIQUE on tx_signature (webhook idempotency)
//   scored_signals  — append-only scoring audit trail
//   orders          — append-only status records (a status change is a new row)
//   positions       — mutable aggregate, one row per position
//   breaker_events  — append-only activation/deactivation pairs
//   configs         — versioned config rows, exactly one 'active'
//   wallets         — watchlist + stats, written by the discovery tooling,
//                     read by the wallet cache on warmup/refresh
//
// Access goes through a parking_lot Mutex'd connection; every method takes
// the lock briefly and never holds it across await points (the store is
// sync by design — callers are either sync or wrap calls that matter in
// spawn_blocking at a higher level if they ever become hot).
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::position::Position;
use crate::scorer::ScoredSignal;
use crate::swap_queue::Order;
use crate::types::{Direction, OrderKind, OrderStatus, SwapEvent, TradeMode};
use crate::wallet_cache::WalletEntry;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS swap_events (
    tx_signature TEXT PRIMARY KEY,
    wallet TEXT NOT NULL,
    token TEXT NOT NULL,
    direction TEXT NOT NULL,
    amount_token REAL NOT NULL,
    amount_sol REAL NOT NULL,
    slot INTEGER NOT NULL,
    ts TEXT NOT NULL,
    raw_payload TEXT NOT NULL,
    recorded_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_swap_events_wallet_ts
    ON swap_events(wallet, ts DESC);

CREATE TABLE IF NOT EXISTS scored_signals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tx_signature TEXT NOT NULL,
    wallet TEXT NOT NULL,
    token TEXT NOT NULL,
    final_score REAL NOT NULL,
    conviction_tier TEXT NOT NULL,
    position_multiplier REAL NOT NULL,
    detail_json TEXT NOT NULL,
    scored_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scored_signals_wallet
    ON scored_signals(wallet, scored_at DESC);

CREATE TABLE IF NOT EXISTS orders (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL,
    position_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    error TEXT,
    tx_signature TEXT,
    requested_at TEXT NOT NULL,
    submitted_at TEXT,
    completed_at TEXT,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_orders_position
    ON orders(position_id, seq);

CREATE INDEX IF NOT EXISTS idx_orders_tx
    ON orders(tx_signature);

CREATE TABLE IF NOT EXISTS positions (
    id TEXT PRIMARY KEY,
    wallet TEXT NOT NULL,
    token TEXT NOT NULL,
    status TEXT NOT NULL,
    body_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_positions_status
    ON positions(status, updated_at DESC);

CREATE TABLE IF NOT EXISTS breaker_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    reason TEXT NOT NULL,
    metrics_json TEXT NOT NULL,
    thresholds_json TEXT NOT NULL,
    at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    version INTEGER,
    status TEXT NOT NULL,
    body_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS wallets (
    address TEXT PRIMARY KEY,
    is_monitored INTEGER NOT NULL,
    is_blacklisted INTEGER NOT NULL,
    cluster_id TEXT,
    is_cluster_leader INTEGER NOT NULL DEFAULT 0,
    amplification REAL NOT NULL DEFAULT 1.0,
    reputation REAL NOT NULL DEFAULT 0.5,
    win_rate REAL NOT NULL DEFAULT 0.5,
    avg_pnl_pct REAL NOT NULL DEFAULT 0.0,
    timing_percentile REAL NOT NULL DEFAULT 0.5,
    consistency REAL NOT NULL DEFAULT 0.5,
    is_decaying INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
) WITHOUT ROWID;
"#;

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply database schema")?;
        info!(path = %path.display(), "store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, used by tests and available as a last-resort
    /// fallback when no database path is configured.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
        conn.execute_batch(SCHEMA_SQL)
            .context("failed to apply database schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Swap events (append-only, idempotent on tx_signature)
    // -------------------------------------------------------------------------

    /// Record a parsed swap event with its raw payload. Returns `false` when
    /// the tx_signature was already recorded (idempotent re-delivery).
    pub fn record_swap_event(&self, event: &SwapEvent, raw_payload: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO swap_events
             (tx_signature, wallet, token, direction, amount_token, amount_sol, slot, ts, raw_payload, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.tx_signature,
                event.wallet,
                event.token,
                event.direction.to_string(),
                event.amount_token,
                event.amount_sol,
                event.slot as i64,
                event.ts.to_rfc3339(),
                raw_payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            debug!(tx = %event.tx_signature, "duplicate swap event ignored");
        }
        Ok(inserted > 0)
    }

    pub fn swap_event_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM swap_events", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    pub fn swap_events_for_wallet(&self, wallet: &str, limit: usize) -> Result<Vec<SwapEvent>> {
        self.query_swap_events(
            "SELECT tx_signature, wallet, token, direction, amount_token, amount_sol, slot, ts
             FROM swap_events WHERE wallet = ?1 ORDER BY ts DESC LIMIT ?2",
            params![wallet, limit as i64],
        )
    }

    pub fn swap_events_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<SwapEvent>> {
        self.query_swap_events(
            "SELECT tx_signature, wallet, token, direction, amount_token, amount_sol, slot, ts
             FROM swap_events WHERE ts >= ?1 AND ts < ?2 ORDER BY ts DESC LIMIT ?3",
            params![from.to_rfc3339(), to.to_rfc3339(), limit as i64],
        )
    }

    fn query_swap_events(
        &self,
        sql: &str,
        query_params: impl rusqlite::Params,
    ) -> Result<Vec<SwapEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(query_params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (tx_signature, wallet, token, direction, amount_token, amount_sol, slot, ts) = row?;
            events.push(SwapEvent {
                tx_signature,
                wallet,
                token,
                direction: if direction == "sell" {
                    Direction::Sell
                } else {
                    Direction::Buy
                },
                amount_token,
                amount_sol,
                slot: slot as u64,
                ts: parse_ts(&ts),
            });
        }
        Ok(events)
    }

    // -------------------------------------------------------------------------
    // Scored signals
    // -------------------------------------------------------------------------

    pub fn insert_scored_signal(&self, signal: &ScoredSignal) -> Result<()> {
        let detail = serde_json::to_string(signal)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO scored_signals
             (tx_signature, wallet, token, final_score, conviction_tier, position_multiplier, detail_json, scored_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                signal.tx_signature,
                signal.wallet,
                signal.token,
                signal.final_score,
                signal.conviction_tier.to_string(),
                signal.position_multiplier,
                detail,
                signal.scored_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn scored_signal_count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM scored_signals", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    // -------------------------------------------------------------------------
    // Orders (append-only status records)
    // -------------------------------------------------------------------------

    pub fn insert_order(&self, order: &Order) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO orders
             (id, position_id, kind, mode, status, retry_count, max_retries, error, tx_signature,
              requested_at, submitted_at, completed_at, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                order.id,
                order.position_id,
                order.kind.to_string(),
                order.mode.to_string(),
                order.status.to_string(),
                order.retry_count,
                order.max_retries,
                order.error,
                order.tx_signature,
                order.requested_at.to_rfc3339(),
                order.submitted_at.map(|t| t.to_rfc3339()),
                order.completed_at.map(|t| t.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Latest status record per order id for the given position, oldest
    /// first.
    pub fn orders_for_position(&self, position_id: &str) -> Result<Vec<Order>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, position_id, kind, mode, status, retry_count, max_retries, error,
                    tx_signature, requested_at, submitted_at, completed_at
             FROM orders
             WHERE position_id = ?1
               AND seq IN (SELECT MAX(seq) FROM orders WHERE position_id = ?1 GROUP BY id)
             ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![position_id], row_to_order)?;
        let mut orders = Vec::new();
        for row in rows {
            orders.push(row?);
        }
        Ok(orders)
    }

    /// Whether a live order already executed with this on-chain signature.
    pub fn has_executed_order_tx(&self, tx_signature: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE tx_signature = ?1 AND status = 'executed'",
            params![tx_signature],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    // -------------------------------------------------------------------------
    // Positions (mutable aggregate)
    // -------------------------------------------------------------------------

    pub fn upsert_position(&self, position: &Position) -> Result<()> {
        let body = serde_json::to_string(position)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO positions (id, wallet, token, status, body_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 status = excluded.status,
                 body_json = excluded.body_json,
                 updated_at = excluded.updated_at",
            params![
                position.id,
                position.wallet,
                position.token,
                position.status.to_string(),
                body,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_positions(&self, limit: usize) -> Result<Vec<Position>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT body_json FROM positions ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get::<_, String>(0))?;
        let mut positions = Vec::new();
        for row in rows {
            positions.push(serde_json::from_str(&row?)?);
        }
        Ok(positions)
    }

    // -------------------------------------------------------------------------
    // Breaker events (append-only pairs)
    // -------------------------------------------------------------------------

    pub fn insert_breaker_event(
        &self,
        kind: &str,
        reason: &str,
        metrics_json: &str,
        thresholds_json: &str,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO breaker_events (kind, reason, metrics_json, thresholds_json, at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![kind, reason, metrics_json, thresholds_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// Recent breaker transitions, newest first: (at, kind, reason).
    pub fn breaker_events(&self, limit: usize) -> Result<Vec<(DateTime<Utc>, String, String)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT at, kind, reason FROM breaker_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (at, kind, reason) = row?;
            events.push((parse_ts(&at), kind, reason));
        }
        Ok(events)
    }

    // -------------------------------------------------------------------------
    // Configs (versioned, one active)
    // -------------------------------------------------------------------------

    pub fn load_active_config(&self) -> Result<Option<(u64, String)>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT version, body_json FROM configs WHERE status = 'active'",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row.map(|(v, body)| (v as u64, body)))
    }

    /// Atomically archive the current active config and install `body_json`
    /// as the new active with the next version number. Any draft row is
    /// consumed by the promotion.
    pub fn activate_config(&self, body_json: &str) -> Result<u64> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let previous: Option<i64> = tx
            .query_row(
                "SELECT version FROM configs WHERE status = 'active'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        let version = previous.unwrap_or(0) + 1;

        tx.execute(
            "UPDATE configs SET status = 'archived' WHERE status = 'active'",
            [],
        )?;
        tx.execute("DELETE FROM configs WHERE status = 'draft'", [])?;
        tx.execute(
            "INSERT INTO configs (version, status, body_json, created_at)
             VALUES (?1, 'active', ?2, ?3)",
            params![version, body_json, Utc::now().to_rfc3339()],
        )?;

        tx.commit()?;
        Ok(version as u64)
    }

    pub fn save_draft_config(&self, body_json: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM configs WHERE status = 'draft'", [])?;
        conn.execute(
            "INSERT INTO configs (version, status, body_json, created_at)
             VALUES (NULL, 'draft', ?1, ?2)",
            params![body_json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_draft_config(&self) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT body_json FROM configs WHERE status = 'draft'",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn discard_draft_config(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM configs WHERE status = 'draft'", [])?;
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Wallets (watchlist + stats; written by the discovery tooling)
    // -------------------------------------------------------------------------

    pub fn upsert_wallet(&self, wallet: &WalletEntry) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO wallets
             (address, is_monitored, is_blacklisted, cluster_id, is_cluster_leader, amplification,
              reputation, win_rate, avg_pnl_pct, timing_percentile, consistency, is_decaying, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(address) DO UPDATE SET
                 is_monitored = excluded.is_monitored,
                 is_blacklisted = excluded.is_blacklisted,
                 cluster_id = excluded.cluster_id,
                 is_cluster_leader = excluded.is_cluster_leader,
                 amplification = excluded.amplification,
                 reputation = excluded.reputation,
                 win_rate = excluded.win_rate,
                 avg_pnl_pct = excluded.avg_pnl_pct,
                 timing_percentile = excluded.timing_percentile,
                 consistency = excluded.consistency,
                 is_decaying = excluded.is_decaying,
                 updated_at = excluded.updated_at",
            params![
                wallet.address,
                wallet.is_monitored,
                wallet.is_blacklisted,
                wallet.cluster_id,
                wallet.is_cluster_leader,
                wallet.amplification,
                wallet.reputation,
                wallet.win_rate,
                wallet.avg_pnl_pct,
                wallet.timing_percentile,
                wallet.consistency,
                wallet.is_decaying,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn load_wallets(&self) -> Result<Vec<WalletEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT address, is_monitored, is_blacklisted, cluster_id, is_cluster_leader,
                    amplification, reputation, win_rate, avg_pnl_pct, timing_percentile,
                    consistency, is_decaying
             FROM wallets",
        )?;
        let rows = stmt.query_map([], row_to_wallet)?;
        let mut wallets = Vec::new();
        for row in rows {
            wallets.push(row?);
        }
        Ok(wallets)
    }

    pub fn load_wallet(&self, address: &str) -> Result<Option<WalletEntry>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT address, is_monitored, is_blacklisted, cluster_id, is_cluster_leader,
                        amplification, reputation, win_rate, avg_pnl_pct, timing_percentile,
                        consistency, is_decaying
                 FROM wallets WHERE address = ?1",
                params![address],
                row_to_wallet,
            )
            .optional()?;
        Ok(row)
    }

    /// Cheap connectivity probe for the health endpoint.
    pub fn is_healthy(&self) -> bool {
        self.conn
            .lock()
            .query_row("SELECT 1", [], |r| r.get::<_, i64>(0))
            .is_ok()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

// -------------------------------------------------------------------------
// Row mappers
// -------------------------------------------------------------------------

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_wallet(row: &rusqlite::Row<'_>) -> rusqlite::Result<WalletEntry> {
    Ok(WalletEntry {
        address: row.get(0)?,
        is_monitored: row.get(1)?,
        is_blacklisted: row.get(2)?,
        cluster_id: row.get(3)?,
        is_cluster_leader: row.get(4)?,
        amplification: row.get(5)?,
        reputation: row.get(6)?,
        win_rate: row.get(7)?,
        avg_pnl_pct: row.get(8)?,
        timing_percentile: row.get(9)?,
        consistency: row.get(10)?,
        is_decaying: row.get(11)?,
        cached_at: Utc::now(),
    })
}

fn row_to_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    let kind: String = row.get(2)?;
    let mode: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Order {
        id: row.get(0)?,
        position_id: row.get(1)?,
        kind: match kind.as_str() {
            "entry" => OrderKind::Entry,
            "exit_stop_loss" => OrderKind::ExitStopLoss,
            "exit_trailing" => OrderKind::ExitTrailing,
            "exit_scaling" => OrderKind::ExitScaling,
            "exit_mirror" => OrderKind::ExitMirror,
            _ => OrderKind::ExitManual,
        },
        mode: if mode == "live" {
            TradeMode::Live
        } else {
            TradeMode::Simulation
        },
        status: match status.as_str() {
            "pending" => OrderStatus::Pending,
            "submitted" => OrderStatus::Submitted,
            "executed" => OrderStatus::Executed,
            "failed" => OrderStatus::Failed,
            _ => OrderStatus::Cancelled,
        },
        retry_count: row.get(5)?,
        max_retries: row.get(6)?,
        error: row.get(7)?,
        tx_signature: row.get(8)?,
        requested_at: parse_ts(&row.get::<_, String>(9)?),
        submitted_at: row.get::<_, Option<String>>(10)?.map(|t| parse_ts(&t)),
        completed_at: row.get::<_, Option<String>>(11)?.map(|t| parse_ts(&t)),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn event(tx: &str) -> SwapEvent {
        SwapEvent {
            tx_signature: tx.to_string(),
            wallet: "W1".to_string(),
            token: "MintA".to_string(),
            direction: Direction::Buy,
            amount_token: 1000.0,
            amount_sol: 1.0,
            slot: 42,
            ts: Utc::now(),
        }
    }

    #[test]
    fn swap_event_idempotent_on_signature() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.record_swap_event(&event("sig1"), "{}").unwrap());
        assert!(!store.record_swap_event(&event("sig1"), "{}").unwrap());
        assert_eq!(store.swap_event_count().unwrap(), 1);
    }

    #[test]
    fn swap_events_queryable_by_wallet() {
        let store = Store::open_in_memory().unwrap();
        store.record_swap_event(&event("sig1"), "{}").unwrap();
        store.record_swap_event(&event("sig2"), "{}").unwrap();

        let events = store.swap_events_for_wallet("W1", 10).unwrap();
        assert_eq!(events.len(), 2);
        assert!(store.swap_events_for_wallet("W2", 10).unwrap().is_empty());
    }

    #[test]
    fn order_status_changes_append() {
        let store = Store::open_in_memory().unwrap();
        let mut order = Order {
            id: "o1".to_string(),
            position_id: "p1".to_string(),
            kind: OrderKind::Entry,
            mode: TradeMode::Live,
            status: OrderStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error: None,
            tx_signature: None,
            requested_at: Utc::now(),
            submitted_at: None,
            completed_at: None,
        };
        store.insert_order(&order).unwrap();
        order.status = OrderStatus::Executed;
        order.tx_signature = Some("tx1".to_string());
        store.insert_order(&order).unwrap();

        // Latest status per order id.
        let orders = store.orders_for_position("p1").unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].status, OrderStatus::Executed);
        assert!(store.has_executed_order_tx("tx1").unwrap());
        assert!(!store.has_executed_order_tx("tx2").unwrap());
    }

    #[test]
    fn config_activation_is_versioned() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.load_active_config().unwrap().is_none());

        let v1 = store.activate_config("{\"a\":1}").unwrap();
        assert_eq!(v1, 1);
        let v2 = store.activate_config("{\"a\":2}").unwrap();
        assert_eq!(v2, 2);

        let (version, body) = store.load_active_config().unwrap().unwrap();
        assert_eq!(version, 2);
        assert_eq!(body, "{\"a\":2}");
    }

    #[test]
    fn draft_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        store.save_draft_config("{\"draft\":true}").unwrap();
        assert!(store.load_draft_config().unwrap().is_some());

        // Activation consumes the draft row.
        store.activate_config("{\"draft\":true}").unwrap();
        assert!(store.load_draft_config().unwrap().is_none());

        store.save_draft_config("{}").unwrap();
        store.discard_draft_config().unwrap();
        assert!(store.load_draft_config().unwrap().is_none());
    }

    #[test]
    fn wallet_round_trip() {
        let store = Store::open_in_memory().unwrap();
        let mut wallet = WalletEntry::with_defaults("W1");
        wallet.cluster_id = Some("K".to_string());
        wallet.is_cluster_leader = true;
        wallet.amplification = 1.6;
        store.upsert_wallet(&wallet).unwrap();

        let loaded = store.load_wallet("W1").unwrap().unwrap();
        assert_eq!(loaded.cluster_id.as_deref(), Some("K"));
        assert!(loaded.is_cluster_leader);
        assert_eq!(loaded.amplification, 1.6);
        assert_eq!(store.load_wallets().unwrap().len(), 1);
    }
}
