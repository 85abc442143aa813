// =============================================================================
// Position Book — state machine for mirrored copy-trade positions
// =============================================================================
//
// Life-cycle:
//   PendingEntry -> Open -> Exiting -> Closed
//   PendingEntry -> Errored (entry order exhausted retries)
//   Open         -> Errored (exit order exhausted retries)
//
// Open positions absorb price updates (current/peak/unrealized recomputed
// together), partial exits (current_amount down, realized_pnl up, scaling
// level marked executed), and full exits. `current_amount == 0` closes the
// position. Closed and Errored are terminal.
//
// Prices are SOL-denominated (SOL per token); PnL is therefore in SOL.
//
// Thread-safety: all mutable state is behind `parking_lot::RwLock`; every
// mutation for a given position happens under the write lock, so price
// updates, fills, and level bookkeeping are atomic together.
// =============================================================================

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ExitOverride, LimitParams};
use crate::types::TradeMode;

// ---------------------------------------------------------------------------
// Position model
// ---------------------------------------------------------------------------

/// Current status of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    PendingEntry,
    Open,
    Exiting,
    Closed,
    Errored,
}

impl PositionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingEntry => write!(f, "pending_entry"),
            Self::Open => write!(f, "open"),
            Self::Exiting => write!(f, "exiting"),
            Self::Closed => write!(f, "closed"),
            Self::Errored => write!(f, "errored"),
        }
    }
}

/// A single tracked copy-trade position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// Unique identifier (UUID v4).
    pub id: String,
    /// Source wallet being mirrored.
    pub wallet: String,
    /// Token mint address.
    pub token: String,
    pub mode: TradeMode,
    pub status: PositionStatus,

    /// Fill price in SOL per token.
    #[serde(default)]
    pub entry_price: f64,
    /// Tokens acquired at entry.
    #[serde(default)]
    pub entry_amount: f64,
    /// SOL spent at entry.
    #[serde(default)]
    pub entry_value_sol: f64,

    /// Remaining tokens held (reduced by partial exits).
    #[serde(default)]
    pub current_amount: f64,
    #[serde(default)]
    pub current_price: f64,
    /// Highest price observed since the position opened.
    #[serde(default)]
    pub peak_price: f64,
    #[serde(default)]
    pub price_updated_at: Option<DateTime<Utc>>,
    /// Set when no usable price is available; price-sensitive exit rules
    /// skip the position until it clears.
    #[serde(default)]
    pub price_stale: bool,

    /// SOL accumulated from executed exit orders.
    #[serde(default)]
    pub realized_pnl: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,

    /// Name of the exit-strategy template this position follows.
    pub exit_strategy: String,
    #[serde(default)]
    pub exit_override: Option<ExitOverride>,
    /// Indices into the merged scaling-level list that have executed.
    /// A level can never fire twice.
    #[serde(default)]
    pub executed_scaling_levels: BTreeSet<usize>,

    /// Cluster of the source wallet at entry time (for concentration limits).
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Source-wallet transaction that triggered the entry.
    pub source_signature: String,

    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub close_reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Position {
    /// Signed PnL percent of the current price against entry.
    pub fn pnl_pct(&self) -> f64 {
        if self.entry_price > 0.0 {
            (self.current_price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        }
    }

    /// Signed PnL percent of the peak price against entry.
    pub fn peak_pnl_pct(&self) -> f64 {
        if self.entry_price > 0.0 {
            (self.peak_price - self.entry_price) / self.entry_price * 100.0
        } else {
            0.0
        }
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl
    }
}

// ---------------------------------------------------------------------------
// Entry decisions
// ---------------------------------------------------------------------------

/// Why a position could not be created. Not an error: logged at INFO and the
/// signal is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitViolation {
    MaxConcurrent,
    PerToken,
    PerCluster,
}

impl std::fmt::Display for LimitViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxConcurrent => write!(f, "limit_exceeded: max concurrent positions"),
            Self::PerToken => write!(f, "limit_exceeded: max positions per token"),
            Self::PerCluster => write!(f, "limit_exceeded: max positions per cluster"),
        }
    }
}

/// Parameters for creating a new position.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub wallet: String,
    pub token: String,
    pub mode: TradeMode,
    pub size_sol: f64,
    pub exit_strategy: String,
    pub exit_override: Option<ExitOverride>,
    pub cluster_id: Option<String>,
    pub source_signature: String,
    /// Price observed on the source wallet's swap (SOL per token). Used for
    /// the synthetic fill in simulation mode.
    pub observed_price: f64,
}

// ---------------------------------------------------------------------------
// Position Book
// ---------------------------------------------------------------------------

struct Inner {
    active: Vec<Position>,
    closed: Vec<Position>,
}

/// Thread-safe owner of all position state. The sole mutator of positions;
/// other components observe snapshots.
pub struct PositionBook {
    inner: RwLock<Inner>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                active: Vec::new(),
                closed: Vec::new(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Creation
    // -------------------------------------------------------------------------

    /// Create a position after checking concurrency and concentration limits.
    ///
    /// Live mode: the position starts `PendingEntry`, awaiting the entry
    /// order fill. Simulation mode: a synthetic fill at the observed price
    /// opens it immediately.
    pub fn create(
        &self,
        new: NewPosition,
        limits: &LimitParams,
    ) -> Result<Position, LimitViolation> {
        let mut inner = self.inner.write();

        let live_count = inner
            .active
            .iter()
            .filter(|p| !p.status.is_terminal())
            .count();
        if live_count as u32 >= limits.max_concurrent_positions {
            return Err(LimitViolation::MaxConcurrent);
        }
        let token_count = inner
            .active
            .iter()
            .filter(|p| p.token == new.token && !p.status.is_terminal())
            .count();
        if token_count as u32 >= limits.max_per_token {
            return Err(LimitViolation::PerToken);
        }
        if let Some(cluster) = &new.cluster_id {
            let cluster_count = inner
                .active
                .iter()
                .filter(|p| p.cluster_id.as_deref() == Some(cluster) && !p.status.is_terminal())
                .count();
            if cluster_count as u32 >= limits.max_per_cluster {
                return Err(LimitViolation::PerCluster);
            }
        }

        let now = Utc::now();
        let simulated = new.mode == TradeMode::Simulation;
        let (status, entry_price, entry_amount) = if simulated {
            let amount = if new.observed_price > 0.0 {
                new.size_sol / new.observed_price
            } else {
                0.0
            };
            (PositionStatus::Open, new.observed_price, amount)
        } else {
            (PositionStatus::PendingEntry, 0.0, 0.0)
        };

        let pos = Position {
            id: Uuid::new_v4().to_string(),
            wallet: new.wallet,
            token: new.token,
            mode: new.mode,
            status,
            entry_price,
            entry_amount,
            entry_value_sol: new.size_sol,
            current_amount: entry_amount,
            current_price: entry_price,
            peak_price: entry_price,
            price_updated_at: if simulated { Some(now) } else { None },
            price_stale: false,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            exit_strategy: new.exit_strategy,
            exit_override: new.exit_override,
            executed_scaling_levels: BTreeSet::new(),
            cluster_id: new.cluster_id,
            source_signature: new.source_signature,
            opened_at: now,
            closed_at: None,
            close_reason: None,
            error: None,
        };

        info!(
            id = %pos.id,
            wallet = %pos.wallet,
            token = %pos.token,
            mode = %pos.mode,
            status = %pos.status,
            size_sol = pos.entry_value_sol,
            "position created"
        );

        inner.active.push(pos.clone());
        Ok(pos)
    }

    /// Load persisted positions on startup. Only non-terminal positions are
    /// restored; exit conditions re-derive from their state on the next
    /// price tick, so no separate replay log is needed for exits.
    pub fn restore(&self, positions: Vec<Position>) {
        let mut inner = self.inner.write();
        for pos in positions {
            if pos.status.is_terminal() {
                continue;
            }
            if inner.active.iter().any(|p| p.id == pos.id) {
                continue;
            }
            info!(id = %pos.id, token = %pos.token, status = %pos.status, "position restored");
            inner.active.push(pos);
        }
    }

    // -------------------------------------------------------------------------
    // Entry fill
    // -------------------------------------------------------------------------

    /// Confirm a live entry fill: `PendingEntry` -> `Open` with the actual
    /// fill amounts.
    pub fn confirm_entry(&self, id: &str, fill_price: f64, fill_amount: f64) -> Option<Position> {
        let mut inner = self.inner.write();
        let pos = inner
            .active
            .iter_mut()
            .find(|p| p.id == id && p.status == PositionStatus::PendingEntry)?;

        pos.entry_price = fill_price;
        pos.entry_amount = fill_amount;
        pos.current_amount = fill_amount;
        pos.current_price = fill_price;
        pos.peak_price = fill_price;
        pos.price_updated_at = Some(Utc::now());
        pos.status = PositionStatus::Open;

        info!(
            id = %pos.id,
            token = %pos.token,
            fill_price,
            fill_amount,
            "entry filled — position open"
        );
        Some(pos.clone())
    }

    // -------------------------------------------------------------------------
    // Price updates
    // -------------------------------------------------------------------------

    /// Apply a price observation to every open position on `token`.
    ///
    /// `observed_at` carries the provider observation instant; a staler
    /// observation never overwrites a fresher one. Current price, peak
    /// price, and unrealized PnL are updated atomically together.
    ///
    /// Returns snapshots of the positions that actually changed.
    pub fn apply_price(
        &self,
        token: &str,
        price: f64,
        observed_at: DateTime<Utc>,
    ) -> Vec<Position> {
        let mut updated = Vec::new();
        if price <= 0.0 {
            return updated;
        }

        let mut inner = self.inner.write();
        for pos in inner.active.iter_mut().filter(|p| {
            p.token == token && matches!(p.status, PositionStatus::Open | PositionStatus::Exiting)
        }) {
            if let Some(prev) = pos.price_updated_at {
                if observed_at < prev {
                    debug!(
                        id = %pos.id,
                        token,
                        "stale price observation ignored"
                    );
                    continue;
                }
            }

            pos.current_price = price;
            if price > pos.peak_price {
                pos.peak_price = price;
            }
            pos.unrealized_pnl = pos.current_amount * (price - pos.entry_price);
            pos.price_updated_at = Some(observed_at);
            pos.price_stale = false;
            updated.push(pos.clone());
        }
        updated
    }

    /// Flag every open position on `token` as price-stale. Stale positions
    /// are excluded from price-sensitive exit rules until a fresh price
    /// arrives.
    pub fn mark_price_stale(&self, token: &str) {
        let mut inner = self.inner.write();
        for pos in inner
            .active
            .iter_mut()
            .filter(|p| p.token == token && p.status == PositionStatus::Open)
        {
            if !pos.price_stale {
                warn!(id = %pos.id, token, "position price marked stale");
                pos.price_stale = true;
            }
        }
    }

    // -------------------------------------------------------------------------
    // Exits
    // -------------------------------------------------------------------------

    /// Mark a position `Exiting` ahead of a full-exit order. Scaling
    /// (partial) exits do not transition status.
    pub fn begin_full_exit(&self, id: &str) -> Option<Position> {
        let mut inner = self.inner.write();
        let pos = inner
            .active
            .iter_mut()
            .find(|p| p.id == id && p.status == PositionStatus::Open)?;
        pos.status = PositionStatus::Exiting;
        Some(pos.clone())
    }

    /// Apply an executed exit fill.
    ///
    /// Decrements `current_amount`, accumulates realized PnL at the fill
    /// price, marks the scaling level executed when one applies, and closes
    /// the position once nothing remains. All of it atomic under the write
    /// lock.
    pub fn apply_exit_fill(
        &self,
        id: &str,
        amount: f64,
        fill_price: f64,
        scaling_level: Option<usize>,
        reason: &str,
    ) -> Option<Position> {
        let mut inner = self.inner.write();
        let idx = inner
            .active
            .iter()
            .position(|p| p.id == id && !p.status.is_terminal())?;
        let pos = &mut inner.active[idx];

        let sold = amount.min(pos.current_amount);
        pos.current_amount -= sold;
        pos.realized_pnl += sold * (fill_price - pos.entry_price);
        pos.unrealized_pnl = pos.current_amount * (pos.current_price - pos.entry_price);
        if let Some(level) = scaling_level {
            pos.executed_scaling_levels.insert(level);
        }

        info!(
            id = %pos.id,
            token = %pos.token,
            sold,
            fill_price,
            remaining = pos.current_amount,
            realized_pnl = pos.realized_pnl,
            reason,
            "exit fill applied"
        );

        if pos.current_amount <= f64::EPSILON {
            pos.current_amount = 0.0;
            pos.unrealized_pnl = 0.0;
            pos.status = PositionStatus::Closed;
            pos.closed_at = Some(Utc::now());
            pos.close_reason = Some(reason.to_string());

            let closed = inner.active.remove(idx);
            info!(
                id = %closed.id,
                token = %closed.token,
                realized_pnl = closed.realized_pnl,
                reason,
                "position closed"
            );
            inner.closed.push(closed.clone());
            return Some(closed);
        }

        Some(pos.clone())
    }

    /// Remove a `PendingEntry` position whose entry never made it into the
    /// queue (e.g. the breaker activated between the pre-check and enqueue).
    /// Nothing was executed, so the position simply disappears.
    pub fn abandon_pending(&self, id: &str) -> bool {
        let mut inner = self.inner.write();
        let before = inner.active.len();
        inner
            .active
            .retain(|p| !(p.id == id && p.status == PositionStatus::PendingEntry));
        let removed = inner.active.len() < before;
        if removed {
            debug!(id, "pending position abandoned");
        }
        removed
    }

    /// Transition a position to `Errored` after an order exhausted its
    /// retries. Manual operator action is required from here.
    pub fn mark_errored(&self, id: &str, error: &str) -> Option<Position> {
        let mut inner = self.inner.write();
        let idx = inner
            .active
            .iter()
            .position(|p| p.id == id && !p.status.is_terminal())?;
        let mut pos = inner.active.remove(idx);
        pos.status = PositionStatus::Errored;
        pos.error = Some(error.to_string());
        pos.closed_at = Some(Utc::now());

        warn!(id = %pos.id, token = %pos.token, error, "position errored");
        inner.closed.push(pos.clone());
        Some(pos)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Position> {
        let inner = self.inner.read();
        inner
            .active
            .iter()
            .chain(inner.closed.iter())
            .find(|p| p.id == id)
            .cloned()
    }

    /// Snapshot of all non-terminal positions.
    pub fn active_positions(&self) -> Vec<Position> {
        self.inner.read().active.clone()
    }

    /// Snapshot of `Open` positions only (the exit evaluator's domain).
    pub fn open_positions(&self) -> Vec<Position> {
        self.inner
            .read()
            .active
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect()
    }

    /// Most recent `count` terminal positions, newest first.
    pub fn closed_positions(&self, count: usize) -> Vec<Position> {
        let inner = self.inner.read();
        inner.closed.iter().rev().take(count).cloned().collect()
    }

    /// Open (or exiting) position mirroring `wallet` on `token`, if any.
    /// Matching is on full addresses; used by the mirror-exit path.
    pub fn find_mirror(&self, wallet: &str, token: &str) -> Option<Position> {
        self.inner
            .read()
            .active
            .iter()
            .find(|p| {
                p.wallet == wallet
                    && p.token == token
                    && matches!(p.status, PositionStatus::Open | PositionStatus::Exiting)
            })
            .cloned()
    }

    pub fn open_count(&self) -> usize {
        self.inner
            .read()
            .active
            .iter()
            .filter(|p| !p.status.is_terminal())
            .count()
    }
}

impl Default for PositionBook {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PositionBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("PositionBook")
            .field("active", &inner.active.len())
            .field("closed", &inner.closed.len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_position(token: &str) -> NewPosition {
        NewPosition {
            wallet: "WalletAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".to_string(),
            token: token.to_string(),
            mode: TradeMode::Simulation,
            size_sol: 1.0,
            exit_strategy: "standard".to_string(),
            exit_override: None,
            cluster_id: Some("K".to_string()),
            source_signature: format!("sig-{token}"),
            observed_price: 0.001,
        }
    }

    fn limits() -> LimitParams {
        LimitParams {
            base_size_sol: 0.5,
            max_concurrent_positions: 2,
            max_per_token: 1,
            max_per_cluster: 2,
        }
    }

    #[test]
    fn simulation_entry_opens_immediately() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();
        assert_eq!(pos.status, PositionStatus::Open);
        assert!((pos.entry_amount - 1000.0).abs() < 1e-9);
        assert_eq!(pos.entry_price, 0.001);
        assert_eq!(pos.current_amount, pos.entry_amount);
    }

    #[test]
    fn live_entry_pends_until_fill() {
        let book = PositionBook::new();
        let mut new = new_position("MintA");
        new.mode = TradeMode::Live;
        let pos = book.create(new, &limits()).unwrap();
        assert_eq!(pos.status, PositionStatus::PendingEntry);
        assert_eq!(pos.entry_amount, 0.0);

        let filled = book.confirm_entry(&pos.id, 0.002, 500.0).unwrap();
        assert_eq!(filled.status, PositionStatus::Open);
        assert_eq!(filled.entry_amount, 500.0);
        assert_eq!(filled.peak_price, 0.002);
    }

    #[test]
    fn per_token_limit_enforced() {
        let book = PositionBook::new();
        book.create(new_position("MintA"), &limits()).unwrap();
        let err = book.create(new_position("MintA"), &limits()).unwrap_err();
        assert_eq!(err, LimitViolation::PerToken);
    }

    #[test]
    fn concurrent_limit_enforced() {
        let book = PositionBook::new();
        let mut lim = limits();
        lim.max_per_cluster = 10;
        book.create(new_position("MintA"), &lim).unwrap();
        book.create(new_position("MintB"), &lim).unwrap();
        let err = book.create(new_position("MintC"), &lim).unwrap_err();
        assert_eq!(err, LimitViolation::MaxConcurrent);
    }

    #[test]
    fn cluster_limit_enforced() {
        let book = PositionBook::new();
        let mut lim = limits();
        lim.max_concurrent_positions = 10;
        book.create(new_position("MintA"), &lim).unwrap();
        book.create(new_position("MintB"), &lim).unwrap();
        let err = book.create(new_position("MintC"), &lim).unwrap_err();
        assert_eq!(err, LimitViolation::PerCluster);
    }

    #[test]
    fn price_update_tracks_peak_and_unrealized() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();

        book.apply_price("MintA", 0.002, Utc::now());
        let p = book.get(&pos.id).unwrap();
        assert_eq!(p.current_price, 0.002);
        assert_eq!(p.peak_price, 0.002);
        assert!((p.unrealized_pnl - 1000.0 * 0.001).abs() < 1e-12);

        // Price falls: peak must not.
        book.apply_price("MintA", 0.0015, Utc::now());
        let p = book.get(&pos.id).unwrap();
        assert_eq!(p.current_price, 0.0015);
        assert_eq!(p.peak_price, 0.002);
    }

    #[test]
    fn stale_observation_never_overwrites_fresher() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();

        let now = Utc::now();
        book.apply_price("MintA", 0.002, now);
        let updated = book.apply_price("MintA", 0.005, now - Duration::seconds(30));
        assert!(updated.is_empty());
        assert_eq!(book.get(&pos.id).unwrap().current_price, 0.002);
    }

    #[test]
    fn partial_exit_accounting() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();
        // entry: 1000 tokens @ 0.001

        let p = book
            .apply_exit_fill(&pos.id, 500.0, 0.002, Some(0), "scaling_level_0")
            .unwrap();
        assert_eq!(p.status, PositionStatus::Open);
        assert_eq!(p.current_amount, 500.0);
        assert!((p.realized_pnl - 0.5).abs() < 1e-12);
        assert!(p.executed_scaling_levels.contains(&0));

        // Invariant: current + executed exit amounts == entry amount.
        assert!((p.current_amount + 500.0 - p.entry_amount).abs() < 1e-9);
    }

    #[test]
    fn full_exit_closes_with_reason() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();

        book.begin_full_exit(&pos.id).unwrap();
        let closed = book
            .apply_exit_fill(&pos.id, 1000.0, 0.0008, None, "stop_loss")
            .unwrap();
        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.current_amount, 0.0);
        assert_eq!(closed.close_reason.as_deref(), Some("stop_loss"));
        // realized = 1000 * (0.0008 - 0.001)
        assert!((closed.realized_pnl - (-0.2)).abs() < 1e-12);
        assert_eq!(closed.unrealized_pnl, 0.0);
        assert_eq!(book.open_count(), 0);
    }

    #[test]
    fn total_pnl_is_realized_plus_unrealized() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();

        book.apply_price("MintA", 0.002, Utc::now());
        book.apply_exit_fill(&pos.id, 250.0, 0.002, Some(0), "scaling_level_0");
        let p = book.get(&pos.id).unwrap();
        let expected_realized = 250.0 * 0.001;
        let expected_unrealized = 750.0 * 0.001;
        assert!((p.realized_pnl - expected_realized).abs() < 1e-12);
        assert!((p.unrealized_pnl - expected_unrealized).abs() < 1e-12);
        assert!((p.total_pnl() - (expected_realized + expected_unrealized)).abs() < 1e-12);
    }

    #[test]
    fn errored_is_terminal() {
        let book = PositionBook::new();
        let mut new = new_position("MintA");
        new.mode = TradeMode::Live;
        let pos = book.create(new, &limits()).unwrap();

        let errored = book.mark_errored(&pos.id, "gateway_failure: quote timeout").unwrap();
        assert_eq!(errored.status, PositionStatus::Errored);
        assert!(book.find_mirror(&errored.wallet, "MintA").is_none());
        assert!(book.confirm_entry(&pos.id, 0.001, 1.0).is_none());
    }

    #[test]
    fn mirror_lookup_matches_full_addresses() {
        let book = PositionBook::new();
        let pos = book.create(new_position("MintA"), &limits()).unwrap();
        assert!(book.find_mirror(&pos.wallet, "MintA").is_some());
        // Prefix of the token is not a match.
        assert!(book.find_mirror(&pos.wallet, "Mint").is_none());
        assert!(book.find_mirror("WalletB", "MintA").is_none());
    }
}
