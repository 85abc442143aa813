// =============================================================================
// Swap Queue — priority-ordered serialiser of all outbound trade intents
// =============================================================================
//
// Every buy or sell the engine wants executed goes through this single
// queue. Ordering is strict priority (CRITICAL < URGENT < NORMAL < LOW),
// FIFO within a priority. Exactly one item is in flight at a time, and a
// minimum spacing between gateway calls keeps us inside rate limits.
//
// The circuit breaker gates only NORMAL (entry) items, at enqueue time;
// CRITICAL/URGENT/LOW always pass. Lower priorities starve under sustained
// high-priority load — intentional, capital protection dominates — and a
// staleness metric per priority makes the starvation observable.
//
// Failures re-enqueue at the same priority until `max_retries`, then the
// order is failed and the owning position transitions to Errored.
//
// Shutdown: finish the in-flight call, drain CRITICAL/URGENT within a
// bounded budget, persist everything else as pending orders for replay.
// =============================================================================

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::config::EngineConfig;
use crate::gateway::SwapGateway;
use crate::position::{PositionBook, PositionStatus};
use crate::store::Store;
use crate::types::{OrderKind, OrderStatus, Priority, TradeMode, WSOL_MINT};

// =============================================================================
// Order record
// =============================================================================

/// Persistent record of one execution attempt chain. Status changes are
/// appended to the event log; a terminal order never mutates again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub position_id: String,
    pub kind: OrderKind,
    pub mode: TradeMode,
    pub status: OrderStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    /// On-chain signature for live orders — the idempotency key.
    pub tx_signature: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Intents
// =============================================================================

/// What to execute. Entry amounts are SOL to spend; exit amounts are tokens
/// to sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapIntent {
    pub kind: OrderKind,
    pub position_id: String,
    pub token: String,
    pub amount: f64,
    pub scaling_level: Option<usize>,
    pub reason: String,
    pub mode: TradeMode,
    /// Price hint (SOL per token) at decision time; simulated fills use it
    /// when the position has no fresher price.
    pub observed_price: f64,
}

struct QueuedIntent {
    priority: Priority,
    seq: u64,
    enqueued_at: DateTime<Utc>,
    retry_count: u32,
    intent: SwapIntent,
}

// BinaryHeap is a max-heap: the greatest element pops first, so "greater"
// means more urgent (lower priority value), then lower sequence number.
impl Ord for QueuedIntent {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .priority
            .cmp(&self.priority)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedIntent {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedIntent {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedIntent {}

/// Outcome of an enqueue attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Accepted,
    /// The breaker is active and the item was a NORMAL entry.
    BreakerBlockedEntry,
}

impl std::fmt::Display for EnqueueOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::BreakerBlockedEntry => write!(f, "breaker_blocked_entry"),
        }
    }
}

/// Queue-depth observability: per priority, item count and age of the oldest
/// queued item.
#[derive(Debug, Clone, Serialize)]
pub struct QueueDepth {
    pub priority: Priority,
    pub depth: usize,
    pub oldest_age_s: u64,
}

// =============================================================================
// SwapQueue
// =============================================================================

pub struct SwapQueue {
    heap: Mutex<BinaryHeap<QueuedIntent>>,
    notify: Notify,
    seq: AtomicU64,

    breaker: Arc<CircuitBreaker>,
    config_rx: watch::Receiver<Arc<EngineConfig>>,
    store: Arc<Store>,
    book: Arc<PositionBook>,
    gateway: Arc<dyn SwapGateway>,
}

impl SwapQueue {
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        config_rx: watch::Receiver<Arc<EngineConfig>>,
        store: Arc<Store>,
        book: Arc<PositionBook>,
        gateway: Arc<dyn SwapGateway>,
    ) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
            seq: AtomicU64::new(0),
            breaker,
            config_rx,
            store,
            book,
            gateway,
        }
    }

    // -------------------------------------------------------------------------
    // Enqueue
    // -------------------------------------------------------------------------

    /// Submit an intent. NORMAL items are rejected while the breaker is
    /// active; everything else always enters the queue.
    pub fn enqueue(&self, intent: SwapIntent) -> EnqueueOutcome {
        let priority = intent.kind.priority();

        if priority == Priority::Normal && self.breaker.is_active() {
            info!(
                position = %intent.position_id,
                token = %intent.token,
                "entry rejected: breaker_blocked_entry"
            );
            return EnqueueOutcome::BreakerBlockedEntry;
        }

        self.push(QueuedIntent {
            priority,
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            enqueued_at: Utc::now(),
            retry_count: 0,
            intent,
        });
        EnqueueOutcome::Accepted
    }

    fn push(&self, item: QueuedIntent) {
        debug!(
            priority = %item.priority,
            seq = item.seq,
            kind = %item.intent.kind,
            position = %item.intent.position_id,
            "intent queued"
        );
        self.heap.lock().push(item);
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<QueuedIntent> {
        self.heap.lock().pop()
    }

    pub fn depth(&self) -> usize {
        self.heap.lock().len()
    }

    /// Per-priority depth and staleness, for health and starvation
    /// observability.
    pub fn depth_by_priority(&self) -> Vec<QueueDepth> {
        let now = Utc::now();
        let heap = self.heap.lock();
        [Priority::Critical, Priority::Urgent, Priority::Normal, Priority::Low]
            .into_iter()
            .map(|priority| {
                let items = heap.iter().filter(|i| i.priority == priority);
                let mut depth = 0usize;
                let mut oldest: Option<DateTime<Utc>> = None;
                for item in items {
                    depth += 1;
                    if oldest.map(|o| item.enqueued_at < o).unwrap_or(true) {
                        oldest = Some(item.enqueued_at);
                    }
                }
                QueueDepth {
                    priority,
                    depth,
                    oldest_age_s: oldest
                        .map(|o| (now - o).num_seconds().max(0) as u64)
                        .unwrap_or(0),
                }
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Worker
    // -------------------------------------------------------------------------

    /// The single execution worker. Spawn exactly once. Exits when
    /// `shutdown_rx` flips to true, after the drain policy has run.
    pub async fn run_worker(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        info!("swap queue worker started");
        let mut last_call: Option<tokio::time::Instant> = None;

        loop {
            // ── Next item, or shutdown ───────────────────────────────────
            let item = loop {
                if *shutdown_rx.borrow() {
                    self.drain_on_shutdown(&mut last_call).await;
                    info!("swap queue worker stopped");
                    return;
                }
                if let Some(item) = self.pop() {
                    break item;
                }
                tokio::select! {
                    _ = self.notify.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
            };

            self.pace(&mut last_call).await;
            self.execute(item).await;
        }
    }

    /// Enforce the minimum spacing between outbound calls.
    async fn pace(&self, last_call: &mut Option<tokio::time::Instant>) {
        let spacing = Duration::from_secs_f64(self.config_rx.borrow().queue.min_spacing_s);
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        *last_call = Some(tokio::time::Instant::now());
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    async fn execute(&self, mut item: QueuedIntent) {
        let max_retries = self.config_rx.borrow().queue.max_retries;
        let intent = item.intent.clone();

        let mut order = Order {
            id: Uuid::new_v4().to_string(),
            position_id: intent.position_id.clone(),
            kind: intent.kind,
            mode: intent.mode,
            status: OrderStatus::Submitted,
            retry_count: item.retry_count,
            max_retries,
            error: None,
            tx_signature: None,
            requested_at: item.enqueued_at,
            submitted_at: Some(Utc::now()),
            completed_at: None,
        };

        let result = match intent.mode {
            TradeMode::Simulation => Ok(self.simulated_fill(&intent)),
            TradeMode::Live => self.live_fill(&intent).await,
        };

        match result {
            Ok((fill_price, fill_amount, tx_signature)) => {
                order.status = OrderStatus::Executed;
                order.tx_signature = Some(tx_signature);
                order.completed_at = Some(Utc::now());
                if let Err(e) = self.store.insert_order(&order) {
                    warn!(order = %order.id, error = %e, "failed to persist executed order");
                }
                self.apply_fill(&intent, fill_price, fill_amount);
                info!(
                    order = %order.id,
                    kind = %intent.kind,
                    position = %intent.position_id,
                    fill_price,
                    fill_amount,
                    "order executed"
                );
            }
            Err(e) => {
                item.retry_count += 1;
                if item.retry_count < max_retries {
                    warn!(
                        position = %intent.position_id,
                        kind = %intent.kind,
                        retry = item.retry_count,
                        max_retries,
                        error = %e,
                        "gateway call failed — re-enqueueing"
                    );
                    order.status = OrderStatus::Pending;
                    order.retry_count = item.retry_count;
                    order.error = Some(e.to_string());
                    if let Err(pe) = self.store.insert_order(&order) {
                        warn!(order = %order.id, error = %pe, "failed to persist pending order");
                    }
                    self.push(item);
                } else {
                    order.status = OrderStatus::Failed;
                    order.retry_count = item.retry_count;
                    order.error = Some(e.to_string());
                    order.completed_at = Some(Utc::now());
                    if let Err(pe) = self.store.insert_order(&order) {
                        warn!(order = %order.id, error = %pe, "failed to persist failed order");
                    }
                    warn!(
                        position = %intent.position_id,
                        kind = %intent.kind,
                        error = %e,
                        "order failed after max retries — position errored"
                    );
                    if let Some(pos) = self
                        .book
                        .mark_errored(&intent.position_id, &format!("gateway_failure: {e}"))
                    {
                        let _ = self.store.upsert_position(&pos);
                    }
                }
            }
        }
    }

    /// Synthetic fill for simulation mode: exits fill at the freshest known
    /// position price, entries at the observed signal price. No gateway
    /// round-trip.
    fn simulated_fill(&self, intent: &SwapIntent) -> (f64, f64, String) {
        let price = if intent.kind.is_exit() {
            self.book
                .get(&intent.position_id)
                .map(|p| p.current_price)
                .filter(|&p| p > 0.0)
                .unwrap_or(intent.observed_price)
        } else {
            intent.observed_price
        };

        let fill_amount = if intent.kind.is_exit() {
            intent.amount
        } else if price > 0.0 {
            intent.amount / price
        } else {
            0.0
        };
        (price, fill_amount, format!("sim-{}", Uuid::new_v4()))
    }

    /// Live fill: quote then swap through the gateway.
    /// Returns (price SOL/token, filled token amount, tx signature).
    async fn live_fill(&self, intent: &SwapIntent) -> anyhow::Result<(f64, f64, String)> {
        let (input, output) = if intent.kind.is_exit() {
            (intent.token.as_str(), WSOL_MINT)
        } else {
            (WSOL_MINT, intent.token.as_str())
        };

        let quote = self.gateway.quote(input, output, intent.amount).await?;
        let receipt = self.gateway.swap(&quote, 100).await?;

        if self.store.has_executed_order_tx(&receipt.tx_signature)? {
            // The retry landed on a swap that already executed; reconcile
            // instead of double-counting.
            anyhow::bail!("duplicate execution for tx {}", receipt.tx_signature);
        }

        if intent.kind.is_exit() {
            // Sold `in_amount` tokens for `out_amount` SOL.
            let price = if receipt.in_amount > 0.0 {
                receipt.out_amount / receipt.in_amount
            } else {
                0.0
            };
            Ok((price, receipt.in_amount, receipt.tx_signature))
        } else {
            // Spent `in_amount` SOL for `out_amount` tokens.
            let price = if receipt.out_amount > 0.0 {
                receipt.in_amount / receipt.out_amount
            } else {
                0.0
            };
            Ok((price, receipt.out_amount, receipt.tx_signature))
        }
    }

    /// Apply an executed fill to the owning position, synchronously with the
    /// order record. Closing fills feed the circuit breaker.
    fn apply_fill(&self, intent: &SwapIntent, fill_price: f64, fill_amount: f64) {
        let updated = if intent.kind.is_exit() {
            self.book.apply_exit_fill(
                &intent.position_id,
                fill_amount,
                fill_price,
                intent.scaling_level,
                &intent.reason,
            )
        } else {
            self.book
                .confirm_entry(&intent.position_id, fill_price, fill_amount)
        };

        match updated {
            Some(pos) => {
                if pos.status == PositionStatus::Closed {
                    self.breaker.record_close(pos.realized_pnl);
                }
                if let Err(e) = self.store.upsert_position(&pos) {
                    warn!(position = %pos.id, error = %e, "failed to persist position");
                }
            }
            None => warn!(
                position = %intent.position_id,
                kind = %intent.kind,
                "fill had no matching active position"
            ),
        }
    }

    // -------------------------------------------------------------------------
    // Shutdown drain
    // -------------------------------------------------------------------------

    /// Drain CRITICAL/URGENT within the configured budget; persist the rest
    /// as pending orders for replay on restart.
    async fn drain_on_shutdown(&self, last_call: &mut Option<tokio::time::Instant>) {
        let budget = Duration::from_secs(self.config_rx.borrow().queue.drain_budget_s);
        let deadline = tokio::time::Instant::now() + budget;
        info!(budget_s = budget.as_secs(), "draining swap queue for shutdown");

        while tokio::time::Instant::now() < deadline {
            let item = {
                let mut heap = self.heap.lock();
                match heap.peek() {
                    Some(top) if top.priority <= Priority::Urgent => heap.pop(),
                    _ => None,
                }
            };
            let Some(item) = item else { break };

            self.pace(last_call).await;
            self.execute(item).await;
        }

        // Whatever remains is persisted, not executed.
        let remaining: Vec<QueuedIntent> = self.heap.lock().drain().collect();
        let max_retries = self.config_rx.borrow().queue.max_retries;
        for item in remaining {
            let order = Order {
                id: Uuid::new_v4().to_string(),
                position_id: item.intent.position_id.clone(),
                kind: item.intent.kind,
                mode: item.intent.mode,
                status: OrderStatus::Pending,
                retry_count: item.retry_count,
                max_retries,
                error: Some("persisted at shutdown".to_string()),
                tx_signature: None,
                requested_at: item.enqueued_at,
                submitted_at: None,
                completed_at: None,
            };
            if let Err(e) = self.store.insert_order(&order) {
                warn!(position = %order.position_id, error = %e, "failed to persist queued intent at shutdown");
            } else {
                info!(
                    position = %order.position_id,
                    kind = %order.kind,
                    "unexecuted intent persisted for replay"
                );
            }
        }
    }
}

impl std::fmt::Debug for SwapQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapQueue")
            .field("depth", &self.depth())
            .finish()
    }
}
