// =============================================================================
// Central Application State — WallTrack engine
// =============================================================================
//
// Ties the subsystems together for the API surface and the background tasks.
// Each subsystem manages its own interior mutability; AppState adds the
// cross-cutting pieces: ingest counters, the webhook handoff channel, a
// recent-error ring buffer, and the health snapshot.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::breaker::{BreakerSnapshot, CircuitBreaker};
use crate::config::ConfigStore;
use crate::position::PositionBook;
use crate::store::Store;
use crate::swap_queue::{QueueDepth, SwapQueue};
use crate::token_cache::{TokenCache, TokenCacheStats};
use crate::types::SwapEvent;
use crate::wallet_cache::{WalletCache, WalletCacheStats};

/// Maximum number of recent errors retained for the admin surface.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event for the admin error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Ingest/pipeline counters, all lock-free.
#[derive(Debug, Default)]
pub struct Counters {
    pub webhooks_accepted: AtomicU64,
    pub webhooks_rejected_signature: AtomicU64,
    pub webhooks_malformed: AtomicU64,
    pub events_parsed: AtomicU64,
    pub events_duplicate: AtomicU64,
    pub events_skipped_non_swap: AtomicU64,
    pub events_dropped_backpressure: AtomicU64,
    pub signals_blacklisted: AtomicU64,
    pub signals_not_monitored: AtomicU64,
    pub signals_scored: AtomicU64,
    pub entries_opened: AtomicU64,
    pub entries_limit_exceeded: AtomicU64,
    pub entries_breaker_blocked: AtomicU64,
    pub mirror_exits: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CounterSnapshot {
    pub webhooks_accepted: u64,
    pub webhooks_rejected_signature: u64,
    pub webhooks_malformed: u64,
    pub events_parsed: u64,
    pub events_duplicate: u64,
    pub events_skipped_non_swap: u64,
    pub events_dropped_backpressure: u64,
    pub signals_blacklisted: u64,
    pub signals_not_monitored: u64,
    pub signals_scored: u64,
    pub entries_opened: u64,
    pub entries_limit_exceeded: u64,
    pub entries_breaker_blocked: u64,
    pub mirror_exits: u64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            webhooks_accepted: self.webhooks_accepted.load(Ordering::Relaxed),
            webhooks_rejected_signature: self.webhooks_rejected_signature.load(Ordering::Relaxed),
            webhooks_malformed: self.webhooks_malformed.load(Ordering::Relaxed),
            events_parsed: self.events_parsed.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            events_skipped_non_swap: self.events_skipped_non_swap.load(Ordering::Relaxed),
            events_dropped_backpressure: self.events_dropped_backpressure.load(Ordering::Relaxed),
            signals_blacklisted: self.signals_blacklisted.load(Ordering::Relaxed),
            signals_not_monitored: self.signals_not_monitored.load(Ordering::Relaxed),
            signals_scored: self.signals_scored.load(Ordering::Relaxed),
            entries_opened: self.entries_opened.load(Ordering::Relaxed),
            entries_limit_exceeded: self.entries_limit_exceeded.load(Ordering::Relaxed),
            entries_breaker_blocked: self.entries_breaker_blocked.load(Ordering::Relaxed),
            mirror_exits: self.mirror_exits.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    pub store: Arc<Store>,
    pub config: Arc<ConfigStore>,
    pub wallet_cache: Arc<WalletCache>,
    pub token_cache: Arc<TokenCache>,
    pub book: Arc<PositionBook>,
    pub breaker: Arc<CircuitBreaker>,
    pub queue: Arc<SwapQueue>,

    /// Webhook -> pipeline handoff. Bounded; the handler never blocks on it.
    pub event_tx: mpsc::Sender<SwapEvent>,

    /// Shared secret for webhook HMAC validation. Never logged.
    pub webhook_secret: String,

    pub counters: Counters,
    pub last_webhook_at: RwLock<Option<DateTime<Utc>>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Record an error for the admin surface; oldest entries are evicted
    /// past the cap.
    pub fn push_error(&self, message: String) {
        let mut errors = self.recent_errors.write();
        errors.push(ErrorRecord {
            message,
            at: Utc::now(),
        });
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
    }

    /// Build the health payload.
    pub fn health_snapshot(&self) -> HealthSnapshot {
        let db_ok = self.store.is_healthy();
        let wallet_cache = self.wallet_cache.stats();
        let degraded = !db_ok || !wallet_cache.initialised;

        HealthSnapshot {
            status: if degraded { "degraded" } else { "ok" },
            uptime_s: self.start_time.elapsed().as_secs(),
            db_ok,
            wallet_cache_initialised: wallet_cache.initialised,
            wallet_cache,
            token_cache: self.token_cache.stats(),
            last_webhook_at: *self.last_webhook_at.read(),
            breaker: self.breaker.snapshot(),
            open_positions: self.book.open_count(),
            queue_depth: self.queue.depth_by_priority(),
            config_version: self.config.version(),
            counters: self.counters.snapshot(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_s: u64,
    pub db_ok: bool,
    pub wallet_cache_initialised: bool,
    pub wallet_cache: WalletCacheStats,
    pub token_cache: TokenCacheStats,
    pub last_webhook_at: Option<DateTime<Utc>>,
    pub breaker: BreakerSnapshot,
    pub open_positions: usize,
    pub queue_depth: Vec<QueueDepth>,
    pub config_version: u64,
    pub counters: CounterSnapshot,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("open_positions", &self.book.open_count())
            .field("queue_depth", &self.queue.depth())
            .field("breaker_active", &self.breaker.is_active())
            .finish()
    }
}
