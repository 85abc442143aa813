// =============================================================================
// Circuit Breaker — process-wide entry gate on drawdown / losing streaks
// =============================================================================
//
// Watches the rolling window of closed positions and trips when any of:
//   1. Drawdown from peak realized equity exceeds `max_drawdown_pct`.
//   2. Win rate over the window falls below `min_win_rate`, once at least
//      `min_positions` positions have closed.
//   3. Consecutive losses reach `consecutive_loss_limit`.
//
// While active, only NEW entries are blocked — exits always flow; the
// breaker never closes existing positions. Deactivation requires every
// condition to be clear AND the cooldown (counted from activation; it does
// not restart on re-triggering conditions) to have elapsed. Manual
// force-activate / force-deactivate are supported and logged.
//
// Activation and deactivation are recorded append-only with snapshots of the
// metrics and thresholds in force at the time.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::{BreakerParams, EngineConfig};
use crate::store::Store;

/// Rolling metrics snapshot, recorded with every breaker transition.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerMetrics {
    pub closed_in_window: usize,
    pub wins_in_window: usize,
    pub win_rate: f64,
    pub consecutive_losses: u32,
    pub realized_equity: f64,
    pub peak_equity: f64,
    pub drawdown_pct: f64,
}

/// Snapshot for the health/admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub is_active: bool,
    pub activated_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub metrics: BreakerMetrics,
    pub thresholds: BreakerParams,
}

struct Episode {
    activated_at: DateTime<Utc>,
    reason: String,
}

struct Inner {
    /// Realized PnL of recent closes, oldest first. Window length follows
    /// `min_positions` (at least 20 so the drawdown view has some depth).
    window: VecDeque<f64>,
    consecutive_losses: u32,
    realized_equity: f64,
    peak_equity: f64,
    active: Option<Episode>,
}

pub struct CircuitBreaker {
    config_rx: watch::Receiver<Arc<EngineConfig>>,
    store: Arc<Store>,
    state: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(store: Arc<Store>, config_rx: watch::Receiver<Arc<EngineConfig>>) -> Self {
        Self {
            config_rx,
            store,
            state: RwLock::new(Inner {
                window: VecDeque::new(),
                consecutive_losses: 0,
                realized_equity: 0.0,
                peak_equity: 0.0,
                active: None,
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.read().active.is_some()
    }

    // -------------------------------------------------------------------------
    // Close recording
    // -------------------------------------------------------------------------

    /// Record the realized PnL of a closed position and evaluate the trip
    /// conditions.
    pub fn record_close(&self, realized_pnl: f64) {
        let params = self.config_rx.borrow().breaker.clone();
        let window_len = (params.min_positions as usize).max(20);

        let mut s = self.state.write();
        s.window.push_back(realized_pnl);
        while s.window.len() > window_len {
            s.window.pop_front();
        }

        if realized_pnl < 0.0 {
            s.consecutive_losses += 1;
        } else {
            s.consecutive_losses = 0;
        }

        s.realized_equity += realized_pnl;
        if s.realized_equity > s.peak_equity {
            s.peak_equity = s.realized_equity;
        }

        if s.active.is_none() {
            if let Some(reason) = Self::trip_reason(&s, &params) {
                self.activate_locked(&mut s, &params, reason);
            }
        }
    }

    /// Periodic deactivation check: all conditions clear AND the cooldown
    /// elapsed since activation.
    pub fn evaluate_deactivation(&self) {
        let params = self.config_rx.borrow().breaker.clone();
        let mut s = self.state.write();

        let episode = match &s.active {
            Some(e) => e,
            None => return,
        };

        let cooldown = Duration::minutes(params.cooldown_minutes as i64);
        if Utc::now() - episode.activated_at < cooldown {
            return;
        }
        if Self::trip_reason(&s, &params).is_some() {
            return;
        }

        self.deactivate_locked(&mut s, &params, "conditions cleared after cooldown");
    }

    // -------------------------------------------------------------------------
    // Manual override
    // -------------------------------------------------------------------------

    pub fn force_activate(&self, reason: &str) {
        let params = self.config_rx.borrow().breaker.clone();
        let mut s = self.state.write();
        if s.active.is_some() {
            return;
        }
        warn!(reason, "circuit breaker force-activated by operator");
        self.activate_locked(&mut s, &params, format!("manual: {reason}"));
    }

    pub fn force_deactivate(&self) {
        let params = self.config_rx.borrow().breaker.clone();
        let mut s = self.state.write();
        if s.active.is_none() {
            return;
        }
        warn!("circuit breaker force-deactivated by operator");
        // Reset the counters that would immediately re-trip, so the manual
        // override actually sticks.
        s.consecutive_losses = 0;
        s.peak_equity = s.realized_equity;
        self.deactivate_locked(&mut s, &params, "manual deactivation");
    }

    // -------------------------------------------------------------------------
    // Snapshot
    // -------------------------------------------------------------------------

    pub fn snapshot(&self) -> BreakerSnapshot {
        let params = self.config_rx.borrow().breaker.clone();
        let s = self.state.read();
        BreakerSnapshot {
            is_active: s.active.is_some(),
            activated_at: s.active.as_ref().map(|e| e.activated_at),
            reason: s.active.as_ref().map(|e| e.reason.clone()),
            metrics: Self::metrics(&s),
            thresholds: params,
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn metrics(s: &Inner) -> BreakerMetrics {
        let closed = s.window.len();
        let wins = s.window.iter().filter(|&&pnl| pnl >= 0.0).count();
        let win_rate = if closed > 0 {
            wins as f64 / closed as f64
        } else {
            1.0
        };
        let drawdown_pct = if s.peak_equity > 0.0 {
            (s.peak_equity - s.realized_equity) / s.peak_equity * 100.0
        } else {
            0.0
        };
        BreakerMetrics {
            closed_in_window: closed,
            wins_in_window: wins,
            win_rate,
            consecutive_losses: s.consecutive_losses,
            realized_equity: s.realized_equity,
            peak_equity: s.peak_equity,
            drawdown_pct,
        }
    }

    fn trip_reason(s: &Inner, params: &BreakerParams) -> Option<String> {
        let m = Self::metrics(s);

        if m.drawdown_pct > params.max_drawdown_pct {
            return Some(format!(
                "drawdown {:.1}% > {:.1}%",
                m.drawdown_pct, params.max_drawdown_pct
            ));
        }
        if m.closed_in_window >= params.min_positions as usize && m.win_rate < params.min_win_rate
        {
            return Some(format!(
                "win rate {:.2} < {:.2} over {} positions",
                m.win_rate, params.min_win_rate, m.closed_in_window
            ));
        }
        if m.consecutive_losses >= params.consecutive_loss_limit {
            return Some(format!(
                "{} consecutive losses (limit {})",
                m.consecutive_losses, params.consecutive_loss_limit
            ));
        }
        None
    }

    fn activate_locked(&self, s: &mut Inner, params: &BreakerParams, reason: String) {
        warn!(reason = %reason, "CIRCUIT BREAKER ACTIVATED — new entries blocked, exits continue");
        let metrics = Self::metrics(s);
        s.active = Some(Episode {
            activated_at: Utc::now(),
            reason: reason.clone(),
        });

        let metrics_json = serde_json::to_string(&metrics).unwrap_or_default();
        let thresholds_json = serde_json::to_string(params).unwrap_or_default();
        if let Err(e) =
            self.store
                .insert_breaker_event("activated", &reason, &metrics_json, &thresholds_json)
        {
            warn!(error = %e, "failed to persist breaker activation");
        }
    }

    fn deactivate_locked(&self, s: &mut Inner, params: &BreakerParams, reason: &str) {
        info!(reason, "circuit breaker deactivated");
        s.active = None;

        let metrics_json = serde_json::to_string(&Self::metrics(s)).unwrap_or_default();
        let thresholds_json = serde_json::to_string(params).unwrap_or_default();
        if let Err(e) =
            self.store
                .insert_breaker_event("deactivated", reason, &metrics_json, &thresholds_json)
        {
            warn!(error = %e, "failed to persist breaker deactivation");
        }
    }

    /// Background task: periodically re-evaluate deactivation.
    pub async fn run_evaluator(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(30));
        loop {
            ticker.tick().await;
            self.evaluate_deactivation();
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("is_active", &self.is_active())
            .finish()
    }
}
