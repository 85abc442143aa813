// =============================================================================
// Signal Pipeline — filter -> score -> entry / mirror-exit decisions
// =============================================================================
//
// One task consumes parsed swap events in arrival order (per-wallet ordering
// follows from the single consumer). For each event:
//
//   buy  -> wallet gate -> token enrichment -> scoring -> threshold/hard
//           gates -> limits -> position creation (+ entry order in live mode)
//   sell -> wallet gate -> mirror check: an open position mirroring the same
//           wallet on the same token (full address match) is fully exited at
//           CRITICAL priority, regardless of PnL
//
// Every scored signal is persisted, traded or not. Entries are additionally
// gated by the circuit breaker; exits never are.
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::filter::{filter_event, DropReason, FilteredSignal};
use crate::position::NewPosition;
use crate::scorer;
use crate::swap_queue::{EnqueueOutcome, SwapIntent};
use crate::types::{Direction, OrderKind, SwapEvent, TradeMode};

/// Consume events until the channel closes. Spawn exactly once.
pub async fn run_pipeline(state: Arc<AppState>, mut rx: mpsc::Receiver<SwapEvent>) {
    info!("signal pipeline started");
    while let Some(event) = rx.recv().await {
        handle_event(&state, event).await;
    }
    info!("signal pipeline stopped (channel closed)");
}

/// Process one parsed swap event end to end.
pub async fn handle_event(state: &Arc<AppState>, event: SwapEvent) {
    let signal = match filter_event(&state.wallet_cache, event) {
        Ok(signal) => signal,
        Err(DropReason::Blacklisted) => {
            state
                .counters
                .signals_blacklisted
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(DropReason::NotMonitored) => {
            state
                .counters
                .signals_not_monitored
                .fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match signal.event.direction {
        Direction::Sell => handle_sell(state, signal),
        Direction::Buy => handle_buy(state, signal).await,
    }
}

// -------------------------------------------------------------------------
// Sell path: mirror exit
// -------------------------------------------------------------------------

/// A sell from a monitored wallet: if we are mirroring that wallet on that
/// token, exit the whole position ahead of everything else in the queue.
fn handle_sell(state: &Arc<AppState>, signal: FilteredSignal) {
    let event = &signal.event;
    let Some(position) = state.book.find_mirror(&event.wallet, &event.token) else {
        debug!(
            wallet = %event.wallet,
            token = %event.token,
            "sell from monitored wallet, no position to mirror"
        );
        return;
    };

    info!(
        position = %position.id,
        wallet = %event.wallet,
        token = %event.token,
        source_tx = %event.tx_signature,
        "MIRROR EXIT — source wallet sold"
    );

    state.book.begin_full_exit(&position.id);
    let outcome = state.queue.enqueue(SwapIntent {
        kind: OrderKind::ExitMirror,
        position_id: position.id.clone(),
        token: position.token.clone(),
        amount: position.current_amount,
        scaling_level: None,
        reason: "mirror_exit".to_string(),
        mode: position.mode,
        observed_price: position.current_price,
    });
    debug_assert_eq!(outcome, EnqueueOutcome::Accepted);
    state.counters.mirror_exits.fetch_add(1, Ordering::Relaxed);
}

// -------------------------------------------------------------------------
// Buy path: score and maybe enter
// -------------------------------------------------------------------------

async fn handle_buy(state: &Arc<AppState>, signal: FilteredSignal) {
    let config = state.config.snapshot();
    let token = state.token_cache.get(&signal.event.token).await;

    let scored = scorer::score(&signal, &token, &config, Utc::now());
    state.counters.signals_scored.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = state.store.insert_scored_signal(&scored) {
        warn!(tx = %scored.tx_signature, error = %e, "failed to persist scored signal");
    }

    if !scored.is_trade_eligible() {
        info!(
            tx = %scored.tx_signature,
            token = %scored.token,
            score = format!("{:.3}", scored.final_score),
            gates = ?scored.gate_failures,
            "signal below conviction — not trading"
        );
        return;
    }

    // Entries are breaker-gated; exits never come through this path.
    if state.breaker.is_active() {
        state
            .counters
            .entries_breaker_blocked
            .fetch_add(1, Ordering::Relaxed);
        info!(
            tx = %scored.tx_signature,
            token = %scored.token,
            "entry rejected: breaker_blocked_entry"
        );
        return;
    }

    // Price observed on the source swap; enrichment price as fallback.
    let observed_price = if signal.event.amount_token > 0.0 {
        signal.event.amount_sol / signal.event.amount_token
    } else {
        token.price_sol
    };
    let size_sol = config.limits.base_size_sol * scored.position_multiplier;

    let new = NewPosition {
        wallet: signal.event.wallet.clone(),
        token: signal.event.token.clone(),
        mode: config.mode,
        size_sol,
        exit_strategy: config.exit.default_strategy.clone(),
        exit_override: None,
        cluster_id: signal.wallet.cluster_id.clone(),
        source_signature: signal.event.tx_signature.clone(),
        observed_price,
    };

    let position = match state.book.create(new, &config.limits) {
        Ok(position) => position,
        Err(violation) => {
            state
                .counters
                .entries_limit_exceeded
                .fetch_add(1, Ordering::Relaxed);
            info!(
                tx = %scored.tx_signature,
                token = %scored.token,
                reason = %violation,
                "entry refused"
            );
            return;
        }
    };

    if let Err(e) = state.store.upsert_position(&position) {
        warn!(position = %position.id, error = %e, "failed to persist position");
    }

    match config.mode {
        TradeMode::Simulation => {
            // Synthetic fill already applied at creation; no queue trip.
            state.counters.entries_opened.fetch_add(1, Ordering::Relaxed);
            info!(
                position = %position.id,
                token = %position.token,
                tier = %scored.conviction_tier,
                size_sol,
                entry_price = position.entry_price,
                "simulated entry opened"
            );
        }
        TradeMode::Live => {
            let outcome = state.queue.enqueue(SwapIntent {
                kind: OrderKind::Entry,
                position_id: position.id.clone(),
                token: position.token.clone(),
                amount: size_sol,
                scaling_level: None,
                reason: format!("entry:{}", scored.conviction_tier),
                mode: TradeMode::Live,
                observed_price,
            });
            match outcome {
                EnqueueOutcome::Accepted => {
                    state.counters.entries_opened.fetch_add(1, Ordering::Relaxed);
                    info!(
                        position = %position.id,
                        token = %position.token,
                        tier = %scored.conviction_tier,
                        size_sol,
                        "entry enqueued"
                    );
                }
                EnqueueOutcome::BreakerBlockedEntry => {
                    // Breaker flipped between the pre-check and enqueue;
                    // nothing executed, drop the pending shell.
                    state
                        .counters
                        .entries_breaker_blocked
                        .fetch_add(1, Ordering::Relaxed);
                    state.book.abandon_pending(&position.id);
                }
            }
        }
    }
}
