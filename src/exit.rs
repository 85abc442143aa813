// =============================================================================
// Exit Evaluator — stop-loss / trailing-stop / scaling-out rules
// =============================================================================
//
// Pure evaluation of a position against its merged exit configuration (the
// per-position override layered over the referenced template). Mirror exits
// are not decided here: they are driven by incoming sell signals in the
// pipeline and always preempt these rules.
//
// Rule priority, first hit wins:
//   1. Stop-loss       — pnl_pct <= -stop_loss_pct          -> full exit
//   2. Trailing stop   — drawdown from peak <= -trailing_pct,
//                        armed once peak PnL reached the
//                        activation threshold               -> full exit
//   3. Scaling-out     — first unexecuted level with
//                        pnl_pct >= profit_pct              -> partial exit
//
// Percentages are signed and measured against the entry price, never against
// the last tick. Rules never fire on a position that is not Open or whose
// price is stale.
// =============================================================================

use serde::Serialize;

use crate::config::ExitStrategyTemplate;
use crate::position::{Position, PositionStatus};
use crate::types::OrderKind;

/// A fired exit rule: what to sell and why.
#[derive(Debug, Clone, Serialize)]
pub struct ExitDecision {
    pub kind: OrderKind,
    /// Token amount to sell.
    pub amount: f64,
    /// Index into the merged scaling-level list, for scaling exits.
    pub scaling_level: Option<usize>,
    pub reason: String,
}

/// Resolve the effective exit configuration for a position.
pub fn merged_strategy(position: &Position, template: &ExitStrategyTemplate) -> ExitStrategyTemplate {
    match &position.exit_override {
        Some(ov) => template.merged(ov),
        None => template.clone(),
    }
}

/// Evaluate the exit rules for one position. Returns the single
/// highest-priority decision, or `None` when nothing fires.
pub fn evaluate(position: &Position, strategy: &ExitStrategyTemplate) -> Option<ExitDecision> {
    if position.status != PositionStatus::Open || position.current_amount <= 0.0 {
        return None;
    }
    if position.price_stale || position.entry_price <= 0.0 || position.current_price <= 0.0 {
        return None;
    }

    let pnl_pct = position.pnl_pct();

    // --- 1. Stop-loss -----------------------------------------------------
    if pnl_pct <= -strategy.stop_loss_pct {
        return Some(ExitDecision {
            kind: OrderKind::ExitStopLoss,
            amount: position.current_amount,
            scaling_level: None,
            reason: format!("stop_loss: pnl {pnl_pct:.2}% <= -{:.2}%", strategy.stop_loss_pct),
        });
    }

    // --- 2. Trailing stop -------------------------------------------------
    // Armed iff the peak ever reached the activation threshold; since peak
    // price is monotone over the open lifetime this needs no extra state.
    let armed = position.peak_pnl_pct() >= strategy.trailing_activation_pct;
    if armed && position.peak_price > 0.0 {
        let drawdown_pct =
            (position.current_price - position.peak_price) / position.peak_price * 100.0;
        if drawdown_pct <= -strategy.trailing_pct {
            return Some(ExitDecision {
                kind: OrderKind::ExitTrailing,
                amount: position.current_amount,
                scaling_level: None,
                reason: format!(
                    "trailing_stop: {drawdown_pct:.2}% off peak (limit -{:.2}%)",
                    strategy.trailing_pct
                ),
            });
        }
    }

    // --- 3. Scaling-out ---------------------------------------------------
    // One level per evaluation pass; executed levels can never re-fire.
    for (idx, level) in strategy.scaling_levels.iter().enumerate() {
        if position.executed_scaling_levels.contains(&idx) {
            continue;
        }
        if pnl_pct >= level.profit_pct {
            let amount = (position.entry_amount * level.fraction).min(position.current_amount);
            if amount <= 0.0 {
                continue;
            }
            return Some(ExitDecision {
                kind: OrderKind::ExitScaling,
                amount,
                scaling_level: Some(idx),
                reason: format!(
                    "scaling_level_{idx}: pnl {pnl_pct:.2}% >= {:.2}%",
                    level.profit_pct
                ),
            });
        }
    }

    None
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExitOverride, LimitParams, ScalingLevel};
    use crate::position::{NewPosition, PositionBook};
    use crate::types::TradeMode;
    use chrono::Utc;

    fn open_position(entry_price: f64) -> (PositionBook, String) {
        let book = PositionBook::new();
        let pos = book
            .create(
                NewPosition {
                    wallet: "W".to_string(),
                    token: "MintA".to_string(),
                    mode: TradeMode::Simulation,
                    size_sol: entry_price * 100.0, // 100 tokens
                    exit_strategy: "standard".to_string(),
                    exit_override: None,
                    cluster_id: None,
                    source_signature: "sig".to_string(),
                    observed_price: entry_price,
                },
                &LimitParams::default(),
            )
            .unwrap();
        (book, pos.id)
    }

    fn strategy() -> ExitStrategyTemplate {
        ExitStrategyTemplate {
            stop_loss_pct: 20.0,
            trailing_pct: 15.0,
            trailing_activation_pct: 50.0,
            scaling_levels: vec![
                ScalingLevel {
                    profit_pct: 100.0,
                    fraction: 0.5,
                },
                ScalingLevel {
                    profit_pct: 200.0,
                    fraction: 0.25,
                },
            ],
        }
    }

    #[test]
    fn stop_loss_fires_on_threshold() {
        let (book, id) = open_position(100.0);
        book.apply_price("MintA", 78.0, Utc::now());
        let pos = book.get(&id).unwrap();

        let decision = evaluate(&pos, &strategy()).unwrap();
        assert_eq!(decision.kind, OrderKind::ExitStopLoss);
        assert_eq!(decision.amount, pos.current_amount);
    }

    #[test]
    fn stop_loss_respects_boundary() {
        let (book, id) = open_position(100.0);
        // -19.9%: not yet.
        book.apply_price("MintA", 80.1, Utc::now());
        assert!(evaluate(&book.get(&id).unwrap(), &strategy()).is_none());
        // exactly -20%: fires.
        book.apply_price("MintA", 80.0, Utc::now());
        let d = evaluate(&book.get(&id).unwrap(), &strategy()).unwrap();
        assert_eq!(d.kind, OrderKind::ExitStopLoss);
    }

    #[test]
    fn trailing_requires_activation() {
        let (book, id) = open_position(100.0);
        // Peak at +30% (< 50% activation), then a 20% drop: must not fire.
        book.apply_price("MintA", 130.0, Utc::now());
        book.apply_price("MintA", 104.0, Utc::now());
        let pos = book.get(&id).unwrap();
        assert!(evaluate(&pos, &strategy()).is_none());
    }

    #[test]
    fn trailing_fires_after_activation() {
        let (book, id) = open_position(100.0);
        book.apply_price("MintA", 160.0, Utc::now()); // +60%, armed
        book.apply_price("MintA", 136.0, Utc::now()); // -15% off peak
        let pos = book.get(&id).unwrap();

        let decision = evaluate(&pos, &strategy()).unwrap();
        assert_eq!(decision.kind, OrderKind::ExitTrailing);
        assert_eq!(decision.amount, pos.current_amount);
    }

    #[test]
    fn stop_loss_outranks_trailing() {
        let (book, id) = open_position(100.0);
        // Armed at +60%, then collapse below the stop.
        book.apply_price("MintA", 160.0, Utc::now());
        book.apply_price("MintA", 75.0, Utc::now());
        let pos = book.get(&id).unwrap();

        let decision = evaluate(&pos, &strategy()).unwrap();
        assert_eq!(decision.kind, OrderKind::ExitStopLoss);
    }

    #[test]
    fn scaling_fires_lowest_pending_level() {
        let (book, id) = open_position(100.0);
        book.apply_price("MintA", 210.0, Utc::now()); // +110%
        let pos = book.get(&id).unwrap();

        let decision = evaluate(&pos, &strategy()).unwrap();
        assert_eq!(decision.kind, OrderKind::ExitScaling);
        assert_eq!(decision.scaling_level, Some(0));
        assert!((decision.amount - pos.entry_amount * 0.5).abs() < 1e-9);
    }

    #[test]
    fn executed_level_never_refires() {
        let (book, id) = open_position(100.0);
        book.apply_price("MintA", 210.0, Utc::now());
        let pos = book.get(&id).unwrap();
        let d = evaluate(&pos, &strategy()).unwrap();
        book.apply_exit_fill(&id, d.amount, 210.0, d.scaling_level, &d.reason);

        // Oscillate back through the threshold repeatedly.
        for price in [150.0, 210.0, 150.0, 215.0] {
            book.apply_price("MintA", price, Utc::now());
            let pos = book.get(&id).unwrap();
            if let Some(d) = evaluate(&pos, &strategy()) {
                assert_ne!(d.scaling_level, Some(0), "level 0 re-fired at {price}");
            }
        }
    }

    #[test]
    fn override_replaces_scaling_levels_wholesale() {
        let (book, id) = open_position(100.0);
        book.apply_price("MintA", 180.0, Utc::now()); // +80%
        let mut pos = book.get(&id).unwrap();
        pos.exit_override = Some(ExitOverride {
            scaling_levels: Some(vec![ScalingLevel {
                profit_pct: 75.0,
                fraction: 0.4,
            }]),
            ..Default::default()
        });

        let merged = merged_strategy(&pos, &strategy());
        assert_eq!(merged.scaling_levels.len(), 1);
        let decision = evaluate(&pos, &merged).unwrap();
        assert_eq!(decision.scaling_level, Some(0));
        assert!((decision.amount - pos.entry_amount * 0.4).abs() < 1e-9);
    }

    #[test]
    fn stale_price_suppresses_all_rules() {
        let (book, id) = open_position(100.0);
        book.apply_price("MintA", 70.0, Utc::now()); // would stop out
        book.mark_price_stale("MintA");
        let pos = book.get(&id).unwrap();
        assert!(evaluate(&pos, &strategy()).is_none());
    }

    #[test]
    fn peak_is_monotone_and_trailing_matches_formula() {
        let (book, id) = open_position(100.0);
        let mut last_peak = 0.0;
        for price in [120.0, 320.0, 250.0, 280.0, 272.0] {
            book.apply_price("MintA", price, Utc::now());
            let pos = book.get(&id).unwrap();
            assert!(pos.peak_price >= last_peak);
            last_peak = pos.peak_price;
        }
        // peak 320, price 272 => -15.0% drawdown, trailing fires.
        let pos = book.get(&id).unwrap();
        let strat = ExitStrategyTemplate {
            scaling_levels: Vec::new(),
            ..strategy()
        };
        let decision = evaluate(&pos, &strat).unwrap();
        assert_eq!(decision.kind, OrderKind::ExitTrailing);
    }
}
