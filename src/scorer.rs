// =============================================================================
// Signal Scorer — weighted multi-factor conviction scoring
// =============================================================================
//
// Pure function of (filtered signal, token record, config snapshot, now) to
// a scored signal. All IO is resolved before scoring: the wallet entry rides
// on the filtered signal, the token record comes from the token cache.
//
// Four factor scores, each clamped to [0, 1]:
//   wallet  — historical performance of the source wallet
//   cluster — amplification from coordinated-wallet clusters
//   token   — market quality and safety of the token
//   context — time-of-day and placeholder activity defaults
//
// The final score is the weighted sum using the active config's weights
// (validated to sum to 1.0), clamped to [0, 1]. Every factor value and
// component term is preserved on the output for observability and replay,
// along with the exact weights used.
//
// Tier mapping: >= trade_threshold -> standard (x1.0); >= high conviction
// threshold -> high (x1.5); below -> none (x0). Hard gates (minimum
// liquidity, honeypot) only apply to otherwise-eligible signals and
// downgrade them to none with the failure reasons recorded.
// =============================================================================

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, ScoringWeights, Thresholds};
use crate::filter::FilteredSignal;
use crate::token_cache::TokenRecord;
use crate::types::ConvictionTier;
use crate::wallet_cache::WalletEntry;

// Internal blend weights for the token factor sub-scores.
const TOKEN_W_LIQUIDITY: f64 = 0.35;
const TOKEN_W_MARKET_CAP: f64 = 0.25;
const TOKEN_W_HOLDERS: f64 = 0.25;
const TOKEN_W_VOLUME: f64 = 0.15;

/// Holder count at which the holder sub-score saturates.
const HOLDER_SATURATION: f64 = 300.0;
/// 24h volume (USD) at which the volume sub-score saturates.
const VOLUME_SATURATION_USD: f64 = 50_000.0;
/// Top-10 concentration above this starts eroding the holder sub-score.
const CONCENTRATION_KNEE_PCT: f64 = 30.0;

/// Maximum age penalty for brand-new tokens.
const AGE_PENALTY_MAX: f64 = 0.3;
/// Token-factor penalty for a flagged honeypot.
const HONEYPOT_PENALTY: f64 = 0.5;
/// Token-factor penalty when mint or freeze authority is still held.
const AUTHORITY_PENALTY: f64 = 0.2;

/// avg PnL percent range normalised into [0, 1] for the wallet factor.
const AVG_PNL_RANGE: (f64, f64) = (-100.0, 500.0);

// =============================================================================
// Output types
// =============================================================================

/// Component terms behind the wallet factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletComponents {
    pub win_rate_term: f64,
    pub pnl_term: f64,
    pub timing_term: f64,
    pub consistency_term: f64,
    pub leader_bonus: f64,
    pub decay_penalty: f64,
}

/// Component terms behind the token factor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenComponents {
    pub liquidity: f64,
    pub market_cap: f64,
    pub holders: f64,
    pub volume: f64,
    pub age_penalty: f64,
    pub safety_penalty: f64,
}

/// Per-factor breakdown preserved on every scored signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorBreakdown {
    pub wallet: f64,
    pub cluster: f64,
    pub token: f64,
    pub context: f64,
    pub wallet_components: WalletComponents,
    pub token_components: TokenComponents,
    /// Token data came from the stale or neutral cache layer.
    pub token_data_degraded: bool,
}

/// Immutable scoring result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSignal {
    pub tx_signature: String,
    pub wallet: String,
    pub token: String,
    pub final_score: f64,
    pub conviction_tier: ConvictionTier,
    pub position_multiplier: f64,
    pub factors: FactorBreakdown,
    pub weights_snapshot: ScoringWeights,
    /// Hard-gate failures that downgraded an eligible signal to `none`.
    pub gate_failures: Vec<String>,
    pub scored_at: DateTime<Utc>,
}

impl ScoredSignal {
    pub fn is_trade_eligible(&self) -> bool {
        self.conviction_tier != ConvictionTier::None
    }
}

// =============================================================================
// Factor computations
// =============================================================================

fn clamp01(x: f64) -> f64 {
    x.clamp(0.0, 1.0)
}

fn normalise(x: f64, lo: f64, hi: f64) -> f64 {
    clamp01((x - lo) / (hi - lo))
}

/// Wallet factor: weighted performance blend plus leader bonus, minus decay
/// penalty.
pub fn wallet_factor(entry: &WalletEntry, thresholds: &Thresholds) -> (f64, WalletComponents) {
    let win_rate_term = 0.35 * clamp01(entry.win_rate);
    let pnl_term = 0.25 * normalise(entry.avg_pnl_pct, AVG_PNL_RANGE.0, AVG_PNL_RANGE.1);
    let timing_term = 0.25 * clamp01(entry.timing_percentile);
    let consistency_term = 0.15 * clamp01(entry.consistency);
    let leader_bonus = if entry.is_cluster_leader {
        thresholds.leader_bonus
    } else {
        0.0
    };
    let decay_penalty = if entry.is_decaying {
        thresholds.decay_penalty
    } else {
        0.0
    };

    let score = clamp01(
        win_rate_term + pnl_term + timing_term + consistency_term + leader_bonus - decay_penalty,
    );
    (
        score,
        WalletComponents {
            win_rate_term,
            pnl_term,
            timing_term,
            consistency_term,
            leader_bonus,
            decay_penalty,
        },
    )
}

/// Cluster factor: `solo_base` for unclustered wallets; otherwise the
/// amplification multiplier in [1.0, 1.8] mapped onto [solo_base, 1.0].
pub fn cluster_factor(entry: &WalletEntry, thresholds: &Thresholds) -> f64 {
    match entry.cluster_id {
        None => clamp01(thresholds.solo_base),
        Some(_) => {
            let m = entry.amplification.clamp(1.0, 1.8);
            let t = (m - 1.0) / 0.8;
            clamp01(thresholds.solo_base + t * (1.0 - thresholds.solo_base))
        }
    }
}

/// Token factor: liquidity/mcap/holders/volume blend, minus age and safety
/// penalties.
pub fn token_factor(token: &TokenRecord, thresholds: &Thresholds) -> (f64, TokenComponents) {
    let liquidity = normalise(
        token.liquidity_usd,
        thresholds.min_liquidity_usd,
        thresholds.optimal_liquidity_usd,
    );

    let market_cap = match token.market_cap_usd {
        Some(mc) => clamp01(mc / thresholds.optimal_market_cap_usd),
        None => 0.5,
    };

    let holders = {
        let base = match token.holder_count {
            Some(count) => clamp01(count as f64 / HOLDER_SATURATION),
            None => 0.5,
        };
        // Concentration above the knee erodes the holder score in proportion.
        let concentration_penalty = match token.top10_holder_pct {
            Some(pct) if pct > CONCENTRATION_KNEE_PCT => {
                clamp01((pct - CONCENTRATION_KNEE_PCT) / (100.0 - CONCENTRATION_KNEE_PCT))
            }
            _ => 0.0,
        };
        base * (1.0 - concentration_penalty)
    };

    let volume = match token.volume_24h_usd {
        Some(v) => clamp01(v / VOLUME_SATURATION_USD),
        None => 0.5,
    };

    let age_penalty = if token.age_minutes < thresholds.new_token_penalty_minutes {
        AGE_PENALTY_MAX * (1.0 - token.age_minutes / thresholds.new_token_penalty_minutes)
    } else {
        0.0
    };

    let safety_penalty = if token.is_honeypot == Some(true) {
        HONEYPOT_PENALTY
    } else if token.has_mint_authority == Some(true) || token.has_freeze_authority == Some(true) {
        AUTHORITY_PENALTY
    } else {
        0.0
    };

    let blend = TOKEN_W_LIQUIDITY * liquidity
        + TOKEN_W_MARKET_CAP * market_cap
        + TOKEN_W_HOLDERS * holders
        + TOKEN_W_VOLUME * volume;
    let score = clamp01(blend - age_penalty - safety_penalty);

    (
        score,
        TokenComponents {
            liquidity,
            market_cap,
            holders,
            volume,
            age_penalty,
            safety_penalty,
        },
    )
}

/// Context factor: time-of-day score blended with placeholder volatility and
/// activity defaults (0.5 each until real feeds exist).
pub fn context_factor(now: DateTime<Utc>) -> f64 {
    let hour = now.hour();
    let time_of_day = match hour {
        13..=21 => 1.0,
        10..=12 | 22..=23 => 0.8,
        _ => 0.6,
    };
    clamp01(0.6 * time_of_day + 0.4 * 0.5)
}

// =============================================================================
// Tier mapping + hard gates
// =============================================================================

/// Map a final score to its conviction tier under the given thresholds.
pub fn tier_for(score: f64, thresholds: &Thresholds) -> ConvictionTier {
    if score >= thresholds.high_conviction_threshold {
        ConvictionTier::High
    } else if score >= thresholds.trade_threshold {
        ConvictionTier::Standard
    } else {
        ConvictionTier::None
    }
}

/// Hard gates applied to otherwise-eligible signals. Any failure downgrades
/// the signal to `none`.
fn hard_gates(token: &TokenRecord, thresholds: &Thresholds) -> Vec<String> {
    let mut failures = Vec::new();
    if token.liquidity_usd < thresholds.min_liquidity_usd {
        failures.push(format!(
            "liquidity ${:.0} below minimum ${:.0}",
            token.liquidity_usd, thresholds.min_liquidity_usd
        ));
    }
    if token.is_honeypot == Some(true) {
        failures.push("token flagged as honeypot".to_string());
    }
    failures
}

// =============================================================================
// Entry point
// =============================================================================

/// Score one filtered signal. Pure: no locks, no IO, no clock reads beyond
/// the `now` passed in.
pub fn score(
    signal: &FilteredSignal,
    token: &TokenRecord,
    config: &EngineConfig,
    now: DateTime<Utc>,
) -> ScoredSignal {
    let thresholds = &config.thresholds;
    let weights = &config.scoring;

    let (wallet, wallet_components) = wallet_factor(&signal.wallet, thresholds);
    let cluster = cluster_factor(&signal.wallet, thresholds);
    let (token_score, token_components) = token_factor(token, thresholds);
    let context = context_factor(now);

    let final_score = clamp01(
        weights.wallet * wallet
            + weights.cluster * cluster
            + weights.token * token_score
            + weights.context * context,
    );

    let mut conviction_tier = tier_for(final_score, thresholds);
    let mut gate_failures = Vec::new();
    if conviction_tier != ConvictionTier::None {
        gate_failures = hard_gates(token, thresholds);
        if !gate_failures.is_empty() {
            conviction_tier = ConvictionTier::None;
        }
    }

    ScoredSignal {
        tx_signature: signal.event.tx_signature.clone(),
        wallet: signal.event.wallet.clone(),
        token: signal.event.token.clone(),
        final_score,
        conviction_tier,
        position_multiplier: conviction_tier.multiplier(),
        factors: FactorBreakdown {
            wallet,
            cluster,
            token: token_score,
            context,
            wallet_components,
            token_components,
            token_data_degraded: token.degraded,
        },
        weights_snapshot: weights.clone(),
        gate_failures,
        scored_at: now,
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::token_cache::TokenSource;
    use crate::types::{Direction, SwapEvent};
    use chrono::TimeZone;

    fn wallet_entry() -> WalletEntry {
        WalletEntry {
            address: "W1".to_string(),
            is_monitored: true,
            is_blacklisted: false,
            cluster_id: Some("K".to_string()),
            is_cluster_leader: true,
            amplification: 1.8,
            reputation: 0.8,
            win_rate: 0.8,
            avg_pnl_pct: 250.0,
            timing_percentile: 0.9,
            consistency: 0.8,
            is_decaying: false,
            cached_at: Utc::now(),
        }
    }

    fn token_record() -> TokenRecord {
        TokenRecord {
            address: "MintT".to_string(),
            symbol: Some("T".to_string()),
            price_usd: 0.05,
            price_sol: 0.001,
            liquidity_usd: 30_000.0,
            market_cap_usd: Some(200_000.0),
            volume_24h_usd: None,
            age_minutes: 60.0,
            holder_count: Some(250),
            top10_holder_pct: None,
            is_honeypot: Some(false),
            has_mint_authority: Some(false),
            has_freeze_authority: Some(false),
            is_new: false,
            source: TokenSource::Primary,
            degraded: false,
            fetched_at: Utc::now(),
            ttl_s: 300,
        }
    }

    fn filtered_signal() -> FilteredSignal {
        FilteredSignal {
            event: SwapEvent {
                tx_signature: "sig1".to_string(),
                wallet: "W1".to_string(),
                token: "MintT".to_string(),
                direction: Direction::Buy,
                amount_token: 20_000.0,
                amount_sol: 1.0,
                slot: 1,
                ts: Utc::now(),
            },
            wallet: wallet_entry(),
            wallet_cache_hit: true,
        }
    }

    fn peak_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 15, 0, 0).unwrap()
    }

    #[test]
    fn strong_signal_scores_standard_tier() {
        let scored = score(
            &filtered_signal(),
            &token_record(),
            &EngineConfig::default(),
            peak_time(),
        );
        // Strong wallet + full cluster amplification + mid-grade token lands
        // in the standard band with default weights.
        assert!(
            scored.final_score > 0.70 && scored.final_score < 0.85,
            "score {}",
            scored.final_score
        );
        assert_eq!(scored.conviction_tier, ConvictionTier::Standard);
        assert_eq!(scored.position_multiplier, 1.0);
        assert!(scored.gate_failures.is_empty());
    }

    #[test]
    fn final_score_is_exact_weighted_sum() {
        let config = EngineConfig::default();
        let scored = score(&filtered_signal(), &token_record(), &config, peak_time());
        let w = &scored.weights_snapshot;
        let f = &scored.factors;
        let expected = w.wallet * f.wallet + w.cluster * f.cluster + w.token * f.token + w.context * f.context;
        assert!((scored.final_score - expected).abs() < 1e-9);
    }

    #[test]
    fn factors_stay_in_unit_interval() {
        let mut entry = wallet_entry();
        entry.avg_pnl_pct = 10_000.0; // absurd winner
        entry.win_rate = 1.5; // corrupt input
        let (w, _) = wallet_factor(&entry, &Thresholds::default());
        assert!((0.0..=1.0).contains(&w));

        let mut token = token_record();
        token.liquidity_usd = 10_000_000.0;
        token.market_cap_usd = Some(1e12);
        let (t, _) = token_factor(&token, &Thresholds::default());
        assert!((0.0..=1.0).contains(&t));

        let mut rug = token_record();
        rug.is_honeypot = Some(true);
        rug.liquidity_usd = 0.0;
        rug.age_minutes = 0.0;
        let (t, _) = token_factor(&rug, &Thresholds::default());
        assert!((0.0..=1.0).contains(&t));
    }

    #[test]
    fn tier_mapping_is_monotone_in_score() {
        let thresholds = Thresholds::default();
        let mut last_multiplier = -1.0;
        for i in 0..=100 {
            let score = i as f64 / 100.0;
            let multiplier = tier_for(score, &thresholds).multiplier();
            assert!(
                multiplier >= last_multiplier,
                "multiplier decreased at score {score}"
            );
            last_multiplier = multiplier;
        }
    }

    #[test]
    fn below_threshold_is_none_tier() {
        let mut config = EngineConfig::default();
        config.thresholds.trade_threshold = 0.80;
        config.thresholds.high_conviction_threshold = 0.95;
        let scored = score(&filtered_signal(), &token_record(), &config, peak_time());
        assert!(scored.final_score < 0.80);
        assert_eq!(scored.conviction_tier, ConvictionTier::None);
        assert_eq!(scored.position_multiplier, 0.0);
    }

    #[test]
    fn honeypot_hard_gate_downgrades_eligible_signal() {
        let mut token = token_record();
        token.is_honeypot = Some(true);
        // Keep the blend high enough that the score alone would still trade.
        token.liquidity_usd = 500_000.0;
        token.market_cap_usd = Some(5_000_000.0);
        token.volume_24h_usd = Some(1_000_000.0);

        let scored = score(&filtered_signal(), &token, &EngineConfig::default(), peak_time());
        if scored.final_score >= 0.70 {
            assert_eq!(scored.conviction_tier, ConvictionTier::None);
            assert!(scored
                .gate_failures
                .iter()
                .any(|r| r.contains("honeypot")));
        }
    }

    #[test]
    fn liquidity_hard_gate_records_reason() {
        let mut token = token_record();
        token.liquidity_usd = 5_000.0; // below the 10k minimum

        let mut config = EngineConfig::default();
        config.thresholds.trade_threshold = 0.10; // force eligibility

        let scored = score(&filtered_signal(), &token, &config, peak_time());
        assert_eq!(scored.conviction_tier, ConvictionTier::None);
        assert!(scored.gate_failures.iter().any(|r| r.contains("liquidity")));
    }

    #[test]
    fn solo_wallet_gets_solo_base_cluster_factor() {
        let mut entry = wallet_entry();
        entry.cluster_id = None;
        assert_eq!(cluster_factor(&entry, &Thresholds::default()), 0.5);
    }

    #[test]
    fn cluster_amplification_maps_linearly() {
        let thresholds = Thresholds::default();
        let mut entry = wallet_entry();

        entry.amplification = 1.0;
        assert!((cluster_factor(&entry, &thresholds) - 0.5).abs() < 1e-9);
        entry.amplification = 1.8;
        assert!((cluster_factor(&entry, &thresholds) - 1.0).abs() < 1e-9);
        entry.amplification = 1.4;
        assert!((cluster_factor(&entry, &thresholds) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn decaying_wallet_is_penalised() {
        let thresholds = Thresholds::default();
        let healthy = wallet_factor(&wallet_entry(), &thresholds).0;
        let mut entry = wallet_entry();
        entry.is_decaying = true;
        let decaying = wallet_factor(&entry, &thresholds).0;
        assert!(decaying < healthy);
    }

    #[test]
    fn concentration_erodes_holder_score() {
        let thresholds = Thresholds::default();
        let spread = token_factor(&token_record(), &thresholds).1.holders;
        let mut token = token_record();
        token.top10_holder_pct = Some(65.0);
        let concentrated = token_factor(&token, &thresholds).1.holders;
        assert!(concentrated < spread);
    }

    #[test]
    fn young_token_age_penalty_is_linear() {
        let thresholds = Thresholds::default();
        let mut token = token_record();
        token.age_minutes = 0.0;
        let at_zero = token_factor(&token, &thresholds).1.age_penalty;
        assert!((at_zero - AGE_PENALTY_MAX).abs() < 1e-9);
        token.age_minutes = 15.0; // half of the 30-minute window
        let at_half = token_factor(&token, &thresholds).1.age_penalty;
        assert!((at_half - AGE_PENALTY_MAX / 2.0).abs() < 1e-9);
    }

    #[test]
    fn off_peak_context_is_lower() {
        let peak = context_factor(peak_time());
        let dead = context_factor(Utc.with_ymd_and_hms(2025, 6, 2, 4, 0, 0).unwrap());
        assert!(peak > dead);
        assert!((0.0..=1.0).contains(&peak));
        assert!((0.0..=1.0).contains(&dead));
    }

    #[test]
    fn weights_snapshot_rides_on_output() {
        let mut config = EngineConfig::default();
        config.scoring.wallet = 0.40;
        config.scoring.cluster = 0.15;
        let scored = score(&filtered_signal(), &token_record(), &config, peak_time());
        assert_eq!(scored.weights_snapshot.wallet, 0.40);
        assert_eq!(scored.weights_snapshot.cluster, 0.15);
    }
}
