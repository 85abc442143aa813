// =============================================================================
// Config Store — versioned engine parameters with draft/activate lifecycle
// =============================================================================
//
// Every tunable parameter of the pipeline lives here so the engine can be
// re-tuned at runtime without a restart. Components never read live globals:
// they hold a `watch::Receiver` and cache an immutable `Arc<EngineConfig>`
// snapshot, refreshed when a new version is activated.
//
// Lifecycle: exactly one `active` config at any time. Edits go into a single
// `draft`, which is validated and atomically promoted: version bumped, the
// previous active archived, the new snapshot published. Readers can never
// observe a partially-updated config.
//
// All fields carry `#[serde(default)]` so that adding new fields never breaks
// loading an older persisted config row.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::Store;
use crate::types::TradeMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_weight_wallet() -> f64 {
    0.35
}

fn default_weight_cluster() -> f64 {
    0.20
}

fn default_weight_token() -> f64 {
    0.30
}

fn default_weight_context() -> f64 {
    0.15
}

fn default_trade_threshold() -> f64 {
    0.70
}

fn default_high_conviction_threshold() -> f64 {
    0.85
}

fn default_min_liquidity_usd() -> f64 {
    10_000.0
}

fn default_optimal_liquidity_usd() -> f64 {
    50_000.0
}

fn default_optimal_market_cap_usd() -> f64 {
    500_000.0
}

fn default_new_token_penalty_minutes() -> f64 {
    30.0
}

fn default_solo_base() -> f64 {
    0.5
}

fn default_leader_bonus() -> f64 {
    0.05
}

fn default_decay_penalty() -> f64 {
    0.10
}

fn default_base_size_sol() -> f64 {
    0.5
}

fn default_max_concurrent_positions() -> u32 {
    5
}

fn default_max_per_token() -> u32 {
    1
}

fn default_max_per_cluster() -> u32 {
    2
}

fn default_strategy_name() -> String {
    "standard".to_string()
}

fn default_stop_loss_pct() -> f64 {
    20.0
}

fn default_trailing_pct() -> f64 {
    15.0
}

fn default_trailing_activation_pct() -> f64 {
    50.0
}

fn default_scaling_levels() -> Vec<ScalingLevel> {
    vec![
        ScalingLevel {
            profit_pct: 100.0,
            fraction: 0.5,
        },
        ScalingLevel {
            profit_pct: 200.0,
            fraction: 0.25,
        },
    ]
}

fn default_min_spacing_s() -> f64 {
    2.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_drain_budget_s() -> u64 {
    10
}

fn default_max_drawdown_pct() -> f64 {
    20.0
}

fn default_min_win_rate() -> f64 {
    0.30
}

fn default_min_positions() -> u32 {
    10
}

fn default_consecutive_loss_limit() -> u32 {
    5
}

fn default_cooldown_minutes() -> u64 {
    30
}

fn default_poll_urgent_s() -> u64 {
    20
}

fn default_poll_active_s() -> u64 {
    30
}

fn default_poll_stable_s() -> u64 {
    60
}

fn default_stale_price_max_s() -> u64 {
    300
}

fn default_wallet_entry_ttl_s() -> u64 {
    300
}

fn default_wallet_refresh_interval_s() -> u64 {
    60
}

fn default_wallet_cache_max() -> u32 {
    10_000
}

fn default_token_ttl_s() -> u64 {
    300
}

fn default_new_token_age_minutes() -> f64 {
    60.0
}

fn default_token_max_wait_ms() -> u64 {
    1_500
}

// =============================================================================
// Parameter groups
// =============================================================================

/// Weights for the four scoring factors. Must sum to 1.0 ± 1e-3.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(default = "default_weight_wallet")]
    pub wallet: f64,
    #[serde(default = "default_weight_cluster")]
    pub cluster: f64,
    #[serde(default = "default_weight_token")]
    pub token: f64,
    #[serde(default = "default_weight_context")]
    pub context: f64,
}

impl ScoringWeights {
    pub fn sum(&self) -> f64 {
        self.wallet + self.cluster + self.token + self.context
    }
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            wallet: default_weight_wallet(),
            cluster: default_weight_cluster(),
            token: default_weight_token(),
            context: default_weight_context(),
        }
    }
}

/// Score thresholds and token-factor shaping parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Minimum final score to trade at all (standard tier).
    #[serde(default = "default_trade_threshold")]
    pub trade_threshold: f64,

    /// Score above which the high-conviction multiplier applies.
    /// Must be strictly greater than `trade_threshold`.
    #[serde(default = "default_high_conviction_threshold")]
    pub high_conviction_threshold: f64,

    /// Hard gate: tokens below this liquidity are never traded.
    #[serde(default = "default_min_liquidity_usd")]
    pub min_liquidity_usd: f64,

    /// Liquidity at which the liquidity sub-score saturates at 1.0.
    #[serde(default = "default_optimal_liquidity_usd")]
    pub optimal_liquidity_usd: f64,

    /// Market cap at which the mcap sub-score saturates at 1.0.
    #[serde(default = "default_optimal_market_cap_usd")]
    pub optimal_market_cap_usd: f64,

    /// Tokens younger than this get a linear age penalty.
    #[serde(default = "default_new_token_penalty_minutes")]
    pub new_token_penalty_minutes: f64,

    /// Cluster factor for wallets with no cluster membership.
    #[serde(default = "default_solo_base")]
    pub solo_base: f64,

    /// Additive bonus on the wallet factor for cluster leaders.
    #[serde(default = "default_leader_bonus")]
    pub leader_bonus: f64,

    /// Subtractive penalty on the wallet factor for decaying wallets.
    #[serde(default = "default_decay_penalty")]
    pub decay_penalty: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            trade_threshold: default_trade_threshold(),
            high_conviction_threshold: default_high_conviction_threshold(),
            min_liquidity_usd: default_min_liquidity_usd(),
            optimal_liquidity_usd: default_optimal_liquidity_usd(),
            optimal_market_cap_usd: default_optimal_market_cap_usd(),
            new_token_penalty_minutes: default_new_token_penalty_minutes(),
            solo_base: default_solo_base(),
            leader_bonus: default_leader_bonus(),
            decay_penalty: default_decay_penalty(),
        }
    }
}

/// Concurrency and concentration limits applied before a position is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitParams {
    /// Base entry size in SOL; scaled by the conviction multiplier.
    #[serde(default = "default_base_size_sol")]
    pub base_size_sol: f64,

    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: u32,

    #[serde(default = "default_max_per_token")]
    pub max_per_token: u32,

    #[serde(default = "default_max_per_cluster")]
    pub max_per_cluster: u32,
}

impl Default for LimitParams {
    fn default() -> Self {
        Self {
            base_size_sol: default_base_size_sol(),
            max_concurrent_positions: default_max_concurrent_positions(),
            max_per_token: default_max_per_token(),
            max_per_cluster: default_max_per_cluster(),
        }
    }
}

/// One partial-exit tier: sell `fraction` of the entry amount once PnL
/// reaches `profit_pct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingLevel {
    pub profit_pct: f64,
    pub fraction: f64,
}

/// A named exit-strategy template. Positions reference a template by name and
/// may layer a partial [`ExitOverride`] on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitStrategyTemplate {
    /// Full exit when PnL falls to -stop_loss_pct.
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,

    /// Trailing stop distance from peak, in percent.
    #[serde(default = "default_trailing_pct")]
    pub trailing_pct: f64,

    /// Trailing stop arms only once PnL has reached this percentage.
    #[serde(default = "default_trailing_activation_pct")]
    pub trailing_activation_pct: f64,

    /// Partial-exit tiers, evaluated in listed order.
    #[serde(default = "default_scaling_levels")]
    pub scaling_levels: Vec<ScalingLevel>,
}

impl Default for ExitStrategyTemplate {
    fn default() -> Self {
        Self {
            stop_loss_pct: default_stop_loss_pct(),
            trailing_pct: default_trailing_pct(),
            trailing_activation_pct: default_trailing_activation_pct(),
            scaling_levels: default_scaling_levels(),
        }
    }
}

/// Per-position override of the referenced template. A provided
/// `scaling_levels` replaces the template's list wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExitOverride {
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub trailing_pct: Option<f64>,
    #[serde(default)]
    pub trailing_activation_pct: Option<f64>,
    #[serde(default)]
    pub scaling_levels: Option<Vec<ScalingLevel>>,
}

impl ExitStrategyTemplate {
    /// Layer `ov` over this template, producing the effective exit config.
    pub fn merged(&self, ov: &ExitOverride) -> ExitStrategyTemplate {
        ExitStrategyTemplate {
            stop_loss_pct: ov.stop_loss_pct.unwrap_or(self.stop_loss_pct),
            trailing_pct: ov.trailing_pct.unwrap_or(self.trailing_pct),
            trailing_activation_pct: ov
                .trailing_activation_pct
                .unwrap_or(self.trailing_activation_pct),
            scaling_levels: ov
                .scaling_levels
                .clone()
                .unwrap_or_else(|| self.scaling_levels.clone()),
        }
    }
}

/// Exit-strategy templates keyed by name, plus the default assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExitParams {
    #[serde(default = "default_strategy_name")]
    pub default_strategy: String,

    #[serde(default)]
    pub strategies: std::collections::HashMap<String, ExitStrategyTemplate>,
}

impl ExitParams {
    /// Look up a template by name, falling back to the built-in default
    /// template if the name is unknown.
    pub fn template(&self, name: &str) -> ExitStrategyTemplate {
        self.strategies
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for ExitParams {
    fn default() -> Self {
        let mut strategies = std::collections::HashMap::new();
        strategies.insert(default_strategy_name(), ExitStrategyTemplate::default());
        Self {
            default_strategy: default_strategy_name(),
            strategies,
        }
    }
}

/// Swap-queue pacing and retry parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueParams {
    /// Minimum spacing between outbound gateway calls, in seconds.
    #[serde(default = "default_min_spacing_s")]
    pub min_spacing_s: f64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Time budget for draining CRITICAL/URGENT items on shutdown.
    #[serde(default = "default_drain_budget_s")]
    pub drain_budget_s: u64,
}

impl Default for QueueParams {
    fn default() -> Self {
        Self {
            min_spacing_s: default_min_spacing_s(),
            max_retries: default_max_retries(),
            drain_budget_s: default_drain_budget_s(),
        }
    }
}

/// Circuit-breaker trip thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerParams {
    /// Drawdown from peak realized equity, percent.
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,

    /// Win rate below this (over at least `min_positions` closes) trips.
    #[serde(default = "default_min_win_rate")]
    pub min_win_rate: f64,

    #[serde(default = "default_min_positions")]
    pub min_positions: u32,

    #[serde(default = "default_consecutive_loss_limit")]
    pub consecutive_loss_limit: u32,

    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            max_drawdown_pct: default_max_drawdown_pct(),
            min_win_rate: default_min_win_rate(),
            min_positions: default_min_positions(),
            consecutive_loss_limit: default_consecutive_loss_limit(),
            cooldown_minutes: default_cooldown_minutes(),
        }
    }
}

/// Price-monitor polling cadence per urgency bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingParams {
    #[serde(default = "default_poll_urgent_s")]
    pub urgent_s: u64,

    #[serde(default = "default_poll_active_s")]
    pub active_s: u64,

    #[serde(default = "default_poll_stable_s")]
    pub stable_s: u64,

    /// Cached prices older than this are unusable; the position goes stale.
    #[serde(default = "default_stale_price_max_s")]
    pub stale_price_max_s: u64,
}

impl Default for PollingParams {
    fn default() -> Self {
        Self {
            urgent_s: default_poll_urgent_s(),
            active_s: default_poll_active_s(),
            stable_s: default_poll_stable_s(),
            stale_price_max_s: default_stale_price_max_s(),
        }
    }
}

/// Cache sizing and refresh cadence for the wallet and token caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheParams {
    #[serde(default = "default_wallet_entry_ttl_s")]
    pub wallet_entry_ttl_s: u64,

    #[serde(default = "default_wallet_refresh_interval_s")]
    pub wallet_refresh_interval_s: u64,

    #[serde(default = "default_wallet_cache_max")]
    pub wallet_cache_max: u32,

    #[serde(default = "default_token_ttl_s")]
    pub token_ttl_s: u64,

    /// Tokens younger than this are flagged `is_new`.
    #[serde(default = "default_new_token_age_minutes")]
    pub new_token_age_minutes: f64,

    /// Longest a scoring path waits on a token fetch before taking whatever
    /// cache layer has resolved.
    #[serde(default = "default_token_max_wait_ms")]
    pub token_max_wait_ms: u64,
}

impl Default for CacheParams {
    fn default() -> Self {
        Self {
            wallet_entry_ttl_s: default_wallet_entry_ttl_s(),
            wallet_refresh_interval_s: default_wallet_refresh_interval_s(),
            wallet_cache_max: default_wallet_cache_max(),
            token_ttl_s: default_token_ttl_s(),
            new_token_age_minutes: default_new_token_age_minutes(),
            token_max_wait_ms: default_token_max_wait_ms(),
        }
    }
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level engine configuration. Immutable once published; a new version is
/// a whole new value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub mode: TradeMode,

    #[serde(default)]
    pub scoring: ScoringWeights,

    #[serde(default)]
    pub thresholds: Thresholds,

    #[serde(default)]
    pub limits: LimitParams,

    #[serde(default)]
    pub exit: ExitParams,

    #[serde(default)]
    pub queue: QueueParams,

    #[serde(default)]
    pub breaker: BreakerParams,

    #[serde(default)]
    pub polling: PollingParams,

    #[serde(default)]
    pub cache: CacheParams,
}

impl EngineConfig {
    /// Validate the invariants a draft must satisfy before activation.
    /// Returns the full list of violations, not just the first.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let sum = self.scoring.sum();
        if (sum - 1.0).abs() > 1e-3 {
            errors.push(format!("scoring weights sum to {sum:.4}, expected 1.0 ± 0.001"));
        }
        for (name, w) in [
            ("wallet", self.scoring.wallet),
            ("cluster", self.scoring.cluster),
            ("token", self.scoring.token),
            ("context", self.scoring.context),
        ] {
            if w < 0.0 {
                errors.push(format!("scoring weight '{name}' is negative: {w}"));
            }
        }

        if self.thresholds.high_conviction_threshold <= self.thresholds.trade_threshold {
            errors.push(format!(
                "high_conviction_threshold ({}) must be > trade_threshold ({})",
                self.thresholds.high_conviction_threshold, self.thresholds.trade_threshold
            ));
        }
        if self.thresholds.min_liquidity_usd < 0.0
            || self.thresholds.optimal_liquidity_usd < self.thresholds.min_liquidity_usd
        {
            errors.push("liquidity thresholds must satisfy 0 <= min <= optimal".to_string());
        }

        if self.limits.base_size_sol < 0.0 {
            errors.push(format!("base_size_sol is negative: {}", self.limits.base_size_sol));
        }
        if self.queue.min_spacing_s < 0.0 {
            errors.push(format!("min_spacing_s is negative: {}", self.queue.min_spacing_s));
        }
        if !(0.0..=1.0).contains(&self.breaker.min_win_rate) {
            errors.push(format!(
                "min_win_rate must be within [0, 1], got {}",
                self.breaker.min_win_rate
            ));
        }

        for (name, tpl) in &self.exit.strategies {
            if tpl.stop_loss_pct < 0.0 || tpl.trailing_pct < 0.0 {
                errors.push(format!("exit strategy '{name}' has negative percentages"));
            }
            let mut cumulative = 0.0;
            for (i, level) in tpl.scaling_levels.iter().enumerate() {
                if !(level.fraction > 0.0 && level.fraction <= 1.0) {
                    errors.push(format!(
                        "exit strategy '{name}' level {i}: fraction {} outside (0, 1]",
                        level.fraction
                    ));
                }
                cumulative += level.fraction;
            }
            if cumulative > 1.0 + 1e-9 {
                errors.push(format!(
                    "exit strategy '{name}': scaling fractions sum to {cumulative:.3} > 1.0"
                ));
            }
        }
        if !self.exit.strategies.contains_key(&self.exit.default_strategy) {
            errors.push(format!(
                "default exit strategy '{}' is not defined",
                self.exit.default_strategy
            ));
        }

        errors
    }
}

// =============================================================================
// ConfigError
// =============================================================================

/// Failure modes of the administrative config operations.
#[derive(Debug)]
pub enum ConfigError {
    /// The draft violates one or more invariants; activation rejected, the
    /// previous active config stays in force.
    Invalid(Vec<String>),
    /// Activation was requested but no draft exists.
    NoDraft,
    /// The backing store failed.
    Storage(anyhow::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(reasons) => write!(f, "invalid_config: {}", reasons.join("; ")),
            Self::NoDraft => write!(f, "no_draft"),
            Self::Storage(e) => write!(f, "config storage error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// =============================================================================
// ConfigStore
// =============================================================================

/// Owns the active config snapshot and the single draft, publishes new
/// snapshots over a watch channel, and persists versions through the store.
pub struct ConfigStore {
    store: Arc<Store>,
    tx: watch::Sender<Arc<EngineConfig>>,
    draft: Mutex<Option<EngineConfig>>,
    version: AtomicU64,
}

impl ConfigStore {
    /// Load the active config from the store, falling back to (and
    /// persisting) defaults when none exists yet.
    pub fn open(store: Arc<Store>) -> anyhow::Result<Self> {
        let (version, config) = match store.load_active_config()? {
            Some((version, json)) => {
                let config: EngineConfig = serde_json::from_str(&json)?;
                info!(version, "active config loaded");
                (version, config)
            }
            None => {
                let config = EngineConfig::default();
                let json = serde_json::to_string(&config)?;
                let version = store.activate_config(&json)?;
                info!(version, "no active config found — defaults persisted");
                (version, config)
            }
        };

        let (tx, _rx) = watch::channel(Arc::new(config));
        Ok(Self {
            store,
            tx,
            draft: Mutex::new(None),
            version: AtomicU64::new(version),
        })
    }

    /// Current immutable snapshot.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.tx.borrow().clone()
    }

    /// Subscribe to snapshot publications. The receiver observes the current
    /// snapshot immediately and every activation afterwards.
    pub fn subscribe(&self) -> watch::Receiver<Arc<EngineConfig>> {
        self.tx.subscribe()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Return the current draft, creating one as a copy of the active config
    /// if none exists.
    pub fn begin_draft(&self) -> EngineConfig {
        let mut draft = self.draft.lock();
        draft
            .get_or_insert_with(|| self.snapshot().as_ref().clone())
            .clone()
    }

    /// Replace the draft wholesale. The draft is persisted so an operator can
    /// inspect it across restarts; it is only validated on activation.
    pub fn set_draft(&self, config: EngineConfig) -> anyhow::Result<()> {
        let json = serde_json::to_string(&config)?;
        self.store.save_draft_config(&json)?;
        *self.draft.lock() = Some(config);
        info!("config draft updated");
        Ok(())
    }

    /// Discard the draft. Returns `false` when there was nothing to discard.
    pub fn discard_draft(&self) -> anyhow::Result<bool> {
        let had = self.draft.lock().take().is_some();
        if had {
            self.store.discard_draft_config()?;
            info!("config draft discarded");
        }
        Ok(had)
    }

    /// Validate and atomically promote the draft to active.
    ///
    /// On success the previous active config is archived, the version bumped,
    /// and the new snapshot published to all subscribers. On validation
    /// failure the draft is left in place for correction.
    pub fn activate(&self) -> Result<u64, ConfigError> {
        let mut draft_guard = self.draft.lock();
        let draft = draft_guard.clone().ok_or(ConfigError::NoDraft)?;

        let violations = draft.validate();
        if !violations.is_empty() {
            warn!(violations = ?violations, "config activation rejected");
            return Err(ConfigError::Invalid(violations));
        }

        let json = serde_json::to_string(&draft).map_err(|e| ConfigError::Storage(e.into()))?;
        let version = self
            .store
            .activate_config(&json)
            .map_err(ConfigError::Storage)?;

        *draft_guard = None;
        drop(draft_guard);

        self.version.store(version, Ordering::SeqCst);
        self.tx.send_replace(Arc::new(draft));
        info!(version, "config activated and published");
        Ok(version)
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("version", &self.version())
            .field("has_draft", &self.draft.lock().is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_empty(), "{:?}", cfg.validate());
        assert!((cfg.scoring.sum() - 1.0).abs() < 1e-9);
        assert_eq!(cfg.thresholds.trade_threshold, 0.70);
        assert_eq!(cfg.thresholds.high_conviction_threshold, 0.85);
        assert_eq!(cfg.queue.min_spacing_s, 2.0);
        assert_eq!(cfg.cache.wallet_cache_max, 10_000);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.mode, TradeMode::Simulation);
        assert_eq!(cfg.breaker.consecutive_loss_limit, 5);
    }

    #[test]
    fn weight_sum_violation_detected() {
        let mut cfg = EngineConfig::default();
        cfg.scoring.wallet = 0.9;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("sum")));
    }

    #[test]
    fn threshold_ordering_violation_detected() {
        let mut cfg = EngineConfig::default();
        cfg.thresholds.high_conviction_threshold = 0.60;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("high_conviction_threshold")));
    }

    #[test]
    fn scaling_fraction_violation_detected() {
        let mut cfg = EngineConfig::default();
        cfg.exit
            .strategies
            .get_mut("standard")
            .unwrap()
            .scaling_levels = vec![
            ScalingLevel {
                profit_pct: 50.0,
                fraction: 0.8,
            },
            ScalingLevel {
                profit_pct: 100.0,
                fraction: 0.5,
            },
        ];
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.contains("sum to")));
    }

    #[test]
    fn override_merge_replaces_scaling_wholesale() {
        let tpl = ExitStrategyTemplate::default();
        let ov = ExitOverride {
            stop_loss_pct: Some(10.0),
            scaling_levels: Some(vec![ScalingLevel {
                profit_pct: 50.0,
                fraction: 1.0,
            }]),
            ..Default::default()
        };
        let merged = tpl.merged(&ov);
        assert_eq!(merged.stop_loss_pct, 10.0);
        assert_eq!(merged.trailing_pct, tpl.trailing_pct);
        assert_eq!(merged.scaling_levels.len(), 1);
        assert_eq!(merged.scaling_levels[0].profit_pct, 50.0);
    }

    #[test]
    fn activate_without_draft_fails() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cfg = ConfigStore::open(store).unwrap();
        match cfg.activate() {
            Err(ConfigError::NoDraft) => {}
            other => panic!("expected NoDraft, got {other:?}"),
        }
    }

    #[test]
    fn activate_bumps_version_and_publishes() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cfg = ConfigStore::open(store).unwrap();
        let v0 = cfg.version();
        let mut rx = cfg.subscribe();

        let mut draft = cfg.begin_draft();
        draft.thresholds.trade_threshold = 0.75;
        draft.thresholds.high_conviction_threshold = 0.90;
        cfg.set_draft(draft).unwrap();

        let v1 = cfg.activate().unwrap();
        assert_eq!(v1, v0 + 1);
        assert!(rx.has_changed().unwrap());
        let snap = rx.borrow_and_update().clone();
        assert_eq!(snap.thresholds.trade_threshold, 0.75);
        assert_eq!(cfg.snapshot().thresholds.trade_threshold, 0.75);
    }

    #[test]
    fn invalid_draft_keeps_previous_active() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let cfg = ConfigStore::open(store).unwrap();

        let mut draft = cfg.begin_draft();
        draft.scoring.wallet = 0.9; // breaks the weight sum
        cfg.set_draft(draft).unwrap();

        match cfg.activate() {
            Err(ConfigError::Invalid(_)) => {}
            other => panic!("expected Invalid, got {other:?}"),
        }
        // Previous active unchanged, draft retained for correction.
        assert_eq!(cfg.snapshot().scoring.wallet, default_weight_wallet());
        assert!(cfg.begin_draft().scoring.wallet > 0.8);
    }
}
