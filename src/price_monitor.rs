// =============================================================================
// Price Monitor — adaptive batched polling for open positions
// =============================================================================
//
// Open positions are bucketed by how close they sit to their nearest exit
// trigger, and each bucket polls on its own cadence:
//
//   urgent — within 5% of a stop (stop-loss or armed trailing)  — 20 s
//   active — trailing stop armed                                 — 30 s
//   stable — everything else                                     — 60 s
//
// Polling pauses entirely while the circuit breaker is active.
//
// Per poll: the distinct token set is batch-requested from the primary
// provider (chunked to its batch limit), misses retry on the fallback, then
// fall back to the last cached price if it is younger than the staleness
// bound; otherwise the position is marked price-stale and price-sensitive
// exit rules skip it. Every applied price updates current/peak/unrealized
// atomically through the position book, after which the exit rules run and
// any fired exits are enqueued.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::breaker::CircuitBreaker;
use crate::config::{EngineConfig, ExitStrategyTemplate};
use crate::exit;
use crate::position::{Position, PositionBook};
use crate::providers::{retry_with_backoff, PriceProvider};
use crate::swap_queue::{SwapIntent, SwapQueue};
use crate::types::OrderKind;

/// Polling urgency of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Urgent,
    Active,
    Stable,
}

/// Within this fraction of the nearest stop, a position polls at the
/// urgent cadence.
const URGENT_STOP_PROXIMITY: f64 = 0.05;

/// Classify a position by proximity to its nearest exit trigger.
pub fn classify(position: &Position, strategy: &ExitStrategyTemplate) -> Bucket {
    let stop_price = position.entry_price * (1.0 - strategy.stop_loss_pct / 100.0);
    let trailing_armed = position.peak_pnl_pct() >= strategy.trailing_activation_pct;
    let trailing_price = trailing_armed
        .then(|| position.peak_price * (1.0 - strategy.trailing_pct / 100.0));

    let nearest_stop = trailing_price
        .map(|t| t.max(stop_price))
        .unwrap_or(stop_price);

    if position.current_price > 0.0 && nearest_stop > 0.0 {
        let distance = (position.current_price - nearest_stop) / position.current_price;
        if distance <= URGENT_STOP_PROXIMITY {
            return Bucket::Urgent;
        }
    }
    if trailing_armed {
        Bucket::Active
    } else {
        Bucket::Stable
    }
}

// =============================================================================
// PriceMonitor
// =============================================================================

pub struct PriceMonitor {
    book: Arc<PositionBook>,
    queue: Arc<SwapQueue>,
    breaker: Arc<CircuitBreaker>,
    config_rx: watch::Receiver<Arc<EngineConfig>>,
    primary: Arc<dyn PriceProvider>,
    fallback: Arc<dyn PriceProvider>,

    /// Last successfully observed price per token: (price, observed_at).
    last_prices: Mutex<HashMap<String, (f64, DateTime<Utc>)>>,
    /// Scaling levels already enqueued but not yet filled, so a level never
    /// fires twice while its sell is in flight.
    pending_scaling: Mutex<HashSet<(String, usize)>>,
    /// Full exits already enqueued via `begin_full_exit` are naturally
    /// deduplicated by position status; nothing extra needed there.
    stale_since: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PriceMonitor {
    pub fn new(
        book: Arc<PositionBook>,
        queue: Arc<SwapQueue>,
        breaker: Arc<CircuitBreaker>,
        config_rx: watch::Receiver<Arc<EngineConfig>>,
        primary: Arc<dyn PriceProvider>,
        fallback: Arc<dyn PriceProvider>,
    ) -> Self {
        Self {
            book,
            queue,
            breaker,
            config_rx,
            primary,
            fallback,
            last_prices: Mutex::new(HashMap::new()),
            pending_scaling: Mutex::new(HashSet::new()),
            stale_since: Mutex::new(HashMap::new()),
        }
    }

    /// Main loop. Ticks every 5 s and polls the buckets whose cadence is
    /// due. Spawn exactly once.
    pub async fn run(self: Arc<Self>) {
        info!("price monitor started");
        let mut ticker = tokio::time::interval(Duration::from_secs(5));
        let mut elapsed: HashMap<Bucket, u64> = HashMap::new();

        loop {
            ticker.tick().await;

            if self.breaker.is_active() {
                debug!("price monitor paused — breaker active");
                continue;
            }

            let polling = self.config_rx.borrow().polling.clone();
            let mut due = Vec::new();
            for (bucket, interval_s) in [
                (Bucket::Urgent, polling.urgent_s),
                (Bucket::Active, polling.active_s),
                (Bucket::Stable, polling.stable_s),
            ] {
                let e = elapsed.entry(bucket).or_insert(0);
                *e += 5;
                if *e >= interval_s {
                    *e = 0;
                    due.push(bucket);
                }
            }

            if !due.is_empty() {
                self.poll_once(&due).await;
            }
        }
    }

    /// Poll the tokens of every open position in the given buckets, apply
    /// prices, and run the exit rules. Returns the number of positions that
    /// received a fresh price.
    pub async fn poll_once(&self, buckets: &[Bucket]) -> usize {
        let config = self.config_rx.borrow().clone();
        let open = self.book.open_positions();
        if open.is_empty() {
            return 0;
        }

        // ── Token set for the due buckets ────────────────────────────────
        let mut tokens: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for position in &open {
            let template = config.exit.template(&position.exit_strategy);
            let strategy = exit::merged_strategy(position, &template);
            if buckets.contains(&classify(position, &strategy)) && seen.insert(position.token.clone())
            {
                tokens.push(position.token.clone());
            }
        }
        if tokens.is_empty() {
            return 0;
        }

        // ── Fetch: primary -> fallback -> cached -> stale ───────────────
        let observed_at = Utc::now();
        let prices = self.fetch_prices(&tokens).await;

        let mut updated = 0usize;
        for token in &tokens {
            match prices.get(token) {
                Some(&price) => {
                    self.last_prices
                        .lock()
                        .insert(token.clone(), (price, observed_at));
                    self.stale_since.lock().remove(token);
                    updated += self.book.apply_price(token, price, observed_at).len();
                }
                None => {
                    let cached = self.last_prices.lock().get(token).copied();
                    let max_age = config.polling.stale_price_max_s as i64;
                    match cached {
                        Some((price, at)) if (Utc::now() - at).num_seconds() < max_age => {
                            debug!(token, "using cached price after provider miss");
                            updated += self.book.apply_price(token, price, at).len();
                        }
                        _ => {
                            self.book.mark_price_stale(token);
                            let mut stale = self.stale_since.lock();
                            let since = *stale.entry(token.clone()).or_insert_with(Utc::now);
                            if (Utc::now() - since).num_minutes() >= 5 {
                                warn!(token, since = %since, "price stale for over 5 minutes");
                            }
                        }
                    }
                }
            }
        }

        self.evaluate_exits(&config);
        updated
    }

    async fn fetch_prices(&self, tokens: &[String]) -> HashMap<String, f64> {
        let mut prices = HashMap::new();

        for chunk in tokens.chunks(self.primary.max_batch()) {
            match retry_with_backoff(self.primary.name(), 2, Duration::from_millis(250), || {
                self.primary.prices(chunk)
            })
            .await
            {
                Ok(batch) => prices.extend(batch),
                Err(e) => {
                    warn!(provider = self.primary.name(), error = %e, "primary price batch failed");
                }
            }
        }

        let missing: Vec<String> = tokens
            .iter()
            .filter(|t| !prices.contains_key(*t))
            .cloned()
            .collect();
        if !missing.is_empty() {
            for chunk in missing.chunks(self.fallback.max_batch()) {
                match retry_with_backoff(self.fallback.name(), 2, Duration::from_millis(250), || {
                    self.fallback.prices(chunk)
                })
                .await
                {
                    Ok(batch) => prices.extend(batch),
                    Err(e) => {
                        warn!(provider = self.fallback.name(), error = %e, "fallback price batch failed");
                    }
                }
            }
        }

        prices
    }

    /// Run the exit rules over every open position and enqueue what fires.
    fn evaluate_exits(&self, config: &EngineConfig) {
        for position in self.book.open_positions() {
            let template = config.exit.template(&position.exit_strategy);
            let strategy = exit::merged_strategy(&position, &template);
            let Some(decision) = exit::evaluate(&position, &strategy) else {
                continue;
            };

            // A level with a sell already in flight must not fire again.
            if let Some(level) = decision.scaling_level {
                let mut pending = self.pending_scaling.lock();
                if position.executed_scaling_levels.contains(&level) {
                    pending.remove(&(position.id.clone(), level));
                    continue;
                }
                if !pending.insert((position.id.clone(), level)) {
                    continue;
                }
            }

            let full_exit = decision.kind != OrderKind::ExitScaling;
            if full_exit {
                self.book.begin_full_exit(&position.id);
            }

            info!(
                position = %position.id,
                token = %position.token,
                kind = %decision.kind,
                amount = decision.amount,
                reason = %decision.reason,
                "exit rule fired"
            );

            self.queue.enqueue(SwapIntent {
                kind: decision.kind,
                position_id: position.id.clone(),
                token: position.token.clone(),
                amount: decision.amount,
                scaling_level: decision.scaling_level,
                reason: decision.reason,
                mode: position.mode,
                observed_price: position.current_price,
            });
        }
    }
}

impl std::fmt::Debug for PriceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceMonitor")
            .field("cached_prices", &self.last_prices.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitParams;
    use crate::position::NewPosition;
    use crate::store::Store;
    use crate::types::{Priority, TradeMode};
    use anyhow::Result;
    use async_trait::async_trait;

    struct FakePrices {
        prices: Mutex<HashMap<String, f64>>,
        fail: bool,
    }

    impl FakePrices {
        fn with(prices: &[(&str, f64)]) -> Arc<Self> {
            Arc::new(Self {
                prices: Mutex::new(
                    prices
                        .iter()
                        .map(|(k, v)| (k.to_string(), *v))
                        .collect(),
                ),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                prices: Mutex::new(HashMap::new()),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl PriceProvider for FakePrices {
        fn name(&self) -> &'static str {
            "fake"
        }

        fn max_batch(&self) -> usize {
            100
        }

        async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>> {
            if self.fail {
                anyhow::bail!("provider down")
            }
            let prices = self.prices.lock();
            Ok(mints
                .iter()
                .filter_map(|m| prices.get(m).map(|p| (m.clone(), *p)))
                .collect())
        }
    }

    struct Fixture {
        monitor: PriceMonitor,
        book: Arc<PositionBook>,
        queue: Arc<SwapQueue>,
    }

    fn fixture(primary: Arc<FakePrices>, fallback: Arc<FakePrices>) -> Fixture {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let (tx, rx) = watch::channel(Arc::new(EngineConfig::default()));
        std::mem::forget(tx);
        let breaker = Arc::new(CircuitBreaker::new(store.clone(), rx.clone()));
        let book = Arc::new(PositionBook::new());

        struct NoGateway;
        #[async_trait]
        impl crate::gateway::SwapGateway for NoGateway {
            fn name(&self) -> &'static str {
                "none"
            }
            async fn quote(
                &self,
                _i: &str,
                _o: &str,
                _a: f64,
            ) -> Result<crate::gateway::SwapQuote> {
                anyhow::bail!("unused")
            }
            async fn swap(
                &self,
                _q: &crate::gateway::SwapQuote,
                _s: u32,
            ) -> Result<crate::gateway::SwapReceipt> {
                anyhow::bail!("unused")
            }
        }

        let queue = Arc::new(SwapQueue::new(
            breaker.clone(),
            rx.clone(),
            store,
            book.clone(),
            Arc::new(NoGateway),
        ));
        let monitor = PriceMonitor::new(
            book.clone(),
            queue.clone(),
            breaker,
            rx,
            primary,
            fallback,
        );
        Fixture {
            monitor,
            book,
            queue,
        }
    }

    fn open_position(book: &PositionBook, token: &str, entry_price: f64) -> String {
        book.create(
            NewPosition {
                wallet: "W".to_string(),
                token: token.to_string(),
                mode: TradeMode::Simulation,
                size_sol: entry_price * 1000.0,
                exit_strategy: "standard".to_string(),
                exit_override: None,
                cluster_id: None,
                source_signature: format!("src-{token}"),
                observed_price: entry_price,
            },
            &LimitParams::default(),
        )
        .unwrap()
        .id
    }

    fn strategy() -> ExitStrategyTemplate {
        ExitStrategyTemplate::default()
    }

    #[test]
    fn classify_stable_when_far_from_stop() {
        let book = PositionBook::new();
        let id = open_position(&book, "MintA", 100.0);
        book.apply_price("MintA", 110.0, Utc::now());
        let pos = book.get(&id).unwrap();
        assert_eq!(classify(&pos, &strategy()), Bucket::Stable);
    }

    #[test]
    fn classify_urgent_near_stop() {
        let book = PositionBook::new();
        let id = open_position(&book, "MintA", 100.0);
        // Stop at 80; 82 is within 5%.
        book.apply_price("MintA", 82.0, Utc::now());
        let pos = book.get(&id).unwrap();
        assert_eq!(classify(&pos, &strategy()), Bucket::Urgent);
    }

    #[test]
    fn classify_active_when_trailing_armed() {
        let book = PositionBook::new();
        let id = open_position(&book, "MintA", 100.0);
        book.apply_price("MintA", 160.0, Utc::now()); // +60% arms trailing
        let pos = book.get(&id).unwrap();
        assert_eq!(classify(&pos, &strategy()), Bucket::Active);
    }

    #[tokio::test]
    async fn poll_applies_prices_and_fires_stop() {
        let primary = FakePrices::with(&[("MintA", 78.0)]);
        let f = fixture(primary, FakePrices::failing());
        let id = open_position(&f.book, "MintA", 100.0);

        let updated = f
            .monitor
            .poll_once(&[Bucket::Urgent, Bucket::Active, Bucket::Stable])
            .await;
        assert_eq!(updated, 1);

        let pos = f.book.get(&id).unwrap();
        assert_eq!(pos.current_price, 78.0);
        // Stop-loss fired: position marked exiting, one URGENT item queued.
        assert_eq!(pos.status, crate::position::PositionStatus::Exiting);
        let depth = f.queue.depth_by_priority();
        let urgent = depth.iter().find(|d| d.priority == Priority::Urgent).unwrap();
        assert_eq!(urgent.depth, 1);
    }

    #[tokio::test]
    async fn fallback_provider_covers_primary_miss() {
        let primary = FakePrices::with(&[]);
        let fallback = FakePrices::with(&[("MintA", 105.0)]);
        let f = fixture(primary, fallback);
        let id = open_position(&f.book, "MintA", 100.0);

        let updated = f.monitor.poll_once(&[Bucket::Stable]).await;
        assert_eq!(updated, 1);
        assert_eq!(f.book.get(&id).unwrap().current_price, 105.0);
    }

    #[tokio::test]
    async fn total_miss_marks_position_stale() {
        let f = fixture(FakePrices::failing(), FakePrices::failing());
        let id = open_position(&f.book, "MintA", 100.0);

        let updated = f.monitor.poll_once(&[Bucket::Stable]).await;
        assert_eq!(updated, 0);
        assert!(f.book.get(&id).unwrap().price_stale);
    }

    #[tokio::test]
    async fn cached_price_bridges_outage() {
        let primary = FakePrices::with(&[("MintA", 95.0)]);
        let f = fixture(primary.clone(), FakePrices::failing());
        let id = open_position(&f.book, "MintA", 100.0);

        f.monitor.poll_once(&[Bucket::Stable]).await;
        assert_eq!(f.book.get(&id).unwrap().current_price, 95.0);

        // Providers go dark; the cached 95.0 keeps the position fresh.
        primary.prices.lock().clear();
        f.monitor.poll_once(&[Bucket::Stable]).await;
        let pos = f.book.get(&id).unwrap();
        assert!(!pos.price_stale);
        assert_eq!(pos.current_price, 95.0);
    }

    #[tokio::test]
    async fn scaling_level_not_requeued_while_in_flight() {
        let primary = FakePrices::with(&[("MintA", 210.0)]);
        let f = fixture(primary, FakePrices::failing());
        open_position(&f.book, "MintA", 100.0);

        f.monitor.poll_once(&[Bucket::Stable]).await;
        f.monitor.poll_once(&[Bucket::Stable]).await;

        // Only one LOW scaling sell queued despite two evaluations.
        let depth = f.queue.depth_by_priority();
        let low = depth.iter().find(|d| d.priority == Priority::Low).unwrap();
        assert_eq!(low.depth, 1);
    }
}
