// =============================================================================
// Token Cache — read-through TTL cache of token metadata and safety signals
// =============================================================================
//
// Fetch order on lookup:
//   fresh in-memory -> primary provider -> fallback provider ->
//   stale in-memory -> synthesized neutral record
//
// Records are immutable after write; a refresh replaces the whole record.
// Every record carries the layer it came from (`source`) for observability,
// and `degraded = true` when it came from the stale or neutral layer so the
// scorer can note downgraded inputs.
//
// Concurrent misses for the same mint coalesce onto a single outbound fetch
// (single-flight): the first caller becomes the leader and fetches, the rest
// wait on a Notify bounded by `token_max_wait_ms`, then take whatever layer
// has resolved. Scoring is never blocked indefinitely.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use schnellru::{ByLength, LruMap};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::providers::{retry_with_backoff, TokenMeta, TokenMetaProvider};

/// Bound on distinct tokens held in memory.
const TOKEN_CACHE_CAPACITY: u32 = 4096;

/// Retry schedule for a single provider in the chain.
const PROVIDER_ATTEMPTS: u32 = 2;
const PROVIDER_BACKOFF: Duration = Duration::from_millis(250);

/// Which layer of the chain produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenSource {
    Primary,
    Fallback,
    StaleCache,
    Neutral,
}

impl std::fmt::Display for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Fallback => write!(f, "fallback"),
            Self::StaleCache => write!(f, "stale_cache"),
            Self::Neutral => write!(f, "neutral"),
        }
    }
}

/// Cached token metadata + safety signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub address: String,
    pub symbol: Option<String>,
    pub price_usd: f64,
    /// SOL per token; what position accounting uses.
    pub price_sol: f64,
    pub liquidity_usd: f64,
    pub market_cap_usd: Option<f64>,
    pub volume_24h_usd: Option<f64>,
    pub age_minutes: f64,
    pub holder_count: Option<u64>,
    pub top10_holder_pct: Option<f64>,
    pub is_honeypot: Option<bool>,
    pub has_mint_authority: Option<bool>,
    pub has_freeze_authority: Option<bool>,
    /// Younger than the configured new-token age at fetch time.
    pub is_new: bool,
    pub source: TokenSource,
    /// Served from the stale or neutral layer; scoring notes the downgrade.
    pub degraded: bool,
    pub fetched_at: DateTime<Utc>,
    pub ttl_s: u64,
}

impl TokenRecord {
    pub fn is_cache_valid(&self, now: DateTime<Utc>) -> bool {
        (now - self.fetched_at).num_seconds() < self.ttl_s as i64
    }

    fn from_meta(
        address: &str,
        meta: TokenMeta,
        source: TokenSource,
        ttl_s: u64,
        new_token_age_minutes: f64,
    ) -> Self {
        Self {
            address: address.to_string(),
            symbol: meta.symbol,
            price_usd: meta.price_usd,
            price_sol: meta.price_sol,
            liquidity_usd: meta.liquidity_usd,
            market_cap_usd: meta.market_cap_usd,
            volume_24h_usd: meta.volume_24h_usd,
            age_minutes: meta.age_minutes,
            holder_count: meta.holder_count,
            top10_holder_pct: meta.top10_holder_pct,
            is_honeypot: meta.is_honeypot,
            has_mint_authority: meta.has_mint_authority,
            has_freeze_authority: meta.has_freeze_authority,
            is_new: meta.age_minutes < new_token_age_minutes,
            source,
            degraded: false,
            fetched_at: Utc::now(),
            ttl_s,
        }
    }

    /// Synthesized record when no layer resolved. Unknown market data scores
    /// conservatively and fails the liquidity hard gate, so unknown tokens
    /// are never traded.
    pub fn neutral(address: &str, ttl_s: u64) -> Self {
        Self {
            address: address.to_string(),
            symbol: None,
            price_usd: 0.0,
            price_sol: 0.0,
            liquidity_usd: 0.0,
            market_cap_usd: None,
            volume_24h_usd: None,
            age_minutes: f64::MAX,
            holder_count: None,
            top10_holder_pct: None,
            is_honeypot: None,
            has_mint_authority: None,
            has_freeze_authority: None,
            is_new: false,
            source: TokenSource::Neutral,
            degraded: true,
            fetched_at: Utc::now(),
            ttl_s,
        }
    }
}

/// Counters for the admin/introspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct TokenCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub fallback_served: u64,
    pub stale_served: u64,
    pub neutral_served: u64,
}

// =============================================================================
// TokenCache
// =============================================================================

pub struct TokenCache {
    primary: Arc<dyn TokenMetaProvider>,
    fallback: Arc<dyn TokenMetaProvider>,
    config_rx: watch::Receiver<Arc<EngineConfig>>,

    entries: Mutex<LruMap<String, TokenRecord>>,
    inflight: Mutex<HashMap<String, Arc<Notify>>>,

    hits: AtomicU64,
    misses: AtomicU64,
    fallback_served: AtomicU64,
    stale_served: AtomicU64,
    neutral_served: AtomicU64,
}

impl TokenCache {
    pub fn new(
        primary: Arc<dyn TokenMetaProvider>,
        fallback: Arc<dyn TokenMetaProvider>,
        config_rx: watch::Receiver<Arc<EngineConfig>>,
    ) -> Self {
        Self {
            primary,
            fallback,
            config_rx,
            entries: Mutex::new(LruMap::new(ByLength::new(TOKEN_CACHE_CAPACITY))),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fallback_served: AtomicU64::new(0),
            stale_served: AtomicU64::new(0),
            neutral_served: AtomicU64::new(0),
        }
    }

    /// Resolve a token record through the cache chain. Always returns within
    /// roughly `token_max_wait_ms` for followers of an in-flight fetch; the
    /// leader is bounded by the provider retry schedule.
    pub async fn get(&self, mint: &str) -> TokenRecord {
        let (ttl_s, new_age, max_wait_ms) = {
            let cfg = self.config_rx.borrow();
            (
                cfg.cache.token_ttl_s,
                cfg.cache.new_token_age_minutes,
                cfg.cache.token_max_wait_ms,
            )
        };

        // ── 1. Fresh in-memory ───────────────────────────────────────────
        if let Some(record) = self.fresh_entry(mint) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return record;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        // ── 2. Single-flight gate ────────────────────────────────────────
        let (notify, is_leader) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(mint) {
                Some(n) => (n.clone(), false),
                None => {
                    let n = Arc::new(Notify::new());
                    inflight.insert(mint.to_string(), n.clone());
                    (n, true)
                }
            }
        };

        if is_leader {
            let record = self.fetch_chain(mint, ttl_s, new_age).await;
            self.entries.lock().insert(mint.to_string(), record.clone());
            self.inflight.lock().remove(mint);
            notify.notify_waiters();
            return record;
        }

        // ── 3. Follower: wait bounded, then take whatever resolved ───────
        let waited =
            tokio::time::timeout(Duration::from_millis(max_wait_ms), notify.notified()).await;
        if waited.is_err() {
            debug!(mint, max_wait_ms, "token fetch wait expired — degraded record");
        }
        if let Some(record) = self.any_entry(mint) {
            return record;
        }
        self.neutral_served.fetch_add(1, Ordering::Relaxed);
        TokenRecord::neutral(mint, ttl_s)
    }

    /// Peek without fetching (admin surface).
    pub fn peek(&self, mint: &str) -> Option<TokenRecord> {
        self.entries.lock().peek(mint).cloned()
    }

    pub fn stats(&self) -> TokenCacheStats {
        TokenCacheStats {
            entries: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallback_served: self.fallback_served.load(Ordering::Relaxed),
            stale_served: self.stale_served.load(Ordering::Relaxed),
            neutral_served: self.neutral_served.load(Ordering::Relaxed),
        }
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn fresh_entry(&self, mint: &str) -> Option<TokenRecord> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        entries
            .get(mint)
            .filter(|r| r.is_cache_valid(now))
            .cloned()
    }

    fn any_entry(&self, mint: &str) -> Option<TokenRecord> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        let record = entries.get(mint)?.clone();
        if record.is_cache_valid(now) {
            Some(record)
        } else {
            self.stale_served.fetch_add(1, Ordering::Relaxed);
            let mut stale = record;
            stale.source = TokenSource::StaleCache;
            stale.degraded = true;
            Some(stale)
        }
    }

    /// primary -> fallback -> stale -> neutral.
    async fn fetch_chain(&self, mint: &str, ttl_s: u64, new_age: f64) -> TokenRecord {
        match retry_with_backoff(self.primary.name(), PROVIDER_ATTEMPTS, PROVIDER_BACKOFF, || {
            self.primary.fetch(mint)
        })
        .await
        {
            Ok(meta) => {
                return TokenRecord::from_meta(mint, meta, TokenSource::Primary, ttl_s, new_age)
            }
            Err(e) => {
                warn!(mint, provider = self.primary.name(), error = %e, "primary token provider failed");
            }
        }

        match retry_with_backoff(self.fallback.name(), PROVIDER_ATTEMPTS, PROVIDER_BACKOFF, || {
            self.fallback.fetch(mint)
        })
        .await
        {
            Ok(meta) => {
                self.fallback_served.fetch_add(1, Ordering::Relaxed);
                return TokenRecord::from_meta(mint, meta, TokenSource::Fallback, ttl_s, new_age);
            }
            Err(e) => {
                warn!(mint, provider = self.fallback.name(), error = %e, "fallback token provider failed");
            }
        }

        if let Some(stale) = self.any_entry(mint) {
            info!(mint, "serving stale token record after provider failures");
            return stale;
        }

        self.neutral_served.fetch_add(1, Ordering::Relaxed);
        info!(mint, "no token data available — serving neutral record");
        TokenRecord::neutral(mint, ttl_s)
    }
}

impl std::fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCache")
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    struct FakeProvider {
        name: &'static str,
        calls: AtomicU32,
        fail: bool,
        delay: Duration,
        liquidity: f64,
    }

    impl FakeProvider {
        fn ok(name: &'static str, liquidity: f64) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicU32::new(0),
                fail: false,
                delay: Duration::ZERO,
                liquidity,
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicU32::new(0),
                fail: true,
                delay: Duration::ZERO,
                liquidity: 0.0,
            })
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                calls: AtomicU32::new(0),
                fail: false,
                delay,
                liquidity: 1.0,
            })
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenMetaProvider for FakeProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch(&self, _mint: &str) -> Result<TokenMeta> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                anyhow::bail!("provider down")
            }
            Ok(TokenMeta {
                liquidity_usd: self.liquidity,
                price_sol: 0.001,
                age_minutes: 120.0,
                ..Default::default()
            })
        }
    }

    fn config_rx() -> watch::Receiver<Arc<EngineConfig>> {
        let (tx, rx) = watch::channel(Arc::new(EngineConfig::default()));
        std::mem::forget(tx); // keep the channel alive for the test
        rx
    }

    #[tokio::test]
    async fn primary_hit_is_cached() {
        let primary = FakeProvider::ok("p", 50_000.0);
        let fallback = FakeProvider::ok("f", 1.0);
        let cache = TokenCache::new(primary.clone(), fallback.clone(), config_rx());

        let r1 = cache.get("MintA").await;
        assert_eq!(r1.source, TokenSource::Primary);
        assert_eq!(r1.liquidity_usd, 50_000.0);
        assert!(!r1.degraded);

        let r2 = cache.get("MintA").await;
        assert_eq!(r2.source, TokenSource::Primary);
        assert_eq!(primary.call_count(), 1, "second get must be a cache hit");
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test]
    async fn falls_back_when_primary_fails() {
        let primary = FakeProvider::failing("p");
        let fallback = FakeProvider::ok("f", 7_000.0);
        let cache = TokenCache::new(primary, fallback, config_rx());

        let r = cache.get("MintA").await;
        assert_eq!(r.source, TokenSource::Fallback);
        assert_eq!(r.liquidity_usd, 7_000.0);
    }

    #[tokio::test]
    async fn neutral_when_everything_fails() {
        let cache = TokenCache::new(
            FakeProvider::failing("p"),
            FakeProvider::failing("f"),
            config_rx(),
        );

        let r = cache.get("MintA").await;
        assert_eq!(r.source, TokenSource::Neutral);
        assert!(r.degraded);
        assert_eq!(r.liquidity_usd, 0.0);
        assert_eq!(cache.stats().neutral_served, 1);
    }

    #[tokio::test]
    async fn stale_record_served_after_providers_fail() {
        let primary = FakeProvider::ok("p", 9_000.0);
        let fallback = FakeProvider::failing("f");
        let cache = TokenCache::new(primary.clone(), fallback, config_rx());

        cache.get("MintA").await;
        // Expire the record in place.
        {
            let mut entries = cache.entries.lock();
            let rec = entries.get("MintA").unwrap();
            rec.fetched_at = Utc::now() - chrono::Duration::seconds(3600);
        }
        // Primary now fails too.
        let cache = TokenCache {
            primary: FakeProvider::failing("p2"),
            ..cache
        };

        let r = cache.get("MintA").await;
        assert_eq!(r.source, TokenSource::StaleCache);
        assert!(r.degraded);
        assert_eq!(r.liquidity_usd, 9_000.0);
    }

    #[tokio::test]
    async fn concurrent_misses_coalesce() {
        let primary = FakeProvider::slow("p", Duration::from_millis(50));
        let fallback = FakeProvider::ok("f", 1.0);
        let cache = Arc::new(TokenCache::new(primary.clone(), fallback, config_rx()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get("MintA").await }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(primary.call_count(), 1, "misses must coalesce to one fetch");
    }

    #[tokio::test]
    async fn follower_times_out_to_neutral() {
        let primary = FakeProvider::slow("p", Duration::from_secs(30));
        let fallback = FakeProvider::ok("f", 1.0);

        let (tx, rx) = watch::channel(Arc::new({
            let mut cfg = EngineConfig::default();
            cfg.cache.token_max_wait_ms = 20;
            cfg
        }));
        std::mem::forget(tx);

        let cache = Arc::new(TokenCache::new(primary, fallback, rx));

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("MintA").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let follower = cache.get("MintA").await;
        assert_eq!(follower.source, TokenSource::Neutral);
        assert!(follower.degraded);
        leader.abort();
    }
}
