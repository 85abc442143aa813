// =============================================================================
// External data providers — price + token metadata, primary/fallback pairs
// =============================================================================
//
// Every provider call carries a deadline (the shared reqwest client enforces
// a 5 s timeout) and is wrapped in bounded exponential-backoff retries by the
// callers that need them. Providers are trait objects so the caches and the
// price monitor can be tested against in-process fakes.

pub mod price;
pub mod token_meta;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default deadline for a single provider HTTP call.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the shared HTTP client used by all providers.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .expect("failed to build reqwest client")
}

// =============================================================================
// Price providers
// =============================================================================

/// Batch price source. Prices are SOL-denominated (SOL per token), matching
/// position accounting.
#[async_trait]
pub trait PriceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Largest batch a single request may carry.
    fn max_batch(&self) -> usize;

    /// Fetch prices for up to [`max_batch`](Self::max_batch) mints. Mints
    /// the provider does not know are simply absent from the result.
    async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>>;
}

// =============================================================================
// Token metadata providers
// =============================================================================

/// Raw token metadata and safety signals as fetched from one provider.
/// The token cache turns this into a cached record with TTL bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenMeta {
    pub symbol: Option<String>,
    /// USD price, for the market-quality factors.
    pub price_usd: f64,
    /// SOL-denominated price, for position accounting.
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
}

/// Per-token metadata source with pair/holder/safety fields.
#[async_trait]
pub trait TokenMetaProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(&self, mint: &str) -> Result<TokenMeta>;
}

// =============================================================================
// Retry helper
// =============================================================================

/// Run `op` up to `attempts` times with exponential backoff starting at
/// `base_delay`. Used for provider calls where a transient failure should
/// fall through to the next cache layer rather than surface.
pub async fn retry_with_backoff<T, F, Fut>(
    label: &str,
    attempts: u32,
    base_delay: Duration,
    op: F,
) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = base_delay;
    let mut last_err = None;

    for attempt in 1..=attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if attempt < attempts {
                    warn!(
                        label,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "provider call failed — backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                } else {
                    debug!(label, attempts, error = %e, "provider call exhausted retries");
                }
                last_err = Some(e);
            }
        }
    }

    Err(last_err.expect("attempts >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff("test", 3, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                anyhow::bail!("transient")
            }
            Ok(42)
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_last_error_when_exhausted() {
        let result: Result<()> = retry_with_backoff("test", 2, Duration::from_millis(1), || async {
            anyhow::bail!("always")
        })
        .await;
        assert!(result.is_err());
    }
}
