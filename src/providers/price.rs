// =============================================================================
// Batch price providers — Birdeye (primary) and DexScreener (fallback)
// =============================================================================
//
// Both quote SOL-denominated prices. The primary accepts up to 100 mints per
// request; the fallback 30. API keys come from the environment and are never
// logged.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::PriceProvider;

/// Primary price source: Birdeye multi-price endpoint, up to 100 mints per
/// call.
pub struct BirdeyePriceClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BirdeyePriceClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, "https://public-api.birdeye.so")
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl PriceProvider for BirdeyePriceClient {
    fn name(&self) -> &'static str {
        "birdeye"
    }

    fn max_batch(&self) -> usize {
        100
    }

    async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>> {
        let list = mints.join(",");
        let url = format!(
            "{}/defi/multi_price?list_address={}&vs=sol",
            self.base_url, list
        );

        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .header("x-chain", "solana")
            .send()
            .await
            .context("birdeye multi_price request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse birdeye multi_price response")?;

        if !status.is_success() {
            anyhow::bail!("birdeye multi_price returned {status}");
        }

        let mut out = HashMap::new();
        if let Some(data) = body.get("data").and_then(|v| v.as_object()) {
            for (mint, entry) in data {
                if let Some(price) = entry.get("value").and_then(|v| v.as_f64()) {
                    if price > 0.0 {
                        out.insert(mint.clone(), price);
                    }
                }
            }
        }

        debug!(requested = mints.len(), resolved = out.len(), "birdeye prices fetched");
        Ok(out)
    }
}

impl std::fmt::Debug for BirdeyePriceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BirdeyePriceClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Fallback price source: DexScreener token endpoint, up to 30 mints per
/// call (comma-joined path). `priceNative` is the SOL quote on Solana pairs.
pub struct DexScreenerPriceClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerPriceClient {
    pub fn new() -> Self {
        Self::with_base_url("https://api.dexscreener.com")
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: super::http_client(),
            base_url: base_url.into(),
        }
    }
}

impl Default for DexScreenerPriceClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceProvider for DexScreenerPriceClient {
    fn name(&self) -> &'static str {
        "dexscreener"
    }

    fn max_batch(&self) -> usize {
        30
    }

    async fn prices(&self, mints: &[String]) -> Result<HashMap<String, f64>> {
        let list = mints.join(",");
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, list);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("dexscreener tokens request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse dexscreener response")?;

        if !status.is_success() {
            anyhow::bail!("dexscreener tokens returned {status}");
        }

        // Keep the deepest pair per mint; thin pairs quote unreliable prices.
        let mut best_liquidity: HashMap<String, f64> = HashMap::new();
        let mut out = HashMap::new();

        if let Some(pairs) = body.get("pairs").and_then(|v| v.as_array()) {
            for pair in pairs {
                let mint = match pair
                    .get("baseToken")
                    .and_then(|t| t.get("address"))
                    .and_then(|v| v.as_str())
                {
                    Some(m) => m.to_string(),
                    None => continue,
                };
                let liquidity = pair
                    .get("liquidity")
                    .and_then(|l| l.get("usd"))
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                let price: Option<f64> = pair
                    .get("priceNative")
                    .and_then(|v| v.as_str())
                    .and_then(|s| s.parse().ok());

                if let Some(price) = price {
                    let prev = best_liquidity.get(&mint).copied().unwrap_or(-1.0);
                    if price > 0.0 && liquidity > prev {
                        best_liquidity.insert(mint.clone(), liquidity);
                        out.insert(mint, price);
                    }
                }
            }
        }

        debug!(requested = mints.len(), resolved = out.len(), "dexscreener prices fetched");
        Ok(out)
    }
}

impl std::fmt::Debug for DexScreenerPriceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexScreenerPriceClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}
