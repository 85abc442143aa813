// =============================================================================
// Token metadata providers — DexScreener (primary) and Birdeye (fallback)
// =============================================================================
//
// The primary resolves pair-level market data (price, liquidity, FDV, volume,
// pair age). The fallback adds holder distribution and authority/safety
// fields from its security endpoint. Either alone yields a usable record;
// absent fields stay `None` and the scorer treats them neutrally.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use super::{TokenMeta, TokenMetaProvider};

/// Primary metadata source: DexScreener pair lookup.
pub struct DexScreenerTokenClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerTokenClient {
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

impl Default for DexScreenerTokenClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenMetaProvider for DexScreenerTokenClient {
    fn name(&self) -> &'static str {
        "dexscreener"
    }

    async fn fetch(&self, mint: &str) -> Result<TokenMeta> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mint);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("dexscreener token request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse dexscreener token response")?;
        if !status.is_success() {
            anyhow::bail!("dexscreener token lookup returned {status}");
        }

        let pairs = body
            .get("pairs")
            .and_then(|v| v.as_array())
            .context("dexscreener response missing 'pairs'")?;

        // Deepest pair wins.
        let pair = pairs
            .iter()
            .max_by(|a, b| {
                let la = a
                    .pointer("/liquidity/usd")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                let lb = b
                    .pointer("/liquidity/usd")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.0);
                la.total_cmp(&lb)
            })
            .context("no pairs listed for token")?;

        let parse_str_f64 = |v: Option<&serde_json::Value>| -> f64 {
            v.and_then(|v| v.as_str())
                .and_then(|s| s.parse().ok())
                .or_else(|| v.and_then(|v| v.as_f64()))
                .unwrap_or(0.0)
        };

        let age_minutes = pair
            .get("pairCreatedAt")
            .and_then(|v| v.as_i64())
            .map(|created_ms| {
                let age_ms = Utc::now().timestamp_millis() - created_ms;
                (age_ms as f64 / 60_000.0).max(0.0)
            })
            .unwrap_or(f64::MAX);

        let meta = TokenMeta {
            symbol: pair
                .pointer("/baseToken/symbol")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            price_usd: parse_str_f64(pair.get("priceUsd")),
            price_sol: parse_str_f64(pair.get("priceNative")),
            liquidity_usd: pair
                .pointer("/liquidity/usd")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0),
            market_cap_usd: pair.get("fdv").and_then(|v| v.as_f64()),
            volume_24h_usd: pair.pointer("/volume/h24").and_then(|v| v.as_f64()),
            age_minutes,
            holder_count: None,
            top10_holder_pct: None,
            is_honeypot: None,
            has_mint_authority: None,
            has_freeze_authority: None,
        };

        debug!(
            mint,
            liquidity_usd = meta.liquidity_usd,
            age_minutes = meta.age_minutes,
            "token metadata fetched (dexscreener)"
        );
        Ok(meta)
    }
}

impl std::fmt::Debug for DexScreenerTokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DexScreenerTokenClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Fallback metadata source: Birdeye overview + security endpoints. Slower
/// (two calls) but carries holder distribution and authority flags.
pub struct BirdeyeTokenClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl BirdeyeTokenClient {
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

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header("X-API-KEY", &self.api_key)
            .header("x-chain", "solana")
            .send()
            .await
            .with_context(|| format!("birdeye request failed: {path}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse birdeye response: {path}"))?;
        if !status.is_success() {
            anyhow::bail!("birdeye {path} returned {status}");
        }
        Ok(body)
    }
}

#[async_trait]
impl TokenMetaProvider for BirdeyeTokenClient {
    fn name(&self) -> &'static str {
        "birdeye"
    }

    async fn fetch(&self, mint: &str) -> Result<TokenMeta> {
        let overview = self
            .get_json(&format!("/defi/token_overview?address={mint}"))
            .await?;
        let security = self
            .get_json(&format!("/defi/token_security?address={mint}"))
            .await
            .unwrap_or(serde_json::Value::Null);

        let data = overview
            .get("data")
            .context("birdeye overview missing 'data'")?;
        let sec = security.get("data").cloned().unwrap_or(serde_json::Value::Null);

        let price_usd = data.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let price_sol = data
            .get("priceInNative")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let age_minutes = sec
            .get("creationTime")
            .and_then(|v| v.as_i64())
            .map(|created_s| {
                let age_s = Utc::now().timestamp() - created_s;
                (age_s as f64 / 60.0).max(0.0)
            })
            .unwrap_or(f64::MAX);

        let meta = TokenMeta {
            symbol: data.get("symbol").and_then(|v| v.as_str()).map(str::to_string),
            price_usd,
            price_sol,
            liquidity_usd: data.get("liquidity").and_then(|v| v.as_f64()).unwrap_or(0.0),
            market_cap_usd: data.get("mc").and_then(|v| v.as_f64()),
            volume_24h_usd: data.get("v24hUSD").and_then(|v| v.as_f64()),
            age_minutes,
            holder_count: data.get("holder").and_then(|v| v.as_u64()),
            top10_holder_pct: sec
                .get("top10HolderPercent")
                .and_then(|v| v.as_f64())
                .map(|frac| frac * 100.0),
            is_honeypot: sec.get("isHoneypot").and_then(|v| v.as_bool()),
            has_mint_authority: sec
                .get("mintAuthority")
                .map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(true)),
            has_freeze_authority: sec
                .get("freezeAuthority")
                .map(|v| !v.is_null() && v.as_str().map(|s| !s.is_empty()).unwrap_or(true)),
        };

        debug!(
            mint,
            holder_count = ?meta.holder_count,
            "token metadata fetched (birdeye)"
        );
        Ok(meta)
    }
}

impl std::fmt::Debug for BirdeyeTokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BirdeyeTokenClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}
