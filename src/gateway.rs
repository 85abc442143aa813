// =============================================================================
// Swap Gateway Client — quote + swap against the external execution service
// =============================================================================
//
// WallTrack never crafts on-chain transactions itself: buys and sells are
// delegated to an external swap gateway that quotes a route and executes it,
// returning the on-chain transaction signature. That signature is the
// idempotency key for live orders — a retried swap that already landed
// reconciles against it instead of double-executing.
//
// The gateway is a trait so the swap queue can be exercised in tests with an
// in-process fake. The HTTP implementation expects a Jupiter-style service:
//   GET  {base}/quote?inputMint=..&outputMint=..&amount=..
//   POST {base}/swap   { quote, slippageBps }
// =============================================================================

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A priced route returned by the gateway, fed back verbatim into `swap`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    /// Amount of `input_mint` consumed (UI units).
    pub in_amount: f64,
    /// Amount of `output_mint` received (UI units).
    pub out_amount: f64,
    /// Opaque route payload, echoed back on execution.
    #[serde(default)]
    pub route: serde_json::Value,
}

/// Result of an executed swap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapReceipt {
    /// On-chain transaction signature — the order idempotency key.
    pub tx_signature: String,
    pub in_amount: f64,
    pub out_amount: f64,
}

#[async_trait]
pub trait SwapGateway: Send + Sync {
    fn name(&self) -> &'static str;

    /// Price a swap of `amount` units of `input_mint` into `output_mint`.
    async fn quote(&self, input_mint: &str, output_mint: &str, amount: f64) -> Result<SwapQuote>;

    /// Execute a previously-obtained quote.
    async fn swap(&self, quote: &SwapQuote, slippage_bps: u32) -> Result<SwapReceipt>;
}

// =============================================================================
// HTTP implementation
// =============================================================================

pub struct HttpSwapGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSwapGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: crate::providers::http_client(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl SwapGateway for HttpSwapGateway {
    fn name(&self) -> &'static str {
        "http_gateway"
    }

    async fn quote(&self, input_mint: &str, output_mint: &str, amount: f64) -> Result<SwapQuote> {
        let url = format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}",
            self.base_url, input_mint, output_mint, amount
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("gateway quote request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse gateway quote response")?;
        if !status.is_success() {
            anyhow::bail!("gateway quote returned {status}: {body}");
        }

        let quote = SwapQuote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: body
                .get("inAmount")
                .and_then(|v| v.as_f64())
                .unwrap_or(amount),
            out_amount: body
                .get("outAmount")
                .and_then(|v| v.as_f64())
                .context("gateway quote missing outAmount")?,
            route: body,
        };

        debug!(
            input = input_mint,
            output = output_mint,
            in_amount = quote.in_amount,
            out_amount = quote.out_amount,
            "swap quoted"
        );
        Ok(quote)
    }

    async fn swap(&self, quote: &SwapQuote, slippage_bps: u32) -> Result<SwapReceipt> {
        let url = format!("{}/swap", self.base_url);
        let payload = serde_json::json!({
            "quote": quote.route,
            "slippageBps": slippage_bps,
        });

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("gateway swap request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse gateway swap response")?;
        if !status.is_success() {
            anyhow::bail!("gateway swap returned {status}: {body}");
        }

        let receipt = SwapReceipt {
            tx_signature: body
                .get("txSignature")
                .and_then(|v| v.as_str())
                .context("gateway swap missing txSignature")?
                .to_string(),
            in_amount: body
                .get("inAmount")
                .and_then(|v| v.as_f64())
                .unwrap_or(quote.in_amount),
            out_amount: body
                .get("outAmount")
                .and_then(|v| v.as_f64())
                .unwrap_or(quote.out_amount),
        };

        debug!(tx = %receipt.tx_signature, "swap executed");
        Ok(receipt)
    }
}

impl std::fmt::Debug for HttpSwapGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSwapGateway")
            .field("base_url", &self.base_url)
            .finish()
    }
}
