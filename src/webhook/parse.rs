// =============================================================================
// Webhook payload parsing — Helius enhanced transactions -> SwapEvent
// =============================================================================
//
// The provider posts either a single enhanced-transaction object or an array
// of them. Each is reduced to a normalised SwapEvent:
//
//   wallet       — the fee payer (the wallet being mirrored)
//   token        — mint of the non-WSOL token transfer leg
//   direction    — Buy when the fee payer spent SOL, Sell when it received
//   amount_token — UI units from the token transfer
//   amount_sol   — |fee payer native balance change|, falling back to WSOL /
//                  native transfer sums when account data is absent
//
// Transactions that touch no known DEX program (and are not typed SWAP by
// the provider) or carry no token transfer are dropped as non-swaps.
// =============================================================================

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::types::{Direction, SwapEvent, WSOL_MINT};

/// DEX programs whose transactions we treat as swaps.
const KNOWN_DEX_PROGRAMS: [&str; 4] = [
    // Raydium AMM v4
    "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8",
    // Jupiter aggregator v6
    "JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4",
    // Orca Whirlpool
    "whirLbMiicVdio4qvUfM5KAg6Ct8VwpYzGff3uctyCc",
    // pump.fun bonding curve
    "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P",
];

/// Native balance movement below this (lamports) is fee noise, not a SOL leg.
const NATIVE_DUST_LAMPORTS: i64 = 100_000;

const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

// ---------------------------------------------------------------------------
// Provider payload shapes (tolerant: unknown fields ignored, missing default)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnhancedTransaction {
    signature: String,
    #[serde(default)]
    fee_payer: String,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    slot: u64,
    #[serde(default, rename = "type")]
    tx_type: String,
    #[serde(default)]
    token_transfers: Vec<TokenTransfer>,
    #[serde(default)]
    native_transfers: Vec<NativeTransfer>,
    #[serde(default)]
    account_data: Vec<AccountData>,
    #[serde(default)]
    instructions: Vec<Instruction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTransfer {
    #[serde(default)]
    from_user_account: String,
    #[serde(default)]
    to_user_account: String,
    #[serde(default)]
    mint: String,
    #[serde(default)]
    token_amount: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NativeTransfer {
    #[serde(default)]
    from_user_account: String,
    #[serde(default)]
    to_user_account: String,
    #[serde(default)]
    amount: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountData {
    #[serde(default)]
    account: String,
    #[serde(default)]
    native_balance_change: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Instruction {
    #[serde(default)]
    program_id: String,
}

/// A parsed swap plus the raw transaction JSON it came from (persisted with
/// the event for replay/audit).
#[derive(Debug, Clone)]
pub struct ParsedSwap {
    pub event: SwapEvent,
    pub raw: String,
}

/// Why an element of the payload produced no event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NotASwap,
    NoTokenLeg,
    Unparseable,
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Parse a webhook body (single object or array) into swap events.
/// Returns the parsed swaps and the number of elements skipped.
pub fn parse_body(body: &serde_json::Value) -> (Vec<ParsedSwap>, usize) {
    let elements: Vec<&serde_json::Value> = match body {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    let mut swaps = Vec::new();
    let mut skipped = 0usize;
    for element in elements {
        match parse_transaction(element) {
            Ok(parsed) => swaps.push(parsed),
            Err(reason) => {
                debug!(?reason, "webhook element skipped");
                skipped += 1;
            }
        }
    }
    (swaps, skipped)
}

fn parse_transaction(value: &serde_json::Value) -> Result<ParsedSwap, SkipReason> {
    let tx: EnhancedTransaction =
        serde_json::from_value(value.clone()).map_err(|_| SkipReason::Unparseable)?;
    if tx.signature.is_empty() || tx.fee_payer.is_empty() {
        return Err(SkipReason::Unparseable);
    }

    // ── Swap gate: known DEX program or provider-typed SWAP ──────────────
    let touches_dex = tx
        .instructions
        .iter()
        .any(|i| KNOWN_DEX_PROGRAMS.contains(&i.program_id.as_str()));
    if !touches_dex && tx.tx_type != "SWAP" {
        return Err(SkipReason::NotASwap);
    }

    // ── Token leg: first non-WSOL transfer involving the fee payer ───────
    let token_leg = tx
        .token_transfers
        .iter()
        .find(|t| {
            t.mint != WSOL_MINT
                && !t.mint.is_empty()
                && (t.from_user_account == tx.fee_payer || t.to_user_account == tx.fee_payer)
        })
        .ok_or(SkipReason::NoTokenLeg)?;

    let wallet_received_token = token_leg.to_user_account == tx.fee_payer;

    // ── SOL leg ──────────────────────────────────────────────────────────
    let native_change = tx
        .account_data
        .iter()
        .find(|a| a.account == tx.fee_payer)
        .map(|a| a.native_balance_change)
        .unwrap_or(0);

    let (direction, amount_sol) = if native_change.abs() > NATIVE_DUST_LAMPORTS {
        let direction = if native_change < 0 {
            Direction::Buy
        } else {
            Direction::Sell
        };
        (direction, native_change.abs() as f64 / LAMPORTS_PER_SOL)
    } else {
        // No usable account data: derive the SOL leg from WSOL token
        // transfers, then plain native transfers.
        let direction = if wallet_received_token {
            Direction::Buy
        } else {
            Direction::Sell
        };
        let wsol: f64 = tx
            .token_transfers
            .iter()
            .filter(|t| {
                t.mint == WSOL_MINT
                    && (t.from_user_account == tx.fee_payer || t.to_user_account == tx.fee_payer)
            })
            .map(|t| t.token_amount)
            .sum();
        let amount_sol = if wsol > 0.0 {
            wsol
        } else {
            tx.native_transfers
                .iter()
                .filter(|t| {
                    t.from_user_account == tx.fee_payer || t.to_user_account == tx.fee_payer
                })
                .map(|t| t.amount.abs() as f64 / LAMPORTS_PER_SOL)
                .sum()
        };
        (direction, amount_sol)
    };

    let ts: DateTime<Utc> = Utc
        .timestamp_opt(tx.timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(ParsedSwap {
        event: SwapEvent {
            tx_signature: tx.signature,
            wallet: tx.fee_payer,
            token: token_leg.mint.clone(),
            direction,
            amount_token: token_leg.token_amount,
            amount_sol,
            slot: tx.slot,
            ts,
        },
        raw: value.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const WALLET: &str = "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin";
    const MINT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";
    const RAYDIUM: &str = "675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8";

    fn buy_tx(signature: &str) -> serde_json::Value {
        serde_json::json!({
            "signature": signature,
            "feePayer": WALLET,
            "timestamp": 1717330000,
            "slot": 270123456,
            "type": "SWAP",
            "instructions": [{ "programId": RAYDIUM }],
            "tokenTransfers": [{
                "fromUserAccount": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
                "toUserAccount": WALLET,
                "mint": MINT,
                "tokenAmount": 20000.0
            }],
            "accountData": [{
                "account": WALLET,
                "nativeBalanceChange": -1_000_005_000i64
            }]
        })
    }

    fn sell_tx(signature: &str) -> serde_json::Value {
        serde_json::json!({
            "signature": signature,
            "feePayer": WALLET,
            "timestamp": 1717330100,
            "slot": 270123500,
            "type": "SWAP",
            "instructions": [{ "programId": RAYDIUM }],
            "tokenTransfers": [{
                "fromUserAccount": WALLET,
                "toUserAccount": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
                "mint": MINT,
                "tokenAmount": 20000.0
            }],
            "accountData": [{
                "account": WALLET,
                "nativeBalanceChange": 1_450_000_000i64
            }]
        })
    }

    #[test]
    fn buy_direction_from_spent_sol() {
        let (swaps, skipped) = parse_body(&buy_tx("sig-buy"));
        assert_eq!(skipped, 0);
        assert_eq!(swaps.len(), 1);
        let event = &swaps[0].event;
        assert_eq!(event.direction, Direction::Buy);
        assert_eq!(event.wallet, WALLET);
        assert_eq!(event.token, MINT);
        assert_eq!(event.amount_token, 20000.0);
        assert!((event.amount_sol - 1.000005).abs() < 1e-9);
        assert_eq!(event.slot, 270123456);
    }

    #[test]
    fn sell_direction_from_received_sol() {
        let (swaps, _) = parse_body(&sell_tx("sig-sell"));
        let event = &swaps[0].event;
        assert_eq!(event.direction, Direction::Sell);
        assert!((event.amount_sol - 1.45).abs() < 1e-9);
    }

    #[test]
    fn batch_payload_parses_each_element() {
        let body = serde_json::json!([buy_tx("sig-1"), sell_tx("sig-2")]);
        let (swaps, skipped) = parse_body(&body);
        assert_eq!(swaps.len(), 2);
        assert_eq!(skipped, 0);
        assert_eq!(swaps[0].event.tx_signature, "sig-1");
        assert_eq!(swaps[1].event.tx_signature, "sig-2");
    }

    #[test]
    fn non_dex_transaction_dropped() {
        let mut tx = buy_tx("sig-transfer");
        tx["type"] = serde_json::json!("TRANSFER");
        tx["instructions"] = serde_json::json!([
            { "programId": "11111111111111111111111111111111" }
        ]);
        let (swaps, skipped) = parse_body(&tx);
        assert!(swaps.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn swap_without_token_transfer_dropped() {
        let mut tx = buy_tx("sig-no-token");
        tx["tokenTransfers"] = serde_json::json!([]);
        let (swaps, skipped) = parse_body(&tx);
        assert!(swaps.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn wsol_only_transfers_are_not_a_token_leg() {
        let mut tx = buy_tx("sig-wsol");
        tx["tokenTransfers"] = serde_json::json!([{
            "fromUserAccount": WALLET,
            "toUserAccount": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
            "mint": WSOL_MINT,
            "tokenAmount": 1.0
        }]);
        let (swaps, skipped) = parse_body(&tx);
        assert!(swaps.is_empty());
        assert_eq!(skipped, 1);
    }

    #[test]
    fn sol_leg_falls_back_to_wsol_transfer() {
        let mut tx = buy_tx("sig-fallback");
        tx["accountData"] = serde_json::json!([]);
        tx["tokenTransfers"].as_array_mut().unwrap().push(serde_json::json!({
            "fromUserAccount": WALLET,
            "toUserAccount": "5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1",
            "mint": WSOL_MINT,
            "tokenAmount": 0.95
        }));
        let (swaps, _) = parse_body(&tx);
        let event = &swaps[0].event;
        // Fee payer received the token: buy, with the WSOL leg as size.
        assert_eq!(event.direction, Direction::Buy);
        assert!((event.amount_sol - 0.95).abs() < 1e-9);
    }

    #[test]
    fn garbage_element_counts_as_skipped() {
        let body = serde_json::json!([{"not": "a transaction"}, buy_tx("sig-ok")]);
        let (swaps, skipped) = parse_body(&body);
        assert_eq!(swaps.len(), 1);
        assert_eq!(skipped, 1);
    }
}
