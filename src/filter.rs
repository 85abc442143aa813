// =============================================================================
// Signal Filter — fail-closed wallet gate ahead of scoring
// =============================================================================
//
// Every parsed swap event passes through here exactly once. Wallets we do
// not explicitly monitor are dropped; blacklisted wallets are dropped even
// when also monitored. A cache failure counts as not-monitored: an unknown
// wallet is never admitted.
//
// Survivors are enriched with the wallet context the scorer needs (cluster
// membership, leader flag, reputation and performance stats).
// =============================================================================

use serde::Serialize;
use tracing::{debug, info};

use crate::types::SwapEvent;
use crate::wallet_cache::{WalletCache, WalletEntry, WalletVerdict};

/// A swap event that survived the wallet gate, carrying its wallet context.
#[derive(Debug, Clone, Serialize)]
pub struct FilteredSignal {
    pub event: SwapEvent,
    pub wallet: WalletEntry,
    /// False when the wallet entry was served cold (neutral stats while a
    /// background refresh runs).
    pub wallet_cache_hit: bool,
}

/// Why an event was dropped, for counters and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Blacklisted,
    NotMonitored,
}

/// Run the wallet gate over one event.
pub fn filter_event(cache: &WalletCache, event: SwapEvent) -> Result<FilteredSignal, DropReason> {
    let (verdict, cache_hit) = cache.lookup(&event.wallet);

    match verdict {
        WalletVerdict::Blacklisted => {
            info!(
                wallet = %event.wallet,
                tx = %event.tx_signature,
                "signal dropped: blacklisted wallet"
            );
            Err(DropReason::Blacklisted)
        }
        WalletVerdict::NotMonitored => {
            debug!(
                wallet = %event.wallet,
                tx = %event.tx_signature,
                "signal dropped: wallet not monitored"
            );
            Err(DropReason::NotMonitored)
        }
        WalletVerdict::Monitored(entry) => Ok(FilteredSignal {
            event,
            wallet: *entry,
            wallet_cache_hit: cache_hit,
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::store::Store;
    use crate::types::Direction;
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::sync::watch;

    fn event(wallet: &str) -> SwapEvent {
        SwapEvent {
            tx_signature: "sig1".to_string(),
            wallet: wallet.to_string(),
            token: "MintA".to_string(),
            direction: Direction::Buy,
            amount_token: 1000.0,
            amount_sol: 1.0,
            slot: 1,
            ts: Utc::now(),
        }
    }

    fn cache_with(
        wallets: &[(&str, bool, bool)],
    ) -> WalletCache {
        let store = Arc::new(Store::open_in_memory().unwrap());
        for (address, monitored, blacklisted) in wallets {
            let mut entry = WalletEntry::with_defaults(address);
            entry.is_monitored = *monitored;
            entry.is_blacklisted = *blacklisted;
            entry.reputation = 0.8;
            store.upsert_wallet(&entry).unwrap();
        }
        let (tx, rx) = watch::channel(Arc::new(EngineConfig::default()));
        std::mem::forget(tx);
        let cache = WalletCache::new(store, rx);
        cache.refresh_full().unwrap();
        cache
    }

    #[test]
    fn monitored_wallet_passes_with_context() {
        let cache = cache_with(&[("W1", true, false)]);
        let signal = filter_event(&cache, event("W1")).unwrap();
        assert_eq!(signal.wallet.reputation, 0.8);
        assert!(signal.wallet_cache_hit);
    }

    #[test]
    fn blacklisted_wallet_dropped_even_if_monitored() {
        let cache = cache_with(&[("W1", true, true)]);
        assert_eq!(
            filter_event(&cache, event("W1")).unwrap_err(),
            DropReason::Blacklisted
        );
    }

    #[test]
    fn unknown_wallet_fails_closed() {
        let cache = cache_with(&[("W1", true, false)]);
        assert_eq!(
            filter_event(&cache, event("W2")).unwrap_err(),
            DropReason::NotMonitored
        );
    }

    #[test]
    fn blacklist_only_wallet_is_not_admitted() {
        // Present in the blacklist, absent from monitored: still dropped,
        // and dropped as blacklisted (precedence).
        let cache = cache_with(&[("W1", false, true)]);
        assert_eq!(
            filter_event(&cache, event("W1")).unwrap_err(),
            DropReason::Blacklisted
        );
    }
}
