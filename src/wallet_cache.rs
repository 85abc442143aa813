// =============================================================================
// Wallet Cache — monitored/blacklist hot sets + LRU of scored wallet entries
// =============================================================================
//
// Two O(1) hot sets answer the only question the filter asks on every event:
// is this wallet monitored, and is it blacklisted (blacklist always wins).
// A bounded LRU holds full entries with the stats the scorer needs.
//
// Refresh model: the full membership sets reload from the tabular store every
// `wallet_refresh_interval_s`; a stale or missing entry for a monitored
// address is served with defaults and queued for a background single-entry
// refresh. A failed refresh keeps the previous snapshot and logs a warning.
//
// Cluster membership is loaded at startup with the wallet rows and updated
// through `ClusterUpdate` messages published by the discovery subsystem.
// =============================================================================

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use schnellru::{ByLength, LruMap};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::store::Store;

/// Full cached entry for one wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletEntry {
    pub address: String,
    pub is_monitored: bool,
    pub is_blacklisted: bool,
    pub cluster_id: Option<String>,
    pub is_cluster_leader: bool,
    /// Cluster amplification multiplier in [1.0, 1.8], produced by the
    /// discovery subsystem. 1.0 when the wallet has no cluster.
    pub amplification: f64,
    pub reputation: f64,
    pub win_rate: f64,
    pub avg_pnl_pct: f64,
    pub timing_percentile: f64,
    pub consistency: f64,
    pub is_decaying: bool,
    pub cached_at: DateTime<Utc>,
}

impl WalletEntry {
    /// Entry with neutral stats, used while a background refresh is pending.
    pub fn with_defaults(address: &str) -> Self {
        Self {
            address: address.to_string(),
            is_monitored: true,
            is_blacklisted: false,
            cluster_id: None,
            is_cluster_leader: false,
            amplification: 1.0,
            reputation: 0.5,
            win_rate: 0.5,
            avg_pnl_pct: 0.0,
            timing_percentile: 0.5,
            consistency: 0.5,
            is_decaying: false,
            cached_at: Utc::now(),
        }
    }
}

/// Outcome of a wallet lookup. Blacklist wins over everything.
#[derive(Debug, Clone)]
pub enum WalletVerdict {
    Blacklisted,
    NotMonitored,
    Monitored(Box<WalletEntry>),
}

/// Cluster membership change published by the discovery subsystem.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterUpdate {
    pub address: String,
    pub cluster_id: Option<String>,
    pub is_leader: bool,
    pub amplification: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletCacheStats {
    pub monitored: usize,
    pub blacklisted: usize,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub initialised: bool,
    pub last_refresh: Option<DateTime<Utc>>,
}

// =============================================================================
// WalletCache
// =============================================================================

pub struct WalletCache {
    store: Arc<Store>,
    config_rx: watch::Receiver<Arc<EngineConfig>>,

    monitored: RwLock<HashSet<String>>,
    blacklisted: RwLock<HashSet<String>>,
    entries: Mutex<LruMap<String, WalletEntry>>,

    refresh_tx: mpsc::UnboundedSender<String>,
    refresh_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,

    initialised: AtomicBool,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl WalletCache {
    pub fn new(store: Arc<Store>, config_rx: watch::Receiver<Arc<EngineConfig>>) -> Self {
        let max = config_rx.borrow().cache.wallet_cache_max;
        let (refresh_tx, refresh_rx) = mpsc::unbounded_channel();
        Self {
            store,
            config_rx,
            monitored: RwLock::new(HashSet::new()),
            blacklisted: RwLock::new(HashSet::new()),
            entries: Mutex::new(LruMap::new(ByLength::new(max))),
            refresh_tx,
            refresh_rx: Mutex::new(Some(refresh_rx)),
            initialised: AtomicBool::new(false),
            last_refresh: RwLock::new(None),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    // -------------------------------------------------------------------------
    // Lookup (warm path: a couple of set probes + one LRU probe)
    // -------------------------------------------------------------------------

    /// Classify a wallet. Returns the verdict and whether the entry came
    /// from a warm cache hit.
    pub fn lookup(&self, address: &str) -> (WalletVerdict, bool) {
        // Blacklist precedence is absolute, regardless of LRU contents.
        if self.blacklisted.read().contains(address) {
            return (WalletVerdict::Blacklisted, true);
        }
        if !self.monitored.read().contains(address) {
            return (WalletVerdict::NotMonitored, true);
        }

        let ttl_s = self.config_rx.borrow().cache.wallet_entry_ttl_s as i64;
        let now = Utc::now();

        if let Some(entry) = self.entries.lock().get(address) {
            if (now - entry.cached_at).num_seconds() < ttl_s {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return (WalletVerdict::Monitored(Box::new(entry.clone())), true);
            }
        }

        // Monitored but cold: serve neutral stats now, refresh in background.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let _ = self.refresh_tx.send(address.to_string());
        (
            WalletVerdict::Monitored(Box::new(WalletEntry::with_defaults(address))),
            false,
        )
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> WalletCacheStats {
        WalletCacheStats {
            monitored: self.monitored.read().len(),
            blacklisted: self.blacklisted.read().len(),
            entries: self.entries.lock().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            initialised: self.is_initialised(),
            last_refresh: *self.last_refresh.read(),
        }
    }

    // -------------------------------------------------------------------------
    // Refresh
    // -------------------------------------------------------------------------

    /// Reload the full membership sets and entries from the store. On
    /// failure the previous snapshot stays in force.
    pub fn refresh_full(&self) -> anyhow::Result<()> {
        let wallets = match self.store.load_wallets() {
            Ok(w) => w,
            Err(e) => {
                warn!(error = %e, "wallet cache refresh failed — keeping previous snapshot");
                return Err(e);
            }
        };

        let mut monitored = HashSet::new();
        let mut blacklisted = HashSet::new();
        {
            let mut entries = self.entries.lock();
            for wallet in wallets {
                if wallet.is_blacklisted {
                    blacklisted.insert(wallet.address.clone());
                }
                if wallet.is_monitored {
                    monitored.insert(wallet.address.clone());
                }
                entries.insert(wallet.address.clone(), wallet);
            }
        }

        let monitored_count = monitored.len();
        let blacklisted_count = blacklisted.len();
        *self.monitored.write() = monitored;
        *self.blacklisted.write() = blacklisted;
        *self.last_refresh.write() = Some(Utc::now());
        self.initialised.store(true, Ordering::SeqCst);

        debug!(monitored = monitored_count, blacklisted = blacklisted_count, "wallet sets refreshed");
        Ok(())
    }

    /// Refresh a single entry from the store.
    fn refresh_entry(&self, address: &str) {
        match self.store.load_wallet(address) {
            Ok(Some(entry)) => {
                self.entries.lock().insert(address.to_string(), entry);
            }
            Ok(None) => {
                debug!(address, "wallet not in store — removing from hot sets");
                self.monitored.write().remove(address);
            }
            Err(e) => warn!(address, error = %e, "single wallet refresh failed"),
        }
    }

    /// Apply a cluster membership change from the discovery subsystem.
    pub fn apply_cluster_update(&self, update: ClusterUpdate) {
        let mut entries = self.entries.lock();
        let entry = match entries.get(&update.address) {
            Some(e) => e,
            None => {
                // Wallet not cached yet; pull it on next lookup.
                let _ = self.refresh_tx.send(update.address.clone());
                return;
            }
        };
        entry.cluster_id = update.cluster_id.clone();
        entry.is_cluster_leader = update.is_leader;
        entry.amplification = update.amplification;
        info!(
            address = %update.address,
            cluster = ?update.cluster_id,
            leader = update.is_leader,
            "cluster membership updated"
        );
    }

    /// Background task: periodic full refresh + queued single-entry
    /// refreshes + cluster updates. Spawn once at startup.
    pub async fn run_refresh_loop(
        self: Arc<Self>,
        mut cluster_rx: mpsc::Receiver<ClusterUpdate>,
    ) {
        let mut refresh_rx = self
            .refresh_rx
            .lock()
            .take()
            .expect("refresh loop started twice");

        let interval_s = self.config_rx.borrow().cache.wallet_refresh_interval_s;
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_s.max(1)));
        info!(interval_s, "wallet cache refresh loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let _ = self.refresh_full();
                }
                Some(address) = refresh_rx.recv() => {
                    self.refresh_entry(&address);
                }
                Some(update) = cluster_rx.recv() => {
                    self.apply_cluster_update(update);
                }
            }
        }
    }
}

impl std::fmt::Debug for WalletCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletCache")
            .field("monitored", &self.monitored.read().len())
            .field("blacklisted", &self.blacklisted.read().len())
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}
