// =============================================================================
// WallTrack — Main Entry Point
// =============================================================================
//
// Copy-trading decision and execution core: webhook swap ingest from watched
// wallets, signal filtering and scoring, position lifecycle with exit
// strategies, and a single priority-ordered swap queue in front of the
// external gateway.
//
// The engine starts in Simulation mode unless WALLTRACK_LIVE=1 and a gateway
// URL are configured. Live trading must be opted into explicitly.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use walltrack::app_state::{AppState, Counters};
use walltrack::breaker::CircuitBreaker;
use walltrack::config::ConfigStore;
use walltrack::gateway::HttpSwapGateway;
use walltrack::pipeline;
use walltrack::position::PositionBook;
use walltrack::price_monitor::PriceMonitor;
use walltrack::providers::price::{BirdeyePriceClient, DexScreenerPriceClient};
use walltrack::providers::token_meta::{BirdeyeTokenClient, DexScreenerTokenClient};
use walltrack::store::Store;
use walltrack::swap_queue::SwapQueue;
use walltrack::token_cache::TokenCache;
use walltrack::types::TradeMode;
use walltrack::wallet_cache::WalletCache;
use walltrack::webhook;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("WallTrack engine starting");

    let webhook_secret = std::env::var("WALLTRACK_WEBHOOK_SECRET").unwrap_or_default();
    if webhook_secret.is_empty() {
        warn!("WALLTRACK_WEBHOOK_SECRET is not set — all webhook deliveries will be rejected");
    }
    let birdeye_key = std::env::var("BIRDEYE_API_KEY").unwrap_or_default();
    let db_path = std::env::var("WALLTRACK_DB").unwrap_or_else(|_| "walltrack.db".to_string());
    let bind_addr =
        std::env::var("WALLTRACK_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    let gateway_url = std::env::var("WALLTRACK_GATEWAY_URL").ok();
    let live_requested = std::env::var("WALLTRACK_LIVE").map(|v| v == "1").unwrap_or(false);

    // ── 2. Store + config ────────────────────────────────────────────────
    let store = Arc::new(Store::open(&db_path)?);
    let config_store = Arc::new(ConfigStore::open(store.clone())?);

    // SAFETY: live mode needs the explicit env opt-in AND a gateway. A
    // persisted live config without them is downgraded to simulation.
    let live_capable = live_requested && gateway_url.is_some();
    if config_store.snapshot().mode == TradeMode::Live && !live_capable {
        warn!("active config requests live mode without WALLTRACK_LIVE=1 + gateway — forcing simulation");
        let mut draft = config_store.begin_draft();
        draft.mode = TradeMode::Simulation;
        config_store.set_draft(draft)?;
        config_store
            .activate()
            .map_err(|e| anyhow::anyhow!("failed to force simulation mode: {e}"))?;
    }
    info!(mode = %config_store.snapshot().mode, "trade mode resolved");

    // ── 3. Caches ────────────────────────────────────────────────────────
    let wallet_cache = Arc::new(WalletCache::new(store.clone(), config_store.subscribe()));
    if let Err(e) = wallet_cache.refresh_full() {
        warn!(error = %e, "initial wallet cache load failed — starting empty (fail-closed)");
    }
    let (_cluster_tx, cluster_rx) = mpsc::channel(64);
    tokio::spawn(wallet_cache.clone().run_refresh_loop(cluster_rx));

    let token_cache = Arc::new(TokenCache::new(
        Arc::new(DexScreenerTokenClient::new()),
        Arc::new(BirdeyeTokenClient::new(birdeye_key.clone())),
        config_store.subscribe(),
    ));

    // ── 4. Positions, breaker, swap queue ────────────────────────────────
    let book = Arc::new(PositionBook::new());
    match store.load_positions(1000) {
        Ok(persisted) => book.restore(persisted),
        Err(e) => warn!(error = %e, "failed to load persisted positions"),
    }
    let breaker = Arc::new(CircuitBreaker::new(store.clone(), config_store.subscribe()));
    tokio::spawn(breaker.clone().run_evaluator());

    let gateway = Arc::new(HttpSwapGateway::new(
        gateway_url.unwrap_or_else(|| "http://127.0.0.1:8787".to_string()),
    ));
    let queue = Arc::new(SwapQueue::new(
        breaker.clone(),
        config_store.subscribe(),
        store.clone(),
        book.clone(),
        gateway,
    ));

    // Live entries interrupted by the last shutdown re-enter the queue;
    // interrupted exits re-fire from position state on the next price tick.
    for position in book.active_positions() {
        if position.status == walltrack::position::PositionStatus::PendingEntry
            && position.mode == TradeMode::Live
        {
            let outcome = queue.enqueue(walltrack::swap_queue::SwapIntent {
                kind: walltrack::types::OrderKind::Entry,
                position_id: position.id.clone(),
                token: position.token.clone(),
                amount: position.entry_value_sol,
                scaling_level: None,
                reason: "entry:replayed".to_string(),
                mode: TradeMode::Live,
                observed_price: 0.0,
            });
            info!(position = %position.id, outcome = %outcome, "pending entry replayed");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(queue.clone().run_worker(shutdown_rx));

    // ── 5. Price monitor ─────────────────────────────────────────────────
    let monitor = Arc::new(PriceMonitor::new(
        book.clone(),
        queue.clone(),
        breaker.clone(),
        config_store.subscribe(),
        Arc::new(BirdeyePriceClient::new(birdeye_key)),
        Arc::new(DexScreenerPriceClient::new()),
    ));
    tokio::spawn(monitor.run());

    // ── 6. Pipeline + shared state ───────────────────────────────────────
    let (event_tx, event_rx) = mpsc::channel(1024);
    let state = Arc::new(AppState {
        store,
        config: config_store,
        wallet_cache,
        token_cache,
        book,
        breaker,
        queue,
        event_tx,
        webhook_secret,
        counters: Counters::default(),
        last_webhook_at: RwLock::new(None),
        recent_errors: RwLock::new(Vec::new()),
        start_time: std::time::Instant::now(),
    });
    tokio::spawn(pipeline::run_pipeline(state.clone(), event_rx));

    // ── 7. HTTP server ───────────────────────────────────────────────────
    let app = webhook::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("failed to bind {bind_addr}: {e}"))?;
    info!(addr = %bind_addr, "HTTP server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "HTTP server failed");
        }
    });

    info!("all subsystems running — Ctrl+C to stop");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — draining swap queue");

    let _ = shutdown_tx.send(true);
    match tokio::time::timeout(std::time::Duration::from_secs(30), worker_handle).await {
        Ok(_) => info!("swap queue drained"),
        Err(_) => warn!("swap queue drain timed out"),
    }

    info!("WallTrack shut down complete");
    Ok(())
}
