// =============================================================================
// WallTrack — copy-trading decision and execution core
// =============================================================================
//
// Pipeline: webhook swap ingest from watched wallets -> signal filter ->
// multi-factor scorer -> position lifecycle -> exit evaluation -> a single
// priority-ordered swap queue in front of the external gateway. The wallet
// and token caches feed scoring; the circuit breaker gates new entries.

pub mod app_state;
pub mod breaker;
pub mod config;
pub mod exit;
pub mod filter;
pub mod gateway;
pub mod pipeline;
pub mod position;
pub mod price_monitor;
pub mod providers;
pub mod scorer;
pub mod store;
pub mod swap_queue;
pub mod token_cache;
pub mod types;
pub mod wallet_cache;
pub mod webhook;
