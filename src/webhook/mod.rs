// =============================================================================
// HTTP surface — webhook ingest, health, admin REST (Axum 0.7)
// =============================================================================
//
// `POST /webhooks/helius` is the hot path: authenticate the raw body with
// HMAC-SHA256 (constant-time compare against the provider header), parse,
// persist each swap idempotently, and hand survivors to the pipeline over a
// bounded channel. Everything slow happens downstream; the handler stays
// well inside the provider's delivery timeout.
//
// `GET /health` and the `/api/v1` admin routes are the operator surface:
// config draft/activate, positions, breaker override, cache introspection.
// CORS is permissive for development; tighten for production.
// =============================================================================

pub mod parse;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::position::PositionStatus;
use crate::swap_queue::SwapIntent;
use crate::types::OrderKind;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the provider's HMAC-SHA256 hex signature of the raw body.
const SIGNATURE_HEADER: &str = "x-helius-signature";

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Ingest ──────────────────────────────────────────────────
        .route("/webhooks/helius", post(webhook_helius))
        // ── Health ──────────────────────────────────────────────────
        .route("/health", get(health))
        // ── Config administration ───────────────────────────────────
        .route("/api/v1/config", get(get_config))
        .route("/api/v1/config/draft", get(get_draft).put(put_draft).delete(delete_draft))
        .route("/api/v1/config/activate", post(activate_config))
        // ── Positions ───────────────────────────────────────────────
        .route("/api/v1/positions", get(open_positions))
        .route("/api/v1/positions/closed", get(closed_positions))
        .route("/api/v1/positions/:id/exit", post(manual_exit))
        // ── Breaker ─────────────────────────────────────────────────
        .route("/api/v1/breaker", get(breaker_state))
        .route("/api/v1/breaker/activate", post(breaker_activate))
        .route("/api/v1/breaker/deactivate", post(breaker_deactivate))
        // ── Cache & queue introspection ─────────────────────────────
        .route("/api/v1/cache/wallets", get(wallet_cache_stats))
        .route("/api/v1/cache/tokens", get(token_cache_stats))
        .route("/api/v1/queue", get(queue_state))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// HMAC validation
// =============================================================================

/// Compare two byte slices in constant time. Always examines every byte so
/// a mismatch position cannot be inferred from timing.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn compute_signature(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn verify_signature(secret: &str, body: &[u8], provided: Option<&str>) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Some(provided) = provided else {
        return false;
    };
    let expected = compute_signature(secret, body);
    constant_time_eq(expected.as_bytes(), provided.trim().as_bytes())
}

// =============================================================================
// Webhook ingest
// =============================================================================

async fn webhook_helius(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // ── 1. Authenticate ─────────────────────────────────────────────
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());
    if !verify_signature(&state.webhook_secret, &body, provided) {
        state
            .counters
            .webhooks_rejected_signature
            .fetch_add(1, Ordering::Relaxed);
        warn!(body_len = body.len(), "webhook rejected: invalid_signature");
        return error_response(StatusCode::UNAUTHORIZED, "invalid_signature");
    }

    // ── 2. Parse ────────────────────────────────────────────────────
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => {
            state
                .counters
                .webhooks_malformed
                .fetch_add(1, Ordering::Relaxed);
            tracing::debug!(body_len = body.len(), "webhook rejected: malformed_payload");
            return error_response(StatusCode::BAD_REQUEST, "malformed_payload");
        }
    };

    let (swaps, skipped) = parse::parse_body(&payload);
    state
        .counters
        .events_skipped_non_swap
        .fetch_add(skipped as u64, Ordering::Relaxed);

    // ── 3. Persist idempotently + hand off ──────────────────────────
    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    for parsed in swaps.iter() {
        match state.store.record_swap_event(&parsed.event, &parsed.raw) {
            Ok(true) => {
                accepted += 1;
                // Non-blocking handoff; backpressure surfaces as a counter,
                // the event itself stays replayable from the log.
                if state.event_tx.try_send(parsed.event.clone()).is_err() {
                    state
                        .counters
                        .events_dropped_backpressure
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(tx = %parsed.event.tx_signature, "pipeline channel full — event persisted but deferred");
                }
            }
            Ok(false) => duplicates += 1,
            Err(e) => {
                state.push_error(format!("event persist failed: {e}"));
                warn!(error = %e, "failed to persist swap event");
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error");
            }
        }
    }

    state
        .counters
        .webhooks_accepted
        .fetch_add(1, Ordering::Relaxed);
    state
        .counters
        .events_parsed
        .fetch_add(accepted as u64, Ordering::Relaxed);
    state
        .counters
        .events_duplicate
        .fetch_add(duplicates as u64, Ordering::Relaxed);
    *state.last_webhook_at.write() = Some(chrono::Utc::now());

    Json(serde_json::json!({
        "accepted": accepted,
        "duplicates": duplicates,
        "skipped": skipped,
    }))
    .into_response()
}

fn error_response(status: StatusCode, kind: &str) -> Response {
    (status, Json(serde_json::json!({ "error": kind }))).into_response()
}

// =============================================================================
// Health
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health_snapshot())
}

// =============================================================================
// Config administration
// =============================================================================

async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": state.config.version(),
        "config": state.config.snapshot().as_ref(),
    }))
}

async fn get_draft(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.begin_draft())
}

async fn put_draft(
    State(state): State<Arc<AppState>>,
    Json(draft): Json<EngineConfig>,
) -> Response {
    match state.config.set_draft(draft) {
        Ok(()) => Json(serde_json::json!({ "status": "draft_saved" })).into_response(),
        Err(e) => {
            state.push_error(format!("draft save failed: {e}"));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

async fn delete_draft(State(state): State<Arc<AppState>>) -> Response {
    match state.config.discard_draft() {
        Ok(true) => Json(serde_json::json!({ "status": "draft_discarded" })).into_response(),
        Ok(false) => error_response(StatusCode::NOT_FOUND, "no_draft"),
        Err(e) => {
            state.push_error(format!("draft discard failed: {e}"));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

async fn activate_config(State(state): State<Arc<AppState>>) -> Response {
    use crate::config::ConfigError;
    match state.config.activate() {
        Ok(version) => {
            info!(version, "config activated via API");
            Json(serde_json::json!({ "status": "activated", "version": version })).into_response()
        }
        Err(ConfigError::NoDraft) => error_response(StatusCode::CONFLICT, "no_draft"),
        Err(ConfigError::Invalid(reasons)) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": "invalid_config", "reasons": reasons })),
        )
            .into_response(),
        Err(ConfigError::Storage(e)) => {
            state.push_error(format!("config activation failed: {e}"));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
        }
    }
}

// =============================================================================
// Positions
// =============================================================================

async fn open_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.book.active_positions())
}

async fn closed_positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.book.closed_positions(200))
}

/// Operator-initiated full exit at market.
async fn manual_exit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let Some(position) = state.book.get(&id) else {
        return error_response(StatusCode::NOT_FOUND, "position_not_found");
    };
    if position.status != PositionStatus::Open {
        return error_response(StatusCode::CONFLICT, "position_not_open");
    }

    state.book.begin_full_exit(&id);
    let outcome = state.queue.enqueue(SwapIntent {
        kind: OrderKind::ExitManual,
        position_id: id.clone(),
        token: position.token.clone(),
        amount: position.current_amount,
        scaling_level: None,
        reason: "manual_exit".to_string(),
        mode: position.mode,
        observed_price: position.current_price,
    });
    info!(position = %id, outcome = %outcome, "manual exit requested");
    Json(serde_json::json!({ "status": outcome.to_string() })).into_response()
}

// =============================================================================
// Breaker
// =============================================================================

async fn breaker_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.breaker.snapshot())
}

#[derive(serde::Deserialize, Default)]
struct BreakerActivateRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn breaker_activate(
    State(state): State<Arc<AppState>>,
    body: Option<Json<BreakerActivateRequest>>,
) -> impl IntoResponse {
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "operator".to_string());
    state.breaker.force_activate(&reason);
    Json(state.breaker.snapshot())
}

async fn breaker_deactivate(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.breaker.force_deactivate();
    Json(state.breaker.snapshot())
}

// =============================================================================
// Cache & queue introspection
// =============================================================================

async fn wallet_cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.wallet_cache.stats())
}

async fn token_cache_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.token_cache.stats())
}

async fn queue_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.queue.depth_by_priority())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn signature_round_trip() {
        let secret = "test-secret";
        let body = br#"{"signature":"sig1"}"#;
        let sig = compute_signature(secret, body);
        assert!(verify_signature(secret, body, Some(&sig)));
        assert!(!verify_signature(secret, body, Some("deadbeef")));
        assert!(!verify_signature(secret, body, None));
        assert!(!verify_signature(secret, b"tampered", Some(&sig)));
    }

    #[test]
    fn empty_secret_rejects_everything() {
        let body = b"{}";
        let sig = compute_signature("", body);
        assert!(!verify_signature("", body, Some(&sig)));
    }
}
