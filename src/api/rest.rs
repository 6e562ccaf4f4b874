// =============================================================================
// REST API Endpoints — Axum 0.8
// =============================================================================
//
// All endpoints live under `/api/v1/`.  Reads are public; anything that
// changes the desired state or the indicator periods requires a Bearer token
// via the `AuthBearer` extractor.  Configuration input that fails validation
// is answered with 400 and changes nothing.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::{AppState, WatchUpdate};
use crate::error::ConfigError;
use crate::runtime_config::IndicatorParams;
use crate::types::{Instrument, KlineInterval};

// =============================================================================
// Router construction
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Reads are public; writes carry AuthBearer ───────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/market", get(market))
        .route("/api/v1/market/{instrument}", get(market_instrument))
        .route("/api/v1/universe", get(universe))
        .route("/api/v1/watch", get(get_watch).post(set_watch))
        .route("/api/v1/config/indicators", get(get_indicators).post(set_indicators))
        .route("/api/v1/watch/reset-top", post(reset_top))
        // ── WebSocket (token in query string) ───────────────────────
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

/// 400 response for rejected configuration input.
struct BadRequest(ConfigError);

impl IntoResponse for BadRequest {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "error": self.0.to_string() });
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

impl From<ConfigError> for BadRequest {
    fn from(e: ConfigError) -> Self {
        Self(e)
    }
}

// =============================================================================
// Health & market data (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

async fn market(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_market_snapshot())
}

async fn market_instrument(
    State(state): State<Arc<AppState>>,
    Path(instrument): Path<String>,
) -> Response {
    let instrument = Instrument::new(instrument);
    let known = state.subscriptions.desired().is_watched(&instrument)
        || state.live_prices.get(&instrument).is_some()
        || state.snapshots.get(&instrument).is_some();

    if !known {
        let body = serde_json::json!({ "error": format!("unknown instrument {instrument}") });
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    }
    Json(state.market_row(&instrument)).into_response()
}

#[derive(Deserialize)]
struct UniverseQuery {
    #[serde(default)]
    search: Option<String>,
}

#[derive(Serialize)]
struct UniverseResponse {
    loaded: bool,
    count: usize,
    instruments: Vec<Instrument>,
}

async fn universe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UniverseQuery>,
) -> impl IntoResponse {
    let instruments = match query.search.as_deref() {
        Some(q) => state.universe.search(q),
        None => state.universe.all(),
    };
    Json(UniverseResponse {
        loaded: state.universe.is_loaded(),
        count: instruments.len(),
        instruments,
    })
}

// =============================================================================
// Watched set
// =============================================================================

#[derive(Serialize)]
struct WatchResponse {
    instruments: Vec<Instrument>,
    interval: KlineInterval,
    intervals: [KlineInterval; 10],
}

fn watch_response(state: &AppState) -> WatchResponse {
    let desired = state.subscriptions.desired();
    WatchResponse {
        instruments: desired.instruments.into_iter().collect(),
        interval: desired.interval,
        intervals: KlineInterval::ALL,
    }
}

async fn get_watch(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(watch_response(&state))
}

async fn set_watch(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(update): Json<WatchUpdate>,
) -> Result<impl IntoResponse, BadRequest> {
    state.update_watch(update)?;
    Ok(Json(watch_response(&state)))
}

/// `?count=` overrides the configured default.
#[derive(Deserialize)]
struct ResetTopRequest {
    #[serde(default)]
    count: Option<usize>,
}

async fn reset_top(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Query(req): Query<ResetTopRequest>,
) -> Result<impl IntoResponse, BadRequest> {
    if req.count == Some(0) {
        return Err(BadRequest(ConfigError::ZeroValue { name: "count" }));
    }
    if !state.universe.is_loaded() {
        info!("reset to top requested before the universe loaded");
    }
    state.reset_to_top(req.count);
    Ok(Json(watch_response(&state)))
}

// =============================================================================
// Indicator periods
// =============================================================================

async fn get_indicators(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(*state.indicator_params.read())
}

async fn set_indicators(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(params): Json<IndicatorParams>,
) -> Result<impl IntoResponse, BadRequest> {
    let applied = state.update_indicator_params(params)?;
    Ok(Json(applied))
}
