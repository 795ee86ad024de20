//! HTTP API for bridge views, health checks and statistics

use crate::config::ApiConfig;
use crate::error::{TrackerError, TrackerResult};
use crate::record::{BridgeTransactionRecord, NewBridgeTransaction};
use crate::state::TransactionStore;
use crate::tracker::{BridgeTracker, BridgeView};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<BridgeTracker>,
    pub store: Arc<dyn TransactionStore>,
    /// Coin the exchange step settles into
    pub settle_method: String,
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> TrackerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TrackerError::Internal(format!("api bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| TrackerError::Internal(e.to_string()))?;

    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/stats", get(get_stats))
        .route("/bridges", post(create_bridge))
        .route("/bridges/:hash", get(get_bridge))
        .route("/bridges/:hash/watch", post(open_view).delete(close_view))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - verify the record store
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.health_check().await.is_ok();
    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready: store_ok,
            store: store_ok,
            active_sessions: state.tracker.active_sessions(),
        }),
    )
}

/// Record counts per relay stage
async fn get_stats(State(state): State<AppState>) -> Response {
    match state.store.stage_counts().await {
        Ok(counts) => Json(StatsResponse {
            stages: counts
                .into_iter()
                .map(|(stage, count)| (stage.as_str().to_string(), count))
                .collect(),
            active_sessions: state.tracker.active_sessions(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// Start tracking a bridge operation
async fn create_bridge(
    State(state): State<AppState>,
    Json(request): Json<NewBridgeTransaction>,
) -> Response {
    let record = match request.into_record(&state.settle_method) {
        Ok(record) => record,
        Err(e) => return error_response(e),
    };

    match state.store.create(record.clone()).await {
        Ok(()) => {
            info!("Tracking bridge {} via {}", record.hash, record.method_id);
            (StatusCode::CREATED, Json(record)).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// Stored record plus the last rendered view
async fn get_bridge(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    match state.store.get(&hash).await {
        Ok(Some(record)) => Json(BridgeResponse {
            view: state.tracker.view(&hash),
            polling: state.tracker.is_polling(&hash),
            record,
        })
        .into_response(),
        Ok(None) => error_response(TrackerError::TransactionNotFound { hash }),
        Err(e) => error_response(e),
    }
}

/// Open a progress view; polling runs while it stays open
async fn open_view(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    match state.tracker.watch(&hash).await {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

/// Close a progress view
async fn close_view(State(state): State<AppState>, Path(hash): Path<String>) -> Response {
    if state.tracker.unwatch(&hash) {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(TrackerError::TransactionNotFound { hash })
    }
}

fn error_response(e: TrackerError) -> Response {
    let status = match &e {
        TrackerError::TransactionNotFound { .. } => StatusCode::NOT_FOUND,
        TrackerError::DuplicateTransaction { .. } => StatusCode::CONFLICT,
        TrackerError::InvalidTransaction(_) => StatusCode::BAD_REQUEST,
        _ => {
            warn!("API request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    ready: bool,
    store: bool,
    active_sessions: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    stages: BTreeMap<String, u64>,
    active_sessions: usize,
}

#[derive(Serialize)]
struct BridgeResponse {
    record: BridgeTransactionRecord,
    view: Option<BridgeView>,
    polling: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
