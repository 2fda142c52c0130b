use crate::config::ApiConfig;
use crate::counter::CounterMap;
use crate::ranking;
use crate::tracker::Tracker;
use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<Tracker>,
}

/// Query parameters for ranking endpoints
#[derive(Debug, Deserialize)]
pub struct RankingQuery {
    /// Keep only the first N entries
    pub limit: Option<usize>,
}

/// Ranking in API responses
#[derive(Debug, Serialize)]
pub struct RankingResponse {
    /// Tally the ranking was computed from (current or historical)
    pub source: &'static str,
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<RankingEntryResponse>,
    /// Users registered with a count of zero
    pub non_participants: Vec<i64>,
}

/// One ranked user
#[derive(Debug, Serialize)]
pub struct RankingEntryResponse {
    pub position: usize,
    pub user_id: i64,
    pub count: u64,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl RankingResponse {
    fn build(source: &'static str, counters: &CounterMap, limit: Option<usize>) -> Self {
        let mut ordered = ranking::order(counters);
        if let Some(limit) = limit {
            ordered.truncate(limit);
        }

        Self {
            source,
            generated_at: Utc::now(),
            entries: ordered
                .into_iter()
                .enumerate()
                .map(|(index, (user, count))| RankingEntryResponse {
                    position: index + 1,
                    user_id: user.get(),
                    count,
                })
                .collect(),
            non_participants: ranking::non_participants(counters)
                .into_iter()
                .map(|user| user.get())
                .collect(),
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/ranking/current", get(current_ranking))
        .route("/api/v1/ranking/historical", get(historical_ranking))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "tally-ranking"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    // The participation record must be readable
    match state.tracker.store().load() {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "store": "ok"
            })),
        ),
        Err(e) => {
            error!(error = %e, "Participation record check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "store": e.to_string()
                })),
            )
        }
    }
}

/// Ranking of the round in progress
async fn current_ranking(
    State(state): State<AppState>,
    Query(query): Query<RankingQuery>,
) -> Json<RankingResponse> {
    let counters = state.tracker.transient_snapshot();
    Json(RankingResponse::build("current", &counters, query.limit))
}

/// Ranking of the merged history
async fn historical_ranking(
    State(state): State<AppState>,
    Query(query): Query<RankingQuery>,
) -> Result<Json<RankingResponse>, (StatusCode, Json<ErrorResponse>)> {
    let counters = state.tracker.durable_snapshot().map_err(|e| {
        error!(error = %e, "Failed to read ranking history");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
                code: "STORAGE_ERROR".to_string(),
            }),
        )
    })?;

    Ok(Json(RankingResponse::build(
        "historical",
        &counters,
        query.limit,
    )))
}

/// Serve the ranking API until `cancel` fires
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting ranking API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}
