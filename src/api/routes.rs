use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::cache::TtlCache;
use crate::chain::abi;
use crate::errors::{ErrorCategory, ErrorReport};
use crate::models::{PoolPositions, PoolSummary};
use crate::pools::{PoolRegistry, TokenMetadataStore};
use crate::positions::{ClaimReport, PositionReconciler};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<PositionReconciler>,
    pub pools: Arc<PoolRegistry>,
    pub tokens: Arc<TokenMetadataStore>,
    /// Per-user snapshot of all pools, keyed by lowercase address
    pub positions_cache: Arc<TtlCache<String, Vec<PoolPositions>>>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/pools", get(get_pools))
        .route("/api/positions/:user", get(get_positions))
        .route("/api/positions/:user/:pool_id", get(get_pool_positions))
        .route("/api/claims/:user/:pool_id", get(get_claim_report))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ===== Route Handlers =====

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn get_pools(State(state): State<AppState>) -> Json<PoolsResponse> {
    let mut pools = Vec::with_capacity(state.pools.len());
    for pool in state.pools.all() {
        pools.push(state.tokens.summarize(pool).await);
    }
    Json(PoolsResponse {
        count: pools.len(),
        pools,
    })
}

/// Positions across every configured pool, served from the TTL cache
/// unless `refresh=true`.
async fn get_positions(
    State(state): State<AppState>,
    Path(user): Path<String>,
    Query(params): Query<PositionsQuery>,
) -> Result<Json<PositionsResponse>, ApiError> {
    let user = parse_user(&user)?;

    if params.refresh.unwrap_or(false) {
        state.positions_cache.invalidate(&user);
    }

    let reconciler = state.reconciler.clone();
    let pools = state.pools.clone();
    let results = state
        .positions_cache
        .get_or_try_insert_with(user.clone(), || async {
            reconciler.fetch_all_positions(&user, pools.all()).await
        })
        .await?;

    Ok(Json(PositionsResponse::new(
        user.clone(),
        results,
        params.active_only.unwrap_or(true),
    )))
}

async fn get_pool_positions(
    State(state): State<AppState>,
    Path((user, pool_id)): Path<(String, String)>,
    Query(params): Query<PositionsQuery>,
) -> Result<Json<PositionsResponse>, ApiError> {
    let user = parse_user(&user)?;
    let pool = state
        .pools
        .get(&pool_id)
        .ok_or_else(|| ApiError::NotFound(format!("Pool {} not configured", pool_id)))?;

    let result = state.reconciler.fetch_positions(&user, pool).await?;

    Ok(Json(PositionsResponse::new(
        user.clone(),
        vec![result],
        params.active_only.unwrap_or(true),
    )))
}

async fn get_claim_report(
    State(state): State<AppState>,
    Path((user, pool_id)): Path<(String, String)>,
) -> Result<Json<ClaimReport>, ApiError> {
    let user = parse_user(&user)?;
    let pool = state
        .pools
        .get(&pool_id)
        .ok_or_else(|| ApiError::NotFound(format!("Pool {} not configured", pool_id)))?;

    Ok(Json(state.reconciler.claim_report(&user, pool).await?))
}

fn parse_user(raw: &str) -> Result<String, ApiError> {
    if abi::is_address(raw) {
        Ok(raw.to_lowercase())
    } else {
        Err(ApiError::BadRequest(format!("'{}' is not an address", raw)))
    }
}

// ===== Request/Response Types =====

#[derive(Deserialize)]
struct PositionsQuery {
    /// Only positions with shares or something to claim (default true)
    active_only: Option<bool>,
    /// Bypass the snapshot cache
    refresh: Option<bool>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
struct PoolsResponse {
    count: usize,
    pools: Vec<PoolSummary>,
}

#[derive(Serialize)]
struct PositionsResponse {
    user: String,
    count: usize,
    claimable: usize,
    pools: Vec<PoolPositions>,
}

impl PositionsResponse {
    fn new(user: String, mut pools: Vec<PoolPositions>, active_only: bool) -> Self {
        if active_only {
            for p in &mut pools {
                p.positions.retain(|pos| pos.is_active);
            }
        }
        let count = pools.iter().map(|p| p.positions.len()).sum();
        let claimable = pools
            .iter()
            .flat_map(|p| p.positions.iter())
            .filter(|pos| pos.is_claimable)
            .count();
        Self {
            user,
            count,
            claimable,
            pools,
        }
    }
}

// ===== Error Handling =====

#[derive(Debug)]
enum ApiError {
    Upstream(anyhow::Error),
    NotFound(String),
    BadRequest(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Upstream(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, category) = match &self {
            ApiError::Upstream(err) => {
                let report = ErrorReport::from_error(err);
                tracing::error!(category = report.category.as_str(), "Upstream error: {:#}", err);
                (StatusCode::BAD_GATEWAY, report.message, report.category)
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), ErrorCategory::Other),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), ErrorCategory::Other),
        };

        let body = Json(json!({
            "error": message,
            "category": category,
        }));

        (status, body).into_response()
    }
}
