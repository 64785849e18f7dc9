use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use firewatch::fetch_log::MAX_RECORDS;
use firewatch::{AggregateResult, FeedFetcher, FetchLogRecord, ForecastService, Region};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

const DEFAULT_LOG_LIMIT: usize = 50;

pub struct AppState<F: FeedFetcher> {
    pub service: ForecastService<F>,
    pub admin_token: Option<String>,
}

impl<F: FeedFetcher> AppState<F> {
    pub fn new(service: ForecastService<F>) -> Self {
        let admin_token = service.config().server.admin_token.clone();
        Self {
            service,
            admin_token,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ForecastQuery {
    #[serde(default)]
    pub region_ids: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub region_ids: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub success: bool,
    pub payload: AggregateResult,
}

#[derive(Debug, Serialize)]
pub struct ClearResponse {
    pub success: bool,
    pub cleared: usize,
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<usize>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "success": false, "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

pub fn router<F: FeedFetcher + 'static>(state: Arc<AppState<F>>) -> Router {
    Router::new()
        .route("/forecast", get(forecast::<F>))
        .route("/refresh", post(refresh::<F>))
        .route("/regions", get(regions::<F>))
        .route("/admin/cache/clear", post(clear_cache::<F>))
        .route("/admin/logs/clear", post(clear_logs::<F>))
        .route("/admin/logs", get(recent_logs::<F>))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn forecast<F: FeedFetcher>(
    State(state): State<Arc<AppState<F>>>,
    Query(query): Query<ForecastQuery>,
) -> Json<AggregateResult> {
    Json(state.service.forecast(&query.region_ids).await)
}

/// A POST with no JSON body refreshes the default region.
async fn refresh<F: FeedFetcher>(
    State(state): State<Arc<AppState<F>>>,
    body: Option<Json<RefreshRequest>>,
) -> Json<RefreshResponse> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let payload = state.service.refresh(&request.region_ids).await;
    Json(RefreshResponse {
        success: !payload.is_unavailable(),
        payload,
    })
}

async fn regions<F: FeedFetcher>(State(state): State<Arc<AppState<F>>>) -> Json<Vec<Region>> {
    Json(state.service.registry().regions().to_vec())
}

async fn clear_cache<F: FeedFetcher>(
    State(state): State<Arc<AppState<F>>>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>, ApiError> {
    authorize(&headers, state.admin_token.as_deref())?;
    let cleared = state.service.clear_cache();
    log::info!("Operator cleared {cleared} cache entries");
    Ok(Json(ClearResponse {
        success: true,
        cleared,
    }))
}

async fn clear_logs<F: FeedFetcher>(
    State(state): State<Arc<AppState<F>>>,
    headers: HeaderMap,
) -> Result<Json<ClearResponse>, ApiError> {
    authorize(&headers, state.admin_token.as_deref())?;
    let cleared = state.service.clear_log();
    log::info!("Operator cleared {cleared} fetch log records");
    Ok(Json(ClearResponse {
        success: true,
        cleared,
    }))
}

async fn recent_logs<F: FeedFetcher>(
    State(state): State<Arc<AppState<F>>>,
    headers: HeaderMap,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<FetchLogRecord>>, ApiError> {
    authorize(&headers, state.admin_token.as_deref())?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).min(MAX_RECORDS);
    Ok(Json(state.service.recent_log(limit)))
}

/// Operator actions need `Authorization: Bearer <admin_token>`. With no token
/// configured they are always refused.
pub fn authorize(headers: &HeaderMap, admin_token: Option<&str>) -> Result<(), ApiError> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };

    let presented = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);

    match (admin_token, presented) {
        (Some(expected), Some(presented)) if expected == presented => Ok(()),
        (None, _) => {
            log::warn!("Operator action refused, no admin token configured");
            Err(ApiError::new(StatusCode::FORBIDDEN, "operator actions are disabled"))
        }
        _ => {
            log::warn!("Operator action refused, bad bearer token");
            Err(ApiError::new(StatusCode::FORBIDDEN, "invalid bearer token"))
        }
    }
}

/// Refreshes the default region every `interval` until `ct` is cancelled.
/// The first refresh runs immediately so the cache starts warm.
pub async fn run_scheduler<F: FeedFetcher>(
    state: Arc<AppState<F>>,
    interval: Duration,
    ct: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    log::info!("Scheduled refresh every {}s", interval.as_secs());

    loop {
        tokio::select! {
            _ = ct.cancelled() => break,
            _ = ticker.tick() => {
                let result = state.service.refresh("").await;
                log::info!(
                    "Scheduled refresh done, {}/{} regions live",
                    result.usable_count(),
                    result.regions.len()
                );
            }
        }
    }

    log::info!("Scheduler stopped");
}
