//! Axum REST API handlers

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::error::Error;
use crate::service::QualityService;

use super::dto::*;

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Application state shared across handlers
pub struct AppState {
    pub service: Arc<QualityService>,
    pub start_time: Instant,
}

/// Create the REST API router
pub fn create_rest_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(live_handler))
        .route("/v1/models", get(list_models_handler))
        // `:predict` is part of the last segment, so both share one route
        .route("/v1/models/:model", get(model_status_handler).post(predict_handler))
        .route("/metrics", get(metrics_handler))
        .layer(DefaultBodyLimit::max(50 * 1024 * 1024)) // 50MB limit for inline images
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn live_handler() -> Json<LiveResponse> {
    Json(LiveResponse {
        status: "alive".to_string(),
    })
}

async fn list_models_handler(State(state): State<Arc<AppState>>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        models: vec![state.service.model_name().to_string()],
    })
}

async fn model_status_handler(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
) -> Result<Json<ModelStatusResponse>, ApiError> {
    check_model(&state, &model)?;
    let health = state.service.health().await;

    Ok(Json(ModelStatusResponse {
        name: health.model,
        ready: health.ready,
    }))
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
    body: Bytes,
) -> Result<Json<MultiResponse>, ApiError> {
    let model = target.strip_suffix(":predict").ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                &format!("unknown verb in '{}', expected '<model>:predict'", target),
                "NOT_FOUND",
            )),
        )
    })?;
    check_model(&state, model)?;

    let request: RequestEnvelope = serde_json::from_slice(&body).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&format!("malformed request body: {}", e), "INVALID_INPUT")),
        )
    })?;

    let response = state.service.handle(&request).await.map_err(error_response)?;
    Ok(Json(response))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<MetricsResponse> {
    let health = state.service.health().await;

    Json(MetricsResponse {
        uptime_seconds: state.start_time.elapsed().as_secs(),
        predictor: health.predictor,
        predictor_ready: health.ready,
        reconnects: health.reconnects,
        late_arrivals: health.late_arrivals,
    })
}

fn check_model(state: &AppState, model: &str) -> Result<(), ApiError> {
    if model == state.service.model_name() {
        return Ok(());
    }
    Err((
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new(&format!("model '{}' not found", model), "MODEL_NOT_FOUND")),
    ))
}

fn error_response(e: Error) -> ApiError {
    let (status, code) = match &e {
        Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        Error::ImageLoad { .. } => (StatusCode::BAD_REQUEST, "IMAGE_LOAD_FAILED"),
        Error::ServerUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "SERVER_UNAVAILABLE"),
        Error::Transport(_) | Error::Config(_) | Error::Internal(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "PREDICTION_FAILED")
        }
    };

    if status.is_server_error() {
        error!("Prediction failed: {}", e);
    } else {
        warn!("Rejected request: {}", e);
    }

    (status, Json(ErrorResponse::new(&e.to_string(), code)))
}
