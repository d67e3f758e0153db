use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::service::ReviewService;
use crate::errors::ReviewError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub service: ReviewService,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SubmitReviewRequest {
    #[serde(default)]
    pub repo_url: String,
}

#[derive(Deserialize)]
pub struct ListReviewsQuery {
    pub limit: Option<usize>,
}

const DEFAULT_LIST_LIMIT: usize = 20;
const MAX_LIST_LIMIT: usize = 100;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<ReviewError> for ApiError {
    fn from(err: ReviewError) -> Self {
        let message = err.to_string();
        match err {
            ReviewError::InvalidRequest(_) => ApiError::BadRequest(message),
            ReviewError::NotFound { .. } => ApiError::NotFound(message),
            ReviewError::AlreadyStreaming { .. } => ApiError::Conflict(message),
            ReviewError::Misconfigured(_) | ReviewError::Internal(_) => {
                tracing::error!("{}", message);
                ApiError::Internal(message)
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/review", post(submit_review))
        .route("/review/{job_id}", get(stream_review))
        .route("/reviews", get(list_reviews))
        .route("/reviews/{job_id}", get(get_review))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit_review(
    State(state): State<SharedState>,
    Json(req): Json<SubmitReviewRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.service.submit(&req.repo_url)?;
    Ok((StatusCode::CREATED, Json(job)))
}

async fn stream_review(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let stream = state.service.open_stream(&job_id)?;
    tracing::info!(job_id = %job_id, "stream opened");
    Ok(stream.into_sse())
}

async fn list_reviews(
    State(state): State<SharedState>,
    Query(query): Query<ListReviewsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state
        .service
        .db()
        .ok_or_else(|| ApiError::Internal("Review history is not enabled".into()))?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIST_LIMIT)
        .clamp(1, MAX_LIST_LIMIT);
    let reviews = db
        .call(move |db| db.list_reviews(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(reviews))
}

async fn get_review(
    State(state): State<SharedState>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state
        .service
        .db()
        .ok_or_else(|| ApiError::Internal("Review history is not enabled".into()))?;
    let lookup_id = job_id.clone();
    let review = db
        .call(move |db| db.get_review(&lookup_id))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    match review {
        Some(review) => Ok(Json(review)),
        None => Err(ApiError::NotFound(format!("Review {} not found", job_id))),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
