//! Administrative HTTP surface
//!
//! Thin axum handlers over [`AdminControl`]. Every response body is JSON;
//! failures carry `{"error": "..."}` with a status derived from the error.

use super::{AdminControl, CrawlRequest};
use crate::storage::StorageError;
use crate::CrawlError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

type AppState = Arc<AdminControl>;

/// Error response wrapper
pub struct ApiError(CrawlError);

impl From<CrawlError> for ApiError {
    fn from(e: CrawlError) -> Self {
        Self(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CrawlError::AlreadyActive(_) => StatusCode::CONFLICT,
            CrawlError::JobNotFound(_) | CrawlError::TitleResolution(_) => StatusCode::NOT_FOUND,
            CrawlError::Storage(StorageError::PageNotFound(_))
            | CrawlError::Storage(StorageError::JobNotFound(_)) => StatusCode::NOT_FOUND,
            CrawlError::Storage(StorageError::AlreadyActive(_))
            | CrawlError::Storage(StorageError::InvalidTransition { .. }) => StatusCode::CONFLICT,
            CrawlError::Network { .. } | CrawlError::HttpStatus { .. } | CrawlError::Json(_) => {
                StatusCode::BAD_GATEWAY
            }
            CrawlError::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::debug!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Builds the admin router
pub fn router(admin: Arc<AdminControl>) -> Router {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/jobs", get(list_jobs))
        .route("/jobs/:page_id/cancel", post(cancel_job))
        .route("/kill-all-running", post(kill_all_running))
        .route("/stop-crawler", post(stop_crawler))
        .route("/start-crawler", post(start_crawler))
        .route("/crawler-status", get(crawler_status))
        .route("/delete-all-data", post(delete_all_data))
        .route("/estimate-blast-radius", get(estimate_blast_radius))
        .route("/graph/ego", get(ego_graph))
        .route("/graph/all", get(top_graph))
        .layer(TraceLayer::new_for_http())
        .with_state(admin)
}

async fn enqueue(State(admin): State<AppState>, Json(request): Json<CrawlRequest>) -> ApiResult<Value> {
    let enqueued = admin.enqueue(request).await?;
    Ok(Json(json!({
        "page": enqueued.page,
        "job": enqueued.job,
    })))
}

#[derive(Debug, Deserialize)]
struct JobsQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn list_jobs(State(admin): State<AppState>, Query(query): Query<JobsQuery>) -> ApiResult<Value> {
    let page = admin.list_jobs(query.limit, query.offset)?;
    Ok(Json(json!(page)))
}

async fn cancel_job(State(admin): State<AppState>, Path(page_id): Path<i64>) -> ApiResult<Value> {
    let previous = admin.cancel_job(page_id)?;
    Ok(Json(json!({
        "page_id": page_id,
        "previous_status": previous,
        "status": "paused",
    })))
}

async fn kill_all_running(State(admin): State<AppState>) -> ApiResult<Value> {
    let paused = admin.kill_all_running()?;
    Ok(Json(json!({ "paused": paused })))
}

async fn stop_crawler(State(admin): State<AppState>) -> ApiResult<Value> {
    Ok(Json(json!(admin.stop_crawler()?)))
}

async fn start_crawler(State(admin): State<AppState>) -> ApiResult<Value> {
    Ok(Json(json!(admin.start_crawler()?)))
}

async fn crawler_status(State(admin): State<AppState>) -> ApiResult<Value> {
    Ok(Json(json!(admin.crawler_status()?)))
}

async fn delete_all_data(State(admin): State<AppState>) -> ApiResult<Value> {
    admin.purge_all()?;
    Ok(Json(json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct EstimateQuery {
    title: String,
}

async fn estimate_blast_radius(
    State(admin): State<AppState>,
    Query(query): Query<EstimateQuery>,
) -> ApiResult<Value> {
    let estimate = admin.estimate(&query.title).await?;
    Ok(Json(json!(estimate)))
}

#[derive(Debug, Deserialize)]
struct EgoQuery {
    page_id: i64,
    limit_neighbors: Option<usize>,
}

async fn ego_graph(State(admin): State<AppState>, Query(query): Query<EgoQuery>) -> ApiResult<Value> {
    match admin.ego_graph(query.page_id, query.limit_neighbors)? {
        Some(graph) => Ok(Json(json!(graph))),
        None => Err(CrawlError::Storage(StorageError::PageNotFound(query.page_id)).into()),
    }
}

#[derive(Debug, Deserialize)]
struct TopGraphQuery {
    limit: Option<usize>,
}

async fn top_graph(State(admin): State<AppState>, Query(query): Query<TopGraphQuery>) -> ApiResult<Value> {
    Ok(Json(json!(admin.top_graph(query.limit)?)))
}
