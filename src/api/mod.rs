//! HTTP surface: the operator REST API plus the benchmarker websocket.

pub mod ws;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::dispatch::{DispatchHandle, GroupSummary, WebSocketTransport, WorkerSummary};
use crate::error::{DispatchError, Result};
use crate::scheduler::Job;

pub const DEFAULT_PAGE_SIZE: usize = 15;

#[derive(Clone)]
pub struct ApiState {
    pub handle: DispatchHandle,
    pub transport: WebSocketTransport,
    /// Outbound frames buffered per worker session.
    pub worker_channel_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddJobsRequest {
    pub repository: String,
    pub commit_hashes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AddJobsResponse {
    pub added: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrioritizeRequest {
    pub group_title: String,
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrioritizeResponse {
    pub prioritized: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveGroupResponse {
    pub removed: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<usize>,
    pub size: Option<usize>,
}

/// One page of a longer list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    pub page: usize,
    pub size: usize,
    pub total_elements: usize,
    pub total_pages: usize,
}

impl<T: Clone> Page<T> {
    pub fn of(items: &[T], page: usize, size: usize) -> Self {
        let total_elements = items.len();
        let total_pages = total_elements.div_ceil(size);
        let content = items
            .iter()
            .skip(page.saturating_mul(size))
            .take(size)
            .cloned()
            .collect();
        Self {
            content,
            page,
            size,
            total_elements,
            total_pages,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct QueueResponse {
    pub prioritized: Page<Job>,
    pub jobs: Page<Job>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match &self {
            DispatchError::InvalidAddress | DispatchError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            DispatchError::UnknownWorker(_) => StatusCode::CONFLICT,
            DispatchError::CoordinatorStopped => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Io(_) | DispatchError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/jobs", post(add_jobs_handler))
        .route("/api/queue", get(queue_handler))
        .route("/api/prioritize", post(prioritize_handler))
        .route("/api/groups", get(groups_handler))
        .route("/api/groups/{title}", delete(remove_group_handler))
        .route("/api/workers", get(workers_handler))
        .route("/connect", get(ws::connect_handler))
        .layer(cors)
        .with_state(state)
}

async fn add_jobs_handler(
    State(state): State<ApiState>,
    Json(payload): Json<AddJobsRequest>,
) -> Result<Json<AddJobsResponse>> {
    let added = state
        .handle
        .add_jobs(&payload.repository, payload.commit_hashes)
        .await?;
    Ok(Json(AddJobsResponse { added }))
}

async fn queue_handler(
    State(state): State<ApiState>,
    Query(query): Query<PageQuery>,
) -> Result<Json<QueueResponse>> {
    let page = query.page.unwrap_or(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE);
    if size == 0 {
        return Err(DispatchError::InvalidArgument(
            "page size must be positive".to_string(),
        ));
    }

    let snapshot = state.handle.queue_snapshot().await?;
    Ok(Json(QueueResponse {
        prioritized: Page::of(&snapshot.prioritized, page, size),
        jobs: Page::of(&snapshot.jobs, page, size),
    }))
}

async fn prioritize_handler(
    State(state): State<ApiState>,
    Json(payload): Json<PrioritizeRequest>,
) -> Result<Json<PrioritizeResponse>> {
    let prioritized = state
        .handle
        .prioritize(&payload.group_title, &payload.job_id)
        .await?;
    Ok(Json(PrioritizeResponse { prioritized }))
}

async fn groups_handler(State(state): State<ApiState>) -> Result<Json<Vec<GroupSummary>>> {
    let snapshot = state.handle.queue_snapshot().await?;
    Ok(Json(snapshot.groups))
}

async fn remove_group_handler(
    State(state): State<ApiState>,
    Path(title): Path<String>,
) -> Result<Json<RemoveGroupResponse>> {
    let removed = state.handle.remove_group(&title).await?;
    Ok(Json(RemoveGroupResponse { removed }))
}

async fn workers_handler(State(state): State<ApiState>) -> Result<Json<Vec<WorkerSummary>>> {
    Ok(Json(state.handle.workers().await?))
}
