use axum::{Json, extract::State};
use chrono::Utc;
use common::EnqueueOptions;
use sea_orm::TransactionTrait;
use tracing::{info, instrument, warn};

use crate::dlq::{DlqService, RequeueMark, dlq_service};
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AdminCaller;
use crate::extractors::path::AppPath;
use crate::extractors::query::AppQuery;
use crate::models::dlq::*;
use crate::models::shared::{Pagination, page_window};
use crate::state::AppState;

/// List dead letter items.
#[utoipa::path(
    get,
    path = "/dlq",
    tag = "Dead Letter Queue",
    operation_id = "listDlqItems",
    summary = "List dead letter items",
    description = "Returns dead letter items, newest failure first. `limit` defaults to 50 and is capped at 100.",
    params(ListDlqParams),
    responses(
        (status = 200, description = "Page of DLQ items", body = DlqListResponse),
        (status = 400, description = "Invalid query (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 503, description = "Store unavailable (SERVICE_UNAVAILABLE)", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _caller))]
pub async fn list_dlq_items(
    _caller: AdminCaller,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<ListDlqParams>,
) -> Result<Json<DlqListResponse>, AppError> {
    let (limit, offset) = page_window(params.limit, params.offset)?;

    let dlq = dlq_service(&state.db);
    let (items, total) = dlq
        .list(params.queue_name.as_deref(), params.requeued, limit, offset)
        .await?;

    Ok(Json(DlqListResponse {
        success: true,
        data: items.into_iter().map(Into::into).collect(),
        pagination: Pagination {
            limit,
            offset,
            total,
        },
    }))
}

/// Get DLQ statistics.
#[utoipa::path(
    get,
    path = "/dlq/stats",
    tag = "Dead Letter Queue",
    operation_id = "getDlqStats",
    summary = "Get DLQ statistics",
    description = "Row counts from the durable store plus the metric values of this process.",
    responses(
        (status = 200, description = "DLQ statistics", body = DlqStatsResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 503, description = "Store unavailable (SERVICE_UNAVAILABLE)", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _caller))]
pub async fn get_dlq_stats(
    _caller: AdminCaller,
    State(state): State<AppState>,
) -> Result<Json<DlqStatsResponse>, AppError> {
    let stats = dlq_service(&state.db).stats().await?;
    Ok(Json(DlqStatsResponse::new(stats, state.metrics.snapshot())))
}

/// Get a single dead letter item.
#[utoipa::path(
    get,
    path = "/dlq/{id}",
    tag = "Dead Letter Queue",
    operation_id = "getDlqItem",
    summary = "Get DLQ item details",
    description = "Returns one dead letter item including payload and retry history.",
    params(("id" = i32, Path, description = "DLQ item ID")),
    responses(
        (status = 200, description = "DLQ item", body = DlqItemResponse),
        (status = 400, description = "Invalid item ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Item not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, _caller), fields(id))]
pub async fn get_dlq_item(
    _caller: AdminCaller,
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> Result<Json<DlqItemResponse>, AppError> {
    let item = dlq_service(&state.db)
        .get_by_id(id)
        .await?
        .ok_or_else(not_found)?;

    Ok(Json(DlqItemResponse {
        success: true,
        data: item.into(),
    }))
}

/// Requeue a dead letter item as a new job.
#[utoipa::path(
    post,
    path = "/dlq/{id}/requeue",
    tag = "Dead Letter Queue",
    operation_id = "requeueDlqItem",
    summary = "Requeue a DLQ item",
    description = "Enqueues the stored payload as a new job with the configured retry budget and marks the item requeued. An item can be requeued once.",
    params(("id" = i32, Path, description = "DLQ item ID")),
    responses(
        (status = 200, description = "Item requeued", body = RequeueResponse),
        (status = 400, description = "Invalid item ID (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Item not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Item already requeued (CONFLICT)", body = ErrorBody),
        (status = 503, description = "Store unavailable (SERVICE_UNAVAILABLE)", body = ErrorBody),
    ),
    security(("bearer" = [])),
)]
#[instrument(skip(state, caller), fields(id, admin = %caller.identity))]
pub async fn requeue_dlq_item(
    caller: AdminCaller,
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> Result<Json<RequeueResponse>, AppError> {
    let txn = state.db.begin().await?;

    let dlq = DlqService::new(&txn);
    let item = dlq.get_by_id_for_update(id).await?.ok_or_else(not_found)?;

    if item.requeued {
        return Err(already_requeued());
    }

    // Fresh attempt budget: the new job uses the configured defaults.
    let job_id = state
        .queue
        .enqueue_in(
            &txn,
            &item.queue_name,
            item.payload.clone(),
            EnqueueOptions::default(),
        )
        .await?;

    match dlq.mark_requeued(id, Utc::now(), Some(&job_id)).await? {
        RequeueMark::Marked(_) => {}
        RequeueMark::AlreadyRequeued => return Err(already_requeued()),
        RequeueMark::NotFound => return Err(not_found()),
    }

    txn.commit().await?;
    state.queue.notify_enqueued();

    info!(
        queue = %item.queue_name,
        original_job_id = %item.job_id,
        job_id = %job_id,
        "DLQ item requeued"
    );

    match dlq_service(&state.db).count_pending(None).await {
        Ok(pending) => state.metrics.set_pending_size(pending),
        Err(e) => warn!(error = %e, "Failed to refresh DLQ pending gauge"),
    }

    Ok(Json(RequeueResponse {
        success: true,
        message: "Requeued".into(),
        job_id,
    }))
}

fn not_found() -> AppError {
    AppError::NotFound("Not found".into())
}

fn already_requeued() -> AppError {
    AppError::Conflict("Already requeued".into())
}
