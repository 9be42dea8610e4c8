use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dlq::DlqStats;
use crate::entity::dead_letter_item;
use crate::metrics::MetricsSnapshot;

use super::shared::Pagination;

/// Query parameters for listing dead letter items.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListDlqParams {
    /// Only items from this queue.
    #[param(example = "emails")]
    pub queue_name: Option<String>,
    /// Filter by requeued flag.
    #[param(example = false)]
    pub requeued: Option<bool>,
    /// Page size (1-100, default 50). Larger values are capped at 100.
    #[param(example = 50)]
    pub limit: Option<i64>,
    /// Items to skip (>= 0, default 0).
    #[param(example = 0)]
    pub offset: Option<i64>,
}

/// A job that exhausted its retry budget.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeadLetterItemResponse {
    #[schema(example = 1)]
    pub id: i32,
    #[schema(example = "emails")]
    pub queue_name: String,
    #[schema(example = "01926f3a-7c1e-7d2b-9a41-3f5c8e2b6d10")]
    pub job_id: String,
    /// Payload as originally enqueued.
    pub payload: serde_json::Value,
    /// Attempts made before promotion.
    #[schema(example = 5)]
    pub attempts: i32,
    #[schema(example = "SMTP connection refused")]
    pub last_error: String,
    /// Error code, original options, retry history and requeue audit.
    pub metadata: serde_json::Value,
    #[schema(example = "2025-09-01T08:00:00Z")]
    pub failed_at: DateTime<Utc>,
    #[schema(example = false)]
    pub requeued: bool,
    pub requeued_at: Option<DateTime<Utc>>,
}

impl From<dead_letter_item::Model> for DeadLetterItemResponse {
    fn from(m: dead_letter_item::Model) -> Self {
        Self {
            id: m.id,
            queue_name: m.queue_name,
            job_id: m.job_id,
            payload: m.payload,
            attempts: m.attempts,
            last_error: m.last_error,
            metadata: m.metadata,
            failed_at: m.failed_at,
            requeued: m.requeued,
            requeued_at: m.requeued_at,
        }
    }
}

/// Page of dead letter items, newest failure first.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DlqListResponse {
    #[schema(example = true)]
    pub success: bool,
    pub data: Vec<DeadLetterItemResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DlqItemResponse {
    #[schema(example = true)]
    pub success: bool,
    pub data: DeadLetterItemResponse,
}

/// Current metric values as seen by this process.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DlqMetricsResponse {
    /// Items ever promoted (requeued rows included).
    #[schema(example = 12)]
    pub dlq_size: u64,
    /// Items not yet requeued.
    #[schema(example = 4)]
    pub dlq_pending_size: u64,
    /// Fresh promotions counted since this process started.
    #[schema(example = 3)]
    pub dlq_add_total: u64,
}

impl From<MetricsSnapshot> for DlqMetricsResponse {
    fn from(s: MetricsSnapshot) -> Self {
        Self {
            dlq_size: s.dlq_size,
            dlq_pending_size: s.dlq_pending_size,
            dlq_add_total: s.dlq_add_total,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DlqStatsData {
    #[schema(example = 12)]
    pub total: u64,
    #[schema(example = 4)]
    pub pending: u64,
    #[schema(example = 8)]
    pub requeued: u64,
    /// Item count per queue.
    pub by_queue: BTreeMap<String, u64>,
    pub metrics: DlqMetricsResponse,
}

/// DLQ statistics.
#[derive(Serialize, utoipa::ToSchema)]
pub struct DlqStatsResponse {
    #[schema(example = true)]
    pub success: bool,
    pub data: DlqStatsData,
}

impl DlqStatsResponse {
    pub fn new(stats: DlqStats, metrics: MetricsSnapshot) -> Self {
        Self {
            success: true,
            data: DlqStatsData {
                total: stats.total,
                pending: stats.pending,
                requeued: stats.requeued,
                by_queue: stats.by_queue,
                metrics: metrics.into(),
            },
        }
    }
}

/// Response for the requeue action.
#[derive(Serialize, utoipa::ToSchema)]
pub struct RequeueResponse {
    #[schema(example = true)]
    pub success: bool,
    #[schema(example = "Requeued")]
    pub message: String,
    /// Id of the freshly enqueued job.
    #[schema(example = "01926f3b-0a4d-7e11-8c2f-6b1d9e4a7f32")]
    pub job_id: String,
}
