use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A job whose retry budget ran out, recorded once per `(queue_name, job_id)`.
///
/// Uniqueness is enforced by `uq_dead_letter_item_queue_job`, created in
/// [`crate::database::ensure_indexes`].
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_item")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub queue_name: String,

    pub job_id: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub payload: serde_json::Value,

    /// `attempts_made` of the job when it was promoted.
    pub attempts: i32,

    #[sea_orm(column_type = "Text")]
    pub last_error: String,

    /// Error code, original options, retry history and promotion/requeue audit.
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,

    #[sea_orm(indexed)]
    pub failed_at: DateTimeUtc,

    #[sea_orm(default_value = false, indexed)]
    pub requeued: bool,

    pub requeued_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}
