use chrono::{DateTime, Utc};
use common::{JobStatus, ResolvedOptions};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, sea_query::Expr,
};

use crate::entity::job;

/// Fields needed to create a job row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_id: String,
    pub queue_name: String,
    pub payload: serde_json::Value,
    pub options: ResolvedOptions,
}

/// Row-level operations on the `job` table.
///
/// Every state transition is a conditional `UPDATE` guarded on the state the
/// caller observed, so concurrent workers (in this process or another) can
/// never both win the same transition.
pub struct JobStore<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> JobStore<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, new: NewJob) -> Result<job::Model, DbErr> {
        let now = Utc::now();
        let backoff = serde_json::to_value(&new.options.backoff)
            .map_err(|e| DbErr::Custom(format!("Failed to encode backoff policy: {e}")))?;

        let model = job::ActiveModel {
            job_id: Set(new.job_id),
            queue_name: Set(new.queue_name),
            payload: Set(new.payload),
            status: Set(JobStatus::Waiting.to_string()),
            attempts_made: Set(0),
            max_attempts: Set(i32::try_from(new.options.max_attempts).unwrap_or(i32::MAX)),
            backoff: Set(backoff),
            last_error: Set(None),
            retry_history: Set(serde_json::json!([])),
            run_at: Set(now),
            claimed_at: Set(None),
            claimed_by: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            finished_at: Set(None),
            ..Default::default()
        };

        model.insert(self.conn).await
    }

    pub async fn find(&self, job_id: &str) -> Result<Option<job::Model>, DbErr> {
        job::Entity::find()
            .filter(job::Column::JobId.eq(job_id))
            .one(self.conn)
            .await
    }

    /// Oldest waiting job whose scheduled time has passed.
    pub async fn next_ready(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<job::Model>, DbErr> {
        job::Entity::find()
            .filter(job::Column::QueueName.eq(queue_name))
            .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
            .filter(job::Column::RunAt.lte(now))
            .order_by_asc(job::Column::RunAt)
            .order_by_asc(job::Column::Id)
            .one(self.conn)
            .await
    }

    /// Move `candidate` from `waiting` to `active`, counting one attempt.
    ///
    /// Returns `false` when another worker claimed it first.
    pub async fn claim(
        &self,
        candidate: &job::Model,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Active.as_str()),
            )
            .col_expr(
                job::Column::AttemptsMade,
                Expr::value(candidate.attempts_made + 1),
            )
            .col_expr(job::Column::ClaimedAt, Expr::value(Some(now)))
            .col_expr(job::Column::ClaimedBy, Expr::value(Some(worker_id.to_string())))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(candidate.id))
            .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
            .filter(job::Column::AttemptsMade.eq(candidate.attempts_made))
            .filter(job::Column::AttemptsMade.lt(candidate.max_attempts))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    pub async fn mark_completed(
        &self,
        job_id: &str,
        attempt: i32,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Completed.as_str()),
            )
            .col_expr(job::Column::FinishedAt, Expr::value(Some(now)))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::JobId.eq(job_id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .filter(job::Column::AttemptsMade.eq(attempt))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Put an active job back to `waiting`, runnable from `run_at`.
    pub async fn reschedule(
        &self,
        job: &job::Model,
        run_at: DateTime<Utc>,
        error: &str,
        retry_history: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Waiting.as_str()),
            )
            .col_expr(job::Column::RunAt, Expr::value(run_at))
            .col_expr(job::Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(job::Column::RetryHistory, Expr::value(retry_history))
            .col_expr(job::Column::ClaimedAt, Expr::value(None::<DateTime<Utc>>))
            .col_expr(job::Column::ClaimedBy, Expr::value(None::<String>))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(job.id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .filter(job::Column::AttemptsMade.eq(job.attempts_made))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Terminal failure within the queue; the job now waits for promotion.
    pub async fn mark_failed(
        &self,
        job: &job::Model,
        error: &str,
        retry_history: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<bool, DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Failed.as_str()),
            )
            .col_expr(job::Column::LastError, Expr::value(Some(error.to_string())))
            .col_expr(job::Column::RetryHistory, Expr::value(retry_history))
            .col_expr(job::Column::FinishedAt, Expr::value(Some(now)))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(job.id))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .filter(job::Column::AttemptsMade.eq(job.attempts_made))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Fail a waiting job that has no attempts left without running it.
    pub async fn park_exhausted(&self, job: &job::Model, now: DateTime<Utc>) -> Result<bool, DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Failed.as_str()),
            )
            .col_expr(job::Column::FinishedAt, Expr::value(Some(now)))
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::Id.eq(job.id))
            .filter(job::Column::Status.eq(JobStatus::Waiting.as_str()))
            .filter(job::Column::AttemptsMade.eq(job.attempts_made))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Archive a job that is not currently executing.
    pub async fn archive(&self, job_id: &str, now: DateTime<Utc>) -> Result<bool, DbErr> {
        let result = job::Entity::update_many()
            .col_expr(
                job::Column::Status,
                Expr::value(JobStatus::Removed.as_str()),
            )
            .col_expr(job::Column::UpdatedAt, Expr::value(now))
            .filter(job::Column::JobId.eq(job_id))
            .filter(job::Column::Status.is_in([
                JobStatus::Waiting.as_str(),
                JobStatus::Completed.as_str(),
                JobStatus::Failed.as_str(),
            ]))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    /// Failed jobs, oldest failure first.
    pub async fn list_failed(&self, limit: u64) -> Result<Vec<job::Model>, DbErr> {
        job::Entity::find()
            .filter(job::Column::Status.eq(JobStatus::Failed.as_str()))
            .order_by_asc(job::Column::UpdatedAt)
            .limit(limit)
            .all(self.conn)
            .await
    }

    /// Active jobs claimed before `claimed_before`.
    pub async fn list_stalled(
        &self,
        queue_name: &str,
        claimed_before: DateTime<Utc>,
    ) -> Result<Vec<job::Model>, DbErr> {
        job::Entity::find()
            .filter(job::Column::QueueName.eq(queue_name))
            .filter(job::Column::Status.eq(JobStatus::Active.as_str()))
            .filter(job::Column::ClaimedAt.lt(claimed_before))
            .order_by_asc(job::Column::ClaimedAt)
            .all(self.conn)
            .await
    }

    pub async fn count(
        &self,
        queue_name: Option<&str>,
        status: JobStatus,
    ) -> Result<u64, DbErr> {
        let mut query =
            job::Entity::find().filter(job::Column::Status.eq(status.as_str()));

        if let Some(name) = queue_name {
            query = query.filter(job::Column::QueueName.eq(name));
        }

        query.count(self.conn).await
    }
}
