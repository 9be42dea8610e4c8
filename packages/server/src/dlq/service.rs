use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, sea_query::Expr,
    sea_query::LockType,
};

use crate::entity::dead_letter_item;

/// Fields of a dead letter item before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    pub queue_name: String,
    pub job_id: String,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub last_error: String,
    pub metadata: serde_json::Value,
    pub failed_at: DateTime<Utc>,
}

/// Result of [`DlqService::insert_if_absent`].
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    /// `false` when a row for the same `(queue_name, job_id)` already existed.
    pub inserted: bool,
    pub row: dead_letter_item::Model,
}

/// Result of attempting to mark an item requeued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequeueMark {
    /// The flag flipped; carries the updated row.
    Marked(Box<dead_letter_item::Model>),
    NotFound,
    AlreadyRequeued,
}

/// Statistics about the dead letter queue.
#[derive(Debug, Clone, Default)]
pub struct DlqStats {
    pub total: u64,
    pub pending: u64,
    pub requeued: u64,
    /// Item count grouped by queue name.
    pub by_queue: BTreeMap<String, u64>,
}

pub struct DlqService<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> DlqService<'a, C> {
    pub fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Insert unless a row for `(queue_name, job_id)` exists, in which case
    /// that row is returned.
    ///
    /// Relies on the unique index rather than a prior lookup, so concurrent
    /// callers cannot both insert.
    pub async fn insert_if_absent(&self, new: NewDeadLetter) -> Result<InsertOutcome, DbErr> {
        let queue_name = new.queue_name.clone();
        let job_id = new.job_id.clone();

        let model = dead_letter_item::ActiveModel {
            queue_name: Set(new.queue_name),
            job_id: Set(new.job_id),
            payload: Set(new.payload),
            attempts: Set(new.attempts),
            last_error: Set(new.last_error),
            metadata: Set(new.metadata),
            failed_at: Set(new.failed_at),
            requeued: Set(false),
            requeued_at: Set(None),
            ..Default::default()
        };

        match model.insert(self.conn).await {
            Ok(row) => Ok(InsertOutcome {
                inserted: true,
                row,
            }),
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                let row = self
                    .find_by_job(&queue_name, &job_id)
                    .await?
                    .ok_or_else(|| {
                        DbErr::Custom(
                            "UniqueConstraintViolation but existing row not found".to_string(),
                        )
                    })?;
                Ok(InsertOutcome {
                    inserted: false,
                    row,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Newest failures first. Returns the page and the total matching count.
    pub async fn list(
        &self,
        queue_name: Option<&str>,
        requeued: Option<bool>,
        limit: u64,
        offset: u64,
    ) -> Result<(Vec<dead_letter_item::Model>, u64), DbErr> {
        let mut query = dead_letter_item::Entity::find();

        if let Some(name) = queue_name {
            query = query.filter(dead_letter_item::Column::QueueName.eq(name));
        }

        if let Some(flag) = requeued {
            query = query.filter(dead_letter_item::Column::Requeued.eq(flag));
        }

        let total = query.clone().count(self.conn).await?;

        let items = query
            .order_by_desc(dead_letter_item::Column::FailedAt)
            .order_by_desc(dead_letter_item::Column::Id)
            .offset(offset)
            .limit(limit)
            .all(self.conn)
            .await?;

        Ok((items, total))
    }

    pub async fn get_by_id(&self, id: i32) -> Result<Option<dead_letter_item::Model>, DbErr> {
        dead_letter_item::Entity::find_by_id(id).one(self.conn).await
    }

    /// Get a single item by ID with FOR UPDATE lock.
    pub async fn get_by_id_for_update(
        &self,
        id: i32,
    ) -> Result<Option<dead_letter_item::Model>, DbErr> {
        dead_letter_item::Entity::find_by_id(id)
            .lock(LockType::Update)
            .one(self.conn)
            .await
    }

    pub async fn find_by_job(
        &self,
        queue_name: &str,
        job_id: &str,
    ) -> Result<Option<dead_letter_item::Model>, DbErr> {
        dead_letter_item::Entity::find()
            .filter(dead_letter_item::Column::QueueName.eq(queue_name))
            .filter(dead_letter_item::Column::JobId.eq(job_id))
            .one(self.conn)
            .await
    }

    /// Flip `requeued` false -> true. Conditional, so it succeeds at most once.
    ///
    /// `requeued_job_id` is recorded under `metadata.requeue` for audit.
    pub async fn mark_requeued(
        &self,
        id: i32,
        requeued_at: DateTime<Utc>,
        requeued_job_id: Option<&str>,
    ) -> Result<RequeueMark, DbErr> {
        let Some(current) = self.get_by_id(id).await? else {
            return Ok(RequeueMark::NotFound);
        };
        if current.requeued {
            return Ok(RequeueMark::AlreadyRequeued);
        }

        let mut metadata = current.metadata;
        if let Some(map) = metadata.as_object_mut() {
            map.insert(
                "requeue".to_string(),
                serde_json::json!({
                    "job_id": requeued_job_id,
                    "requeued_at": requeued_at,
                }),
            );
        }

        let update_result = dead_letter_item::Entity::update_many()
            .col_expr(dead_letter_item::Column::Requeued, Expr::value(true))
            .col_expr(
                dead_letter_item::Column::RequeuedAt,
                Expr::value(Some(requeued_at)),
            )
            .col_expr(dead_letter_item::Column::Metadata, Expr::value(metadata))
            .filter(dead_letter_item::Column::Id.eq(id))
            .filter(dead_letter_item::Column::Requeued.eq(false))
            .exec(self.conn)
            .await?;

        if update_result.rows_affected == 0 {
            return Ok(match self.get_by_id(id).await? {
                Some(_) => RequeueMark::AlreadyRequeued,
                None => RequeueMark::NotFound,
            });
        }

        let row = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| DbErr::RecordNotFound(format!("dead letter item {id}")))?;
        Ok(RequeueMark::Marked(Box::new(row)))
    }

    pub async fn count(&self, queue_name: Option<&str>) -> Result<u64, DbErr> {
        let mut query = dead_letter_item::Entity::find();
        if let Some(name) = queue_name {
            query = query.filter(dead_letter_item::Column::QueueName.eq(name));
        }
        query.count(self.conn).await
    }

    /// Items not yet requeued.
    pub async fn count_pending(&self, queue_name: Option<&str>) -> Result<u64, DbErr> {
        let mut query = dead_letter_item::Entity::find()
            .filter(dead_letter_item::Column::Requeued.eq(false));
        if let Some(name) = queue_name {
            query = query.filter(dead_letter_item::Column::QueueName.eq(name));
        }
        query.count(self.conn).await
    }

    pub async fn stats(&self) -> Result<DlqStats, DbErr> {
        let rows: Vec<(String, bool)> = dead_letter_item::Entity::find()
            .select_only()
            .column(dead_letter_item::Column::QueueName)
            .column(dead_letter_item::Column::Requeued)
            .into_tuple()
            .all(self.conn)
            .await?;

        let mut stats = DlqStats::default();
        for (queue_name, requeued) in rows {
            stats.total += 1;
            if requeued {
                stats.requeued += 1;
            } else {
                stats.pending += 1;
            }
            *stats.by_queue.entry(queue_name).or_insert(0) += 1;
        }

        Ok(stats)
    }
}

/// Create a DlqService with a DatabaseConnection.
pub fn dlq_service(db: &DatabaseConnection) -> DlqService<'_, DatabaseConnection> {
    DlqService::new(db)
}
