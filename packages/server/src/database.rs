use std::time::Duration;

use sea_orm::sea_query::{Index, PostgresQueryBuilder, SqliteQueryBuilder};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, DbErr,
};
use tracing::info;

use crate::config::DatabaseConfig;
use crate::entity::dead_letter_item;

/// Unique key behind exactly-once DLQ promotion.
pub const DLQ_UNIQUE_INDEX: &str = "uq_dead_letter_item_queue_job";

pub async fn init_db(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(config.url.clone());

    // Set connection pool options
    opt.max_connections(config.max_connections)
        .min_connections(1)
        .connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(config.sqlx_logging);

    let db = Database::connect(opt).await?;
    sync_schema(&db).await?;

    Ok(db)
}

/// Create or update the `job` and `dead_letter_item` tables and their indexes.
pub async fn sync_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    mq::database::sync_schema(db).await?;
    db.get_schema_registry("server::entity::*")
        .sync(db)
        .await?;
    ensure_indexes(db).await
}

/// Indexes the entity attributes cannot express.
///
/// Unlike optional performance indexes this one is load-bearing: failing to
/// create it is a startup error.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    let stmt = Index::create()
        .if_not_exists()
        .unique()
        .name(DLQ_UNIQUE_INDEX)
        .table(dead_letter_item::Entity)
        .col(dead_letter_item::Column::QueueName)
        .col(dead_letter_item::Column::JobId)
        .to_owned();

    let sql = match db.get_database_backend() {
        DbBackend::Sqlite => stmt.to_string(SqliteQueryBuilder),
        _ => stmt.to_string(PostgresQueryBuilder),
    };

    db.execute_unprepared(&sql).await?;
    info!("Ensured index {DLQ_UNIQUE_INDEX} exists");

    Ok(())
}
