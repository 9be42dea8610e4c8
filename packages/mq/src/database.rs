use sea_orm::{DatabaseConnection, DbErr};

/// Create or update the queue tables.
pub async fn sync_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.get_schema_registry("mq::entity::*").sync(db).await
}
