//! Audit trail writes and reads.
//!
//! Writes take any executor so they can join the caller's transaction:
//! an audit row commits or rolls back together with the change it describes.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::audit::{AuditListQuery, AuditLog},
};

pub async fn record<'e, E>(
    executor: E,
    actor_user_id: Option<Uuid>,
    action: &str,
    entity_type: &str,
    entity_id: Uuid,
    details: Option<serde_json::Value>,
) -> Result<(), AppError>
where
    E: PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_logs (actor_user_id, action, entity_type, entity_id, details)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(actor_user_id)
    .bind(action)
    .bind(entity_type)
    .bind(entity_id)
    .bind(details)
    .execute(executor)
    .await?;

    Ok(())
}

pub async fn list(pool: &DbPool, query: &AuditListQuery) -> Result<Vec<AuditLog>, AppError> {
    let limit = query.limit.clamp(1, 500);

    let logs = sqlx::query_as::<_, AuditLog>(
        r#"
        SELECT * FROM audit_logs
        WHERE ($1::text IS NULL OR entity_type = $1)
          AND ($2::uuid IS NULL OR entity_id = $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(query.entity_type.as_deref())
    .bind(query.entity_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(logs)
}
