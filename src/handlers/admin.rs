//! Administrative read-outs: audit trail and the outbound email queue.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        audit::{AuditListQuery, AuditLog, EmailQueueItem, EmailQueueQuery},
        permission::Permission,
    },
    services::{audit_service, email_service},
};

/// Most recent audit entries, newest first.
///
/// # Query Parameters
///
/// - `entity_type`: e.g. `invoice`, `timesheet`
/// - `entity_id`
/// - `limit`: 1..=500, default 100
pub async fn list_audit_logs(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<AuditListQuery>,
) -> Result<Json<Vec<AuditLog>>, AppError> {
    auth.require(Permission::AuditView)?;
    let logs = audit_service::list(&pool, &query).await?;
    Ok(Json(logs))
}

pub async fn list_email_queue(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<EmailQueueQuery>,
) -> Result<Json<Vec<EmailQueueItem>>, AppError> {
    auth.require(Permission::UsersManage)?;
    let items = email_service::list(&pool, query.status.as_deref()).await?;
    Ok(Json(items))
}

/// Requeue a failed email.
pub async fn retry_email(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(email_id): Path<Uuid>,
) -> Result<Json<EmailQueueItem>, AppError> {
    auth.require(Permission::UsersManage)?;
    let item = email_service::retry(&pool, email_id).await?;
    Ok(Json(item))
}
