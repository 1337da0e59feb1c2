//! Client and provider directory handlers.
//!
//! This module implements:
//! - GET/POST /api/v1/clients, GET/PATCH /api/v1/clients/{id}
//! - GET/POST /api/v1/providers, GET/PATCH /api/v1/providers/{id}

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        client::{
            ActiveFilter, Client, CreateClientRequest, CreateProviderRequest, Provider,
            UpdateClientRequest, UpdateProviderRequest,
        },
        permission::Permission,
    },
    services::audit_service,
};

/// Column width of every person-name column.
const MAX_NAME_CHARS: usize = 128;

fn required_name(value: &str, field: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidRequest(format!("{field} is required")));
    }
    if value.chars().count() > MAX_NAME_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "{field} must be at most {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(value.to_string())
}

fn validate_rate(rate_per_unit_cents: i64) -> Result<(), AppError> {
    if rate_per_unit_cents < 0 {
        return Err(AppError::InvalidRequest(
            "rate_per_unit_cents must not be negative".to_string(),
        ));
    }
    Ok(())
}

/// NPI numbers are exactly ten digits.
fn validate_npi(npi: Option<&str>) -> Result<(), AppError> {
    match npi {
        Some(npi) if npi.len() != 10 || !npi.bytes().all(|b| b.is_ascii_digit()) => Err(
            AppError::InvalidRequest("npi must be exactly 10 digits".to_string()),
        ),
        _ => Ok(()),
    }
}

/// List clients.
///
/// # Query Parameters
///
/// - `include_inactive`: also return discharged clients (default `false`)
pub async fn list_clients(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<ActiveFilter>,
) -> Result<Json<Vec<Client>>, AppError> {
    auth.require_any(&[Permission::ClientsView, Permission::ClientsManage])?;

    let clients = sqlx::query_as::<_, Client>(
        r#"
        SELECT * FROM clients
        WHERE is_active OR $1
        ORDER BY last_name, first_name
        "#,
    )
    .bind(filter.include_inactive)
    .fetch_all(&pool)
    .await?;

    Ok(Json(clients))
}

pub async fn get_client(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(client_id): Path<Uuid>,
) -> Result<Json<Client>, AppError> {
    auth.require_any(&[Permission::ClientsView, Permission::ClientsManage])?;

    let client = sqlx::query_as::<_, Client>("SELECT * FROM clients WHERE id = $1")
        .bind(client_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Client"))?;

    Ok(Json(client))
}

/// Create a client.
///
/// # Request Body
///
/// ```json
/// {
///   "first_name": "Sam",
///   "last_name": "Rivera",
///   "billing_email": "guardian@family.example",
///   "rate_per_unit_cents": 1875,
///   "supervisor_user_id": "550e8400-..."
/// }
/// ```
///
/// # Response
///
/// - **201 Created**: the client
/// - **400**: blank or over-long name, or negative rate
pub async fn create_client(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::ClientsManage)?;

    let first_name = required_name(&request.first_name, "first_name")?;
    let last_name = required_name(&request.last_name, "last_name")?;
    validate_rate(request.rate_per_unit_cents)?;

    let mut tx = pool.begin().await?;

    let client = sqlx::query_as::<_, Client>(
        r#"
        INSERT INTO clients (first_name, last_name, date_of_birth, billing_email,
                             insurance_name, rate_per_unit_cents, supervisor_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&first_name)
    .bind(&last_name)
    .bind(request.date_of_birth)
    .bind(request.billing_email.as_deref().map(str::trim))
    .bind(request.insurance_name)
    .bind(request.rate_per_unit_cents)
    .bind(request.supervisor_user_id)
    .fetch_one(&mut *tx)
    .await?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "client.created",
        "client",
        client.id,
        Some(serde_json::json!({ "rate_per_unit_cents": client.rate_per_unit_cents })),
    )
    .await?;

    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// Partial update. A rate change only affects invoices generated afterwards.
pub async fn update_client(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(client_id): Path<Uuid>,
    Json(request): Json<UpdateClientRequest>,
) -> Result<Json<Client>, AppError> {
    auth.require(Permission::ClientsManage)?;

    let first_name = request
        .first_name
        .as_deref()
        .map(|v| required_name(v, "first_name"))
        .transpose()?;
    let last_name = request
        .last_name
        .as_deref()
        .map(|v| required_name(v, "last_name"))
        .transpose()?;
    if let Some(rate) = request.rate_per_unit_cents {
        validate_rate(rate)?;
    }

    let mut tx = pool.begin().await?;

    let client = sqlx::query_as::<_, Client>(
        r#"
        UPDATE clients
        SET first_name = COALESCE($2, first_name),
            last_name = COALESCE($3, last_name),
            date_of_birth = COALESCE($4, date_of_birth),
            billing_email = COALESCE($5, billing_email),
            insurance_name = COALESCE($6, insurance_name),
            rate_per_unit_cents = COALESCE($7, rate_per_unit_cents),
            supervisor_user_id = CASE WHEN $10 THEN $8 ELSE supervisor_user_id END,
            is_active = COALESCE($9, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(client_id)
    .bind(first_name)
    .bind(last_name)
    .bind(request.date_of_birth)
    .bind(request.billing_email.as_deref().map(str::trim))
    .bind(request.insurance_name)
    .bind(request.rate_per_unit_cents)
    .bind(request.supervisor_user_id.flatten())
    .bind(request.is_active)
    .bind(request.supervisor_user_id.is_some())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("Client"))?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "client.updated",
        "client",
        client.id,
        Some(serde_json::json!({
            "rate_per_unit_cents": request.rate_per_unit_cents,
            "supervisor_changed": request.supervisor_user_id.is_some(),
            "supervisor_user_id": client.supervisor_user_id,
            "is_active": request.is_active,
        })),
    )
    .await?;

    tx.commit().await?;
    Ok(Json(client))
}

/// List providers.
///
/// Approvers and client staff need the directory to pick a provider, so
/// any of `providers.manage`, `timesheets.approve` or `clients.view` is enough.
pub async fn list_providers(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<ActiveFilter>,
) -> Result<Json<Vec<Provider>>, AppError> {
    auth.require_any(&[
        Permission::ProvidersManage,
        Permission::TimesheetsApprove,
        Permission::ClientsView,
    ])?;

    let providers = sqlx::query_as::<_, Provider>(
        r#"
        SELECT * FROM providers
        WHERE is_active OR $1
        ORDER BY last_name, first_name
        "#,
    )
    .bind(filter.include_inactive)
    .fetch_all(&pool)
    .await?;

    Ok(Json(providers))
}

pub async fn get_provider(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(provider_id): Path<Uuid>,
) -> Result<Json<Provider>, AppError> {
    if auth.provider_id != Some(provider_id) {
        auth.require_any(&[
            Permission::ProvidersManage,
            Permission::TimesheetsApprove,
            Permission::ClientsView,
        ])?;
    }

    let provider = sqlx::query_as::<_, Provider>("SELECT * FROM providers WHERE id = $1")
        .bind(provider_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("Provider"))?;

    Ok(Json(provider))
}

/// Create a provider, optionally linked to a user account.
///
/// # Response
///
/// - **201 Created**: the provider
/// - **409**: the user account is already linked to another provider
pub async fn create_provider(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateProviderRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::ProvidersManage)?;

    let first_name = required_name(&request.first_name, "first_name")?;
    let last_name = required_name(&request.last_name, "last_name")?;
    validate_npi(request.npi.as_deref())?;

    let mut tx = pool.begin().await?;

    let provider = sqlx::query_as::<_, Provider>(
        r#"
        INSERT INTO providers (user_id, first_name, last_name, credential, npi)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(request.user_id)
    .bind(&first_name)
    .bind(&last_name)
    .bind(request.credential)
    .bind(request.npi)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "User is already linked to a provider"))?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "provider.created",
        "provider",
        provider.id,
        Some(serde_json::json!({ "user_id": provider.user_id })),
    )
    .await?;

    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(provider)))
}

pub async fn update_provider(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(provider_id): Path<Uuid>,
    Json(request): Json<UpdateProviderRequest>,
) -> Result<Json<Provider>, AppError> {
    auth.require(Permission::ProvidersManage)?;

    let first_name = request
        .first_name
        .as_deref()
        .map(|v| required_name(v, "first_name"))
        .transpose()?;
    let last_name = request
        .last_name
        .as_deref()
        .map(|v| required_name(v, "last_name"))
        .transpose()?;
    validate_npi(request.npi.as_deref())?;

    let mut tx = pool.begin().await?;

    let provider = sqlx::query_as::<_, Provider>(
        r#"
        UPDATE providers
        SET user_id = CASE WHEN $8 THEN $2 ELSE user_id END,
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            credential = COALESCE($5, credential),
            npi = COALESCE($6, npi),
            is_active = COALESCE($7, is_active),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(provider_id)
    .bind(request.user_id.flatten())
    .bind(first_name)
    .bind(last_name)
    .bind(request.credential)
    .bind(request.npi)
    .bind(request.is_active)
    .bind(request.user_id.is_some())
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "User is already linked to a provider"))?
    .ok_or(AppError::NotFound("Provider"))?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "provider.updated",
        "provider",
        provider.id,
        Some(serde_json::json!({
            "user_changed": request.user_id.is_some(),
            "user_id": provider.user_id,
            "is_active": request.is_active,
        })),
    )
    .await?;

    tx.commit().await?;
    Ok(Json(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        assert!(required_name("   ", "first_name").is_err());
        assert_eq!(required_name(" Sam ", "first_name").unwrap(), "Sam");
    }

    #[test]
    fn over_long_names_are_rejected_not_truncated() {
        let at_limit = "é".repeat(MAX_NAME_CHARS);
        assert_eq!(required_name(&at_limit, "last_name").unwrap(), at_limit);

        let too_long = "x".repeat(MAX_NAME_CHARS + 1);
        assert!(matches!(
            required_name(&too_long, "last_name"),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn zero_rate_is_allowed_but_negative_is_not() {
        assert!(validate_rate(0).is_ok());
        assert!(validate_rate(-1).is_err());
    }

    #[test]
    fn npi_must_be_ten_digits() {
        assert!(validate_npi(None).is_ok());
        assert!(validate_npi(Some("1234567890")).is_ok());
        assert!(validate_npi(Some("123456789")).is_err());
        assert!(validate_npi(Some("12345678ab")).is_err());
    }
}
