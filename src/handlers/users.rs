//! User and role administration handlers.
//!
//! - POST /api/v1/users - Create a user
//! - GET /api/v1/users - List users
//! - GET /api/v1/users/{id} - Get one user
//! - PATCH /api/v1/users/{id} - Update name, role, password or active flag
//! - GET /api/v1/roles - List roles with permissions
//! - POST /api/v1/roles - Create a role
//! - PUT /api/v1/roles/{id}/permissions - Replace a role's permission set

use std::collections::{BTreeSet, HashMap};

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::{AuthContext, parse_permissions},
    models::{
        permission::Permission,
        user::{
            CreateRoleRequest, CreateUserRequest, Role, RoleResponse, SetRolePermissionsRequest,
            UpdateUserRequest, User, UserResponse,
        },
    },
    services::{audit_service, auth_service},
};

/// Widths of `users.email`, `users.full_name` and `roles.name`.
const MAX_EMAIL_CHARS: usize = 255;
const MAX_FULL_NAME_CHARS: usize = 255;
const MAX_ROLE_NAME_CHARS: usize = 64;

fn normalize_email(email: &str) -> Result<String, AppError> {
    let email = email.trim().to_lowercase();
    if email.chars().count() > MAX_EMAIL_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "email must be at most {MAX_EMAIL_CHARS} characters"
        )));
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::InvalidRequest("A valid email is required".to_string())),
    }
}

fn validate_full_name(full_name: &str) -> Result<String, AppError> {
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::InvalidRequest("full_name is required".to_string()));
    }
    if full_name.chars().count() > MAX_FULL_NAME_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "full_name must be at most {MAX_FULL_NAME_CHARS} characters"
        )));
    }
    Ok(full_name.to_string())
}

/// Create a user.
///
/// # Response (201)
///
/// The created user. When no password was supplied, `temporary_password`
/// holds a generated one; it is never shown again.
pub async fn create_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::UsersManage)?;

    let email = normalize_email(&request.email)?;
    let full_name = validate_full_name(&request.full_name)?;

    let (password, generated) = match request.password {
        Some(password) => {
            auth_service::validate_password_policy(&password)?;
            (password, false)
        }
        None => (auth_service::generate_temporary_password(), true),
    };
    let password_hash = auth_service::hash_password(&password)?;

    let mut tx = pool.begin().await?;

    let role_exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM roles WHERE id = $1)")
        .bind(request.role_id)
        .fetch_one(&mut *tx)
        .await?;
    if !role_exists {
        return Err(AppError::NotFound("Role"));
    }

    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (email, password_hash, full_name, role_id)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(&email)
    .bind(&password_hash)
    .bind(&full_name)
    .bind(request.role_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "A user with this email already exists"))?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "user.created",
        "user",
        user.id,
        Some(serde_json::json!({ "email": user.email, "role_id": user.role_id })),
    )
    .await?;

    tx.commit().await?;

    let mut response = UserResponse::from(user);
    if generated {
        response.temporary_password = Some(password);
    }
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn list_users(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<UserResponse>>, AppError> {
    auth.require(Permission::UsersManage)?;

    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY full_name")
        .fetch_all(&pool)
        .await?;

    Ok(Json(users.into_iter().map(Into::into).collect()))
}

pub async fn get_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<UserResponse>, AppError> {
    if user_id != auth.user_id {
        auth.require(Permission::UsersManage)?;
    }

    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::NotFound("User"))?;

    Ok(Json(user.into()))
}

/// Partial update.
///
/// Users may change their own password; everything else needs `users.manage`.
/// Administrators cannot deactivate themselves.
pub async fn update_user(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<Uuid>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, AppError> {
    let self_service_only = request.full_name.is_none()
        && request.role_id.is_none()
        && request.is_active.is_none();
    if !(user_id == auth.user_id && self_service_only) {
        auth.require(Permission::UsersManage)?;
    }
    if user_id == auth.user_id && request.is_active == Some(false) {
        return Err(AppError::InvalidRequest(
            "You cannot deactivate your own account".to_string(),
        ));
    }

    let full_name = request
        .full_name
        .as_deref()
        .map(validate_full_name)
        .transpose()?;
    let password_hash = match &request.password {
        Some(password) => {
            auth_service::validate_password_policy(password)?;
            Some(auth_service::hash_password(password)?)
        }
        None => None,
    };

    let mut tx = pool.begin().await?;

    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users
        SET full_name = COALESCE($2, full_name),
            role_id = COALESCE($3, role_id),
            is_active = COALESCE($4, is_active),
            password_hash = COALESCE($5, password_hash),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(full_name)
    .bind(request.role_id)
    .bind(request.is_active)
    .bind(password_hash)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(AppError::NotFound("User"))?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "user.updated",
        "user",
        user.id,
        Some(serde_json::json!({
            "role_id": request.role_id,
            "is_active": request.is_active,
            "password_changed": request.password.is_some(),
        })),
    )
    .await?;

    tx.commit().await?;
    Ok(Json(user.into()))
}

pub async fn list_roles(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<RoleResponse>>, AppError> {
    auth.require_any(&[Permission::RolesManage, Permission::UsersManage])?;

    let roles = sqlx::query_as::<_, Role>("SELECT * FROM roles ORDER BY name")
        .fetch_all(&pool)
        .await?;

    let grants: Vec<(Uuid, String)> =
        sqlx::query_as("SELECT role_id, permission FROM role_permissions")
            .fetch_all(&pool)
            .await?;

    let mut by_role: HashMap<Uuid, Vec<String>> = HashMap::new();
    for (role_id, permission) in grants {
        by_role.entry(role_id).or_default().push(permission);
    }

    let responses = roles
        .into_iter()
        .map(|role| {
            let mut permissions: Vec<Permission> =
                parse_permissions(by_role.remove(&role.id).unwrap_or_default())
                    .into_iter()
                    .collect();
            permissions.sort();
            RoleResponse {
                id: role.id,
                name: role.name,
                description: role.description,
                permissions,
            }
        })
        .collect();

    Ok(Json(responses))
}

async fn replace_permissions(
    conn: &mut sqlx::PgConnection,
    role_id: Uuid,
    permissions: &BTreeSet<Permission>,
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut *conn)
        .await?;

    let keys: Vec<&str> = permissions.iter().map(Permission::as_str).collect();
    sqlx::query(
        "INSERT INTO role_permissions (role_id, permission) SELECT $1, UNNEST($2::text[])",
    )
    .bind(role_id)
    .bind(&keys)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn create_role(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::RolesManage)?;

    let name = request.name.trim().to_lowercase();
    if name.is_empty() {
        return Err(AppError::InvalidRequest("Role name is required".to_string()));
    }
    if name.chars().count() > MAX_ROLE_NAME_CHARS {
        return Err(AppError::InvalidRequest(format!(
            "Role name must be at most {MAX_ROLE_NAME_CHARS} characters"
        )));
    }
    let permissions: BTreeSet<Permission> = request.permissions.into_iter().collect();

    let mut tx = pool.begin().await?;

    let role = sqlx::query_as::<_, Role>(
        "INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING *",
    )
    .bind(&name)
    .bind(request.description)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| AppError::conflict_on_unique(e, "A role with this name already exists"))?;

    replace_permissions(&mut tx, role.id, &permissions).await?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "role.created",
        "role",
        role.id,
        Some(serde_json::json!({ "name": role.name, "permissions": permissions })),
    )
    .await?;

    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(RoleResponse {
            id: role.id,
            name: role.name,
            description: role.description,
            permissions: permissions.into_iter().collect(),
        }),
    ))
}

/// Replace the permission set of a role.
///
/// A user may not strip `roles.manage` from their own role, which would
/// lock every holder of that role out of role administration.
pub async fn set_role_permissions(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
    Json(request): Json<SetRolePermissionsRequest>,
) -> Result<Json<RoleResponse>, AppError> {
    auth.require(Permission::RolesManage)?;
    let permissions: BTreeSet<Permission> = request.permissions.into_iter().collect();

    let mut tx = pool.begin().await?;

    let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE id = $1 FOR UPDATE")
        .bind(role_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Role"))?;

    let own_role: bool = sqlx::query_scalar("SELECT role_id = $2 FROM users WHERE id = $1")
        .bind(auth.user_id)
        .bind(role_id)
        .fetch_one(&mut *tx)
        .await?;
    if own_role && !permissions.contains(&Permission::RolesManage) {
        return Err(AppError::InvalidRequest(
            "You cannot remove roles.manage from your own role".to_string(),
        ));
    }

    replace_permissions(&mut tx, role.id, &permissions).await?;

    audit_service::record(
        &mut *tx,
        Some(auth.user_id),
        "role.permissions_replaced",
        "role",
        role.id,
        Some(serde_json::json!({ "permissions": permissions })),
    )
    .await?;

    tx.commit().await?;

    Ok(Json(RoleResponse {
        id: role.id,
        name: role.name,
        description: role.description,
        permissions: permissions.into_iter().collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(
            normalize_email("  Jane.Doe@Clinic.Example ").unwrap(),
            "jane.doe@clinic.example"
        );
    }

    #[test]
    fn malformed_emails_are_rejected() {
        assert!(normalize_email("no-at-sign").is_err());
        assert!(normalize_email("@clinic.example").is_err());
        assert!(normalize_email("jane@localhost").is_err());
    }

    #[test]
    fn over_long_identity_fields_are_bad_requests() {
        let long_email = format!("{}@clinic.example", "a".repeat(MAX_EMAIL_CHARS));
        assert!(matches!(
            normalize_email(&long_email),
            Err(AppError::InvalidRequest(_))
        ));

        assert_eq!(validate_full_name("  Jane Doe ").unwrap(), "Jane Doe");
        assert!(validate_full_name("   ").is_err());
        assert!(matches!(
            validate_full_name(&"n".repeat(MAX_FULL_NAME_CHARS + 1)),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
