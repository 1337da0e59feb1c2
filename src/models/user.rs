//! User and role models.
//!
//! This module defines:
//! - `User`: an account that can sign in (staff, supervisors, billing)
//! - `Role`: a named bundle of permission keys
//! - Request/response bodies for authentication and user administration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::permission::Permission;

/// Represents a user record from the database.
///
/// # Database Table
///
/// Maps to the `users` table. The password is stored as an argon2 PHC
/// string and never leaves the service.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub role_id: Uuid,
    /// Inactive users cannot sign in and existing tokens stop working
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A role together with its permission keys.
#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
}

/// Request body for creating a role.
///
/// ```json
/// {
///   "name": "intake",
///   "description": "Front desk",
///   "permissions": ["clients.view", "clients.manage"]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// Replaces the full permission set of a role.
#[derive(Debug, Deserialize)]
pub struct SetRolePermissionsRequest {
    pub permissions: Vec<Permission>,
}

/// Request body for `POST /api/v1/auth/login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Successful login.
///
/// ```json
/// {
///   "access_token": "eyJhbGciOi...",
///   "token_type": "Bearer",
///   "expires_in": 28800,
///   "user": { "id": "...", "email": "...", ... }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: UserResponse,
}

/// Request body for creating a user.
///
/// When `password` is omitted a temporary password is generated and
/// returned once in the response.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub full_name: String,
    pub role_id: Uuid,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub full_name: Option<String>,
    pub role_id: Option<Uuid>,
    pub is_active: Option<bool>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub role_id: Uuid,
    pub is_active: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Only present right after creation when the server generated the password
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_password: Option<String>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            full_name: user.full_name,
            role_id: user.role_id,
            is_active: user.is_active,
            last_login_at: user.last_login_at,
            created_at: user.created_at,
            temporary_password: None,
        }
    }
}

/// Response for `GET /api/v1/auth/me`.
#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub user: UserResponse,
    pub role: String,
    pub provider_id: Option<Uuid>,
    pub permissions: Vec<Permission>,
}
