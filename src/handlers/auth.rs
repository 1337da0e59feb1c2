//! Authentication endpoints.
//!
//! - POST /api/v1/auth/login - Exchange email/password for a bearer token
//! - GET /api/v1/auth/me - Current user, role and effective permissions

use std::sync::Arc;

use axum::{Extension, Json, extract::State};

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::user::{LoginRequest, LoginResponse, MeResponse, User},
    services::auth_service::{self, JwtService},
};

/// Sign in.
///
/// # Request Body
///
/// ```json
/// { "email": "bcba@clinic.example", "password": "..." }
/// ```
///
/// # Response
///
/// - **200 OK**: token plus user profile
/// - **401**: unknown email, wrong password or deactivated user
pub async fn login(
    State(pool): State<DbPool>,
    State(jwt): State<Arc<JwtService>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let response = auth_service::login(&pool, &jwt, request).await?;
    Ok(Json(response))
}

pub async fn me(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MeResponse>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(auth.user_id)
        .fetch_optional(&pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let mut permissions: Vec<_> = auth.permissions.iter().copied().collect();
    permissions.sort();

    Ok(Json(MeResponse {
        user: user.into(),
        role: auth.role_name,
        provider_id: auth.provider_id,
        permissions,
    }))
}
