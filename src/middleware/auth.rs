//! Bearer token authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the JWT from the Authorization header
//! 2. Verify it and load the user, role permissions and provider link
//! 3. Inject an `AuthContext` into the request
//! 4. Reject unauthenticated requests with HTTP 401

use std::collections::HashSet;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::{
    error::AppError, models::permission::Permission, models::user::User, state::AppState,
};

/// Who is making the request and what they may do.
///
/// Inserted into request extensions; handlers extract it with
/// `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role_name: String,
    pub permissions: HashSet<Permission>,
    /// Provider record linked to this user, if the user delivers services
    pub provider_id: Option<Uuid>,
}

impl AuthContext {
    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.has(permission) {
            Ok(())
        } else {
            tracing::debug!(user_id = %self.user_id, %permission, "permission denied");
            Err(AppError::Forbidden(permission.as_str()))
        }
    }

    /// Passes when the user holds any of `permissions`.
    pub fn require_any(&self, permissions: &[Permission]) -> Result<(), AppError> {
        match permissions.iter().find(|p| self.has(**p)) {
            Some(_) => Ok(()),
            None => Err(AppError::Forbidden(
                permissions.first().map(Permission::as_str).unwrap_or("unknown"),
            )),
        }
    }
}

/// Authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <jwt>` header from request
/// 2. Verify signature, issuer, audience, expiry
/// 3. Load the user (must still be active) with its role's permission keys
/// 4. Inject `AuthContext` into request, call next handler
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::Unauthorized)?;

    let user_id = state.jwt.verify(token)?;
    let auth_context = load_context(&state, user_id).await?;

    request.extensions_mut().insert(auth_context);
    Ok(next.run(request).await)
}

async fn load_context(state: &AppState, user_id: Uuid) -> Result<AuthContext, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1 AND is_active = true")
        .bind(user_id)
        .fetch_optional(&state.pool)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let role_name: String = sqlx::query_scalar("SELECT name FROM roles WHERE id = $1")
        .bind(user.role_id)
        .fetch_one(&state.pool)
        .await?;

    let keys: Vec<String> =
        sqlx::query_scalar("SELECT permission FROM role_permissions WHERE role_id = $1")
            .bind(user.role_id)
            .fetch_all(&state.pool)
            .await?;

    let provider_id: Option<Uuid> =
        sqlx::query_scalar("SELECT id FROM providers WHERE user_id = $1 AND is_active = true")
            .bind(user.id)
            .fetch_optional(&state.pool)
            .await?;

    Ok(AuthContext {
        user_id: user.id,
        role_name,
        permissions: parse_permissions(keys),
        provider_id,
    })
}

/// Keep the keys this build understands; stale keys are logged and dropped.
pub fn parse_permissions(keys: Vec<String>) -> HashSet<Permission> {
    keys.into_iter()
        .filter_map(|key| match key.parse::<Permission>() {
            Ok(permission) => Some(permission),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unknown permission key");
                None
            }
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn context_with(permissions: &[Permission], provider_id: Option<Uuid>) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role_name: "test".to_string(),
            permissions: permissions.iter().copied().collect(),
            provider_id,
        }
    }

    #[test]
    fn require_reports_missing_key() {
        let ctx = context_with(&[Permission::InvoicesView], None);
        assert!(ctx.require(Permission::InvoicesView).is_ok());
        match ctx.require(Permission::InvoicesGenerate) {
            Err(AppError::Forbidden(key)) => assert_eq!(key, "invoices.generate"),
            other => panic!("expected Forbidden, got {other:?}"),
        }
    }

    #[test]
    fn require_any_accepts_one_match() {
        let ctx = context_with(&[Permission::TimesheetsViewOwn], None);
        assert!(
            ctx.require_any(&[Permission::TimesheetsViewAll, Permission::TimesheetsViewOwn])
                .is_ok()
        );
        assert!(ctx.require_any(&[Permission::AuditView]).is_err());
    }

    #[test]
    fn unknown_keys_are_dropped() {
        let parsed = parse_permissions(vec![
            "clients.view".to_string(),
            "legacy.reports".to_string(),
        ]);
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains(&Permission::ClientsView));
    }
}
