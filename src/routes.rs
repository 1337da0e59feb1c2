//! HTTP router.

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::{handlers, middleware::auth::auth_middleware, state::AppState};

pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        .route("/api/v1/auth/me", get(handlers::auth::me))
        // Users and roles
        .route(
            "/api/v1/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/api/v1/users/{id}",
            get(handlers::users::get_user).patch(handlers::users::update_user),
        )
        .route(
            "/api/v1/roles",
            get(handlers::users::list_roles).post(handlers::users::create_role),
        )
        .route(
            "/api/v1/roles/{id}/permissions",
            put(handlers::users::set_role_permissions),
        )
        // Directory
        .route(
            "/api/v1/clients",
            get(handlers::clients::list_clients).post(handlers::clients::create_client),
        )
        .route(
            "/api/v1/clients/{id}",
            get(handlers::clients::get_client).patch(handlers::clients::update_client),
        )
        .route(
            "/api/v1/providers",
            get(handlers::clients::list_providers).post(handlers::clients::create_provider),
        )
        .route(
            "/api/v1/providers/{id}",
            get(handlers::clients::get_provider).patch(handlers::clients::update_provider),
        )
        // Timesheets
        .route(
            "/api/v1/timesheets",
            get(handlers::timesheets::list_timesheets)
                .post(handlers::timesheets::create_timesheet),
        )
        .route(
            "/api/v1/timesheets/{id}",
            get(handlers::timesheets::get_timesheet)
                .patch(handlers::timesheets::update_timesheet)
                .delete(handlers::timesheets::delete_timesheet),
        )
        .route(
            "/api/v1/timesheets/{id}/submit",
            post(handlers::timesheets::submit_timesheet),
        )
        .route(
            "/api/v1/timesheets/{id}/approve",
            post(handlers::timesheets::approve_timesheet),
        )
        .route(
            "/api/v1/timesheets/{id}/reject",
            post(handlers::timesheets::reject_timesheet),
        )
        // Billing
        .route("/api/v1/invoices", get(handlers::invoices::list_invoices))
        .route(
            "/api/v1/invoices/generate",
            post(handlers::invoices::generate_invoices),
        )
        .route("/api/v1/invoices/{id}", get(handlers::invoices::get_invoice))
        .route(
            "/api/v1/invoices/{id}/void",
            post(handlers::invoices::void_invoice),
        )
        .route(
            "/api/v1/invoices/{id}/payments",
            post(handlers::invoices::record_payment),
        )
        .route(
            "/api/v1/invoices/{id}/adjustments",
            post(handlers::invoices::record_adjustment),
        )
        // Administration
        .route(
            "/api/v1/admin/audit-logs",
            get(handlers::admin::list_audit_logs),
        )
        .route("/api/v1/admin/emails", get(handlers::admin::list_email_queue))
        .route(
            "/api/v1/admin/emails/{id}/retry",
            post(handlers::admin::retry_email),
        )
        // Only matched routes pass through auth; unknown paths still 404
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/api/v1/auth/login", post(handlers::auth::login))
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use super::*;
    use crate::config::tests::test_config;

    /// Router backed by a pool that never connects; only paths that fail
    /// before touching the database can be exercised.
    fn test_app() -> Router {
        let config = test_config();
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        build_router(AppState::new(pool, &config).unwrap())
    }

    async fn error_code(response: axum::response::Response) -> String {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        json["error"]["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/timesheets")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(error_code(response).await, "unauthorized");
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/invoices")
                    .header(header::AUTHORIZATION, "Bearer not.a.jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn non_bearer_scheme_is_unauthorized() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/invoices/generate")
                    .header(header::AUTHORIZATION, "Basic YWRtaW46YWRtaW4=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/does-not-exist")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn login_requires_json_body() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/auth/login")
                    .body(Body::from("email=a&password=b"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
