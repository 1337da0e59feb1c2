//! Practice Ledger - Main Application Entry Point
//!
//! REST API for an ABA therapy practice: providers log weekly timesheets,
//! supervisors approve them, and approved time is invoiced to clients once a
//! week. What each user can see is governed by role permissions.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries)
//! - **Authentication**: HS256 bearer tokens, argon2 password hashes
//! - **Background jobs**: weekly invoice run, outbound email dispatcher
//!
//! # Startup Flow
//!
//! 1. Load and validate configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Create the bootstrap administrator if the database has no users
//! 4. Spawn background jobs
//! 5. Build HTTP router and start server on configured port

mod config;
mod db;
mod error;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::services::{
    auth_service,
    email_service::{self, Relay},
    scheduler::{self, InvoiceSchedule},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG, defaults to "info"
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!(
        timezone = %config.practice_timezone,
        week_start = %config.billing_week_start,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    if let (Some(email), Some(password)) = (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) {
        if !auth_service::bootstrap_admin(&pool, email, password).await? {
            tracing::debug!("users exist, bootstrap administrator skipped");
        }
    }

    if config.invoice_job_enabled {
        let schedule = InvoiceSchedule {
            timezone: config.timezone()?,
            week_start: config.week_start()?,
            run_weekday: config.job_weekday()?,
            run_hour: config.invoice_job_hour,
            unit_minutes: config.unit_minutes,
        };
        scheduler::spawn_weekly_invoicing(pool.clone(), schedule);
    } else {
        tracing::info!("weekly invoicing disabled");
    }

    match Relay::from_config(&config) {
        Some(relay) => email_service::spawn_dispatcher(
            pool.clone(),
            relay,
            Duration::from_secs(config.email_poll_secs),
        ),
        None => tracing::warn!("EMAIL_RELAY_URL not set, emails stay queued"),
    }

    let addr = format!("0.0.0.0:{}", config.server_port);
    let app = routes::build_router(state::AppState::new(pool, &config)?);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
