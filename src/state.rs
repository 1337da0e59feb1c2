//! Shared application state handed to every handler.

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Weekday;
use chrono_tz::Tz;

use crate::{
    config::{Config, ConfigError},
    db::DbPool,
    services::auth_service::JwtService,
};

/// Billing settings parsed once from configuration.
#[derive(Debug, Clone, Copy)]
pub struct BillingSettings {
    pub timezone: Tz,
    pub week_start: Weekday,
    pub unit_minutes: u32,
}

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub jwt: Arc<JwtService>,
    pub billing: BillingSettings,
}

impl AppState {
    pub fn new(pool: DbPool, config: &Config) -> Result<Self, ConfigError> {
        let billing = BillingSettings {
            timezone: config.timezone()?,
            week_start: config.week_start()?,
            unit_minutes: config.unit_minutes,
        };
        Ok(Self {
            pool,
            jwt: Arc::new(JwtService::new(config)),
            billing,
        })
    }
}

// Lets handlers keep extracting `State<DbPool>` directly.
impl FromRef<AppState> for DbPool {
    fn from_ref(state: &AppState) -> Self {
        state.pool.clone()
    }
}

impl FromRef<AppState> for Arc<JwtService> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl FromRef<AppState> for BillingSettings {
    fn from_ref(state: &AppState) -> Self {
        state.billing
    }
}
