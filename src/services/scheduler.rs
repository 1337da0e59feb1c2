//! Weekly invoice job.
//!
//! Sleeps until the configured local weekday/hour, invoices the previous
//! billing week, and repeats. A failed run is logged and simply retried at
//! the next weekly slot; late approvals are picked up by whichever run
//! comes next.

use chrono::{Utc, Weekday};
use chrono_tz::Tz;

use crate::{
    db::DbPool,
    services::{
        billing_period::{BillingPeriod, next_run_after},
        invoice_service,
    },
};

#[derive(Debug, Clone, Copy)]
pub struct InvoiceSchedule {
    pub timezone: Tz,
    pub week_start: Weekday,
    pub run_weekday: Weekday,
    pub run_hour: u32,
    pub unit_minutes: u32,
}

pub fn spawn_weekly_invoicing(pool: DbPool, schedule: InvoiceSchedule) {
    tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let next = next_run_after(now, schedule.timezone, schedule.run_weekday, schedule.run_hour);
            tracing::info!(next_run = %next, "weekly invoicing scheduled");

            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            run_once(&pool, &schedule).await;
        }
    });
}

async fn run_once(pool: &DbPool, schedule: &InvoiceSchedule) {
    let period = BillingPeriod::previous_week(Utc::now(), schedule.timezone, schedule.week_start);
    tracing::info!(period_start = %period.start, period_end = %period.end, "weekly invoicing started");

    match invoice_service::generate_invoices(pool, period, schedule.unit_minutes, None).await {
        Ok(summary) => tracing::info!(
            invoices = summary.invoices.len(),
            timesheets = summary.timesheets_locked,
            "weekly invoicing finished"
        ),
        Err(e) => tracing::error!(error = %e, "weekly invoicing failed; will retry next week"),
    }
}
