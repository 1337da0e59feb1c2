//! Timesheet business logic: entry validation, visibility-scoped reads,
//! and the draft → submitted → approved workflow.
//!
//! Status transitions are single guarded `UPDATE ... WHERE status = ANY(...)`
//! statements, so two concurrent requests cannot both move the same
//! timesheet.

use chrono::Weekday;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        permission::Permission,
        timesheet::{
            CreateTimesheetRequest, EntryRequest, Timesheet, TimesheetEntry, TimesheetListQuery,
            TimesheetResponse, TimesheetStatus, UpdateTimesheetRequest,
        },
    },
    services::{audit_service, billing_period::BillingPeriod, visibility::TimesheetScope},
};

/// Check a full set of entries for one timesheet week.
///
/// # Rules
///
/// - service date inside the week
/// - end time after start time
/// - non-empty service code
/// - no two sessions overlapping on the same day
pub fn validate_entries(week: &BillingPeriod, entries: &[EntryRequest]) -> Result<(), AppError> {
    for entry in entries {
        if !week.contains(entry.service_date) {
            return Err(AppError::InvalidRequest(format!(
                "Service date {} is outside the week {} to {}",
                entry.service_date, week.start, week.end
            )));
        }
        if entry.end_time <= entry.start_time {
            return Err(AppError::InvalidRequest(format!(
                "Session on {} ends before it starts",
                entry.service_date
            )));
        }
        if entry.service_code.trim().is_empty() {
            return Err(AppError::InvalidRequest(
                "Service code is required".to_string(),
            ));
        }
    }

    let mut sorted: Vec<&EntryRequest> = entries.iter().collect();
    sorted.sort_by_key(|e| (e.service_date, e.start_time));
    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        if prev.service_date == next.service_date && next.start_time < prev.end_time {
            return Err(AppError::InvalidRequest(format!(
                "Sessions overlap on {}",
                next.service_date
            )));
        }
    }
    Ok(())
}

fn ensure_editable(timesheet: &Timesheet) -> Result<(), AppError> {
    if timesheet.status.is_editable() {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "Timesheet is {} and can no longer be edited",
            timesheet.status
        )))
    }
}

/// Only the authoring provider (or a provider manager) may change a timesheet.
fn ensure_author(ctx: &AuthContext, timesheet: &Timesheet) -> Result<(), AppError> {
    if ctx.has(Permission::ProvidersManage) {
        return Ok(());
    }
    ctx.require(Permission::TimesheetsEditOwn)?;
    if ctx.provider_id == Some(timesheet.provider_id) {
        Ok(())
    } else {
        Err(AppError::Forbidden(Permission::TimesheetsEditOwn.as_str()))
    }
}

pub async fn list(
    pool: &DbPool,
    ctx: &AuthContext,
    query: &TimesheetListQuery,
) -> Result<Vec<Timesheet>, AppError> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT t.* FROM timesheets t WHERE ");
    TimesheetScope::resolve(ctx).push_filter(&mut qb);

    if let Some(status) = query.status {
        qb.push(" AND t.status = ").push_bind(status.as_str());
    }
    if let Some(client_id) = query.client_id {
        qb.push(" AND t.client_id = ").push_bind(client_id);
    }
    if let Some(provider_id) = query.provider_id {
        qb.push(" AND t.provider_id = ").push_bind(provider_id);
    }
    if let Some(from) = query.week_from {
        qb.push(" AND t.week_start >= ").push_bind(from);
    }
    if let Some(to) = query.week_to {
        qb.push(" AND t.week_start <= ").push_bind(to);
    }
    qb.push(" ORDER BY t.week_start DESC, t.created_at DESC");

    let timesheets = qb.build_query_as::<Timesheet>().fetch_all(pool).await?;
    Ok(timesheets)
}

/// Load a timesheet the caller may see; anything else is `NotFound`.
async fn load_visible(
    pool: &DbPool,
    ctx: &AuthContext,
    timesheet_id: Uuid,
) -> Result<Timesheet, AppError> {
    let timesheet = sqlx::query_as::<_, Timesheet>("SELECT * FROM timesheets WHERE id = $1")
        .bind(timesheet_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Timesheet"))?;

    let supervisor: Option<Uuid> =
        sqlx::query_scalar("SELECT supervisor_user_id FROM clients WHERE id = $1")
            .bind(timesheet.client_id)
            .fetch_one(pool)
            .await?;

    if TimesheetScope::resolve(ctx).permits(&timesheet, supervisor) {
        Ok(timesheet)
    } else {
        Err(AppError::NotFound("Timesheet"))
    }
}

async fn entries_for(pool: &DbPool, timesheet_id: Uuid) -> Result<Vec<TimesheetEntry>, AppError> {
    let entries = sqlx::query_as::<_, TimesheetEntry>(
        "SELECT * FROM timesheet_entries WHERE timesheet_id = $1 ORDER BY service_date, start_time",
    )
    .bind(timesheet_id)
    .fetch_all(pool)
    .await?;
    Ok(entries)
}

pub async fn get(
    pool: &DbPool,
    ctx: &AuthContext,
    timesheet_id: Uuid,
) -> Result<TimesheetResponse, AppError> {
    let timesheet = load_visible(pool, ctx, timesheet_id).await?;
    let entries = entries_for(pool, timesheet_id).await?;
    Ok(TimesheetResponse::new(timesheet, entries))
}

async fn insert_entries(
    conn: &mut sqlx::PgConnection,
    timesheet_id: Uuid,
    entries: &[EntryRequest],
) -> Result<(), AppError> {
    if entries.is_empty() {
        return Ok(());
    }
    let mut qb = QueryBuilder::<Postgres>::new(
        "INSERT INTO timesheet_entries (timesheet_id, service_date, start_time, end_time, service_code, notes) ",
    );
    qb.push_values(entries, |mut row, entry| {
        row.push_bind(timesheet_id)
            .push_bind(entry.service_date)
            .push_bind(entry.start_time)
            .push_bind(entry.end_time)
            .push_bind(entry.service_code.trim().to_string())
            .push_bind(entry.notes.clone());
    });
    qb.build().execute(conn).await?;
    Ok(())
}

pub async fn create(
    pool: &DbPool,
    ctx: &AuthContext,
    request: CreateTimesheetRequest,
    week_start_day: Weekday,
) -> Result<TimesheetResponse, AppError> {
    ctx.require_any(&[Permission::TimesheetsEditOwn, Permission::ProvidersManage])?;

    let provider_id = match (request.provider_id, ctx.provider_id) {
        (Some(requested), own) if Some(requested) != own => {
            ctx.require(Permission::ProvidersManage)?;
            requested
        }
        (Some(requested), _) => requested,
        (None, Some(own)) => own,
        (None, None) => {
            return Err(AppError::InvalidRequest(
                "provider_id is required for users without a provider record".to_string(),
            ));
        }
    };

    let week = BillingPeriod::week_containing(request.week_start, week_start_day);
    if week.start != request.week_start {
        return Err(AppError::InvalidRequest(format!(
            "week_start must be a {week_start_day}; the week containing {} starts {}",
            request.week_start, week.start
        )));
    }
    validate_entries(&week, &request.entries)?;

    let client_active: Option<bool> =
        sqlx::query_scalar("SELECT is_active FROM clients WHERE id = $1")
            .bind(request.client_id)
            .fetch_optional(pool)
            .await?;
    match client_active {
        None => return Err(AppError::NotFound("Client")),
        Some(false) => return Err(AppError::InvalidState("Client is inactive".to_string())),
        Some(true) => {}
    }

    let provider_active: Option<bool> =
        sqlx::query_scalar("SELECT is_active FROM providers WHERE id = $1")
            .bind(provider_id)
            .fetch_optional(pool)
            .await?;
    match provider_active {
        None => return Err(AppError::NotFound("Provider")),
        Some(false) => return Err(AppError::InvalidState("Provider is inactive".to_string())),
        Some(true) => {}
    }

    let mut tx = pool.begin().await?;

    let timesheet = sqlx::query_as::<_, Timesheet>(
        r#"
        INSERT INTO timesheets (provider_id, client_id, week_start, notes)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(provider_id)
    .bind(request.client_id)
    .bind(request.week_start)
    .bind(request.notes)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| {
        AppError::conflict_on_unique(e, "A timesheet already exists for this provider, client and week")
    })?;

    insert_entries(&mut tx, timesheet.id, &request.entries).await?;

    audit_service::record(
        &mut *tx,
        Some(ctx.user_id),
        "timesheet.created",
        "timesheet",
        timesheet.id,
        None,
    )
    .await?;

    tx.commit().await?;

    let entries = entries_for(pool, timesheet.id).await?;
    Ok(TimesheetResponse::new(timesheet, entries))
}

/// Edit notes and/or replace all entries. Editing a rejected timesheet
/// returns it to draft.
pub async fn update(
    pool: &DbPool,
    ctx: &AuthContext,
    timesheet_id: Uuid,
    request: UpdateTimesheetRequest,
    week_start_day: Weekday,
) -> Result<TimesheetResponse, AppError> {
    let current = load_visible(pool, ctx, timesheet_id).await?;
    ensure_author(ctx, &current)?;
    ensure_editable(&current)?;

    if let Some(entries) = &request.entries {
        let week = BillingPeriod::week_containing(current.week_start, week_start_day);
        validate_entries(&week, entries)?;
    }

    let mut tx = pool.begin().await?;

    let timesheet = sqlx::query_as::<_, Timesheet>(
        r#"
        UPDATE timesheets
        SET notes = COALESCE($2, notes),
            status = 'draft',
            rejection_reason = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('draft', 'rejected')
        RETURNING *
        "#,
    )
    .bind(timesheet_id)
    .bind(request.notes)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| {
        AppError::InvalidState("Timesheet changed while editing; nothing was written".to_string())
    })?;

    if let Some(entries) = &request.entries {
        sqlx::query("DELETE FROM timesheet_entries WHERE timesheet_id = $1")
            .bind(timesheet_id)
            .execute(&mut *tx)
            .await?;
        insert_entries(&mut tx, timesheet_id, entries).await?;
    }

    audit_service::record(
        &mut *tx,
        Some(ctx.user_id),
        "timesheet.updated",
        "timesheet",
        timesheet_id,
        None,
    )
    .await?;

    tx.commit().await?;

    let entries = entries_for(pool, timesheet_id).await?;
    Ok(TimesheetResponse::new(timesheet, entries))
}

pub async fn delete(pool: &DbPool, ctx: &AuthContext, timesheet_id: Uuid) -> Result<(), AppError> {
    let current = load_visible(pool, ctx, timesheet_id).await?;
    ensure_author(ctx, &current)?;

    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM timesheets WHERE id = $1 AND status = 'draft'")
        .bind(timesheet_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    if deleted == 0 {
        tx.rollback().await?;
        return Err(AppError::InvalidState(
            "Only draft timesheets can be deleted".to_string(),
        ));
    }

    audit_service::record(
        &mut *tx,
        Some(ctx.user_id),
        "timesheet.deleted",
        "timesheet",
        timesheet_id,
        Some(serde_json::json!({
            "provider_id": current.provider_id,
            "client_id": current.client_id,
            "week_start": current.week_start,
        })),
    )
    .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn submit(
    pool: &DbPool,
    ctx: &AuthContext,
    timesheet_id: Uuid,
) -> Result<Timesheet, AppError> {
    let current = load_visible(pool, ctx, timesheet_id).await?;
    ensure_author(ctx, &current)?;

    let entry_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM timesheet_entries WHERE timesheet_id = $1")
            .bind(timesheet_id)
            .fetch_one(pool)
            .await?;
    if entry_count == 0 {
        return Err(AppError::InvalidState(
            "Cannot submit a timesheet without entries".to_string(),
        ));
    }

    transition(
        pool,
        ctx,
        &current,
        &[TimesheetStatus::Draft, TimesheetStatus::Rejected],
        "timesheet.submitted",
        r#"
        UPDATE timesheets
        SET status = 'submitted', submitted_at = NOW(), rejection_reason = NULL, updated_at = NOW()
        WHERE id = $1 AND status = ANY($2)
        RETURNING *
        "#,
        None,
    )
    .await
}

pub async fn approve(
    pool: &DbPool,
    ctx: &AuthContext,
    timesheet_id: Uuid,
) -> Result<Timesheet, AppError> {
    ctx.require(Permission::TimesheetsApprove)?;
    let current = load_visible(pool, ctx, timesheet_id).await?;

    if ctx.provider_id == Some(current.provider_id) {
        return Err(AppError::InvalidState(
            "Providers cannot approve their own timesheets".to_string(),
        ));
    }

    transition(
        pool,
        ctx,
        &current,
        &[TimesheetStatus::Submitted],
        "timesheet.approved",
        r#"
        UPDATE timesheets
        SET status = 'approved', approved_at = NOW(), approved_by = $3::uuid, updated_at = NOW()
        WHERE id = $1 AND status = ANY($2)
        RETURNING *
        "#,
        Some(ctx.user_id.to_string()),
    )
    .await
}

pub async fn reject(
    pool: &DbPool,
    ctx: &AuthContext,
    timesheet_id: Uuid,
    reason: String,
) -> Result<Timesheet, AppError> {
    ctx.require(Permission::TimesheetsApprove)?;
    let reason = reason.trim().to_string();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest(
            "A rejection reason is required".to_string(),
        ));
    }
    let current = load_visible(pool, ctx, timesheet_id).await?;

    transition(
        pool,
        ctx,
        &current,
        &[TimesheetStatus::Submitted],
        "timesheet.rejected",
        r#"
        UPDATE timesheets
        SET status = 'rejected', rejection_reason = $3, updated_at = NOW()
        WHERE id = $1 AND status = ANY($2)
        RETURNING *
        "#,
        Some(reason),
    )
    .await
}

/// Run a guarded status update and audit it in one transaction.
///
/// `sql` binds `$1` = id, `$2` = allowed current statuses and, when
/// `extra` is set, `$3` = extra (cast by the statement as needed).
async fn transition(
    pool: &DbPool,
    ctx: &AuthContext,
    current: &Timesheet,
    from: &[TimesheetStatus],
    action: &str,
    sql: &str,
    extra: Option<String>,
) -> Result<Timesheet, AppError> {
    let allowed: Vec<&str> = from.iter().map(TimesheetStatus::as_str).collect();
    let mut tx = pool.begin().await?;

    let mut query = sqlx::query_as::<_, Timesheet>(sql)
        .bind(current.id)
        .bind(&allowed);
    if let Some(extra) = extra {
        query = query.bind(extra);
    }

    let timesheet = query.fetch_optional(&mut *tx).await?.ok_or_else(|| {
        AppError::InvalidState(format!(
            "Timesheet is {}; expected {}",
            current.status,
            allowed.join(" or ")
        ))
    })?;

    audit_service::record(
        &mut *tx,
        Some(ctx.user_id),
        action,
        "timesheet",
        timesheet.id,
        Some(serde_json::json!({ "from": current.status, "to": timesheet.status })),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(timesheet_id = %timesheet.id, from = %current.status, to = %timesheet.status, "timesheet transition");

    Ok(timesheet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::tests::context_with;
    use chrono::{NaiveDate, NaiveTime, Utc};

    fn week() -> BillingPeriod {
        BillingPeriod::week_containing(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(), Weekday::Sun)
    }

    fn entry(day: u32, start: u32, end: u32) -> EntryRequest {
        EntryRequest {
            service_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            start_time: NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(end, 0, 0).unwrap(),
            service_code: "97153".to_string(),
            notes: None,
        }
    }

    fn timesheet(provider_id: Uuid) -> Timesheet {
        Timesheet {
            id: Uuid::new_v4(),
            provider_id,
            client_id: Uuid::new_v4(),
            week_start: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            status: TimesheetStatus::Draft,
            notes: None,
            submitted_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
            invoice_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn only_draft_and_rejected_timesheets_are_editable() {
        let mut sheet = timesheet(Uuid::new_v4());
        for status in [TimesheetStatus::Draft, TimesheetStatus::Rejected] {
            sheet.status = status;
            assert!(ensure_editable(&sheet).is_ok());
        }
        for status in [
            TimesheetStatus::Submitted,
            TimesheetStatus::Approved,
            TimesheetStatus::Invoiced,
        ] {
            sheet.status = status;
            assert!(matches!(
                ensure_editable(&sheet),
                Err(AppError::InvalidState(msg)) if msg.contains(status.as_str())
            ));
        }
    }

    #[test]
    fn accepts_back_to_back_sessions() {
        let entries = vec![entry(3, 9, 11), entry(3, 11, 13), entry(8, 9, 10)];
        assert!(validate_entries(&week(), &entries).is_ok());
    }

    #[test]
    fn rejects_dates_outside_the_week() {
        let entries = vec![entry(9, 9, 10)];
        assert!(matches!(
            validate_entries(&week(), &entries),
            Err(AppError::InvalidRequest(msg)) if msg.contains("outside the week")
        ));
    }

    #[test]
    fn rejects_inverted_times() {
        assert!(validate_entries(&week(), &[entry(3, 11, 9)]).is_err());
        assert!(validate_entries(&week(), &[entry(3, 9, 9)]).is_err());
    }

    #[test]
    fn rejects_overlapping_sessions() {
        let entries = vec![entry(4, 13, 15), entry(4, 9, 14)];
        assert!(matches!(
            validate_entries(&week(), &entries),
            Err(AppError::InvalidRequest(msg)) if msg.contains("overlap")
        ));
    }

    #[test]
    fn rejects_blank_service_code() {
        let mut blank = entry(3, 9, 10);
        blank.service_code = "  ".to_string();
        assert!(validate_entries(&week(), &[blank]).is_err());
    }

    #[test]
    fn author_check_requires_matching_provider() {
        let provider_id = Uuid::new_v4();
        let own = context_with(&[Permission::TimesheetsEditOwn], Some(provider_id));
        assert!(ensure_author(&own, &timesheet(provider_id)).is_ok());
        assert!(ensure_author(&own, &timesheet(Uuid::new_v4())).is_err());

        let manager = context_with(&[Permission::ProvidersManage], None);
        assert!(ensure_author(&manager, &timesheet(provider_id)).is_ok());

        let viewer = context_with(&[Permission::TimesheetsViewOwn], Some(provider_id));
        assert!(ensure_author(&viewer, &timesheet(provider_id)).is_err());
    }
}
