//! Timesheet endpoints.
//!
//! Every read and write is filtered through the caller's visibility scope;
//! a timesheet outside it answers 404 exactly like a missing one.

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
    models::timesheet::{
        CreateTimesheetRequest, RejectTimesheetRequest, Timesheet, TimesheetListQuery,
        TimesheetResponse, UpdateTimesheetRequest,
    },
    services::timesheet_service,
    state::BillingSettings,
};

/// List visible timesheets.
///
/// # Query Parameters
///
/// - `status`: draft | submitted | approved | rejected | invoiced
/// - `client_id`, `provider_id`
/// - `week_from`, `week_to`: inclusive bounds on `week_start`
pub async fn list_timesheets(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<TimesheetListQuery>,
) -> Result<Json<Vec<Timesheet>>, AppError> {
    let timesheets = timesheet_service::list(&pool, &auth, &query).await?;
    Ok(Json(timesheets))
}

pub async fn get_timesheet(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(timesheet_id): Path<Uuid>,
) -> Result<Json<TimesheetResponse>, AppError> {
    let timesheet = timesheet_service::get(&pool, &auth, timesheet_id).await?;
    Ok(Json(timesheet))
}

/// Create a draft timesheet.
///
/// # Response
///
/// - **201 Created**: the timesheet with its entries
/// - **400**: `week_start` is not a billing week boundary, or an entry is invalid
/// - **409**: a timesheet already exists for this provider, client and week
pub async fn create_timesheet(
    State(pool): State<DbPool>,
    State(billing): State<BillingSettings>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateTimesheetRequest>,
) -> Result<impl IntoResponse, AppError> {
    let timesheet =
        timesheet_service::create(&pool, &auth, request, billing.week_start).await?;
    Ok((StatusCode::CREATED, Json(timesheet)))
}

pub async fn update_timesheet(
    State(pool): State<DbPool>,
    State(billing): State<BillingSettings>,
    Extension(auth): Extension<AuthContext>,
    Path(timesheet_id): Path<Uuid>,
    Json(request): Json<UpdateTimesheetRequest>,
) -> Result<Json<TimesheetResponse>, AppError> {
    let timesheet =
        timesheet_service::update(&pool, &auth, timesheet_id, request, billing.week_start)
            .await?;
    Ok(Json(timesheet))
}

pub async fn delete_timesheet(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(timesheet_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    timesheet_service::delete(&pool, &auth, timesheet_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn submit_timesheet(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(timesheet_id): Path<Uuid>,
) -> Result<Json<Timesheet>, AppError> {
    let timesheet = timesheet_service::submit(&pool, &auth, timesheet_id).await?;
    Ok(Json(timesheet))
}

pub async fn approve_timesheet(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(timesheet_id): Path<Uuid>,
) -> Result<Json<Timesheet>, AppError> {
    let timesheet = timesheet_service::approve(&pool, &auth, timesheet_id).await?;
    Ok(Json(timesheet))
}

/// Send a submitted timesheet back to its author with a reason.
pub async fn reject_timesheet(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(timesheet_id): Path<Uuid>,
    Json(request): Json<RejectTimesheetRequest>,
) -> Result<Json<Timesheet>, AppError> {
    let timesheet =
        timesheet_service::reject(&pool, &auth, timesheet_id, request.reason).await?;
    Ok(Json(timesheet))
}
