//! Invoice, payment and adjustment endpoints.
//!
//! - GET /api/v1/invoices - List invoices
//! - POST /api/v1/invoices/generate - Run invoice generation for a billing week
//! - GET /api/v1/invoices/{id} - Invoice with lines, payments and balance
//! - POST /api/v1/invoices/{id}/void - Void an unpaid invoice
//! - POST /api/v1/invoices/{id}/payments - Record a payment
//! - POST /api/v1/invoices/{id}/adjustments - Record a write-off or correction

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        invoice::{
            GenerateInvoicesRequest, Invoice, InvoiceListQuery, InvoiceResponse,
            RecordAdjustmentRequest, RecordPaymentRequest,
        },
        permission::Permission,
    },
    services::{billing_period::BillingPeriod, invoice_service, payment_service},
    state::BillingSettings,
};

pub async fn list_invoices(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<InvoiceListQuery>,
) -> Result<Json<Vec<Invoice>>, AppError> {
    auth.require(Permission::InvoicesView)?;
    let invoices = invoice_service::list_invoices(&pool, &query).await?;
    Ok(Json(invoices))
}

pub async fn get_invoice(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<InvoiceResponse>, AppError> {
    auth.require(Permission::InvoicesView)?;
    let invoice = invoice_service::get_invoice(&pool, invoice_id).await?;
    Ok(Json(invoice))
}

/// Generate invoices.
///
/// # Request Body
///
/// ```json
/// { "period_start": "2025-03-02" }
/// ```
///
/// An empty body bills the most recent complete week in the practice
/// timezone. Approved timesheets from earlier weeks that were never
/// invoiced are picked up by the same run.
///
/// # Response (201)
///
/// A summary listing each created invoice; an empty `invoices` array
/// when nothing was billable.
pub async fn generate_invoices(
    State(pool): State<DbPool>,
    State(billing): State<BillingSettings>,
    Extension(auth): Extension<AuthContext>,
    request: Option<Json<GenerateInvoicesRequest>>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::InvoicesGenerate)?;

    let request = request.map(|Json(r)| r).unwrap_or_default();
    let period = match request.period_start {
        Some(date) => BillingPeriod::week_containing(date, billing.week_start),
        None => BillingPeriod::previous_week(Utc::now(), billing.timezone, billing.week_start),
    };

    let summary =
        invoice_service::generate_invoices(&pool, period, billing.unit_minutes, Some(auth.user_id))
            .await?;

    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn void_invoice(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(invoice_id): Path<Uuid>,
) -> Result<Json<Invoice>, AppError> {
    auth.require(Permission::InvoicesManage)?;
    let invoice = invoice_service::void_invoice(&pool, invoice_id, auth.user_id).await?;
    Ok(Json(invoice))
}

/// Record a payment against an invoice.
///
/// # Response
///
/// - **201 Created**: the payment
/// - **400**: non-positive amount or more than the outstanding balance
/// - **422**: the invoice is void
pub async fn record_payment(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::PaymentsRecord)?;
    let payment =
        payment_service::record_payment(&pool, invoice_id, request, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn record_adjustment(
    State(pool): State<DbPool>,
    Extension(auth): Extension<AuthContext>,
    Path(invoice_id): Path<Uuid>,
    Json(request): Json<RecordAdjustmentRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth.require(Permission::InvoicesManage)?;
    let adjustment =
        payment_service::record_adjustment(&pool, invoice_id, request, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(adjustment)))
}
