//! Payments and adjustments against invoices.
//!
//! Each write locks the invoice row, re-derives the balance from the
//! recorded money, and stores the new invoice status in the same
//! transaction.

use sqlx::{PgConnection, Postgres, Transaction};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::invoice::{
        Adjustment, Invoice, InvoiceStatus, Payment, RecordAdjustmentRequest,
        RecordPaymentRequest, balance,
    },
    services::audit_service,
};

#[derive(Debug, Clone, Copy)]
struct Totals {
    adjustments_cents: i64,
    paid_cents: i64,
}

async fn lock_open_invoice(
    tx: &mut Transaction<'_, Postgres>,
    invoice_id: Uuid,
) -> Result<Invoice, AppError> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(AppError::NotFound("Invoice"))?;

    if invoice.status == InvoiceStatus::Void {
        return Err(AppError::InvalidState("Invoice is void".to_string()));
    }
    Ok(invoice)
}

async fn totals(conn: &mut PgConnection, invoice_id: Uuid) -> Result<Totals, AppError> {
    let (adjustments_cents, paid_cents): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COALESCE((SELECT SUM(amount_cents) FROM adjustments WHERE invoice_id = $1), 0)::BIGINT,
            COALESCE((SELECT SUM(amount_cents) FROM payments WHERE invoice_id = $1), 0)::BIGINT
        "#,
    )
    .bind(invoice_id)
    .fetch_one(conn)
    .await?;

    Ok(Totals {
        adjustments_cents,
        paid_cents,
    })
}

async fn store_status(
    conn: &mut PgConnection,
    invoice: &Invoice,
    totals: Totals,
) -> Result<InvoiceStatus, AppError> {
    let status =
        InvoiceStatus::from_amounts(invoice.total_cents, totals.adjustments_cents, totals.paid_cents);
    if status != invoice.status {
        sqlx::query("UPDATE invoices SET status = $2 WHERE id = $1")
            .bind(invoice.id)
            .bind(status.as_str())
            .execute(conn)
            .await?;
    }
    Ok(status)
}

/// Check a payment against the current balance.
pub fn validate_payment(amount_cents: i64, balance_cents: i64) -> Result<(), AppError> {
    if amount_cents <= 0 {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    if amount_cents > balance_cents {
        return Err(AppError::InvalidRequest(format!(
            "Payment of {amount_cents} cents exceeds the outstanding balance of {balance_cents} cents"
        )));
    }
    Ok(())
}

/// An adjustment may not push the balance below zero.
pub fn validate_adjustment(amount_cents: i64, balance_cents: i64) -> Result<(), AppError> {
    if amount_cents == 0 {
        return Err(AppError::InvalidRequest(
            "Adjustment amount must be non-zero".to_string(),
        ));
    }
    if balance_cents + amount_cents < 0 {
        return Err(AppError::InvalidRequest(
            "Adjustment would leave a negative balance".to_string(),
        ));
    }
    Ok(())
}

pub async fn record_payment(
    pool: &DbPool,
    invoice_id: Uuid,
    request: RecordPaymentRequest,
    actor: Uuid,
) -> Result<Payment, AppError> {
    let method = request.method.trim().to_lowercase();
    if method.is_empty() {
        return Err(AppError::InvalidRequest("Payment method is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    let invoice = lock_open_invoice(&mut tx, invoice_id).await?;
    let before = totals(&mut tx, invoice_id).await?;

    validate_payment(
        request.amount_cents,
        balance(invoice.total_cents, before.adjustments_cents, before.paid_cents),
    )?;

    let payment = sqlx::query_as::<_, Payment>(
        r#"
        INSERT INTO payments (invoice_id, amount_cents, method, reference, received_on, recorded_by)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(request.amount_cents)
    .bind(&method)
    .bind(request.reference)
    .bind(request.received_on)
    .bind(actor)
    .fetch_one(&mut *tx)
    .await?;

    let after = Totals {
        paid_cents: before.paid_cents + payment.amount_cents,
        ..before
    };
    let status = store_status(&mut tx, &invoice, after).await?;

    audit_service::record(
        &mut *tx,
        Some(actor),
        "payment.recorded",
        "invoice",
        invoice_id,
        Some(serde_json::json!({
            "payment_id": payment.id,
            "amount_cents": payment.amount_cents,
            "status": status,
        })),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(invoice_id = %invoice_id, amount_cents = payment.amount_cents, %status, "payment recorded");

    Ok(payment)
}

pub async fn record_adjustment(
    pool: &DbPool,
    invoice_id: Uuid,
    request: RecordAdjustmentRequest,
    actor: Uuid,
) -> Result<Adjustment, AppError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest("Adjustment reason is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    let invoice = lock_open_invoice(&mut tx, invoice_id).await?;
    let before = totals(&mut tx, invoice_id).await?;

    validate_adjustment(
        request.amount_cents,
        balance(invoice.total_cents, before.adjustments_cents, before.paid_cents),
    )?;

    let adjustment = sqlx::query_as::<_, Adjustment>(
        r#"
        INSERT INTO adjustments (invoice_id, amount_cents, reason, recorded_by)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(invoice_id)
    .bind(request.amount_cents)
    .bind(reason)
    .bind(actor)
    .fetch_one(&mut *tx)
    .await?;

    let after = Totals {
        adjustments_cents: before.adjustments_cents + adjustment.amount_cents,
        ..before
    };
    let status = store_status(&mut tx, &invoice, after).await?;

    audit_service::record(
        &mut *tx,
        Some(actor),
        "adjustment.recorded",
        "invoice",
        invoice_id,
        Some(serde_json::json!({
            "adjustment_id": adjustment.id,
            "amount_cents": adjustment.amount_cents,
            "reason": adjustment.reason,
            "status": status,
        })),
    )
    .await?;

    tx.commit().await?;
    Ok(adjustment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_must_be_positive() {
        assert!(matches!(
            validate_payment(0, 10_000),
            Err(AppError::InvalidRequest(_))
        ));
        assert!(validate_payment(-5, 10_000).is_err());
    }

    #[test]
    fn payment_cannot_exceed_balance() {
        assert!(validate_payment(10_000, 10_000).is_ok());
        assert!(validate_payment(10_001, 10_000).is_err());
    }

    #[test]
    fn adjustment_cannot_go_negative() {
        assert!(validate_adjustment(-10_000, 10_000).is_ok());
        assert!(validate_adjustment(-10_001, 10_000).is_err());
        assert!(validate_adjustment(2_500, 0).is_ok());
        assert!(validate_adjustment(0, 10_000).is_err());
    }
}
