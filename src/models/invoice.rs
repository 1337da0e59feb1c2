//! Invoice, payment and adjustment models.
//!
//! Amounts are `i64` cents. An invoice balance is
//! `total_cents + Σ adjustments - Σ payments`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Open,
    PartiallyPaid,
    Paid,
    Void,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Open => "open",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Void => "void",
        }
    }

    /// Status implied by the money recorded against a non-void invoice.
    pub fn from_amounts(total_cents: i64, adjustments_cents: i64, paid_cents: i64) -> Self {
        let due = total_cents + adjustments_cents;
        if paid_cents <= 0 {
            if due <= 0 {
                InvoiceStatus::Paid
            } else {
                InvoiceStatus::Open
            }
        } else if paid_cents >= due {
            InvoiceStatus::Paid
        } else {
            InvoiceStatus::PartiallyPaid
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown invoice status '{0}'")]
pub struct UnknownInvoiceStatus(pub String);

impl FromStr for InvoiceStatus {
    type Err = UnknownInvoiceStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(InvoiceStatus::Open),
            "partially_paid" => Ok(InvoiceStatus::PartiallyPaid),
            "paid" => Ok(InvoiceStatus::Paid),
            "void" => Ok(InvoiceStatus::Void),
            other => Err(UnknownInvoiceStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for InvoiceStatus {
    type Error = UnknownInvoiceStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Represents an invoice record from the database.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Human-facing number, `INV-<year>-<seq>`
    pub invoice_number: String,
    pub client_id: Uuid,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_units: i32,
    pub total_cents: i64,
    #[sqlx(try_from = "String")]
    pub status: InvoiceStatus,
    pub issued_at: DateTime<Utc>,
    pub voided_at: Option<DateTime<Utc>>,
}

/// One billed session, copied from a timesheet entry at generation time.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct InvoiceEntry {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub timesheet_id: Uuid,
    pub timesheet_entry_id: Uuid,
    pub provider_id: Uuid,
    pub service_date: NaiveDate,
    pub service_code: String,
    pub minutes: i32,
    pub units: i32,
    pub rate_cents: i64,
    pub amount_cents: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    /// check, eft, card, insurance, ...
    pub method: String,
    pub reference: Option<String>,
    pub received_on: NaiveDate,
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Signed correction to an invoice total (write-off, late fee, ...).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Adjustment {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount_cents: i64,
    pub reason: String,
    pub recorded_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Request to record a payment.
///
/// ```json
/// {
///   "amount_cents": 45000,
///   "method": "check",
///   "reference": "#10442",
///   "received_on": "2025-03-20"
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct RecordPaymentRequest {
    pub amount_cents: i64,
    pub method: String,
    pub reference: Option<String>,
    pub received_on: NaiveDate,
}

#[derive(Debug, Deserialize)]
pub struct RecordAdjustmentRequest {
    pub amount_cents: i64,
    pub reason: String,
}

/// Manual trigger for invoice generation.
///
/// `period_start` selects the billing week containing that date; when
/// omitted the most recent complete week is used.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateInvoicesRequest {
    pub period_start: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceListQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
}

/// Invoice with its lines, money movements and running balance.
#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    #[serde(flatten)]
    pub invoice: Invoice,
    pub entries: Vec<InvoiceEntry>,
    pub payments: Vec<Payment>,
    pub adjustments: Vec<Adjustment>,
    pub balance_cents: i64,
}

impl InvoiceResponse {
    pub fn new(
        invoice: Invoice,
        entries: Vec<InvoiceEntry>,
        payments: Vec<Payment>,
        adjustments: Vec<Adjustment>,
    ) -> Self {
        let balance_cents = balance(
            invoice.total_cents,
            adjustments.iter().map(|a| a.amount_cents).sum(),
            payments.iter().map(|p| p.amount_cents).sum(),
        );
        Self {
            invoice,
            entries,
            payments,
            adjustments,
            balance_cents,
        }
    }
}

pub fn balance(total_cents: i64, adjustments_cents: i64, paid_cents: i64) -> i64 {
    total_cents + adjustments_cents - paid_cents
}

/// Outcome of one invoice generation run.
#[derive(Debug, Default, Serialize)]
pub struct GenerationSummary {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub invoices: Vec<GeneratedInvoice>,
    pub timesheets_locked: usize,
    /// Clients that had approved timesheets but nothing billable in the period
    pub skipped_clients: Vec<Uuid>,
    /// Approved timesheets left for a later run because they hold sessions after `period_end`
    pub deferred_timesheets: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct GeneratedInvoice {
    pub invoice_id: Uuid,
    pub invoice_number: String,
    pub client_id: Uuid,
    pub total_units: i32,
    pub total_cents: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_follows_payments() {
        assert_eq!(InvoiceStatus::from_amounts(10_000, 0, 0), InvoiceStatus::Open);
        assert_eq!(
            InvoiceStatus::from_amounts(10_000, 0, 2_500),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(InvoiceStatus::from_amounts(10_000, 0, 10_000), InvoiceStatus::Paid);
    }

    #[test]
    fn nothing_due_is_paid() {
        assert_eq!(InvoiceStatus::from_amounts(0, 0, 0), InvoiceStatus::Paid);
    }

    #[test]
    fn write_off_to_zero_marks_paid() {
        assert_eq!(
            InvoiceStatus::from_amounts(10_000, -10_000, 0),
            InvoiceStatus::Paid
        );
    }

    #[test]
    fn adjustments_move_the_balance() {
        assert_eq!(balance(10_000, 1_500, 4_000), 7_500);
        assert_eq!(balance(10_000, -2_000, 8_000), 0);
    }
}
