//! Invoice generation and lifecycle.
//!
//! # Weekly generation
//!
//! 1. Lock every approved, un-invoiced timesheet whose week starts on or
//!    before the end of the billing period (`FOR UPDATE`)
//! 2. Decide what to bill (pure, see `plan_run`): timesheets holding a
//!    session after the period end wait for a later run, the rest are
//!    grouped per client and priced
//! 3. Insert one invoice per client with billable units, plus its lines
//! 4. Flip the timesheets to `invoiced`, guarded by `status = 'approved'`
//! 5. Audit and queue a notification email
//! 6. Commit
//!
//! Everything happens in one database transaction: a failure leaves no
//! partial invoice and no locked timesheet. Running the same period twice
//! finds no approved timesheets the second time, and voiding an invoice
//! puts its timesheets back to `approved`. Both rely on the guarded
//! updates and the `timesheets` status/invoice CHECK constraint, so they
//! are exercised against a live database rather than in unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate, NaiveTime};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    db::DbPool,
    error::AppError,
    models::{
        invoice::{
            Adjustment, GeneratedInvoice, GenerationSummary, Invoice, InvoiceEntry,
            InvoiceListQuery, InvoiceResponse, InvoiceStatus, Payment,
        },
        timesheet::TimesheetEntry,
    },
    services::{
        audit_service, billing_period::BillingPeriod, billing_period::billable_units,
        email_service,
    },
};

/// A timesheet entry ready to be priced.
#[derive(Debug, Clone)]
pub struct BillableEntry {
    pub timesheet_id: Uuid,
    pub entry_id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,
    pub week_start: NaiveDate,
    pub service_date: NaiveDate,
    pub start_time: NaiveTime,
    pub service_code: String,
    pub minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftLine {
    pub timesheet_id: Uuid,
    pub entry_id: Uuid,
    pub provider_id: Uuid,
    pub service_date: NaiveDate,
    pub service_code: String,
    pub minutes: i32,
    pub units: i32,
    pub rate_cents: i64,
    pub amount_cents: i64,
}

/// Everything one client will be billed for in a run.
#[derive(Debug, Clone)]
pub struct DraftInvoice {
    pub client_id: Uuid,
    pub earliest_week: NaiveDate,
    pub lines: Vec<DraftLine>,
    pub timesheet_ids: Vec<Uuid>,
    pub total_units: i32,
    pub total_cents: i64,
}

impl DraftInvoice {
    pub fn is_billable(&self) -> bool {
        self.total_units > 0
    }

    /// Status stored at insert. A zero-rate client owes nothing, so its
    /// invoice is settled from the start.
    pub fn initial_status(&self) -> InvoiceStatus {
        InvoiceStatus::from_amounts(self.total_cents, 0, 0)
    }
}

/// An approved timesheet picked up by a run.
#[derive(Debug, Clone, Copy)]
pub struct CandidateTimesheet {
    pub id: Uuid,
    pub client_id: Uuid,
}

/// What a run will write, decided before anything is written.
#[derive(Debug, Default)]
pub struct RunPlan {
    /// One billable draft per client
    pub invoices: Vec<DraftInvoice>,
    /// Clients with approved timesheets in the run but no billable units
    pub skipped_clients: Vec<Uuid>,
    /// Timesheets with a session after the period end; they stay `approved`
    pub deferred_timesheets: Vec<Uuid>,
}

/// Split a run into invoices, skipped clients and deferred timesheets.
///
/// A timesheet is billed whole or not at all: one session past
/// `period_end` holds the entire timesheet back for a later period.
pub fn plan_run(
    timesheets: &[CandidateTimesheet],
    entries: &[BillableEntry],
    rates: &HashMap<Uuid, i64>,
    unit_minutes: u32,
    period_end: NaiveDate,
) -> RunPlan {
    let deferred: BTreeSet<Uuid> = entries
        .iter()
        .filter(|e| e.service_date > period_end)
        .map(|e| e.timesheet_id)
        .collect();

    let in_period: Vec<BillableEntry> = entries
        .iter()
        .filter(|e| !deferred.contains(&e.timesheet_id))
        .cloned()
        .collect();

    let invoices: Vec<DraftInvoice> = group_by_client(&in_period, rates, unit_minutes)
        .into_iter()
        .filter(DraftInvoice::is_billable)
        .collect();
    let billed: BTreeSet<Uuid> = invoices.iter().map(|d| d.client_id).collect();

    let skipped_clients: BTreeSet<Uuid> = timesheets
        .iter()
        .filter(|t| !deferred.contains(&t.id) && !billed.contains(&t.client_id))
        .map(|t| t.client_id)
        .collect();

    RunPlan {
        invoices,
        skipped_clients: skipped_clients.into_iter().collect(),
        deferred_timesheets: deferred.into_iter().collect(),
    }
}

/// Group priced entries by client.
///
/// Output is ordered by client id, lines by date then start time, so two
/// runs over the same input produce identical invoices.
pub fn group_by_client(
    entries: &[BillableEntry],
    rates: &HashMap<Uuid, i64>,
    unit_minutes: u32,
) -> Vec<DraftInvoice> {
    let mut per_client: BTreeMap<Uuid, Vec<&BillableEntry>> = BTreeMap::new();
    for entry in entries {
        per_client.entry(entry.client_id).or_default().push(entry);
    }

    per_client
        .into_iter()
        .map(|(client_id, mut client_entries)| {
            client_entries.sort_by_key(|e| (e.service_date, e.start_time, e.entry_id));
            let rate_cents = rates.get(&client_id).copied().unwrap_or(0);

            let lines: Vec<DraftLine> = client_entries
                .iter()
                .map(|e| {
                    let units = billable_units(e.minutes, unit_minutes);
                    DraftLine {
                        timesheet_id: e.timesheet_id,
                        entry_id: e.entry_id,
                        provider_id: e.provider_id,
                        service_date: e.service_date,
                        service_code: e.service_code.clone(),
                        minutes: i32::try_from(e.minutes).unwrap_or(i32::MAX),
                        units,
                        rate_cents,
                        amount_cents: units as i64 * rate_cents,
                    }
                })
                .collect();

            let timesheet_ids: BTreeSet<Uuid> =
                client_entries.iter().map(|e| e.timesheet_id).collect();
            let earliest_week = client_entries
                .iter()
                .map(|e| e.week_start)
                .min()
                .unwrap_or(NaiveDate::MIN);

            DraftInvoice {
                client_id,
                earliest_week,
                total_units: lines.iter().map(|l| l.units).sum(),
                total_cents: lines.iter().map(|l| l.amount_cents).sum(),
                lines,
                timesheet_ids: timesheet_ids.into_iter().collect(),
            }
        })
        .collect()
}

pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("INV-{year}-{sequence:06}")
}

/// Longest subject the mail relay accepts.
const MAX_SUBJECT_CHARS: usize = 255;

/// Subject and body of the notification queued for a new invoice.
pub fn invoice_email(invoice: &Invoice, client_name: &str) -> (String, String) {
    let subject: String = format!("Invoice {} for {}", invoice.invoice_number, client_name)
        .chars()
        .take(MAX_SUBJECT_CHARS)
        .collect();
    let body = format!(
        "Invoice {} covers services from {} to {}.\nUnits: {}\nAmount due: ${}.{:02}\n",
        invoice.invoice_number,
        invoice.period_start,
        invoice.period_end,
        invoice.total_units,
        invoice.total_cents / 100,
        invoice.total_cents % 100,
    );
    (subject, body)
}

#[derive(Debug, sqlx::FromRow)]
struct LockedTimesheet {
    id: Uuid,
    client_id: Uuid,
    provider_id: Uuid,
    week_start: NaiveDate,
    rate_per_unit_cents: i64,
    billing_email: Option<String>,
    client_name: String,
}

/// Invoice every approved timesheet up to the end of `period`.
///
/// `actor` is `None` when the scheduler runs the job.
pub async fn generate_invoices(
    pool: &DbPool,
    period: BillingPeriod,
    unit_minutes: u32,
    actor: Option<Uuid>,
) -> Result<GenerationSummary, AppError> {
    let mut tx = pool.begin().await?;

    let locked = sqlx::query_as::<_, LockedTimesheet>(
        r#"
        SELECT t.id, t.client_id, t.provider_id, t.week_start,
               c.rate_per_unit_cents, c.billing_email,
               c.first_name || ' ' || c.last_name AS client_name
        FROM timesheets t
        JOIN clients c ON c.id = t.client_id
        WHERE t.status = 'approved'
          AND t.invoice_id IS NULL
          AND t.week_start <= $1
        ORDER BY t.client_id, t.week_start
        FOR UPDATE OF t
        "#,
    )
    .bind(period.end)
    .fetch_all(&mut *tx)
    .await?;

    let mut summary = GenerationSummary {
        period_start: period.start,
        period_end: period.end,
        ..Default::default()
    };

    if locked.is_empty() {
        tx.commit().await?;
        tracing::info!(period_start = %period.start, period_end = %period.end, "no approved timesheets to invoice");
        return Ok(summary);
    }

    let timesheet_ids: Vec<Uuid> = locked.iter().map(|t| t.id).collect();
    let entries = sqlx::query_as::<_, TimesheetEntry>(
        "SELECT * FROM timesheet_entries WHERE timesheet_id = ANY($1)",
    )
    .bind(&timesheet_ids)
    .fetch_all(&mut *tx)
    .await?;

    let by_id: HashMap<Uuid, &LockedTimesheet> = locked.iter().map(|t| (t.id, t)).collect();
    let billable: Vec<BillableEntry> = entries
        .iter()
        .filter_map(|e| {
            let sheet = by_id.get(&e.timesheet_id)?;
            Some(BillableEntry {
                timesheet_id: sheet.id,
                entry_id: e.id,
                provider_id: sheet.provider_id,
                client_id: sheet.client_id,
                week_start: sheet.week_start,
                service_date: e.service_date,
                start_time: e.start_time,
                service_code: e.service_code.clone(),
                minutes: e.minutes(),
            })
        })
        .collect();

    let candidates: Vec<CandidateTimesheet> = locked
        .iter()
        .map(|t| CandidateTimesheet {
            id: t.id,
            client_id: t.client_id,
        })
        .collect();
    let rates: HashMap<Uuid, i64> = locked
        .iter()
        .map(|t| (t.client_id, t.rate_per_unit_cents))
        .collect();
    let clients: HashMap<Uuid, &LockedTimesheet> =
        locked.iter().map(|t| (t.client_id, t)).collect();

    let plan = plan_run(&candidates, &billable, &rates, unit_minutes, period.end);
    summary.skipped_clients = plan.skipped_clients;
    summary.deferred_timesheets = plan.deferred_timesheets;

    for draft in plan.invoices {
        let sequence: i64 = sqlx::query_scalar("SELECT nextval('invoice_number_seq')")
            .fetch_one(&mut *tx)
            .await?;
        let invoice_number = format_invoice_number(period.end.year(), sequence);
        let period_start = draft.earliest_week.min(period.start);

        let invoice = sqlx::query_as::<_, Invoice>(
            r#"
            INSERT INTO invoices (invoice_number, client_id, period_start, period_end,
                                  total_units, total_cents, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&invoice_number)
        .bind(draft.client_id)
        .bind(period_start)
        .bind(period.end)
        .bind(draft.total_units)
        .bind(draft.total_cents)
        .bind(draft.initial_status().as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut lines = QueryBuilder::<Postgres>::new(
            "INSERT INTO invoice_entries (invoice_id, timesheet_id, timesheet_entry_id, provider_id, \
             service_date, service_code, minutes, units, rate_cents, amount_cents) ",
        );
        lines.push_values(&draft.lines, |mut row, line| {
            row.push_bind(invoice.id)
                .push_bind(line.timesheet_id)
                .push_bind(line.entry_id)
                .push_bind(line.provider_id)
                .push_bind(line.service_date)
                .push_bind(line.service_code.clone())
                .push_bind(line.minutes)
                .push_bind(line.units)
                .push_bind(line.rate_cents)
                .push_bind(line.amount_cents);
        });
        lines.build().execute(&mut *tx).await?;

        let locked_count = sqlx::query(
            r#"
            UPDATE timesheets
            SET status = 'invoiced', invoice_id = $1, updated_at = NOW()
            WHERE id = ANY($2) AND status = 'approved'
            "#,
        )
        .bind(invoice.id)
        .bind(&draft.timesheet_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if locked_count as usize != draft.timesheet_ids.len() {
            tx.rollback().await?;
            return Err(AppError::InvalidState(
                "Timesheets changed while invoicing; nothing was written".to_string(),
            ));
        }

        audit_service::record(
            &mut *tx,
            actor,
            "invoice.generated",
            "invoice",
            invoice.id,
            Some(serde_json::json!({
                "invoice_number": invoice.invoice_number,
                "timesheets": draft.timesheet_ids,
                "total_units": invoice.total_units,
                "total_cents": invoice.total_cents,
            })),
        )
        .await?;

        if let Some(client) = clients.get(&draft.client_id) {
            if let Some(email) = &client.billing_email {
                let (subject, body) = invoice_email(&invoice, &client.client_name);
                email_service::enqueue(&mut *tx, email, &subject, &body).await?;
            }
        }

        summary.timesheets_locked += draft.timesheet_ids.len();
        summary.invoices.push(GeneratedInvoice {
            invoice_id: invoice.id,
            invoice_number: invoice.invoice_number,
            client_id: invoice.client_id,
            total_units: invoice.total_units,
            total_cents: invoice.total_cents,
        });
    }

    tx.commit().await?;

    tracing::info!(
        period_start = %period.start,
        period_end = %period.end,
        invoices = summary.invoices.len(),
        timesheets = summary.timesheets_locked,
        skipped = summary.skipped_clients.len(),
        deferred = summary.deferred_timesheets.len(),
        "invoice generation complete"
    );

    Ok(summary)
}

pub async fn list_invoices(pool: &DbPool, query: &InvoiceListQuery) -> Result<Vec<Invoice>, AppError> {
    let invoices = sqlx::query_as::<_, Invoice>(
        r#"
        SELECT * FROM invoices
        WHERE ($1::uuid IS NULL OR client_id = $1)
          AND ($2::text IS NULL OR status = $2)
        ORDER BY issued_at DESC
        "#,
    )
    .bind(query.client_id)
    .bind(query.status.map(|s| s.as_str()))
    .fetch_all(pool)
    .await?;

    Ok(invoices)
}

pub async fn get_invoice(pool: &DbPool, invoice_id: Uuid) -> Result<InvoiceResponse, AppError> {
    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
        .bind(invoice_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::NotFound("Invoice"))?;

    let entries = sqlx::query_as::<_, InvoiceEntry>(
        "SELECT * FROM invoice_entries WHERE invoice_id = $1 ORDER BY service_date, id",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;

    let payments = sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY received_on, created_at",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;

    let adjustments = sqlx::query_as::<_, Adjustment>(
        "SELECT * FROM adjustments WHERE invoice_id = $1 ORDER BY created_at",
    )
    .bind(invoice_id)
    .fetch_all(pool)
    .await?;

    Ok(InvoiceResponse::new(invoice, entries, payments, adjustments))
}

/// Void an unpaid invoice and release its timesheets back to `approved`,
/// so the next run bills them again.
pub async fn void_invoice(
    pool: &DbPool,
    invoice_id: Uuid,
    actor: Uuid,
) -> Result<Invoice, AppError> {
    let mut tx = pool.begin().await?;

    let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1 FOR UPDATE")
        .bind(invoice_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Invoice"))?;

    if invoice.status == InvoiceStatus::Void {
        tx.rollback().await?;
        return Err(AppError::InvalidState("Invoice is already void".to_string()));
    }

    let has_payments: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE invoice_id = $1)")
            .bind(invoice_id)
            .fetch_one(&mut *tx)
            .await?;

    if has_payments {
        tx.rollback().await?;
        return Err(AppError::InvalidState(
            "Invoices with recorded payments cannot be voided".to_string(),
        ));
    }

    let invoice = sqlx::query_as::<_, Invoice>(
        "UPDATE invoices SET status = 'void', voided_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(invoice_id)
    .fetch_one(&mut *tx)
    .await?;

    let released = sqlx::query(
        r#"
        UPDATE timesheets
        SET status = 'approved', invoice_id = NULL, updated_at = NOW()
        WHERE invoice_id = $1
        "#,
    )
    .bind(invoice_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    audit_service::record(
        &mut *tx,
        Some(actor),
        "invoice.voided",
        "invoice",
        invoice_id,
        Some(serde_json::json!({ "timesheets_released": released })),
    )
    .await?;

    tx.commit().await?;
    tracing::info!(invoice_id = %invoice_id, released, "invoice voided");

    Ok(invoice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    fn time(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn entry(client_id: Uuid, timesheet_id: Uuid, day: u32, hour: u32, minutes: i64) -> BillableEntry {
        BillableEntry {
            timesheet_id,
            entry_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            client_id,
            week_start: date(2),
            service_date: date(day),
            start_time: time(hour),
            service_code: "97153".to_string(),
            minutes,
        }
    }

    #[test]
    fn groups_entries_per_client_and_prices_units() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let alice_sheet = Uuid::new_v4();
        let bob_sheet = Uuid::new_v4();

        let entries = vec![
            entry(alice, alice_sheet, 3, 9, 120),
            entry(bob, bob_sheet, 4, 13, 53),
            entry(alice, alice_sheet, 5, 9, 67),
        ];
        let rates = HashMap::from([(alice, 2_000), (bob, 1_500)]);

        let drafts = group_by_client(&entries, &rates, 15);
        assert_eq!(drafts.len(), 2);

        let alice_draft = drafts.iter().find(|d| d.client_id == alice).unwrap();
        assert_eq!(alice_draft.lines.len(), 2);
        assert_eq!(alice_draft.total_units, 8 + 4);
        assert_eq!(alice_draft.total_cents, 12 * 2_000);
        assert_eq!(alice_draft.timesheet_ids, vec![alice_sheet]);

        let bob_draft = drafts.iter().find(|d| d.client_id == bob).unwrap();
        // 53 minutes: 3 full units, 8 minute remainder rounds up
        assert_eq!(bob_draft.total_units, 4);
        assert_eq!(bob_draft.total_cents, 6_000);
    }

    #[test]
    fn lines_are_ordered_by_date_and_time() {
        let client = Uuid::new_v4();
        let sheet = Uuid::new_v4();
        let entries = vec![
            entry(client, sheet, 6, 14, 60),
            entry(client, sheet, 3, 15, 60),
            entry(client, sheet, 3, 9, 60),
        ];
        let drafts = group_by_client(&entries, &HashMap::from([(client, 100)]), 15);

        let order: Vec<(NaiveDate, i32)> = drafts[0]
            .lines
            .iter()
            .map(|l| (l.service_date, l.units))
            .collect();
        assert_eq!(order, vec![(date(3), 4), (date(3), 4), (date(6), 4)]);
        assert_eq!(drafts[0].lines[0].entry_id, entries[2].entry_id);
    }

    #[test]
    fn short_sessions_are_not_billable() {
        let client = Uuid::new_v4();
        let entries = vec![entry(client, Uuid::new_v4(), 3, 9, 5)];
        let drafts = group_by_client(&entries, &HashMap::from([(client, 2_000)]), 15);

        assert_eq!(drafts.len(), 1);
        assert!(!drafts[0].is_billable());
        assert_eq!(drafts[0].total_cents, 0);
    }

    #[test]
    fn timesheets_are_deduplicated_per_client() {
        let client = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let entries = vec![
            entry(client, first, 3, 9, 60),
            entry(client, second, 3, 13, 60),
            entry(client, first, 4, 9, 60),
        ];
        let drafts = group_by_client(&entries, &HashMap::from([(client, 100)]), 15);

        let mut expected = vec![first, second];
        expected.sort();
        assert_eq!(drafts[0].timesheet_ids, expected);
    }

    #[test]
    fn earliest_week_tracks_late_approvals() {
        let client = Uuid::new_v4();
        let mut late = entry(client, Uuid::new_v4(), 3, 9, 60);
        late.week_start = NaiveDate::from_ymd_opt(2025, 2, 23).unwrap();
        let entries = vec![entry(client, Uuid::new_v4(), 4, 9, 60), late];

        let drafts = group_by_client(&entries, &HashMap::from([(client, 100)]), 15);
        assert_eq!(
            drafts[0].earliest_week,
            NaiveDate::from_ymd_opt(2025, 2, 23).unwrap()
        );
    }

    fn candidate(id: Uuid, client_id: Uuid) -> CandidateTimesheet {
        CandidateTimesheet { id, client_id }
    }

    #[test]
    fn plan_skips_clients_without_billable_units() {
        let billed = Uuid::new_v4();
        let too_short = Uuid::new_v4();
        let empty = Uuid::new_v4();
        let (billed_sheet, short_sheet, empty_sheet) =
            (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let timesheets = [
            candidate(billed_sheet, billed),
            candidate(short_sheet, too_short),
            candidate(empty_sheet, empty),
        ];
        let entries = vec![
            entry(billed, billed_sheet, 3, 9, 60),
            entry(too_short, short_sheet, 3, 9, 5),
        ];
        let rates = HashMap::from([(billed, 1_000), (too_short, 1_000), (empty, 1_000)]);

        let plan = plan_run(&timesheets, &entries, &rates, 15, date(8));

        assert_eq!(plan.invoices.len(), 1);
        assert_eq!(plan.invoices[0].client_id, billed);
        let mut expected = vec![too_short, empty];
        expected.sort();
        assert_eq!(plan.skipped_clients, expected);
        assert!(plan.deferred_timesheets.is_empty());
    }

    #[test]
    fn plan_defers_timesheets_with_sessions_after_period_end() {
        let client = Uuid::new_v4();
        let inside = Uuid::new_v4();
        let straddling = Uuid::new_v4();

        let timesheets = [candidate(inside, client), candidate(straddling, client)];
        let entries = vec![
            entry(client, inside, 3, 9, 60),
            entry(client, straddling, 7, 9, 60),
            entry(client, straddling, 10, 9, 60),
        ];
        let rates = HashMap::from([(client, 1_000)]);

        let plan = plan_run(&timesheets, &entries, &rates, 15, date(8));

        assert_eq!(plan.deferred_timesheets, vec![straddling]);
        assert_eq!(plan.invoices.len(), 1);
        assert_eq!(plan.invoices[0].timesheet_ids, vec![inside]);
        assert_eq!(plan.invoices[0].total_units, 4);
        assert!(
            plan.invoices[0]
                .lines
                .iter()
                .all(|l| l.service_date <= date(8))
        );
        assert!(plan.skipped_clients.is_empty());
    }

    #[test]
    fn deferred_client_is_not_reported_as_skipped() {
        let client = Uuid::new_v4();
        let sheet = Uuid::new_v4();
        let plan = plan_run(
            &[candidate(sheet, client)],
            &[entry(client, sheet, 9, 9, 60)],
            &HashMap::from([(client, 1_000)]),
            15,
            date(8),
        );

        assert!(plan.invoices.is_empty());
        assert!(plan.skipped_clients.is_empty());
        assert_eq!(plan.deferred_timesheets, vec![sheet]);
    }

    #[test]
    fn zero_rate_invoice_starts_paid() {
        let client = Uuid::new_v4();
        let entries = vec![entry(client, Uuid::new_v4(), 3, 9, 60)];

        let free = group_by_client(&entries, &HashMap::from([(client, 0)]), 15);
        assert!(free[0].is_billable());
        assert_eq!(free[0].initial_status(), InvoiceStatus::Paid);

        let priced = group_by_client(&entries, &HashMap::from([(client, 1_875)]), 15);
        assert_eq!(priced[0].initial_status(), InvoiceStatus::Open);
    }

    #[test]
    fn email_subject_fits_the_queue_column() {
        let invoice = Invoice {
            id: Uuid::new_v4(),
            invoice_number: format_invoice_number(2025, 7),
            client_id: Uuid::new_v4(),
            period_start: date(2),
            period_end: date(8),
            total_units: 12,
            total_cents: 22_500,
            status: InvoiceStatus::Open,
            issued_at: chrono::Utc::now(),
            voided_at: None,
        };

        let (subject, body) = invoice_email(&invoice, "Sam Rivera");
        assert_eq!(subject, "Invoice INV-2025-000007 for Sam Rivera");
        assert!(body.contains("Amount due: $225.00"));

        // Both name columns at full width, with multi-byte characters.
        let long_name = format!("{} {}", "é".repeat(128), "ü".repeat(128));
        let (subject, _) = invoice_email(&invoice, &long_name);
        assert_eq!(subject.chars().count(), MAX_SUBJECT_CHARS);
        assert!(subject.starts_with("Invoice INV-2025-000007 for é"));
    }

    #[test]
    fn invoice_numbers_are_zero_padded() {
        assert_eq!(format_invoice_number(2025, 42), "INV-2025-000042");
        assert_eq!(format_invoice_number(2026, 1_234_567), "INV-2026-1234567");
    }
}
