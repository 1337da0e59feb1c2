//! Timesheet data models and API request/response types.
//!
//! A timesheet covers one provider's sessions with one client during one
//! billing week. Entries are the individual sessions.
//!
//! # Status machine
//!
//! ```text
//! draft ──submit──> submitted ──approve──> approved ──invoice──> invoiced
//!   ^                   │                     ^                     │
//!   └──edit── rejected <┘ reject              └────── void ─────────┘
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimesheetStatus {
    Draft,
    Submitted,
    Approved,
    Rejected,
    /// Locked: attached to an invoice
    Invoiced,
}

impl TimesheetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimesheetStatus::Draft => "draft",
            TimesheetStatus::Submitted => "submitted",
            TimesheetStatus::Approved => "approved",
            TimesheetStatus::Rejected => "rejected",
            TimesheetStatus::Invoiced => "invoiced",
        }
    }

    /// Entries may only change while the provider still owns the timesheet.
    pub fn is_editable(&self) -> bool {
        matches!(self, TimesheetStatus::Draft | TimesheetStatus::Rejected)
    }
}

impl fmt::Display for TimesheetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown timesheet status '{0}'")]
pub struct UnknownTimesheetStatus(pub String);

impl FromStr for TimesheetStatus {
    type Err = UnknownTimesheetStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(TimesheetStatus::Draft),
            "submitted" => Ok(TimesheetStatus::Submitted),
            "approved" => Ok(TimesheetStatus::Approved),
            "rejected" => Ok(TimesheetStatus::Rejected),
            "invoiced" => Ok(TimesheetStatus::Invoiced),
            other => Err(UnknownTimesheetStatus(other.to_string())),
        }
    }
}

impl TryFrom<String> for TimesheetStatus {
    type Error = UnknownTimesheetStatus;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Represents a timesheet record from the database.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Timesheet {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub client_id: Uuid,

    /// First day of the billing week this timesheet covers
    pub week_start: NaiveDate,

    #[sqlx(try_from = "String")]
    pub status: TimesheetStatus,

    pub notes: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<Uuid>,
    pub rejection_reason: Option<String>,

    /// Set exactly when status is `invoiced`
    pub invoice_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One therapy session on a timesheet.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TimesheetEntry {
    pub id: Uuid,
    pub timesheet_id: Uuid,
    pub service_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// CPT code billed for the session (e.g. 97153)
    pub service_code: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TimesheetEntry {
    /// Session length in whole minutes.
    pub fn minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }
}

/// Request body for creating a timesheet.
///
/// ```json
/// {
///   "client_id": "550e8400-...",
///   "week_start": "2025-03-02",
///   "provider_id": "660e8400-...",   // optional, defaults to caller's provider
///   "entries": [
///     { "service_date": "2025-03-03", "start_time": "09:00:00",
///       "end_time": "11:00:00", "service_code": "97153" }
///   ]
/// }
/// ```
#[derive(Debug, Deserialize)]
pub struct CreateTimesheetRequest {
    pub client_id: Uuid,
    pub week_start: NaiveDate,
    pub provider_id: Option<Uuid>,
    pub notes: Option<String>,
    #[serde(default)]
    pub entries: Vec<EntryRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntryRequest {
    pub service_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub service_code: String,
    pub notes: Option<String>,
}

/// Replaces notes and, when present, the full entry list.
#[derive(Debug, Deserialize)]
pub struct UpdateTimesheetRequest {
    pub notes: Option<String>,
    pub entries: Option<Vec<EntryRequest>>,
}

#[derive(Debug, Deserialize)]
pub struct RejectTimesheetRequest {
    pub reason: String,
}

/// Query string for `GET /api/v1/timesheets`.
#[derive(Debug, Default, Deserialize)]
pub struct TimesheetListQuery {
    pub status: Option<TimesheetStatus>,
    pub client_id: Option<Uuid>,
    pub provider_id: Option<Uuid>,
    pub week_from: Option<NaiveDate>,
    pub week_to: Option<NaiveDate>,
}

/// Timesheet with its entries and computed totals.
#[derive(Debug, Serialize)]
pub struct TimesheetResponse {
    #[serde(flatten)]
    pub timesheet: Timesheet,
    pub entries: Vec<TimesheetEntry>,
    pub total_minutes: i64,
}

impl TimesheetResponse {
    pub fn new(timesheet: Timesheet, entries: Vec<TimesheetEntry>) -> Self {
        let total_minutes = entries.iter().map(TimesheetEntry::minutes).sum();
        Self {
            timesheet,
            entries,
            total_minutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_draft_and_rejected_are_editable() {
        assert!(TimesheetStatus::Draft.is_editable());
        assert!(TimesheetStatus::Rejected.is_editable());
        assert!(!TimesheetStatus::Submitted.is_editable());
        assert!(!TimesheetStatus::Approved.is_editable());
        assert!(!TimesheetStatus::Invoiced.is_editable());
    }

    #[test]
    fn status_parses_from_database_text() {
        assert_eq!(
            TimesheetStatus::try_from("invoiced".to_string()).unwrap(),
            TimesheetStatus::Invoiced
        );
        assert!(TimesheetStatus::try_from("archived".to_string()).is_err());
    }

    #[test]
    fn status_query_param_uses_snake_case() {
        let query: TimesheetListQuery =
            serde_json::from_str(r#"{"status": "submitted"}"#).unwrap();
        assert_eq!(query.status, Some(TimesheetStatus::Submitted));
    }

    #[test]
    fn entry_minutes_span_start_to_end() {
        let entry = TimesheetEntry {
            id: Uuid::new_v4(),
            timesheet_id: Uuid::new_v4(),
            service_date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            start_time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(10, 38, 0).unwrap(),
            service_code: "97153".to_string(),
            notes: None,
            created_at: Utc::now(),
        };
        assert_eq!(entry.minutes(), 98);
    }
}
