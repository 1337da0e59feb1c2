//! Client (patient) and provider (therapist) records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Tell an explicit `null` apart from an absent field.
///
/// Absent stays `None` through `#[serde(default)]`, `null` becomes
/// `Some(None)` and a value becomes `Some(Some(v))`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A client receiving therapy services.
///
/// # Billing
///
/// `rate_per_unit_cents` is the amount billed per service unit. Invoices
/// copy the rate at generation time, so changing it never rewrites history.
///
/// # Visibility
///
/// `supervisor_user_id` is the supervising BCBA. Users holding
/// `timesheets.view_supervised` see every timesheet for their clients.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub billing_email: Option<String>,
    pub insurance_name: Option<String>,
    pub rate_per_unit_cents: i64,
    pub supervisor_user_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub billing_email: Option<String>,
    pub insurance_name: Option<String>,
    pub rate_per_unit_cents: i64,
    pub supervisor_user_id: Option<Uuid>,
}

/// Partial update; absent fields are left unchanged.
///
/// `supervisor_user_id: null` removes the supervisor.
#[derive(Debug, Deserialize)]
pub struct UpdateClientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub billing_email: Option<String>,
    pub insurance_name: Option<String>,
    pub rate_per_unit_cents: Option<i64>,
    #[serde(default, deserialize_with = "nullable")]
    pub supervisor_user_id: Option<Option<Uuid>>,
    pub is_active: Option<bool>,
}

/// A provider delivering services. Linked to at most one user account.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Provider {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    /// RBT, BCaBA, BCBA, ...
    pub credential: Option<String>,
    pub npi: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateProviderRequest {
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub credential: Option<String>,
    pub npi: Option<String>,
}

/// Partial update. `user_id: null` unlinks the user account.
#[derive(Debug, Deserialize)]
pub struct UpdateProviderRequest {
    #[serde(default, deserialize_with = "nullable")]
    pub user_id: Option<Option<Uuid>>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub credential: Option<String>,
    pub npi: Option<String>,
    pub is_active: Option<bool>,
}

/// Query string for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ActiveFilter {
    #[serde(default)]
    pub include_inactive: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_supervisor_clears_and_absent_keeps() {
        let keep: UpdateClientRequest = serde_json::from_str(r#"{"first_name":"Sam"}"#).unwrap();
        assert_eq!(keep.supervisor_user_id, None);

        let clear: UpdateClientRequest =
            serde_json::from_str(r#"{"supervisor_user_id":null}"#).unwrap();
        assert_eq!(clear.supervisor_user_id, Some(None));

        let id = Uuid::new_v4();
        let set: UpdateClientRequest =
            serde_json::from_value(serde_json::json!({ "supervisor_user_id": id })).unwrap();
        assert_eq!(set.supervisor_user_id, Some(Some(id)));
    }

    #[test]
    fn null_user_unlinks_provider() {
        let clear: UpdateProviderRequest = serde_json::from_str(r#"{"user_id":null}"#).unwrap();
        assert_eq!(clear.user_id, Some(None));

        let keep: UpdateProviderRequest = serde_json::from_str(r#"{"is_active":false}"#).unwrap();
        assert_eq!(keep.user_id, None);
        assert_eq!(keep.is_active, Some(false));
    }
}
