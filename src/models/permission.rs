//! Permission keys granted to roles.
//!
//! Roles carry a set of permission keys in `role_permissions`. The keys are
//! stored as text so new roles can be composed without a migration, but the
//! application only ever checks the keys listed here.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Permission {
    /// See every timesheet in the practice
    TimesheetsViewAll,
    /// See timesheets for clients the user supervises
    TimesheetsViewSupervised,
    /// See timesheets authored by the user's own provider record
    TimesheetsViewOwn,
    /// Create, edit and submit own timesheets
    TimesheetsEditOwn,
    /// Approve or reject submitted timesheets the user can see
    TimesheetsApprove,
    InvoicesView,
    /// Trigger invoice generation for a billing period
    InvoicesGenerate,
    /// Void invoices and record adjustments
    InvoicesManage,
    PaymentsRecord,
    ClientsView,
    ClientsManage,
    ProvidersManage,
    UsersManage,
    RolesManage,
    AuditView,
}

impl Permission {
    pub const ALL: [Permission; 15] = [
        Permission::TimesheetsViewAll,
        Permission::TimesheetsViewSupervised,
        Permission::TimesheetsViewOwn,
        Permission::TimesheetsEditOwn,
        Permission::TimesheetsApprove,
        Permission::InvoicesView,
        Permission::InvoicesGenerate,
        Permission::InvoicesManage,
        Permission::PaymentsRecord,
        Permission::ClientsView,
        Permission::ClientsManage,
        Permission::ProvidersManage,
        Permission::UsersManage,
        Permission::RolesManage,
        Permission::AuditView,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::TimesheetsViewAll => "timesheets.view_all",
            Permission::TimesheetsViewSupervised => "timesheets.view_supervised",
            Permission::TimesheetsViewOwn => "timesheets.view_own",
            Permission::TimesheetsEditOwn => "timesheets.edit_own",
            Permission::TimesheetsApprove => "timesheets.approve",
            Permission::InvoicesView => "invoices.view",
            Permission::InvoicesGenerate => "invoices.generate",
            Permission::InvoicesManage => "invoices.manage",
            Permission::PaymentsRecord => "payments.record",
            Permission::ClientsView => "clients.view",
            Permission::ClientsManage => "clients.manage",
            Permission::ProvidersManage => "providers.manage",
            Permission::UsersManage => "users.manage",
            Permission::RolesManage => "roles.manage",
            Permission::AuditView => "audit.view",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown permission '{0}'")]
pub struct UnknownPermission(pub String);

impl FromStr for Permission {
    type Err = UnknownPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPermission(s.to_string()))
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_unique_and_parse_back() {
        let mut seen = std::collections::HashSet::new();
        for permission in Permission::ALL {
            assert!(seen.insert(permission.as_str()));
            assert_eq!(permission.as_str().parse::<Permission>().unwrap(), permission);
        }
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = "timesheets.delete_everything".parse::<Permission>().unwrap_err();
        assert_eq!(err.to_string(), "unknown permission 'timesheets.delete_everything'");
    }

    #[test]
    fn deserializes_from_json_string() {
        let parsed: Vec<Permission> =
            serde_json::from_str(r#"["invoices.view", "audit.view"]"#).unwrap();
        assert_eq!(parsed, vec![Permission::InvoicesView, Permission::AuditView]);
    }
}
