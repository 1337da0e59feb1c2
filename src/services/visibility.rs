//! Timesheet visibility scoping.
//!
//! Every timesheet query goes through `TimesheetScope` so list endpoints,
//! single-record lookups and approvals agree on what a user may see.
//! Records outside the scope are reported as not found rather than forbidden.

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{
    middleware::auth::AuthContext,
    models::{permission::Permission, timesheet::Timesheet},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimesheetScope {
    /// Every timesheet in the practice
    All,
    /// Union of the granted narrow scopes; at least one is `Some`
    Restricted {
        /// Clients whose supervisor is this user
        supervisor: Option<Uuid>,
        /// Timesheets authored by this provider
        provider: Option<Uuid>,
    },
    Nothing,
}

impl TimesheetScope {
    pub fn resolve(ctx: &AuthContext) -> Self {
        if ctx.has(Permission::TimesheetsViewAll) {
            return TimesheetScope::All;
        }

        let supervisor = ctx
            .has(Permission::TimesheetsViewSupervised)
            .then_some(ctx.user_id);
        let provider = if ctx.has(Permission::TimesheetsViewOwn) {
            ctx.provider_id
        } else {
            None
        };

        if supervisor.is_none() && provider.is_none() {
            TimesheetScope::Nothing
        } else {
            TimesheetScope::Restricted {
                supervisor,
                provider,
            }
        }
    }

    /// Append a predicate over the timesheet table aliased as `t`.
    pub fn push_filter(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match *self {
            TimesheetScope::All => {
                qb.push("TRUE");
            }
            TimesheetScope::Nothing => {
                qb.push("FALSE");
            }
            TimesheetScope::Restricted {
                supervisor,
                provider,
            } => {
                qb.push("(");
                let mut first = true;
                if let Some(user_id) = supervisor {
                    qb.push("t.client_id IN (SELECT id FROM clients WHERE supervisor_user_id = ");
                    qb.push_bind(user_id);
                    qb.push(")");
                    first = false;
                }
                if let Some(provider_id) = provider {
                    if !first {
                        qb.push(" OR ");
                    }
                    qb.push("t.provider_id = ");
                    qb.push_bind(provider_id);
                }
                qb.push(")");
            }
        }
    }

    /// In-memory check for a single loaded timesheet.
    pub fn permits(&self, timesheet: &Timesheet, client_supervisor: Option<Uuid>) -> bool {
        match *self {
            TimesheetScope::All => true,
            TimesheetScope::Nothing => false,
            TimesheetScope::Restricted {
                supervisor,
                provider,
            } => {
                let supervised = supervisor.is_some() && supervisor == client_supervisor;
                let own = provider == Some(timesheet.provider_id);
                supervised || own
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::tests::context_with;
    use crate::models::timesheet::TimesheetStatus;
    use chrono::{NaiveDate, Utc};

    fn timesheet(provider_id: Uuid) -> Timesheet {
        Timesheet {
            id: Uuid::new_v4(),
            provider_id,
            client_id: Uuid::new_v4(),
            week_start: NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
            status: TimesheetStatus::Submitted,
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

    fn filter_sql(scope: TimesheetScope) -> String {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT t.* FROM timesheets t WHERE ");
        scope.push_filter(&mut qb);
        qb.sql().to_string()
    }

    #[test]
    fn view_all_wins_over_narrow_grants() {
        let ctx = context_with(
            &[Permission::TimesheetsViewAll, Permission::TimesheetsViewOwn],
            Some(Uuid::new_v4()),
        );
        assert_eq!(TimesheetScope::resolve(&ctx), TimesheetScope::All);
        assert!(filter_sql(TimesheetScope::All).ends_with("WHERE TRUE"));
    }

    #[test]
    fn no_grants_sees_nothing() {
        let ctx = context_with(&[Permission::InvoicesView], None);
        let scope = TimesheetScope::resolve(&ctx);
        assert_eq!(scope, TimesheetScope::Nothing);
        assert!(filter_sql(scope).ends_with("WHERE FALSE"));
        assert!(!scope.permits(&timesheet(Uuid::new_v4()), None));
    }

    #[test]
    fn view_own_without_provider_link_sees_nothing() {
        let ctx = context_with(&[Permission::TimesheetsViewOwn], None);
        assert_eq!(TimesheetScope::resolve(&ctx), TimesheetScope::Nothing);
    }

    #[test]
    fn own_scope_matches_provider_only() {
        let provider_id = Uuid::new_v4();
        let ctx = context_with(&[Permission::TimesheetsViewOwn], Some(provider_id));
        let scope = TimesheetScope::resolve(&ctx);

        assert_eq!(
            filter_sql(scope),
            "SELECT t.* FROM timesheets t WHERE (t.provider_id = $1)"
        );
        assert!(scope.permits(&timesheet(provider_id), None));
        assert!(!scope.permits(&timesheet(Uuid::new_v4()), None));
    }

    #[test]
    fn supervisor_and_own_scopes_union() {
        let provider_id = Uuid::new_v4();
        let ctx = context_with(
            &[
                Permission::TimesheetsViewSupervised,
                Permission::TimesheetsViewOwn,
            ],
            Some(provider_id),
        );
        let scope = TimesheetScope::resolve(&ctx);

        assert_eq!(
            filter_sql(scope),
            "SELECT t.* FROM timesheets t WHERE (t.client_id IN (SELECT id FROM clients \
             WHERE supervisor_user_id = $1) OR t.provider_id = $2)"
        );

        let someone_else = timesheet(Uuid::new_v4());
        assert!(scope.permits(&someone_else, Some(ctx.user_id)));
        assert!(!scope.permits(&someone_else, Some(Uuid::new_v4())));
        assert!(!scope.permits(&someone_else, None));
        assert!(scope.permits(&timesheet(provider_id), None));
    }
}
