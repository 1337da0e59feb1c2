//! Data models representing database entities and API bodies.

/// Audit trail and email queue
pub mod audit;
/// Clients and providers
pub mod client;
/// Invoices, payments and adjustments
pub mod invoice;
pub mod permission;
pub mod timesheet;
/// Users, roles and authentication bodies
pub mod user;
