//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and complex operations.

pub mod audit_service;
pub mod auth_service;
pub mod billing_period;
pub mod email_service;
pub mod invoice_service;
pub mod payment_service;
pub mod scheduler;
pub mod timesheet_service;
pub mod visibility;
