//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Checks the caller's permissions from the injected `AuthContext`
//! 2. Delegates to a service or runs a short query
//! 3. Returns HTTP response (JSON, status code)

/// Audit trail and email queue read-outs
pub mod admin;
/// Login and current-user endpoints
pub mod auth;
/// Client and provider directory
pub mod clients;
pub mod health;
/// Invoice generation, payments and adjustments
pub mod invoices;
pub mod timesheets;
/// User and role administration
pub mod users;
