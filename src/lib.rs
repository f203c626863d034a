//! LicensePro - license issuance and device activation authority
//!
//! Issues checksummed activation codes bound to an email, enforces a
//! per-license device quota under concurrent activations, and keeps an
//! append-only history of every license and device state change.

pub mod authority;
pub mod code;
pub mod config;
pub mod db;
pub mod error;
pub mod id;
pub mod models;
pub mod pagination;
