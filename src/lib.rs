//! Usage Ledger - usage counters, rate limits and credit ledgers
//!
//! This crate derives counting, expiry and idempotent consumption semantics
//! from a key-value store that only offers `get`, `put` with an optional TTL,
//! and `delete`. There is no atomic increment and no compare-and-swap, so
//! counts are approximate under concurrent bursts from a single subject.

pub mod calendar;
pub mod clock;
pub mod config;
pub mod credits;
pub mod error;
pub mod keys;
pub mod quota;
pub mod services;
pub mod store;
pub mod usage;
