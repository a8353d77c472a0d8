//! Relational storage for meterwrite
//!
//! [`MeteringStore`] is the only seam between the HTTP handlers and the
//! database. [`PgStore`] talks to PostgreSQL; [`LocalStore`] keeps rows in
//! memory for development and tests.

mod client;
mod local;
mod postgres;

pub use client::MeteringStore;
pub use local::{LocalStore, StoredMetric};
pub use postgres::PgStore;
