//! Ingestion protocols

pub mod prometheus;
