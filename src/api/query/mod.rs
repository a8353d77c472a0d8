//! Query endpoints

pub mod format;
pub mod metering;
