//! # meterwrite
//!
//! A multi-tenant Prometheus remote-write receiver backed by PostgreSQL, with a
//! paginated metering API over daily CPU usage.
//!
//! ## Architecture
//!
//! - **Write path**: `POST /receive` decompresses and decodes a remote-write
//!   request, turns every series into a [`schema::Metric`], attributes it to an
//!   organization through a [`ingester::TenantResolver`] and inserts it as an
//!   independent row. Individual insert failures are logged and skipped.
//! - **Read path**: `GET /api/metering/v1/system_cpu_logical_count` validates
//!   the filter, builds parameterized count and data statements, runs them
//!   against the usage table and renders JSON or CSV.
//!
//! The two paths share only the storage schema.

pub mod api;
pub mod clock;
pub mod config;
pub mod ingester;
pub mod query;
pub mod schema;
pub mod store;
pub mod telemetry;

mod error;

pub use error::{Error, ErrorKind, Result};

use std::time::Duration;

/// Configuration for a running meterwrite instance
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Relational store configuration
    pub storage: StorageConfig,
    /// Tenant resolution policy
    pub tenancy: TenancyConfig,
    /// HTTP surface configuration
    pub api: api::ApiServerConfig,
}

/// PostgreSQL connection target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// Full connection URL (`postgres://...`)
    Url(String),
    /// Discrete connection parameters
    Parts {
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    },
}

/// Relational store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub target: StorageTarget,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// How long a request waits for a pooled connection
    pub acquire_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            target: StorageTarget::Parts {
                host: "localhost".to_string(),
                port: 5432,
                user: "postgres".to_string(),
                password: String::new(),
                database: "postgres".to_string(),
            },
            max_connections: 10,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Tenant resolution policy, fixed for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TenantMode {
    /// Organization from the verified client certificate, falling back to a
    /// static operator-configured id when no client identity is present
    #[default]
    Identity,
    /// Organization from the `external_organization` label of every series
    Label,
}

impl TenantMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Label => "label",
        }
    }
}

impl std::str::FromStr for TenantMode {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "identity" | "cert" | "certificate" => Ok(Self::Identity),
            "label" | "labels" => Ok(Self::Label),
            other => Err(format!(
                "unknown tenant mode '{}'; expected one of identity, label",
                other
            )),
        }
    }
}

/// Tenant resolution configuration
#[derive(Debug, Clone, Default)]
pub struct TenancyConfig {
    pub mode: TenantMode,
    /// Static tenant used in identity mode when the request carries no
    /// client certificate
    pub static_org_id: Option<String>,
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::ingester::{IngestOutcome, Ingester, TenantResolver};
    pub use crate::query::{UsagePage, UsageQueryEngine};
    pub use crate::schema::{DailySystemCpu, Metric};
    pub use crate::store::{LocalStore, MeteringStore, PgStore};
    pub use crate::{
        Error, Result, ServiceConfig, StorageConfig, StorageTarget, TenancyConfig, TenantMode,
    };
}
