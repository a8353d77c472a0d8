//! Schema definitions for meterwrite
//!
//! Holds the two relational tables the service touches and the
//! remote-write wire messages. The write path only inserts into
//! [`METRICS_TABLE`]; the read path only selects from [`USAGE_TABLE`].
//! Both tables are partitioned by day and the partitions are managed
//! outside this crate.

mod metrics;
pub mod remote_write;
mod usage;

pub use metrics::{Metric, METRIC_NAME_LABEL, TENANT_LABEL};
pub use usage::{DailySystemCpu, USAGE_COLUMNS};

/// Table receiving one row per ingested series
pub const METRICS_TABLE: &str = "metrics";

/// Daily usage table populated by an external aggregation job
pub const USAGE_TABLE: &str = "daily_system_cpu_logical_count";

/// Reference DDL for the metrics table.
pub const METRICS_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS metrics (
    name        TEXT NOT NULL,
    org_id      TEXT NOT NULL,
    labels      JSONB NOT NULL,
    timestamp   BIGINT NOT NULL,
    value       DOUBLE PRECISION NOT NULL,
    inserted_at DATE NOT NULL DEFAULT CURRENT_DATE
) PARTITION BY RANGE (inserted_at)
"#;

/// Reference DDL for the daily usage table.
pub const USAGE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS daily_system_cpu_logical_count (
    id            BIGSERIAL,
    system_id     UUID NOT NULL,
    display_name  TEXT NOT NULL,
    org_id        TEXT NOT NULL,
    product       TEXT NOT NULL,
    socket_count  INTEGER NOT NULL,
    date          DATE NOT NULL,
    total_uptime  DOUBLE PRECISION NOT NULL,
    PRIMARY KEY (system_id, date)
) PARTITION BY RANGE (date)
"#;
