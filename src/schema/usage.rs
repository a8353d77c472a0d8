//! Daily usage rows served by the metering API

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

/// Column order shared by the SELECT list, the JSON records and the CSV header
pub const USAGE_COLUMNS: [&str; 8] = [
    "id",
    "system_id",
    "display_name",
    "org_id",
    "product",
    "socket_count",
    "date",
    "total_uptime",
];

/// One row of `daily_system_cpu_logical_count`
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DailySystemCpu {
    pub id: i64,
    pub system_id: Uuid,
    pub display_name: String,
    pub org_id: String,
    pub product: String,
    pub socket_count: i32,
    pub date: NaiveDate,
    pub total_uptime: f64,
}
