//! Metering store trait

use crate::query::UsageQuery;
use crate::schema::{DailySystemCpu, Metric};
use crate::Result;
use async_trait::async_trait;

/// Storage backend interface
///
/// Every call is its own unit of work: there is no transaction spanning
/// several inserts or the count and data statements of one query.
#[async_trait]
pub trait MeteringStore: Send + Sync {
    /// Insert one metric row. `labels_json` is the serialized label set.
    async fn insert_metric(&self, metric: &Metric, labels_json: &str) -> Result<()>;

    /// Run the count statement of a usage query
    async fn count_usage(&self, query: &UsageQuery) -> Result<i64>;

    /// Run the data statement of a usage query
    async fn fetch_usage(&self, query: &UsageQuery) -> Result<Vec<DailySystemCpu>>;

    /// Check that the backend is reachable
    async fn ping(&self) -> Result<()>;
}
