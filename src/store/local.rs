//! Local in-memory store for development and testing

use super::MeteringStore;
use crate::query::UsageQuery;
use crate::schema::{DailySystemCpu, Metric};
use crate::{Error, Result};

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// A metric row as it would have been inserted
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMetric {
    pub metric: Metric,
    pub labels_json: String,
}

/// Local in-memory store
///
/// Evaluates usage queries from their validated filter rather than the SQL
/// text, so it follows the same predicate, ordering and pagination rules as
/// the PostgreSQL statements. Failures can be injected per metric name or
/// for the whole read path.
#[derive(Debug)]
pub struct LocalStore {
    metrics: RwLock<Vec<StoredMetric>>,
    usage: RwLock<Vec<DailySystemCpu>>,
    /// Metric names whose inserts fail
    failing_metrics: RwLock<HashSet<String>>,
    fail_usage: AtomicBool,
    reachable: AtomicBool,
    usage_counts: AtomicU64,
    usage_fetches: AtomicU64,
}

impl LocalStore {
    pub fn new() -> Self {
        Self {
            metrics: RwLock::new(Vec::new()),
            usage: RwLock::new(Vec::new()),
            failing_metrics: RwLock::new(HashSet::new()),
            fail_usage: AtomicBool::new(false),
            reachable: AtomicBool::new(true),
            usage_counts: AtomicU64::new(0),
            usage_fetches: AtomicU64::new(0),
        }
    }

    /// Seed usage rows, as the external aggregation job would.
    pub fn insert_usage_rows(&self, rows: Vec<DailySystemCpu>) {
        self.usage.write().extend(rows);
    }

    /// Snapshot of every inserted metric, in insertion order
    pub fn metrics(&self) -> Vec<StoredMetric> {
        self.metrics.read().clone()
    }

    /// Make inserts of metrics with this name fail.
    pub fn fail_inserts_for(&self, name: impl Into<String>) {
        self.failing_metrics.write().insert(name.into());
    }

    /// Make count and data statements fail.
    pub fn fail_usage_queries(&self, fail: bool) {
        self.fail_usage.store(fail, Ordering::SeqCst);
    }

    /// Simulate the database going away.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of count statements executed
    pub fn usage_counts(&self) -> u64 {
        self.usage_counts.load(Ordering::SeqCst)
    }

    /// Number of data statements executed
    pub fn usage_fetches(&self) -> u64 {
        self.usage_fetches.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Storage("connection refused".to_string()))
        }
    }

    fn check_usage(&self) -> Result<()> {
        self.check_reachable()?;
        if self.fail_usage.load(Ordering::SeqCst) {
            return Err(Error::Storage("usage query failed".to_string()));
        }
        Ok(())
    }

    fn matching_rows(&self, query: &UsageQuery) -> Vec<DailySystemCpu> {
        self.usage
            .read()
            .iter()
            .filter(|row| query.filter.matches(row))
            .cloned()
            .collect()
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeteringStore for LocalStore {
    async fn insert_metric(&self, metric: &Metric, labels_json: &str) -> Result<()> {
        self.check_reachable()?;
        if self.failing_metrics.read().contains(&metric.name) {
            return Err(Error::Storage(format!(
                "insert rejected for metric '{}'",
                metric.name
            )));
        }
        self.metrics.write().push(StoredMetric {
            metric: metric.clone(),
            labels_json: labels_json.to_string(),
        });
        Ok(())
    }

    async fn count_usage(&self, query: &UsageQuery) -> Result<i64> {
        self.usage_counts.fetch_add(1, Ordering::SeqCst);
        self.check_usage()?;
        Ok(self.matching_rows(query).len() as i64)
    }

    async fn fetch_usage(&self, query: &UsageQuery) -> Result<Vec<DailySystemCpu>> {
        self.usage_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_usage()?;

        let mut rows = self.matching_rows(query);
        rows.sort_by(|a, b| b.date.cmp(&a.date).then(a.system_id.cmp(&b.system_id)));

        let offset = usize::try_from(query.filter.offset).unwrap_or(usize::MAX);
        let limit = usize::try_from(query.filter.limit).unwrap_or(0);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check_reachable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metric(name: &str) -> Metric {
        Metric {
            name: name.to_string(),
            org_id: "org1".to_string(),
            labels: BTreeMap::new(),
            timestamp: 1,
            value: 1.0,
        }
    }

    #[tokio::test]
    async fn test_insert_and_snapshot() {
        let store = LocalStore::new();
        store.insert_metric(&metric("up"), "{}").await.unwrap();
        let rows = store.metrics();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].metric.name, "up");
        assert_eq!(rows[0].labels_json, "{}");
    }

    #[tokio::test]
    async fn test_injected_insert_failure() {
        let store = LocalStore::new();
        store.fail_inserts_for("bad");
        assert!(store.insert_metric(&metric("bad"), "{}").await.is_err());
        assert!(store.insert_metric(&metric("good"), "{}").await.is_ok());
        assert_eq!(store.metrics().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let store = LocalStore::new();
        assert!(store.ping().await.is_ok());
        store.set_reachable(false);
        assert!(matches!(store.ping().await, Err(Error::Storage(_))));
        assert!(store.insert_metric(&metric("up"), "{}").await.is_err());
    }
}
