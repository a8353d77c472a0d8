//! Metering query engine
//!
//! Validates request parameters into a [`UsageFilter`], builds the count and
//! data statements and runs them against a [`MeteringStore`]. The count runs
//! first; if either statement fails the whole query fails.

pub mod builder;
pub mod filter;

pub use builder::{PredicateBuilder, SqlParam, SqlStatement, UsageQuery};
pub use filter::{MeteringQueryParams, UsageFilter, DEFAULT_LIMIT, MAX_LIMIT};

use crate::clock::{Clock, SystemClock};
use crate::schema::DailySystemCpu;
use crate::store::MeteringStore;
use crate::Result;

use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// One page of usage rows plus the total across all pages
#[derive(Debug, Clone, PartialEq)]
pub struct UsagePage {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub rows: Vec<DailySystemCpu>,
}

/// Executes metering queries
pub struct UsageQueryEngine {
    store: Arc<dyn MeteringStore>,
    clock: Arc<dyn Clock>,
}

impl UsageQueryEngine {
    pub fn new(store: Arc<dyn MeteringStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Engine whose default date window is computed from `clock`
    pub fn with_clock(store: Arc<dyn MeteringStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Validate parameters and build both statements.
    pub fn plan(&self, params: &MeteringQueryParams) -> Result<UsageQuery> {
        let filter = UsageFilter::from_params(params, self.clock.as_ref())?;
        Ok(UsageQuery::build(filter))
    }

    /// Run the count statement, then the data statement.
    pub async fn execute(&self, query: &UsageQuery) -> Result<UsagePage> {
        let start = Instant::now();

        let total = self.store.count_usage(query).await?;
        let rows = self.store.fetch_usage(query).await?;

        debug!(
            total,
            returned = rows.len(),
            limit = query.filter.limit,
            offset = query.filter.offset,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Metering query executed"
        );

        Ok(UsagePage {
            total,
            limit: query.filter.limit,
            offset: query.filter.offset,
            rows,
        })
    }

    /// Validate, plan and execute in one step.
    pub async fn query(&self, params: &MeteringQueryParams) -> Result<UsagePage> {
        let query = self.plan(params)?;
        self.execute(&query).await
    }
}
