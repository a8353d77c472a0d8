//! Ingester module for meterwrite
//!
//! The ingester is responsible for:
//! - Turning decoded remote-write series into [`Metric`] records
//! - Attributing each record to an organization
//! - Inserting every record as its own row, best effort
//!
//! There is no transaction around a request. A series that fails to
//! serialize or insert is logged and skipped while the rest of the request
//! proceeds. In label mode a series without an organization aborts the
//! request, but rows inserted before it stay committed.

mod telemetry;
mod tenant;
mod transform;

pub use tenant::{
    ClientIdentity, IdentityResolver, LabelResolver, RequestContext, TenantBinding,
    TenantResolver,
};
pub use transform::transform_series;

use crate::schema::remote_write::WriteRequest;
use crate::schema::Metric;
use crate::store::MeteringStore;
use crate::{Error, Result};

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why a series was dropped from an otherwise accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Labels could not be encoded as JSON
    Serialization(String),
    /// The insert statement failed
    Storage(String),
}

/// A series that was not persisted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMetric {
    /// Position of the series in the request
    pub index: usize,
    pub name: String,
    pub reason: SkipReason,
}

/// Per-request result of the write path
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    pub inserted: usize,
    pub skipped: Vec<SkippedMetric>,
}

impl IngestOutcome {
    /// Series that reached the insert stage
    pub fn attempted(&self) -> usize {
        self.inserted + self.skipped.len()
    }

    fn skip(&mut self, index: usize, metric: &Metric, reason: SkipReason) {
        self.skipped.push(SkippedMetric {
            index,
            name: metric.name.clone(),
            reason,
        });
    }
}

/// The remote-write ingester
pub struct Ingester {
    store: Arc<dyn MeteringStore>,
    resolver: Arc<dyn TenantResolver>,
}

impl Ingester {
    pub fn new(store: Arc<dyn MeteringStore>, resolver: Arc<dyn TenantResolver>) -> Self {
        Self { store, resolver }
    }

    /// The configured tenant resolution strategy
    pub fn resolver(&self) -> &dyn TenantResolver {
        self.resolver.as_ref()
    }

    /// Resolve the tenant for a request before its body is decoded.
    pub fn resolve_tenant(&self, ctx: &RequestContext<'_>) -> Result<TenantBinding> {
        self.resolver.resolve(ctx).map_err(|e| {
            telemetry::record_rejection(e.kind());
            e
        })
    }

    /// Insert every series of `request` under `tenant`.
    ///
    /// Returns the per-series outcome. The only request-level failure is a
    /// series with no resolvable organization, which stops processing at
    /// that series.
    pub async fn ingest(
        &self,
        request: &WriteRequest,
        tenant: &TenantBinding,
    ) -> Result<IngestOutcome> {
        let start = Instant::now();
        let mut outcome = IngestOutcome::default();

        for (index, series) in request.timeseries.iter().enumerate() {
            let mut metric = transform_series(series);

            metric.org_id = match tenant.org_for(index, &metric) {
                Ok(org_id) => org_id,
                Err(e) => {
                    warn!(
                        index,
                        metric = %metric.name,
                        inserted = outcome.inserted,
                        skipped = outcome.skipped.len(),
                        error = %e,
                        "Aborting write request: series has no organization"
                    );
                    telemetry::record_rejection(e.kind());
                    return Err(e);
                }
            };

            let labels_json = match metric.labels_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!(index, metric = %metric.name, error = %e, "Failed to encode labels, skipping series");
                    outcome.skip(index, &metric, SkipReason::Serialization(e.to_string()));
                    continue;
                }
            };

            match self.store.insert_metric(&metric, &labels_json).await {
                Ok(()) => outcome.inserted += 1,
                Err(e) => {
                    warn!(
                        index,
                        metric = %metric.name,
                        org_id = %metric.org_id,
                        error = %e,
                        "Failed to insert metric, skipping series"
                    );
                    outcome.skip(index, &metric, SkipReason::Storage(e.to_string()));
                }
            }
        }

        let elapsed = start.elapsed().as_secs_f64();
        telemetry::record_write(
            elapsed,
            request.timeseries.len() as u64,
            outcome.inserted as u64,
            outcome.skipped.len() as u64,
        );
        debug!(
            series = request.timeseries.len(),
            inserted = outcome.inserted,
            skipped = outcome.skipped.len(),
            "Write request ingested"
        );

        Ok(outcome)
    }

    /// Record a request that was rejected before reaching [`Ingester::ingest`].
    pub fn record_rejection(&self, error: &Error) {
        telemetry::record_rejection(error.kind());
    }
}
