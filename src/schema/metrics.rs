//! Normalized metric records produced by the write path

use std::collections::BTreeMap;

/// Reserved label carrying the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

/// Reserved label carrying the tenant when resolution is label based
pub const TENANT_LABEL: &str = "external_organization";

/// One metric record per wire time series.
///
/// `labels` never contains [`METRIC_NAME_LABEL`]. It is ordered so that its
/// JSON text form is stable for identical label sets.
#[derive(Debug, Clone, PartialEq)]
pub struct Metric {
    pub name: String,
    /// Empty until the tenant resolver has run
    pub org_id: String,
    pub labels: BTreeMap<String, String>,
    /// Epoch milliseconds as supplied by the sender
    pub timestamp: i64,
    pub value: f64,
}

impl Metric {
    /// Serialize the label set to the text stored in the `labels` column.
    pub fn labels_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(&self.labels)?)
    }

    /// Value of a label, if present.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }
}
