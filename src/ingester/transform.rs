//! Wire series to metric records

use crate::schema::remote_write::TimeSeries;
use crate::schema::{Metric, METRIC_NAME_LABEL};

use std::collections::BTreeMap;

/// Convert one wire series into a [`Metric`] with an unresolved `org_id`.
///
/// `__name__` becomes the metric name and every other label, tenant label
/// included, is copied into `labels`. Only the last sample is kept: earlier
/// samples of the same series are dropped, not aggregated. A series without
/// samples keeps timestamp 0 and value 0.0.
pub fn transform_series(series: &TimeSeries) -> Metric {
    let mut name = String::new();
    let mut labels = BTreeMap::new();
    for label in &series.labels {
        if label.name == METRIC_NAME_LABEL {
            name = label.value.clone();
        } else {
            labels.insert(label.name.clone(), label.value.clone());
        }
    }

    let (timestamp, value) = series
        .samples
        .last()
        .map(|sample| (sample.timestamp, sample.value))
        .unwrap_or((0, 0.0));

    Metric {
        name,
        org_id: String::new(),
        labels,
        timestamp,
        value,
    }
}
