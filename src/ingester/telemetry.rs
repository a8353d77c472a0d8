//! Ingester telemetry instruments and recording helpers.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

struct IngesterInstruments {
    write_requests: Counter<u64>,
    write_series: Histogram<u64>,
    series_outcomes: Counter<u64>,
    write_duration_seconds: Histogram<f64>,
}

fn instruments() -> &'static IngesterInstruments {
    static INSTRUMENTS: OnceLock<IngesterInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("meterwrite.ingester");
        IngesterInstruments {
            write_requests: meter
                .u64_counter("meterwrite.ingester.write.requests")
                .with_description("Remote-write requests by outcome")
                .init(),
            write_series: meter
                .u64_histogram("meterwrite.ingester.write.series")
                .with_description("Series decoded per remote-write request")
                .init(),
            series_outcomes: meter
                .u64_counter("meterwrite.ingester.series.outcomes")
                .with_description("Per-series insert outcomes")
                .init(),
            write_duration_seconds: meter
                .f64_histogram("meterwrite.ingester.write.duration")
                .with_description("Time spent inserting one remote-write request")
                .with_unit("s")
                .init(),
        }
    })
}

pub fn record_write(duration_seconds: f64, series: u64, inserted: u64, skipped: u64) {
    let i = instruments();
    i.write_requests
        .add(1, &[KeyValue::new("outcome", "accepted")]);
    i.write_series.record(series, &[]);
    i.write_duration_seconds.record(duration_seconds, &[]);
    if inserted > 0 {
        i.series_outcomes
            .add(inserted, &[KeyValue::new("outcome", "inserted")]);
    }
    if skipped > 0 {
        i.series_outcomes
            .add(skipped, &[KeyValue::new("outcome", "skipped")]);
    }
}

/// Count a request rejected with `kind` (`decode`, `auth`, `validation`, ...).
pub fn record_rejection(kind: &'static str) {
    instruments().write_requests.add(
        1,
        &[
            KeyValue::new("outcome", "rejected"),
            KeyValue::new("reason", kind),
        ],
    );
}
