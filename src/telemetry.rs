//! Logging and metrics bootstrap for the meterwrite binary
//!
//! Logs go to stdout as JSON. Metrics go to a global OpenTelemetry meter
//! provider whose resource describes how this instance attributes tenants
//! and terminates connections.

use crate::{Error, Result, ServiceConfig};

use opentelemetry::{global, Key, KeyValue};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::Resource;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

const SERVICE_NAME: &str = "meterwrite";

/// Keeps the meter provider alive; metrics are flushed on drop.
pub struct Telemetry {
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    pub fn init(config: &ServiceConfig, log_level: &str) -> Result<Self> {
        let level = parse_log_level(log_level)?;

        FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(true)
            .with_thread_ids(true)
            .json()
            .try_init()
            .map_err(|e| Error::Config(format!("failed to initialize log subscriber: {e}")))?;

        let meter_provider = SdkMeterProvider::builder()
            .with_resource(service_resource(config))
            .build();
        global::set_meter_provider(meter_provider.clone());

        info!(
            log_level = %level,
            tenant_mode = config.tenancy.mode.as_str(),
            mtls = config.api.tls.is_some(),
            "Telemetry initialized"
        );

        Ok(Self { meter_provider })
    }
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        let _ = self.meter_provider.shutdown();
    }
}

fn parse_log_level(raw: &str) -> Result<Level> {
    raw.trim().parse::<Level>().map_err(|_| {
        Error::Config(format!(
            "invalid LOG_LEVEL '{raw}', expected one of trace, debug, info, warn, error"
        ))
    })
}

/// Resource attributes for this instance.
///
/// `OTEL_SERVICE_NAME` and `OTEL_RESOURCE_ATTRIBUTES` are picked up by the
/// SDK detectors; the service name defaults to `meterwrite` when neither
/// sets one.
fn service_resource(config: &ServiceConfig) -> Resource {
    let detected = Resource::default();

    let mut attributes = vec![
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
        KeyValue::new("meterwrite.tenant_mode", config.tenancy.mode.as_str()),
        KeyValue::new("meterwrite.mtls", config.api.tls.is_some()),
    ];
    let named = detected
        .get(Key::from_static_str("service.name"))
        .is_some_and(|name| !name.as_str().starts_with("unknown_service"));
    if !named {
        attributes.push(KeyValue::new("service.name", SERVICE_NAME));
    }

    detected.merge(&Resource::new(attributes))
}
