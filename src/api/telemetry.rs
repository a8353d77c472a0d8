//! Request metrics for the HTTP surface
//!
//! Every response is attributed to an [`Endpoint`]. Failed responses carry the
//! [`ErrorKind`] their handler produced, and metering responses carry the
//! negotiated [`ResponseFormat`], so CSV exports can be told apart from JSON
//! reads.

use super::query::format::ResponseFormat;
use super::METERING_PATH;
use crate::ingester::ClientIdentity;
use crate::ErrorKind;

use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info_span, Instrument};

/// Route family a request landed on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Endpoint {
    RemoteWrite,
    Metering,
    Health,
    Unmatched,
}

impl Endpoint {
    fn from_route(route: Option<&str>) -> Self {
        match route {
            Some("/receive") | Some("/api/v1/write") => Endpoint::RemoteWrite,
            Some("/health") => Endpoint::Health,
            Some(path) if path == METERING_PATH => Endpoint::Metering,
            _ => Endpoint::Unmatched,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Endpoint::RemoteWrite => "remote_write",
            Endpoint::Metering => "metering",
            Endpoint::Health => "health",
            Endpoint::Unmatched => "unmatched",
        }
    }
}

struct HttpInstruments {
    requests: Counter<u64>,
    duration_seconds: Histogram<f64>,
    failures: Counter<u64>,
}

fn instruments() -> &'static HttpInstruments {
    static INSTRUMENTS: OnceLock<HttpInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("meterwrite.api");
        HttpInstruments {
            requests: meter
                .u64_counter("meterwrite.http.requests")
                .with_description("Requests by endpoint, status and response format")
                .init(),
            duration_seconds: meter
                .f64_histogram("meterwrite.http.duration")
                .with_description("Time from routing to response")
                .with_unit("s")
                .init(),
            failures: meter
                .u64_counter("meterwrite.http.failures")
                .with_description("Responses with status >= 400 by error kind")
                .init(),
        }
    })
}

/// Label set for one finished request. `error.type` falls back to the
/// status code for rejections raised outside the handlers (body limit,
/// unknown path).
fn response_attributes(endpoint: Endpoint, mtls: bool, response: &Response) -> Vec<KeyValue> {
    let status = response.status();
    let mut attrs = vec![
        KeyValue::new("meterwrite.endpoint", endpoint.as_str()),
        KeyValue::new("meterwrite.mtls", mtls),
        KeyValue::new("http.response.status_code", i64::from(status.as_u16())),
    ];
    if let Some(format) = response.extensions().get::<ResponseFormat>() {
        attrs.push(KeyValue::new("meterwrite.response.format", format.as_str()));
    }
    if status.is_client_error() || status.is_server_error() {
        let kind = match response.extensions().get::<ErrorKind>() {
            Some(ErrorKind(kind)) => (*kind).to_string(),
            None => status.as_u16().to_string(),
        };
        attrs.push(KeyValue::new("error.type", kind));
    }
    attrs
}

/// Middleware recording request count, latency and failures per endpoint.
pub async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = Endpoint::from_route(req.extensions().get::<MatchedPath>().map(MatchedPath::as_str));
    let mtls = req.extensions().get::<ClientIdentity>().is_some();

    let span = info_span!(
        "http.request",
        otel.kind = "server",
        http.request.method = %req.method(),
        meterwrite.endpoint = endpoint.as_str(),
        meterwrite.mtls = mtls
    );
    let response = next.run(req).instrument(span).await;

    let elapsed = start.elapsed().as_secs_f64();
    let attrs = response_attributes(endpoint, mtls, &response);
    let i = instruments();
    i.requests.add(1, &attrs);
    i.duration_seconds.record(elapsed, &attrs);
    if response.status().as_u16() >= 400 {
        i.failures.add(1, &attrs);
        debug!(
            endpoint = endpoint.as_str(),
            status = response.status().as_u16(),
            "Request failed"
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn lookup(attrs: &[KeyValue], key: &str) -> Option<String> {
        attrs
            .iter()
            .find(|kv| kv.key.as_str() == key)
            .map(|kv| kv.value.to_string())
    }

    #[test]
    fn test_endpoint_from_route() {
        assert_eq!(Endpoint::from_route(Some("/receive")), Endpoint::RemoteWrite);
        assert_eq!(Endpoint::from_route(Some("/api/v1/write")), Endpoint::RemoteWrite);
        assert_eq!(Endpoint::from_route(Some(METERING_PATH)), Endpoint::Metering);
        assert_eq!(Endpoint::from_route(Some("/health")), Endpoint::Health);
        assert_eq!(Endpoint::from_route(None), Endpoint::Unmatched);
    }

    #[test]
    fn test_failed_response_reports_error_kind() {
        let response = Error::Auth("no certificate".into()).into_response();
        let attrs = response_attributes(Endpoint::RemoteWrite, false, &response);

        assert_eq!(lookup(&attrs, "error.type").as_deref(), Some("auth"));
        assert_eq!(lookup(&attrs, "meterwrite.endpoint").as_deref(), Some("remote_write"));
        assert_eq!(lookup(&attrs, "meterwrite.response.format"), None);
    }

    #[test]
    fn test_rejection_without_kind_reports_status() {
        let response = StatusCode::PAYLOAD_TOO_LARGE.into_response();
        let attrs = response_attributes(Endpoint::RemoteWrite, true, &response);

        assert_eq!(lookup(&attrs, "error.type").as_deref(), Some("413"));
        assert_eq!(lookup(&attrs, "meterwrite.mtls").as_deref(), Some("true"));
    }

    #[test]
    fn test_metering_response_reports_format() {
        let mut response = StatusCode::OK.into_response();
        response.extensions_mut().insert(ResponseFormat::Csv);
        let attrs = response_attributes(Endpoint::Metering, false, &response);

        assert_eq!(lookup(&attrs, "meterwrite.response.format").as_deref(), Some("csv"));
        assert_eq!(lookup(&attrs, "error.type"), None);
    }
}
