//! Prometheus Remote Write receiver
//!
//! Implements the Prometheus Remote Write protocol with Snappy compression.

use crate::api::ApiState;
use crate::ingester::{ClientIdentity, RequestContext};
use crate::schema::remote_write::WriteRequest;
use crate::{Error, Result};

use axum::body::Bytes;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use prost::Message;
use tracing::debug;

/// Handle Prometheus Remote Write requests
///
/// POST /receive
/// Content-Encoding: snappy
/// Content-Type: application/x-protobuf
///
/// The tenant is resolved before the body is decoded, so an unattributable
/// request is rejected with 401 whatever its payload. Accepted requests
/// answer 200 even when individual series failed to persist.
pub async fn handle_remote_write(
    State(state): State<ApiState>,
    identity: Option<Extension<ClientIdentity>>,
    body: Bytes,
) -> Result<StatusCode> {
    let identity = identity.map(|Extension(identity)| identity);
    let ctx = RequestContext {
        client_identity: identity.as_ref(),
    };
    let tenant = state.ingester.resolve_tenant(&ctx)?;

    let request = decode_write_request(&body).map_err(|e| {
        state.ingester.record_rejection(&e);
        e
    })?;

    let outcome = state.ingester.ingest(&request, &tenant).await?;
    debug!(
        bytes = body.len(),
        inserted = outcome.inserted,
        skipped = outcome.skipped.len(),
        "Remote write accepted"
    );

    Ok(StatusCode::OK)
}

/// Decompress a raw-snappy body and decode the protobuf `WriteRequest`.
pub fn decode_write_request(body: &[u8]) -> Result<WriteRequest> {
    let decompressed = snap::raw::Decoder::new()
        .decompress_vec(body)
        .map_err(|e| Error::Decode(format!("snappy decompression failed: {}", e)))?;

    WriteRequest::decode(decompressed.as_slice())
        .map_err(|e| Error::Decode(format!("invalid protobuf payload: {}", e)))
}

/// Serialize and compress a `WriteRequest` the way Prometheus does.
pub fn encode_write_request(request: &WriteRequest) -> Result<Vec<u8>> {
    snap::raw::Encoder::new()
        .compress_vec(&request.encode_to_vec())
        .map_err(|e| Error::Internal(format!("snappy compression failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::remote_write::{Label, Sample, TimeSeries};

    #[test]
    fn test_decode_valid_request() {
        let request = WriteRequest {
            timeseries: vec![TimeSeries {
                labels: vec![Label::new("__name__", "up")],
                samples: vec![Sample {
                    value: 1.0,
                    timestamp: 42,
                }],
            }],
        };
        let body = encode_write_request(&request).unwrap();
        assert_eq!(decode_write_request(&body).unwrap(), request);
    }

    #[test]
    fn test_empty_body_rejected() {
        assert!(matches!(decode_write_request(&[]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_compressed_garbage_rejected() {
        let body = snap::raw::Encoder::new()
            .compress_vec(&[0xff, 0xff, 0xff, 0xff])
            .unwrap();
        assert!(matches!(decode_write_request(&body), Err(Error::Decode(_))));
    }

    #[test]
    fn test_empty_request_decodes() {
        let body = encode_write_request(&WriteRequest::default()).unwrap();
        assert!(decode_write_request(&body).unwrap().timeseries.is_empty());
    }
}
