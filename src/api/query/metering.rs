//! Metering API
//!
//! `GET /api/metering/v1/system_cpu_logical_count` returns one page of daily
//! CPU usage rows as JSON or CSV.

use super::format::ResponseFormat;
use crate::api::ApiState;
use crate::query::MeteringQueryParams;
use crate::{Error, Result};

use axum::async_trait;
use axum::extract::{FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::response::Response;

/// Metering parameters taken from the query string.
///
/// Unlike a bare [`Query`], every rejection (duplicate keys, broken
/// percent-escapes) answers through [`Error::Validation`].
#[derive(Debug, Clone, Default)]
pub struct MeteringQuery(pub MeteringQueryParams);

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for MeteringQuery {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self> {
        check_percent_escapes(parts.uri.query().unwrap_or_default())?;
        let Query(params) = Query::<MeteringQueryParams>::try_from_uri(&parts.uri)
            .map_err(|rejection| Error::Validation(rejection.body_text()))?;
        Ok(Self(params))
    }
}

/// Reject escapes that are truncated, not hex, or decode to invalid UTF-8.
/// The form decoder would otherwise pass them through or replace them.
fn check_percent_escapes(query: &str) -> Result<()> {
    for pair in query.split('&') {
        let bytes = pair.as_bytes();
        let mut decoded = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] != b'%' {
                decoded.push(bytes[i]);
                i += 1;
                continue;
            }
            match (bytes.get(i + 1), bytes.get(i + 2)) {
                (Some(hi), Some(lo)) if hi.is_ascii_hexdigit() && lo.is_ascii_hexdigit() => {
                    decoded.push((hex_value(*hi) << 4) | hex_value(*lo));
                    i += 3;
                }
                _ => {
                    return Err(Error::Validation(format!(
                        "invalid percent-escape in query parameter '{}'",
                        pair
                    )))
                }
            }
        }
        if std::str::from_utf8(&decoded).is_err() {
            return Err(Error::Validation(format!(
                "query parameter '{}' is not valid UTF-8",
                pair
            )));
        }
    }
    Ok(())
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Query daily logical CPU usage.
///
/// Parameters: `system_id`, `org_id`, `display_name`, `start_date`,
/// `end_date`, `limit`, `offset`. Invalid parameters answer 400; any
/// storage failure answers 500 with no partial body.
pub async fn system_cpu_logical_count(
    State(state): State<ApiState>,
    headers: HeaderMap,
    MeteringQuery(params): MeteringQuery,
) -> Result<Response> {
    let format = ResponseFormat::negotiate(
        headers
            .get(header::ACCEPT)
            .and_then(|value| value.to_str().ok()),
    );

    let page = state.query_engine.query(&params).await?;
    format.render(&page)
}
