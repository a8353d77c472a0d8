//! Response formatting for the metering API
//!
//! JSON is the default. CSV is produced through the Arrow CSV writer from a
//! single record batch built out of the page rows.

use crate::query::UsagePage;
use crate::schema::{DailySystemCpu, USAGE_COLUMNS};
use crate::Result;

use arrow::csv::WriterBuilder;
use arrow_array::types::Date32Type;
use arrow_array::{ArrayRef, Date32Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;

/// Negotiated representation of a usage page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Csv,
}

impl ResponseFormat {
    /// Pick CSV when `text/csv` is acceptable with a quality at least as
    /// high as `application/json`, JSON otherwise.
    pub fn negotiate(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return ResponseFormat::Json;
        };

        let mut csv_q = 0.0f32;
        let mut json_q = 0.0f32;
        for range in accept.split(',') {
            let mut parts = range.split(';');
            let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let quality = parts
                .filter_map(|param| param.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("q"))
                .map_or(1.0, |(_, value)| parse_quality(value.trim()));

            match media.as_str() {
                "text/csv" => csv_q = csv_q.max(quality),
                "application/json" => json_q = json_q.max(quality),
                _ => {}
            }
        }

        if csv_q > 0.0 && csv_q >= json_q {
            ResponseFormat::Csv
        } else {
            ResponseFormat::Json
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseFormat::Json => "json",
            ResponseFormat::Csv => "csv",
        }
    }

    /// Render `page`. The format travels in the response extensions so the
    /// HTTP metrics can tell CSV from JSON traffic.
    pub fn render(self, page: &UsagePage) -> Result<Response> {
        let mut response = match self {
            ResponseFormat::Json => render_json(page),
            ResponseFormat::Csv => {
                let body = render_csv(&page.rows)?;
                (StatusCode::OK, [(header::CONTENT_TYPE, "text/csv")], body).into_response()
            }
        };
        response.extensions_mut().insert(self);
        Ok(response)
    }
}

/// A `q` outside `[0, 1]` or not a number disables its media range.
fn parse_quality(raw: &str) -> f32 {
    match raw.parse::<f32>() {
        Ok(q) if (0.0..=1.0).contains(&q) => q,
        _ => 0.0,
    }
}

#[derive(Debug, Serialize)]
struct PageMetadata {
    total: i64,
    limit: i64,
    offset: i64,
}

#[derive(Debug, Serialize)]
struct PageBody<'a> {
    metadata: PageMetadata,
    data: &'a [DailySystemCpu],
}

/// `{"metadata":{"total":N,"limit":L,"offset":O},"data":[...]}`
pub fn render_json(page: &UsagePage) -> Response {
    Json(PageBody {
        metadata: PageMetadata {
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        },
        data: &page.rows,
    })
    .into_response()
}

/// Header line plus one line per row; `total_uptime` with four decimals.
pub fn render_csv(rows: &[DailySystemCpu]) -> Result<Vec<u8>> {
    let batch = usage_batch(rows)?;

    let mut buffer = Vec::new();
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(&batch)?;
    }
    Ok(buffer)
}

fn usage_schema() -> Schema {
    let [id, system_id, display_name, org_id, product, socket_count, date, total_uptime] =
        USAGE_COLUMNS;
    Schema::new(vec![
        Field::new(id, DataType::Int64, false),
        Field::new(system_id, DataType::Utf8, false),
        Field::new(display_name, DataType::Utf8, false),
        Field::new(org_id, DataType::Utf8, false),
        Field::new(product, DataType::Utf8, false),
        Field::new(socket_count, DataType::Int32, false),
        Field::new(date, DataType::Date32, false),
        Field::new(total_uptime, DataType::Utf8, false),
    ])
}

fn usage_batch(rows: &[DailySystemCpu]) -> Result<RecordBatch> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.id))),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.system_id.to_string()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.display_name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.org_id.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.product.as_str()),
        )),
        Arc::new(Int32Array::from_iter_values(
            rows.iter().map(|r| r.socket_count),
        )),
        Arc::new(Date32Array::from_iter_values(
            rows.iter().map(|r| Date32Type::from_naive_date(r.date)),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| format!("{:.4}", r.total_uptime)),
        )),
    ];

    Ok(RecordBatch::try_new(Arc::new(usage_schema()), columns)?)
}
