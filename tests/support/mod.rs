//! Shared helpers for router-level tests
//!
//! Every test drives the real axum router over an in-memory [`LocalStore`]
//! with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use meterwrite::api::ingest::prometheus::encode_write_request;
use meterwrite::api::{build_http_router, ApiServerConfig, ApiState};
use meterwrite::clock::FixedClock;
use meterwrite::config::ComponentFactory;
use meterwrite::query::UsageQueryEngine;
use meterwrite::schema::remote_write::{Label, Sample, TimeSeries, WriteRequest};
use meterwrite::schema::DailySystemCpu;
use meterwrite::store::LocalStore;
use meterwrite::{TenancyConfig, TenantMode};

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

/// Date the query engine treats as today
pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 20).unwrap()
}

pub fn identity_tenancy(static_org_id: Option<&str>) -> TenancyConfig {
    TenancyConfig {
        mode: TenantMode::Identity,
        static_org_id: static_org_id.map(str::to_string),
    }
}

pub fn label_tenancy() -> TenancyConfig {
    TenancyConfig {
        mode: TenantMode::Label,
        static_org_id: None,
    }
}

pub fn router(store: Arc<LocalStore>, tenancy: TenancyConfig) -> Router {
    router_with_config(store, tenancy, &ApiServerConfig::default())
}

pub fn router_with_config(
    store: Arc<LocalStore>,
    tenancy: TenancyConfig,
    config: &ApiServerConfig,
) -> Router {
    let state: ApiState = ComponentFactory::create_api_state(store.clone(), &tenancy)
        .with_query_engine(UsageQueryEngine::with_clock(
            store,
            Arc::new(FixedClock(today())),
        ));
    build_http_router(state, config)
}

pub fn series(labels: &[(&str, &str)], samples: &[(i64, f64)]) -> TimeSeries {
    TimeSeries {
        labels: labels.iter().map(|(k, v)| Label::new(*k, *v)).collect(),
        samples: samples
            .iter()
            .map(|(timestamp, value)| Sample {
                value: *value,
                timestamp: *timestamp,
            })
            .collect(),
    }
}

pub fn write_body(timeseries: Vec<TimeSeries>) -> Vec<u8> {
    encode_write_request(&WriteRequest { timeseries }).unwrap()
}

pub fn remote_write(path: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/x-protobuf")
        .header("content-encoding", "snappy")
        .header("x-prometheus-remote-write-version", "0.1.0")
        .body(Body::from(body))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_accept(uri: &str, accept: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("accept", accept)
        .body(Body::empty())
        .unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8(self.body.clone()).unwrap()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn content_type(&self) -> &str {
        self.headers
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }
}

pub async fn send(app: Router, request: Request<Body>) -> TestResponse {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
    TestResponse {
        status,
        headers,
        body,
    }
}

pub fn usage_row(
    id: i64,
    system_id: &str,
    display_name: &str,
    org_id: &str,
    date: NaiveDate,
) -> DailySystemCpu {
    DailySystemCpu {
        id,
        system_id: Uuid::parse_str(system_id).unwrap(),
        display_name: display_name.to_string(),
        org_id: org_id.to_string(),
        product: "RHEL".to_string(),
        socket_count: 2,
        date,
        total_uptime: 3600.0,
    }
}

pub fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
}
