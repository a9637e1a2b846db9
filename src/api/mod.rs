use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Json;
use axum::Router;
use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::{get, post};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::bridge::BridgeSettings;
use crate::config::DashConfig;
use crate::usage::{Breakdown, SeriesMetric, TimeseriesReport, TokenMetricsReport, UsageService};

pub mod chat;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_DAYS: u32 = 365;
const MAX_HOURS: u32 = 24 * 365;

/// Shared state behind every route.
#[derive(Clone)]
pub struct DashService {
    pub bridge: Arc<BridgeSettings>,
    pub usage: Arc<UsageService>,
    pub client: Client,
    pub gateway_http_url: Arc<str>,
}

impl DashService {
    pub fn new(cfg: &DashConfig) -> Result<Self> {
        Ok(Self {
            bridge: Arc::new(BridgeSettings::from_config(cfg)),
            usage: Arc::new(UsageService::new(cfg.trace_file(), cfg.usage_ttl())),
            client: Client::builder().build()?,
            gateway_http_url: Arc::from(cfg.gateway.http_url.trim_end_matches('/')),
        })
    }

    pub fn gateway_health_url(&self) -> String {
        format!("{}/health", self.gateway_http_url)
    }

    /// Status code of the gateway's health endpoint, or `None` when unreachable.
    pub async fn probe_gateway(&self, timeout: Duration) -> Option<u16> {
        match self
            .client
            .get(self.gateway_health_url())
            .timeout(timeout)
            .send()
            .await
        {
            Ok(resp) => Some(resp.status().as_u16()),
            Err(err) => {
                warn!(url = %self.gateway_health_url(), "gateway health probe failed: {}", err);
                None
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    days: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SeriesQueryParams {
    metric: Option<String>,
    hours: Option<u32>,
}

fn internal<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

async fn token_metrics(
    svc: DashService,
    Query(q): Query<DaysQuery>,
) -> Result<Json<TokenMetricsReport>, (StatusCode, String)> {
    let days = q.days.unwrap_or(7).clamp(1, MAX_DAYS);
    let report = svc.usage.token_metrics(days).await.map_err(internal)?;
    Ok(Json(report.as_ref().clone()))
}

async fn timeseries(
    svc: DashService,
    Query(q): Query<SeriesQueryParams>,
) -> Result<Json<TimeseriesReport>, (StatusCode, String)> {
    let metric = q
        .metric
        .as_deref()
        .map(SeriesMetric::parse_lenient)
        .unwrap_or_default();
    let hours = q.hours.unwrap_or(24).clamp(1, MAX_HOURS);
    let report = svc
        .usage
        .timeseries(metric, hours)
        .await
        .map_err(internal)?;
    Ok(Json(report.as_ref().clone()))
}

async fn breakdown(svc: DashService) -> Result<Json<Breakdown>, (StatusCode, String)> {
    let report = svc.usage.breakdown().await.map_err(internal)?;
    Ok(Json(report))
}

async fn health(svc: DashService) -> Json<Value> {
    let gateway = svc.gateway_http_url.to_string();
    match svc.probe_gateway(HEALTH_TIMEOUT).await {
        Some(code) => Json(json!({
            "status": if code == 200 { "healthy" } else { "unhealthy" },
            "gateway": gateway,
            "gateway_status": code,
        })),
        None => Json(json!({
            "status": "unhealthy",
            "gateway": gateway,
            "gateway_status": "unreachable",
        })),
    }
}

pub fn router(svc: DashService) -> Router {
    let s0 = svc.clone();
    let s1 = svc.clone();
    let s2 = svc.clone();
    let s3 = svc.clone();
    let s4 = svc.clone();
    let s5 = svc.clone();
    let s6 = svc.clone();
    let s7 = svc.clone();
    let s8 = svc.clone();
    let s9 = svc.clone();
    let s10 = svc.clone();

    Router::new()
        .route("/health", get(move || health(s0.clone())))
        .route(
            "/api/chat",
            post(move |body| chat::chat_once(s1.clone(), body)),
        )
        .route(
            "/api/chat/stream",
            post(move |body| chat::chat_stream(s2.clone(), body)),
        )
        .route(
            "/api/chat/status",
            get(move || chat::chat_status(s3.clone())),
        )
        .route("/ws/chat", get(move |ws| chat::chat_ws(s4.clone(), ws)))
        .route(
            "/api/metrics/tokens",
            get(move |q| token_metrics(s5.clone(), q)),
        )
        .route(
            "/api/v1/metrics/tokens",
            get(move |q| token_metrics(s6.clone(), q)),
        )
        .route(
            "/api/metrics/timeseries",
            get(move |q| timeseries(s7.clone(), q)),
        )
        .route(
            "/api/v2/metrics/timeseries",
            get(move |q| timeseries(s8.clone(), q)),
        )
        .route(
            "/api/metrics/breakdown",
            get(move || breakdown(s9.clone())),
        )
        .route(
            "/api/v2/metrics/breakdown",
            get(move || breakdown(s10.clone())),
        )
}
