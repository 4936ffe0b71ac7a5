use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use pulse_core::{now_millis, Labels, MetricKind, Point, Timestamp};
use pulse_rule::{parse_expr, Expr};
use pulse_tsdb::{LabelMatcher, TimeRange};

use crate::pipeline::Pipeline;

/// 未指定 `start` 时的默认查询窗口
const DEFAULT_RANGE_MS: i64 = 3_600_000;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn create_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(export_metrics))
        .route("/api/v1/query_range", get(query_range))
        .route("/api/v1/series", get(list_series))
        .route("/api/v1/targets", get(list_targets))
        .route("/api/v1/rules", get(list_rules))
        .route("/api/v1/alerts", get(list_alerts))
        .route("/-/reload", post(reload))
        .with_state(pipeline)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn export_metrics(State(pipeline): State<Arc<Pipeline>>) -> Response {
    match pipeline.metrics().export() {
        Ok(text) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], text).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub selector: String,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct SeriesData {
    pub metric: String,
    pub labels: Labels,
    pub kind: MetricKind,
    pub points: Vec<Point>,
}

async fn query_range(State(pipeline): State<Arc<Pipeline>>, Query(q): Query<RangeQuery>) -> Response {
    let selector = match parse_expr(&q.selector) {
        Ok(Expr::Selector(selector)) => selector,
        Ok(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "selector must be a plain series selector such as up{job=\"node\"}",
            )
        }
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let end = q.end.unwrap_or_else(now_millis);
    let start = q.start.unwrap_or_else(|| end.saturating_sub(DEFAULT_RANGE_MS));
    if start > end {
        return error_response(StatusCode::BAD_REQUEST, "start must not be after end");
    }

    let result = pipeline
        .store()
        .query(&selector.metric, &selector.matchers, TimeRange::new(start, end));
    let series: Vec<SeriesData> = result
        .series()
        .map(|s| SeriesData {
            metric: s.metric().to_string(),
            labels: s.labels().clone(),
            kind: s.kind(),
            points: s.collect_points(),
        })
        .collect();

    Json(json!({ "start": start, "end": end, "series": series })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SeriesQuery {
    pub metric: Option<String>,
}

async fn list_series(State(pipeline): State<Arc<Pipeline>>, Query(q): Query<SeriesQuery>) -> Response {
    let series = pipeline.store().list_series(q.metric.as_deref());
    Json(json!({ "count": series.len(), "series": series })).into_response()
}

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    pub address: String,
    pub url: String,
    pub labels: Labels,
    #[serde(with = "humantime_serde")]
    pub scrape_interval: Duration,
    pub health: &'static str,
    pub last_scrape: Option<Timestamp>,
    pub last_error: Option<String>,
}

async fn list_targets(State(pipeline): State<Arc<Pipeline>>) -> Response {
    let mut targets = Vec::new();
    for target in pipeline.registry().list_targets().await {
        let address = target.address();
        let latest = pipeline
            .store()
            .query("up", &[LabelMatcher::equal("instance", address.clone())], TimeRange::all())
            .series()
            .filter_map(|s| s.latest())
            .max_by_key(|p| p.timestamp);

        let health = match latest {
            Some(point) if point.value == 1.0 => "up",
            Some(_) => "down",
            None => "unknown",
        };
        targets.push(TargetStatus {
            url: target.url().map(|u| u.to_string()).unwrap_or_default(),
            labels: target.labels.clone(),
            scrape_interval: target.scrape_interval,
            health,
            last_scrape: latest.map(|p| p.timestamp),
            last_error: pipeline.metrics().last_scrape_error(&address),
            address,
        });
    }
    targets.sort_by(|a, b| a.address.cmp(&b.address));
    Json(json!({ "targets": targets })).into_response()
}

async fn list_rules(State(pipeline): State<Arc<Pipeline>>) -> Response {
    Json(json!({ "rules": pipeline.evaluator().rule_states() })).into_response()
}

async fn list_alerts(State(pipeline): State<Arc<Pipeline>>) -> Response {
    Json(json!({
        "active": pipeline.alerts().active_alerts(),
        "resolved": pipeline.alerts().history(),
    }))
    .into_response()
}

async fn reload(State(pipeline): State<Arc<Pipeline>>) -> Response {
    tracing::info!("Reload requested via API");
    match pipeline.reload().await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}
