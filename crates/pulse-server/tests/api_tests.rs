use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

use pulse_config::ConfigManager;
use pulse_core::{Labels, Sample, Target};
use pulse_scrape::{FetchError, Fetcher};
use pulse_server::{create_router, Pipeline};

const TARGET_DOWN: &str = r#"
groups:
  - name: node
    interval: 1s
    rules:
      - alert: TargetDown
        expr: up == 0
        for: 1s
        labels:
          severity: critical
        annotations:
          summary: "{{ $labels.instance }} is down"
"#;

const HIGH_LOAD: &str = r#"
  - name: load
    rules:
      - alert: HighLoad
        expr: node_load1 > 4
"#;

/// 按顺序返回预设响应，用尽后重复最后一个
struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Vec<u8>, FetchError>>>,
}

impl ScriptedFetcher {
    fn new(responses: Vec<Result<&str, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|r| r.map(|body| body.as_bytes().to_vec()))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _target: &Target) -> Result<Vec<u8>, FetchError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap()
        }
    }
}

fn write_config(dir: &Path, rules: &str) -> PathBuf {
    let rules_path = dir.join("rules.yml");
    std::fs::write(&rules_path, rules).unwrap();

    let config_path = dir.join("pulse.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"
[scrape]
interval = "1s"
timeout = "500ms"

[[scrape.targets]]
targets = ["a:9100"]
labels = {{ job = "node" }}

[rules]
files = ['{}']
evaluation_interval = "1s"

[alerting]
log_notifications = false
"#,
            rules_path.display()
        ),
    )
    .unwrap();
    config_path
}

async fn pipeline(dir: &TempDir, fetcher: ScriptedFetcher) -> Arc<Pipeline> {
    let config_path = write_config(dir.path(), TARGET_DOWN);
    let manager = ConfigManager::load(Some(config_path)).unwrap();
    Arc::new(
        Pipeline::build_with_fetcher(Arc::new(manager), Arc::new(fetcher))
            .await
            .unwrap(),
    )
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(app, request).await
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn test_health_and_self_metrics() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, ScriptedFetcher::new(vec![Ok("node_load1 0.5\n")])).await;
    let app = create_router(pipeline.clone());

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let target = Target::parse("a:9100").unwrap();
    pipeline.engine().scrape_target(&target, 1_000).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("pulse_scrapes_total"));
    assert!(text.contains("pulse_samples_appended_total"));
}

#[tokio::test]
async fn test_query_range() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, ScriptedFetcher::new(vec![Ok("")])).await;
    let app = create_router(pipeline.clone());

    let labels = Labels::from_pairs([("instance", "a:9100"), ("job", "node")]).unwrap();
    for (ts, value) in [(1_000, 1.0), (2_000, 1.0), (3_000, f64::NAN), (9_000, 0.0)] {
        pipeline
            .store()
            .append(&Sample::new("up", labels.clone(), ts, value))
            .unwrap();
    }

    // up{instance="a:9100"}
    let (status, body) = get(
        &app,
        "/api/v1/query_range?selector=up%7Binstance%3D%22a%3A9100%22%7D&start=0&end=5000",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let series = body["series"].as_array().unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0]["labels"]["job"], "node");
    let points = series[0]["points"].as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["timestamp"], 1_000);
    assert_eq!(points[2]["value"], "NaN");

    let (status, body) = get(&app, "/api/v1/query_range?selector=missing&start=0&end=5000").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["series"].as_array().unwrap().is_empty());

    let (status, _) = get(&app, "/api/v1/query_range?selector=up&start=5000&end=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // sum(up) 不是选择器
    let (status, body) = get(&app, "/api/v1/query_range?selector=sum%28up%29").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = get(&app, "/api/v1/query_range?selector=up%7B").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = get(&app, "/api/v1/series?metric=up").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 1);
    assert_eq!(body["series"][0]["points"], 4);
    assert_eq!(body["series"][0]["last_timestamp"], 9_000);
}

#[tokio::test]
async fn test_targets_report_health_and_last_error() {
    let dir = TempDir::new().unwrap();
    let fetcher = ScriptedFetcher::new(vec![
        Ok("node_load1 0.5\n"),
        Err(FetchError::Request("connection refused".into())),
    ]);
    let pipeline = pipeline(&dir, fetcher).await;
    let app = create_router(pipeline.clone());

    let (status, body) = get(&app, "/api/v1/targets").await;
    assert_eq!(status, StatusCode::OK);
    let targets = body["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["address"], "a:9100");
    assert_eq!(targets[0]["url"], "http://a:9100/metrics");
    assert_eq!(targets[0]["labels"]["job"], "node");
    assert_eq!(targets[0]["health"], "unknown");

    let target = pipeline.registry().get("a:9100").await.unwrap();
    pipeline.engine().scrape_target(&target, 1_000).await;
    let (_, body) = get(&app, "/api/v1/targets").await;
    assert_eq!(body["targets"][0]["health"], "up");
    assert_eq!(body["targets"][0]["last_scrape"], 1_000);

    pipeline.engine().scrape_target(&target, 2_000).await;
    let (_, body) = get(&app, "/api/v1/targets").await;
    assert_eq!(body["targets"][0]["health"], "down");
    assert_eq!(body["targets"][0]["last_error"], "request failed: connection refused");
}

#[tokio::test]
async fn test_target_down_scenario_through_the_api() {
    let dir = TempDir::new().unwrap();
    let mut script = vec![Ok("node_load1 0.5\n"); 5];
    script.extend(vec![Err(FetchError::Request("connection refused".into())); 3]);
    script.push(Ok("node_load1 0.5\n"));
    let pipeline = pipeline(&dir, ScriptedFetcher::new(script)).await;
    let app = create_router(pipeline.clone());
    let target = pipeline.registry().get("a:9100").await.unwrap();

    for tick in 1..=7 {
        let now = tick * 1_000;
        pipeline.engine().scrape_target(&target, now).await;
        let events = pipeline.evaluator().evaluate_at(now);
        pipeline.alerts().handle(events);

        let (_, body) = get(&app, "/api/v1/rules").await;
        let state = body["rules"][0]["instances"][0]["state"].clone();
        match tick {
            1..=5 => assert!(state.is_null(), "tick {}: {}", tick, state),
            6 => assert_eq!(state, "pending"),
            _ => assert_eq!(state, "firing"),
        }
    }

    let (_, body) = get(&app, "/api/v1/alerts").await;
    let active = body["active"].as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["rule_name"], "TargetDown");
    assert_eq!(active[0]["severity"], "critical");
    assert_eq!(active[0]["labels"]["alertname"], "TargetDown");
    assert_eq!(active[0]["labels"]["job"], "node");
    assert_eq!(active[0]["annotations"]["summary"], "a:9100 is down");
    assert_eq!(active[0]["fired_at"], 7_000);

    // 第 8 次仍失败，第 9 次恢复
    for tick in 8..=9 {
        let now = tick * 1_000;
        pipeline.engine().scrape_target(&target, now).await;
        let events = pipeline.evaluator().evaluate_at(now);
        pipeline.alerts().handle(events);
    }

    let (_, body) = get(&app, "/api/v1/alerts").await;
    assert!(body["active"].as_array().unwrap().is_empty());
    let resolved = body["resolved"].as_array().unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0]["resolved_at"], 9_000);

    let (_, body) = get(&app, "/api/v1/rules").await;
    assert_eq!(body["rules"][0]["health"], "ok");
    assert_eq!(body["rules"][0]["last_evaluation"], 9_000);
}

#[tokio::test]
async fn test_reload_picks_up_rule_changes_and_keeps_old_set_on_error() {
    let dir = TempDir::new().unwrap();
    let pipeline = pipeline(&dir, ScriptedFetcher::new(vec![Ok("")])).await;
    let app = create_router(pipeline.clone());
    assert_eq!(pipeline.evaluator().rules().len(), 1);

    std::fs::write(dir.path().join("rules.yml"), format!("{}{}", TARGET_DOWN, HIGH_LOAD)).unwrap();
    let reload = || Request::builder().method("POST").uri("/-/reload").body(Body::empty()).unwrap();

    let (status, body) = send(&app, reload()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config_changed"], false);
    assert_eq!(body["rules"], 2);

    let (_, body) = get(&app, "/api/v1/rules").await;
    let names: Vec<&str> = body["rules"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["TargetDown", "HighLoad"]);

    std::fs::write(dir.path().join("rules.yml"), "groups: [{name: broken, rules: [{alert: X, expr: 'up =='}]}]").unwrap();
    let (status, body) = send(&app, reload()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
    assert_eq!(pipeline.evaluator().rules().len(), 2);
}
