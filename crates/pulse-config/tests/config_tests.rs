use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

use pulse_config::{load_config, AppConfig, ConfigManager, LogFormat};
use pulse_core::{ConfigError, Severity};

const CONFIG: &str = r#"
[server]
listen = "0.0.0.0:9464"

[storage]
max_points_per_series = 500
max_age = "1h"
snapshot_path = "/var/lib/pulse/snapshot.json"

[scrape]
interval = "5s"
timeout = "2s"
strict_parsing = true

[[scrape.targets]]
targets = ["node-a:9100", "node-b:9100"]
labels = { job = "node" }

[[scrape.targets]]
targets = ["api:8080"]
labels = { job = "api" }
metrics_path = "/internal/metrics"
interval = "30s"

[rules]
files = ["rules/"]
evaluation_interval = "10s"

[alerting]
max_attempts = 3

[[alerting.webhooks]]
name = "ops"
url = "https://hooks.example.com/pulse"
min_severity = "critical"
headers = { Authorization = "Bearer token" }

[logging]
level = "debug"
format = "json"
"#;

fn write(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
}

#[test]
fn loads_toml_with_defaults_for_missing_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulse.toml");
    write(&path, CONFIG);

    let config = load_config(Some(&path)).unwrap();
    assert_eq!(config.server.listen, "0.0.0.0:9464");
    assert_eq!(config.server.reload_interval, Duration::from_secs(10));
    assert_eq!(config.storage.max_points_per_series, 500);
    assert_eq!(config.storage.max_age, Duration::from_secs(3600));
    assert!(config.scrape.strict_parsing);
    assert_eq!(config.rules.evaluation_interval, Duration::from_secs(10));
    assert_eq!(config.rules.lookback, Duration::from_secs(300));
    assert_eq!(config.alerting.max_attempts, 3);
    assert_eq!(config.alerting.webhooks[0].min_severity, Severity::Critical);
    assert_eq!(config.logging.format, LogFormat::Json);

    let targets = config.static_targets().unwrap();
    assert_eq!(targets.len(), 3);
    let api = targets.iter().find(|t| t.host == "api").unwrap();
    assert_eq!(api.metrics_path, "/internal/metrics");
    assert_eq!(api.scrape_interval, Duration::from_secs(30));
    assert_eq!(api.scrape_timeout, Duration::from_secs(2));
    assert_eq!(api.labels.get("job"), Some("api"));
}

#[test]
fn effective_config_round_trips_through_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulse.toml");
    write(&path, CONFIG);
    let config = load_config(Some(&path)).unwrap();

    let rendered = dir.path().join("effective.toml");
    write(&rendered, &config.to_toml().unwrap());
    assert_eq!(load_config(Some(&rendered)).unwrap(), config);
}

#[test]
fn rejects_invalid_files() {
    let dir = tempfile::tempdir().unwrap();

    let missing = dir.path().join("missing.toml");
    assert!(matches!(load_config(Some(&missing)), Err(ConfigError::Io { .. })));

    let bad_target = dir.path().join("bad_target.toml");
    write(&bad_target, "[[scrape.targets]]\ntargets = [\"http://a:9100\"]\n");
    assert!(matches!(load_config(Some(&bad_target)), Err(ConfigError::InvalidTarget { .. })));

    let bad_duration = dir.path().join("bad_duration.toml");
    write(&bad_duration, "[scrape]\ninterval = \"soon\"\n");
    assert!(load_config(Some(&bad_duration)).is_err());

    let syntax = dir.path().join("syntax.toml");
    write(&syntax, "[server\nlisten = ");
    assert!(load_config(Some(&syntax)).is_err());
}

#[tokio::test]
async fn failed_reload_keeps_current_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulse.toml");
    write(&path, CONFIG);

    let manager = ConfigManager::load(Some(path.clone())).unwrap();
    let mut updates = manager.subscribe();
    assert!(!manager.reload().await.unwrap());

    write(&path, &CONFIG.replace("interval = \"5s\"", "interval = \"7s\""));
    assert!(manager.reload().await.unwrap());
    assert!(updates.has_changed().unwrap());
    assert_eq!(updates.borrow_and_update().scrape.interval, Duration::from_secs(7));

    write(&path, "[server]\nlisten = \"nowhere\"\n");
    assert!(manager.reload().await.is_err());
    assert!(!updates.has_changed().unwrap());
    assert_eq!(manager.current().scrape.interval, Duration::from_secs(7));
}

#[tokio::test]
async fn watcher_picks_up_modified_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pulse.toml");
    write(&path, CONFIG);

    let manager = Arc::new(ConfigManager::load(Some(path.clone())).unwrap());
    let mut updates = manager.subscribe();
    let cancel = CancellationToken::new();
    let handle = manager.clone().watch(Duration::from_millis(20), cancel.clone());

    write(&path, &CONFIG.replace("level = \"debug\"", "level = \"warn\""));
    let file = fs::File::options().write(true).open(&path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();

    tokio::time::timeout(Duration::from_secs(5), updates.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updates.borrow().logging.level, "warn");

    cancel.cancel();
    handle.await.unwrap();
}

#[test]
fn defaults_without_file() {
    let config = load_config(None).unwrap();
    assert_eq!(config, AppConfig::default());
}
