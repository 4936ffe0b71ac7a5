use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use pulse_core::{Labels, MemorySink, PipelineError, Target};
use pulse_scrape::{FetchError, Fetcher, ScrapeEngine, TargetRegistry};
use pulse_tsdb::{LabelMatcher, TimeRange, TimeSeriesStore};

/// 按顺序返回预设响应，用尽后重复最后一个
struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<Vec<u8>, FetchError>>>,
    calls: AtomicUsize,
    delay: Duration,
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
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, _target: &Target) -> Result<Vec<u8>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap()
        }
    }
}

fn up_values(store: &TimeSeriesStore, instance: &str) -> Vec<f64> {
    let matchers = vec![LabelMatcher::equal("instance", instance)];
    let result = store.query("up", &matchers, TimeRange::all());
    let values = result
        .series()
        .next()
        .map(|s| s.points().map(|p| p.value).collect())
        .unwrap_or_default();
    values
}

fn build(fetcher: Arc<ScriptedFetcher>, sink: Arc<MemorySink>) -> (Arc<TargetRegistry>, Arc<TimeSeriesStore>, ScrapeEngine) {
    let registry = Arc::new(TargetRegistry::new());
    let store = Arc::new(TimeSeriesStore::default());
    let engine = ScrapeEngine::new(registry.clone(), store.clone(), fetcher).with_sink(sink);
    (registry, store, engine)
}

#[tokio::test]
async fn test_up_then_failures() {
    let mut script = vec![Ok("up 1\nnode_load1 0.5\n"); 5];
    script.extend(vec![Err(FetchError::Request("connection refused".into())); 3]);
    let fetcher = Arc::new(ScriptedFetcher::new(script));
    let sink = Arc::new(MemorySink::default());
    let (_registry, store, engine) = build(fetcher.clone(), sink.clone());

    let target = Target::parse("a:9100").unwrap();
    for tick in 1..=8 {
        let report = engine.scrape_target(&target, tick * 15_000).await;
        assert_eq!(report.up, tick <= 5);
    }

    assert_eq!(
        up_values(&store, "a:9100"),
        vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0]
    );
    let scrape_errors = sink
        .errors()
        .into_iter()
        .filter(|e| matches!(e, PipelineError::Scrape(_)))
        .count();
    assert_eq!(scrape_errors, 3);

    // 目标标签附加在抓取样本上
    let load = store.query("node_load1", &[], TimeRange::all());
    let series = load.series().next().unwrap();
    assert_eq!(series.labels().get("instance"), Some("a:9100"));
    assert_eq!(series.points().count(), 5);
}

#[tokio::test]
async fn test_identical_timestamps_rejected_once() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok("requests_total 10 1000\n")]));
    let sink = Arc::new(MemorySink::default());
    let (_registry, store, engine) = build(fetcher, sink.clone());
    let target = Target::parse("a:9100").unwrap();

    let first = engine.scrape_target(&target, 2_000).await;
    let second = engine.scrape_target(&target, 3_000).await;

    assert_eq!(first.out_of_order, 0);
    assert_eq!(second.out_of_order, 1);
    let out_of_order: Vec<_> = sink
        .errors()
        .into_iter()
        .filter(|e| matches!(e, PipelineError::OutOfOrder(_)))
        .collect();
    assert_eq!(out_of_order.len(), 1);

    let result = store.query("requests_total", &[], TimeRange::all());
    let points: Vec<_> = result.series().next().unwrap().points().collect();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].timestamp, 1000);
}

#[tokio::test]
async fn test_malformed_lines() {
    let body = "good 1\nbroken{ 2\n";
    let sink = Arc::new(MemorySink::default());

    let lenient = Arc::new(ScriptedFetcher::new(vec![Ok(body)]));
    let (_r, store, engine) = build(lenient, sink.clone());
    let report = engine
        .scrape_target(&Target::parse("a:1").unwrap(), 1_000)
        .await;
    assert!(report.up);
    assert_eq!(report.parse_errors, 1);
    assert_eq!(store.query("good", &[], TimeRange::all()).len(), 1);

    let strict = Arc::new(ScriptedFetcher::new(vec![Ok(body)]));
    let (_r, store, engine) = build(strict, sink.clone());
    let engine = engine.with_strict_parsing(true);
    let report = engine
        .scrape_target(&Target::parse("a:1").unwrap(), 1_000)
        .await;
    assert!(!report.up);
    assert!(store.query("good", &[], TimeRange::all()).is_empty());
    assert_eq!(up_values(&store, "a:1"), vec![0.0]);
}

#[tokio::test]
async fn test_invalid_utf8_discards_payload() {
    let fetcher = Arc::new(ScriptedFetcher {
        responses: Mutex::new(VecDeque::from(vec![Ok(vec![0x66, 0xff, 0x20, 0x31])])),
        calls: AtomicUsize::new(0),
        delay: Duration::ZERO,
    });
    let sink = Arc::new(MemorySink::default());
    let (_r, store, engine) = build(fetcher, sink.clone());

    let report = engine
        .scrape_target(&Target::parse("a:1").unwrap(), 1_000)
        .await;
    assert!(!report.up);
    assert_eq!(store.series_count(), 3);
    assert!(matches!(sink.errors()[0], PipelineError::Parse { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_removed_target_stops_scraping() {
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Ok("m 1\n")]));
    let sink = Arc::new(MemorySink::default());
    let (registry, _store, engine) = build(fetcher.clone(), sink);
    let engine = Arc::new(engine);

    let target = Target::parse("a:9100")
        .unwrap()
        .with_interval(Duration::from_secs(1))
        .with_timeout(Duration::from_millis(500));
    registry.upsert(target).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = engine.clone().start(cancel.clone());

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    let before = fetcher.calls();
    assert!(before >= 3, "expected at least 3 scrapes, got {before}");

    registry.remove("a:9100").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let after_removal = fetcher.calls();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.calls(), after_removal);

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_in_flight_scrape_completes_after_removal() {
    let fetcher = Arc::new(
        ScriptedFetcher::new(vec![Ok("m 1\n")]).with_delay(Duration::from_millis(400)),
    );
    let sink = Arc::new(MemorySink::default());
    let (registry, store, engine) = build(fetcher.clone(), sink.clone());
    let engine = Arc::new(engine);

    let target = Target::parse("a:9100")
        .unwrap()
        .with_interval(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(1));
    registry.upsert(target).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = engine.clone().start(cancel.clone());

    // 第一次抓取进行中时移除目标
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(fetcher.calls(), 1);
    registry.remove("a:9100").await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(up_values(&store, "a:9100"), vec![1.0]);
    assert!(sink.is_empty());

    cancel.cancel();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_target_labels_and_timeout() {
    let fetcher = Arc::new(
        ScriptedFetcher::new(vec![Ok("m 1\n")]).with_delay(Duration::from_secs(5)),
    );
    let sink = Arc::new(MemorySink::default());
    let (_r, store, engine) = build(fetcher, sink.clone());

    let target = Target::parse("slow:1")
        .unwrap()
        .with_timeout(Duration::from_millis(50))
        .with_labels(Labels::from_pairs([("job", "slow")]).unwrap());
    let report = engine.scrape_target(&target, 1_000).await;

    assert!(!report.up);
    assert!(matches!(&sink.errors()[0], PipelineError::Scrape(e) if e.cause.contains("timed out")));
    let up = store.query("up", &[LabelMatcher::equal("job", "slow")], TimeRange::all());
    assert_eq!(up.len(), 1);
}
