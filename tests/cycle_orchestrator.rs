// tests/cycle_orchestrator.rs
//
// Orchestrator behavior with in-memory collaborators:
// window/checkpoint handling, deterministic merge, failure isolation,
// synthesis fallback and failure persistence.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use news_digest::ai::{Completion, CompletionClient, MockClient};
use news_digest::checkpoint::{CheckpointStore, MemoryCheckpoint};
use news_digest::cycle::{CycleDeps, CycleOrchestrator, CycleOutput, CycleSettings};
use news_digest::error::{DigestError, Result};
use news_digest::fetch::{FeedFetcher, FetchReport, MockFetcher};
use news_digest::sources::{FeedGroups, MemoryFailureSink, StaticSourceLoader};
use news_digest::window::TimeWindow;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, 6, 0, 0).unwrap()
}

fn groups(ids: &[&str]) -> FeedGroups {
    ids.iter()
        .map(|id| (id.to_string(), vec![format!("https://{id}.example/rss")]))
        .collect()
}

/// Filter pass that echoes a per-group line, synthesis that echoes its input.
fn echo_filter() -> MockClient {
    MockClient::from_fn(|_, content| {
        let group = content
            .lines()
            .next()
            .and_then(|l| l.strip_prefix("Target Country: "))
            .unwrap_or("?")
            .to_string();
        Ok(Completion {
            result: format!("report {group}"),
            tokens: 10,
            price: 0.01,
        })
    })
}

fn echo_final() -> MockClient {
    MockClient::from_fn(|_, content| {
        Ok(Completion {
            result: content.to_string(),
            tokens: 5,
            price: 0.5,
        })
    })
}

struct Harness {
    checkpoint: Arc<MemoryCheckpoint>,
    sink: Arc<MemoryFailureSink>,
    orchestrator: CycleOrchestrator,
}

fn harness(
    sources: StaticSourceLoader,
    fetcher: Arc<dyn FeedFetcher>,
    filter: MockClient,
    final_ai: MockClient,
    last_run: Option<DateTime<Utc>>,
) -> Harness {
    let checkpoint = Arc::new(MemoryCheckpoint::new(last_run));
    let sink = Arc::new(MemoryFailureSink::new());
    let deps = CycleDeps {
        sources: Arc::new(sources),
        fetcher,
        filter_ai: Arc::new(filter),
        final_ai: Arc::new(final_ai),
        checkpoint: checkpoint.clone(),
        failures: sink.clone(),
    };
    Harness {
        checkpoint,
        sink,
        orchestrator: CycleOrchestrator::new(deps, CycleSettings::default()),
    }
}

/// Records the window each group was fetched with.
#[derive(Default)]
struct WindowSpy {
    seen: Mutex<Vec<TimeWindow>>,
}

#[async_trait]
impl FeedFetcher for WindowSpy {
    async fn fetch(&self, _: &str, _: &[String], window: &TimeWindow) -> Result<FetchReport> {
        self.seen.lock().unwrap().push(*window);
        Ok(FetchReport::default())
    }
}

#[tokio::test]
async fn checkpoint_within_ceiling_is_window_start_and_advances_to_now() {
    let spy = Arc::new(WindowSpy::default());
    let h = harness(
        StaticSourceLoader::new(groups(&["DE"])),
        spy.clone(),
        echo_filter(),
        echo_final(),
        Some(t0()),
    );
    let now = t0() + chrono::Duration::hours(2);

    let out = h.orchestrator.run_at(now).await;

    assert_eq!(out, CycleOutput::NoNews);
    let w = spy.seen.lock().unwrap()[0];
    assert_eq!(w.start(), t0());
    assert_eq!(w.end(), now);
    assert_eq!(h.checkpoint.current(), Some(now));
}

#[tokio::test]
async fn long_outage_clamps_window_to_ceiling() {
    let spy = Arc::new(WindowSpy::default());
    let h = harness(
        StaticSourceLoader::new(groups(&["DE"])),
        spy.clone(),
        echo_filter(),
        echo_final(),
        Some(t0()),
    );
    let now = t0() + chrono::Duration::hours(30);

    h.orchestrator.run_at(now).await;

    let w = spy.seen.lock().unwrap()[0];
    assert_eq!(w.start(), now - chrono::Duration::hours(8));
    assert!(w.start() < w.end());
}

#[tokio::test(start_paused = true)]
async fn merge_is_sorted_regardless_of_completion_order() {
    // PL finishes first, AT last.
    let fetcher = MockFetcher::new()
        .with_text("AT", "Title: a")
        .with_delay("AT", Duration::from_millis(300))
        .with_text("DE", "Title: d")
        .with_delay("DE", Duration::from_millis(200))
        .with_text("PL", "Title: p")
        .with_delay("PL", Duration::from_millis(100));
    let h = harness(
        StaticSourceLoader::new(groups(&["PL", "DE", "AT"])),
        Arc::new(fetcher),
        echo_filter(),
        echo_final(),
        Some(t0()),
    );

    let res = h
        .orchestrator
        .run_cycle(t0() + chrono::Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(
        res.merged_report,
        "News for: AT:\nreport AT\n\nNews for: DE:\nreport DE\n\nNews for: PL:\nreport PL"
    );
    assert_eq!(res.digest, res.merged_report);
    assert_eq!(res.tokens, 3 * 10 + 5);
    assert!((res.price - (0.03 + 0.5)).abs() < 1e-9);
}

#[tokio::test]
async fn failing_group_contributes_nothing() {
    let fetcher = MockFetcher::new()
        .with_error("DE", "connection reset")
        .with_text("FR", "Title: f")
        .with_text("IT", "Title: i");
    // The filter pass always fails for IT.
    let filter = MockClient::from_fn(|_, content| {
        if content.starts_with("Target Country: IT") {
            return Err(DigestError::api("HTTP 502"));
        }
        Ok(Completion {
            result: "report FR".into(),
            tokens: 7,
            price: 0.07,
        })
    });
    let h = harness(
        StaticSourceLoader::new(groups(&["DE", "FR", "IT"])),
        Arc::new(fetcher),
        filter,
        echo_final(),
        None,
    );

    let res = h.orchestrator.run_cycle(t0()).await.unwrap();

    assert_eq!(res.merged_report, "News for: FR:\nreport FR");
    assert_eq!(res.tokens, 7 + 5);
    assert_eq!(h.checkpoint.current(), Some(t0()));
}

/// Panics for one group to simulate a task that cannot be joined.
struct PanickyFetcher;

#[async_trait]
impl FeedFetcher for PanickyFetcher {
    async fn fetch(&self, group: &str, _: &[String], _: &TimeWindow) -> Result<FetchReport> {
        if group == "XX" {
            panic!("parser blew up");
        }
        Ok(FetchReport::text("Title: ok"))
    }
}

#[tokio::test]
async fn panicking_group_task_is_isolated() {
    let h = harness(
        StaticSourceLoader::new(groups(&["AA", "XX"])),
        Arc::new(PanickyFetcher),
        echo_filter(),
        echo_final(),
        None,
    );

    let out = h.orchestrator.run_at(t0()).await;

    assert_eq!(out, CycleOutput::Digest("News for: AA:\nreport AA".into()));
    assert_eq!(h.checkpoint.writes(), vec![t0()]);
}

#[tokio::test]
async fn bad_config_leaves_checkpoint_untouched() {
    let fetcher = Arc::new(MockFetcher::new());
    let h = harness(
        StaticSourceLoader::failing("sources.toml: expected table"),
        fetcher.clone(),
        echo_filter(),
        echo_final(),
        Some(t0()),
    );

    let out = h.orchestrator.run_at(t0() + chrono::Duration::hours(1)).await;

    match out {
        CycleOutput::Failed(msg) => assert!(msg.contains("Configuration error"), "{msg}"),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(h.checkpoint.writes().is_empty());
    assert!(fetcher.calls().is_empty());
}

#[tokio::test]
async fn empty_sources_short_circuit() {
    let h = harness(
        StaticSourceLoader::new(FeedGroups::new()),
        Arc::new(MockFetcher::new()),
        echo_filter(),
        echo_final(),
        None,
    );

    let out = h.orchestrator.run_at(t0()).await;

    assert!(matches!(out, CycleOutput::Failed(ref m) if m.contains("No news sources")));
    assert!(h.checkpoint.writes().is_empty());
}

#[tokio::test]
async fn no_news_everywhere_skips_synthesis() {
    let fetcher = MockFetcher::new()
        .with_text("A", "Title: something")
        .with_text("B", "");
    let final_ai = Arc::new(echo_final());
    let checkpoint = Arc::new(MemoryCheckpoint::new(None));
    let deps = CycleDeps {
        sources: Arc::new(StaticSourceLoader::new(groups(&["A", "B"]))),
        fetcher: Arc::new(fetcher),
        filter_ai: Arc::new(MockClient::replying("No news", 12, 0.001)),
        final_ai: final_ai.clone(),
        checkpoint: checkpoint.clone(),
        failures: Arc::new(MemoryFailureSink::new()),
    };
    let orch = CycleOrchestrator::new(deps, CycleSettings::default());

    let res = orch.run_cycle(t0()).await.unwrap();

    assert_eq!(res.merged_report, "");
    assert_eq!(res.digest, "");
    assert_eq!(res.tokens, 12);
    assert!(final_ai.calls().is_empty());
    assert_eq!(checkpoint.current(), Some(t0()));
}

#[tokio::test]
async fn synthesis_failure_yields_placeholder_and_still_advances() {
    let h = harness(
        StaticSourceLoader::new(groups(&["DE"])),
        Arc::new(MockFetcher::new().with_text("DE", "Title: x")),
        echo_filter(),
        MockClient::failing("HTTP 500: upstream"),
        Some(t0()),
    );
    let now = t0() + chrono::Duration::minutes(30);

    let out = h.orchestrator.run_at(now).await;

    match out {
        CycleOutput::Digest(text) => {
            assert!(text.contains("Failed to generate the final digest"), "{text}");
            assert!(text.contains("HTTP 500"));
        }
        other => panic!("expected placeholder digest, got {other:?}"),
    }
    assert_eq!(h.checkpoint.current(), Some(now));
}

#[tokio::test]
async fn failures_and_alerts_are_persisted() {
    let fetcher = MockFetcher::new()
        .with_report(
            "DE",
            FetchReport {
                text: String::new(),
                failures: vec!["https://a.de/rss: 503 (failure #1)".into()],
                alerts: vec!["Country: DE\nURL: https://b.de/rss\nReason: 404".into()],
            },
        )
        .with_text("FR", "");
    let h = harness(
        StaticSourceLoader::new(groups(&["DE", "FR"])),
        Arc::new(fetcher),
        echo_filter(),
        echo_final(),
        None,
    );

    let res = h.orchestrator.run_cycle(t0()).await.unwrap();

    assert_eq!(res.failures.len(), 1);
    assert_eq!(res.alerts.len(), 1);
    let calls = h.sink.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let mut expected = BTreeMap::new();
    expected.insert(
        "DE".to_string(),
        vec!["https://a.de/rss: 503 (failure #1)".to_string()],
    );
    assert_eq!(calls[0].0, expected);
}

#[tokio::test]
async fn nothing_to_persist_skips_sink() {
    let h = harness(
        StaticSourceLoader::new(groups(&["DE"])),
        Arc::new(MockFetcher::new()),
        echo_filter(),
        echo_final(),
        None,
    );
    h.orchestrator.run_cycle(t0()).await.unwrap();
    assert!(h.sink.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn persistence_failure_does_not_block_checkpoint() {
    let checkpoint = Arc::new(MemoryCheckpoint::new(None));
    let deps = CycleDeps {
        sources: Arc::new(StaticSourceLoader::new(groups(&["DE"]))),
        fetcher: Arc::new(MockFetcher::new().with_report(
            "DE",
            FetchReport {
                text: String::new(),
                failures: vec!["x".into()],
                alerts: vec![],
            },
        )),
        filter_ai: Arc::new(echo_filter()),
        final_ai: Arc::new(echo_final()),
        checkpoint: checkpoint.clone(),
        failures: Arc::new(MemoryFailureSink::failing()),
    };
    let orch = CycleOrchestrator::new(deps, CycleSettings::default());

    orch.run_at(t0()).await;

    assert_eq!(checkpoint.last_run_time().await.unwrap(), Some(t0()));
}

/// Tracks how many group fetches run at once.
struct Gauge {
    current: Mutex<usize>,
    peak: Mutex<usize>,
}

#[async_trait]
impl FeedFetcher for Gauge {
    async fn fetch(&self, _: &str, _: &[String], _: &TimeWindow) -> Result<FetchReport> {
        {
            let mut c = self.current.lock().unwrap();
            *c += 1;
            let mut p = self.peak.lock().unwrap();
            *p = (*p).max(*c);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        *self.current.lock().unwrap() -= 1;
        Ok(FetchReport::default())
    }
}

#[tokio::test(start_paused = true)]
async fn worker_pool_is_bounded() {
    let gauge = Arc::new(Gauge {
        current: Mutex::new(0),
        peak: Mutex::new(0),
    });
    let deps = CycleDeps {
        sources: Arc::new(StaticSourceLoader::new(groups(&["A", "B", "C", "D", "E", "F"]))),
        fetcher: gauge.clone(),
        filter_ai: Arc::new(echo_filter()),
        final_ai: Arc::new(echo_final()),
        checkpoint: Arc::new(MemoryCheckpoint::new(None)),
        failures: Arc::new(MemoryFailureSink::new()),
    };
    let orch = CycleOrchestrator::new(
        deps,
        CycleSettings {
            max_parse_hours: 8,
            max_concurrent_workers: 2,
        },
    );

    orch.run_at(t0()).await;

    assert_eq!(*gauge.peak.lock().unwrap(), 2);
}
