// tests/file_backed_cycle.rs
//
// A cycle over the file-backed stores: sources file, checkpoint JSON,
// failures JSONL. Feeds and AI stay mocked.

use std::sync::Arc;

use chrono::{TimeZone, Utc};

use news_digest::ai::MockClient;
use news_digest::checkpoint::{CheckpointStore, JsonFileCheckpoint};
use news_digest::cycle::{CycleDeps, CycleOrchestrator, CycleOutput, CycleSettings};
use news_digest::fetch::{FetchReport, MockFetcher};
use news_digest::sources::{FailureKind, FailureRecord, FileSourceLoader, JsonlFailureSink};

#[tokio::test]
async fn consecutive_cycles_produce_contiguous_windows() {
    let tmp = tempfile::tempdir().unwrap();
    let sources = tmp.path().join("sources.json");
    std::fs::write(
        &sources,
        r#"{"groups": {"FR": ["https://fr.example/rss"], "DE": ["https://de.example/rss"]}}"#,
    )
    .unwrap();
    let state = tmp.path().join("state");
    let checkpoint = Arc::new(JsonFileCheckpoint::in_dir(&state));
    let failures_path = state.join("feed_failures.jsonl");

    let deps = CycleDeps {
        sources: Arc::new(FileSourceLoader::new(&sources)),
        fetcher: Arc::new(
            MockFetcher::new()
                .with_text("DE", "Title: bridge closed")
                .with_report(
                    "FR",
                    FetchReport {
                        text: String::new(),
                        failures: vec!["https://fr.example/rss: timeout (failure #1)".into()],
                        alerts: vec![],
                    },
                ),
        ),
        filter_ai: Arc::new(MockClient::replying("<b>Bridge closed</b>", 20, 0.002)),
        final_ai: Arc::new(MockClient::replying("final digest", 30, 0.003)),
        checkpoint: checkpoint.clone(),
        failures: Arc::new(JsonlFailureSink::new(&failures_path)),
    };
    let orch = CycleOrchestrator::new(deps, CycleSettings::default());

    let first_end = Utc.with_ymd_and_hms(2025, 3, 10, 6, 0, 0).unwrap();
    let first = orch.run_cycle(first_end).await.unwrap();
    assert_eq!(
        first.window.start(),
        first_end - chrono::Duration::hours(8),
        "first run uses the ceiling"
    );
    assert_eq!(first.digest, "final digest");
    assert_eq!(checkpoint.last_run_time().await.unwrap(), Some(first_end));

    let second_end = first_end + chrono::Duration::hours(3);
    let second = orch.run_cycle(second_end).await.unwrap();
    assert_eq!(second.window.start(), first_end);
    assert_eq!(second.window.end(), second_end);
    assert_eq!(checkpoint.last_run_time().await.unwrap(), Some(second_end));

    // A third cycle through the public entry point sees the new checkpoint too.
    let third_end = second_end + chrono::Duration::minutes(15);
    let out = orch.run_at(third_end).await;
    assert_eq!(out, CycleOutput::Digest("final digest".into()));

    let lines: Vec<FailureRecord> = std::fs::read_to_string(&failures_path)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 3, "one failure per cycle");
    assert!(lines.iter().all(|r| r.kind == FailureKind::TemporaryFailure));
    assert_eq!(lines[0].group.as_deref(), Some("FR"));
}
