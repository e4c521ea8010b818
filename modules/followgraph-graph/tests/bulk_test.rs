//! Export/import against the memory store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use followgraph_common::{Account, CrawlUser, RecordKind};
use followgraph_graph::{
    export, import, BulkObserver, ExportConfig, GraphStore, ImportConfig, MemoryStore, MergeWriter,
    NoopObserver,
};

fn account(id: &str, followers: i64) -> Account {
    Account {
        id: id.into(),
        username: format!("user_{id}"),
        name: format!("User {id}"),
        created_at: Some(Utc.with_ymd_and_hms(2013, 12, 14, 4, 35, 55).unwrap()),
        followers_count: followers,
        following_count: 3,
        tweet_count: 42,
        is_private: false,
        profile_image_url: Some(format!("https://img.example/{id}.png")),
        location: None,
        verified: id == "b",
        url: None,
    }
}

fn crawl_user(id: &str) -> CrawlUser {
    CrawlUser {
        id: id.into(),
        username: format!("user_{id}"),
        cursor: String::new(),
    }
}

#[derive(Default)]
struct Recorder {
    batches: Mutex<Vec<(RecordKind, usize)>>,
    rejected: Mutex<Vec<usize>>,
}

impl BulkObserver for Recorder {
    fn batch_committed(&self, kind: RecordKind, _batch: usize, size: usize) {
        self.batches.lock().unwrap().push((kind, size));
    }

    fn record_rejected(&self, _kind: RecordKind, line: usize, _reason: &str) {
        self.rejected.lock().unwrap().push(line);
    }
}

async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    let writer = MergeWriter::new(Arc::new(store.clone()));

    writer
        .merge_page(&crawl_user("root"), &[account("a", 100), account("b", 20)], "next")
        .await
        .unwrap();
    writer
        .merge_page(&crawl_user("a"), &[account("b", 20), account("c", 0)], "")
        .await
        .unwrap();
    store
}

fn write_lines(path: &Path, lines: &[String]) {
    std::fs::write(path, lines.join("\n") + "\n").unwrap();
}

fn line_set(path: &Path) -> BTreeSet<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|l| {
            // Re-serialize so key order never matters.
            let v: serde_json::Value = serde_json::from_str(l).unwrap();
            v.to_string()
        })
        .collect()
}

#[tokio::test]
async fn export_then_import_reproduces_the_graph() {
    let dir = TempDir::new().unwrap();
    let source = seeded_store().await;

    let first = ExportConfig::new(dir.path().join("nodes.jsonl"), dir.path().join("relationships.jsonl"));
    let exported = export(&source, &first, &NoopObserver).await.unwrap();
    let counts = source.counts().await.unwrap();
    assert_eq!(exported.nodes, counts.nodes);
    assert_eq!(exported.edges, counts.edges);
    assert_eq!(exported.nodes, 4);
    assert_eq!(exported.edges, 4);

    let target = MemoryStore::new();
    let imported = import(
        &target,
        &ImportConfig::new(&first.nodes_path, &first.edges_path).with_batch_size(3),
        &NoopObserver,
    )
    .await
    .unwrap();
    assert_eq!(imported.nodes, 4);
    assert_eq!(imported.edges, 4);
    assert_eq!(imported.rejected, 0);
    assert_eq!(imported.unresolved_edges, 0);
    assert!(!target.has_staging_markers().await);

    let second = ExportConfig::new(dir.path().join("nodes2.jsonl"), dir.path().join("edges2.jsonl"));
    export(&target, &second, &NoopObserver).await.unwrap();

    assert_eq!(line_set(&first.nodes_path), line_set(&second.nodes_path));
    assert_eq!(line_set(&first.edges_path), line_set(&second.edges_path));

    // The imported graph keeps crawling where the source left off.
    assert_eq!(
        target.select_candidate(0).await.unwrap().map(|u| u.id),
        Some("root".to_string())
    );
}

#[tokio::test]
async fn node_lines_commit_in_fixed_size_batches() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.jsonl");
    let edges = dir.path().join("relationships.jsonl");

    let lines: Vec<String> = (1..=5)
        .map(|i| json!({"id": i.to_string(), "labels": ["Account"], "properties": {"id": i.to_string()}}).to_string())
        .collect();
    write_lines(&nodes, &lines);
    std::fs::write(&edges, "").unwrap();

    let store = MemoryStore::new();
    let recorder = Recorder::default();
    let stats = import(&store, &ImportConfig::new(&nodes, &edges).with_batch_size(2), &recorder)
        .await
        .unwrap();

    let sizes: Vec<usize> = recorder.batches.lock().unwrap().iter().map(|(_, s)| *s).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert_eq!(stats.batches, 3);
    assert_eq!(stats.nodes, 5);
}

#[tokio::test]
async fn failed_batch_keeps_earlier_batches_and_rerun_completes() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.jsonl");
    let edges = dir.path().join("relationships.jsonl");

    let lines: Vec<String> = (1..=5)
        .map(|i| json!({"id": i.to_string(), "labels": ["Account"], "properties": {"id": i.to_string()}}).to_string())
        .collect();
    write_lines(&nodes, &lines);
    write_lines(
        &edges,
        &[json!({"type": "FOLLOWS", "startId": "1", "endId": "5", "properties": {}}).to_string()],
    );

    let store = MemoryStore::new();
    let config = ImportConfig::new(&nodes, &edges).with_batch_size(2);

    store.fail_nth_commit(3);
    assert!(import(&store, &config, &NoopObserver).await.is_err());
    assert_eq!(store.counts().await.unwrap().nodes, 4);

    store.clear_faults();
    let stats = import(&store, &config, &NoopObserver).await.unwrap();
    assert_eq!(stats.edges, 1);

    let counts = store.counts().await.unwrap();
    assert_eq!(counts.nodes, 5);
    assert_eq!(counts.edges, 1);
    assert_eq!(store.follow_edge_count("1", "5").await, 1);
}

#[tokio::test]
async fn malformed_lines_are_rejected_not_merged() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.jsonl");
    let edges = dir.path().join("relationships.jsonl");

    write_lines(
        &nodes,
        &[
            json!({"id": "1", "labels": ["Account"], "properties": {"id": "1"}}).to_string(),
            "{not json".to_string(),
            json!({"id": "", "labels": ["Account"], "properties": {}}).to_string(),
            json!({"id": "2", "labels": ["Account"], "properties": {"id": "2"}}).to_string(),
        ],
    );
    write_lines(
        &edges,
        &[
            json!({"type": "FOLLOWS", "startId": "1", "endId": "2", "properties": {}}).to_string(),
            json!({"type": "FOLLOWS", "startId": "1"}).to_string(),
        ],
    );

    let store = MemoryStore::new();
    let recorder = Recorder::default();
    let stats = import(&store, &ImportConfig::new(&nodes, &edges), &recorder)
        .await
        .unwrap();

    assert_eq!(stats.nodes, 2);
    assert_eq!(stats.edges, 1);
    assert_eq!(stats.rejected, 3);
    assert_eq!(*recorder.rejected.lock().unwrap(), vec![2, 3, 2]);
    assert_eq!(store.counts().await.unwrap().nodes, 2);
}

#[tokio::test]
async fn edges_with_missing_endpoints_are_counted_as_unresolved() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.jsonl");
    let edges = dir.path().join("relationships.jsonl");

    write_lines(
        &nodes,
        &[json!({"id": "1", "labels": ["Account"], "properties": {"id": "1"}}).to_string()],
    );
    write_lines(
        &edges,
        &[json!({"type": "FOLLOWS", "startId": "1", "endId": "ghost", "properties": {}}).to_string()],
    );

    let store = MemoryStore::new();
    let stats = import(&store, &ImportConfig::new(&nodes, &edges), &NoopObserver)
        .await
        .unwrap();

    assert_eq!(stats.edges, 0);
    assert_eq!(stats.unresolved_edges, 1);
    assert_eq!(store.counts().await.unwrap().edges, 0);
}

#[tokio::test]
async fn staged_values_are_coerced_to_stored_types() {
    let dir = TempDir::new().unwrap();
    let nodes = dir.path().join("nodes.jsonl");
    let edges = dir.path().join("relationships.jsonl");

    write_lines(
        &nodes,
        &[json!({
            "id": "7",
            "labels": ["Account"],
            "properties": {
                "id": "7",
                "createdAt": "2020-01-01T00:00Z",
                "followersCount": "1200",
                "isPrivate": "true",
                "referenceScore": 1
            }
        })
        .to_string()],
    );
    std::fs::write(&edges, "").unwrap();

    let store = MemoryStore::new();
    import(&store, &ImportConfig::new(&nodes, &edges), &NoopObserver)
        .await
        .unwrap();

    let props = store.account_properties("7").await.unwrap();
    assert_eq!(props["createdAt"], "2020-01-01T00:00:00+00:00");
    assert_eq!(props["followersCount"], 1200);
    assert_eq!(props["isPrivate"], true);
    assert_eq!(props["referenceScore"], 1.0);
}
