//! Merge Writer and Frontier Selector behaviour against the memory store.

use std::sync::Arc;

use followgraph_common::{Account, CrawlState, CrawlUser};
use followgraph_graph::{GraphStore, MemoryStore, MergeWriter, StoreCounts};

fn account(id: &str, followers: i64) -> Account {
    Account {
        id: id.into(),
        username: format!("user_{id}"),
        name: format!("User {id}"),
        created_at: None,
        followers_count: followers,
        following_count: 10,
        tweet_count: 5,
        is_private: false,
        profile_image_url: None,
        location: None,
        verified: false,
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

fn writer(store: &MemoryStore) -> MergeWriter {
    MergeWriter::new(Arc::new(store.clone()))
}

#[tokio::test]
async fn existing_account_keeps_first_seen_properties() {
    let store = MemoryStore::new();
    let w = writer(&store);

    let mut first = account("x", 10);
    first.name = "First".into();
    w.merge_page(&crawl_user("u1"), &[first], "").await.unwrap();

    let mut second = account("x", 99);
    second.name = "Second".into();
    let report = w.merge_page(&crawl_user("u2"), &[second], "").await.unwrap();
    assert_eq!(report.accounts_created, 0);

    let props = store.account_properties("x").await.unwrap();
    assert_eq!(props["name"], "First");
    assert_eq!(props["followersCount"], 10);
}

#[tokio::test]
async fn repeated_follow_creates_one_edge_and_one_bump() {
    let store = MemoryStore::new();
    let w = writer(&store);
    let user = crawl_user("u");

    let first = w.merge_page(&user, &[account("x", 10)], "page2").await.unwrap();
    assert_eq!(first.edges_created, 1);

    let again = w.merge_page(&user, &[account("x", 10)], "page3").await.unwrap();
    assert_eq!(again.edges_created, 0);

    assert_eq!(store.follow_edge_count("u", "x").await, 1);
    assert_eq!(store.reference_score("x").await, Some(0.1));
}

#[tokio::test]
async fn duplicate_sighting_within_a_page_counts_once() {
    let store = MemoryStore::new();
    let w = writer(&store);

    let report = w
        .merge_page(&crawl_user("u"), &[account("x", 4), account("x", 4)], "")
        .await
        .unwrap();

    assert_eq!(report.duplicates, 1);
    assert_eq!(report.edges_created, 1);
    assert_eq!(store.reference_score("x").await, Some(0.25));
}

#[tokio::test]
async fn zero_follower_accounts_get_no_score() {
    let store = MemoryStore::new();
    let w = writer(&store);

    w.merge_page(&crawl_user("u"), &[account("empty", 0)], "").await.unwrap();

    assert_eq!(store.follow_edge_count("u", "empty").await, 1);
    assert_eq!(store.reference_score("empty").await, None);
}

#[tokio::test]
async fn crawl_state_only_moves_forward() {
    let store = MemoryStore::new();
    let w = writer(&store);
    let user = crawl_user("u");

    let report = w.merge_page(&user, &[account("a", 10)], "cursor-1").await.unwrap();
    assert_eq!(
        report.state,
        CrawlState::Frontier {
            cursor: "cursor-1".into()
        }
    );
    assert_eq!(
        store.crawl_state("u").await,
        Some(CrawlState::Frontier {
            cursor: "cursor-1".into()
        })
    );

    w.merge_page(&user, &[account("b", 10)], "").await.unwrap();
    assert_eq!(store.crawl_state("u").await, Some(CrawlState::Complete));

    w.merge_page(&user, &[account("c", 10)], "cursor-9").await.unwrap();
    assert_eq!(store.crawl_state("u").await, Some(CrawlState::Complete));
}

#[tokio::test]
async fn failed_commit_applies_nothing() {
    let store = MemoryStore::new();
    let w = writer(&store);

    store.fail_nth_commit(1);
    let result = w.merge_page(&crawl_user("u"), &[account("x", 10)], "next").await;
    assert!(result.is_err());

    assert_eq!(store.counts().await.unwrap(), StoreCounts::default());
    assert_eq!(store.crawl_state("u").await, None);
}

#[tokio::test]
async fn selector_prefers_frontier_accounts() {
    let store = MemoryStore::new();
    let w = writer(&store);

    w.merge_page(&crawl_user("u"), &[account("big", 50_000)], "more").await.unwrap();

    let picked = store.select_candidate(1000).await.unwrap().unwrap();
    assert_eq!(picked.id, "u");
    assert_eq!(picked.cursor, "more");
}

#[tokio::test]
async fn selector_never_returns_private_or_small_accounts() {
    let store = MemoryStore::new();
    let w = writer(&store);

    let mut private = account("private", 50_000);
    private.is_private = true;
    let at_threshold = account("threshold", 1000);
    let eligible = account("eligible", 1001);

    w.merge_page(&crawl_user("u"), &[private, at_threshold, eligible], "")
        .await
        .unwrap();

    let picked = store.select_candidate(1000).await.unwrap().unwrap();
    assert_eq!(picked.id, "eligible");
    assert!(picked.cursor.is_empty());

    w.merge_page(&picked, &[], "").await.unwrap();
    assert_eq!(store.select_candidate(1000).await.unwrap(), None);
}

#[tokio::test]
async fn initial_recompute_matches_inbound_over_followers() {
    let store = MemoryStore::new();

    let mut txn = store.begin().await.unwrap();
    txn.upsert_accounts(&[account("a", 100), account("b", 0), account("c", 50)])
        .await
        .unwrap();
    txn.upsert_follow_edges("b", &["a".to_string()]).await.unwrap();
    txn.upsert_follow_edges("c", &["a".to_string(), "b".to_string()]).await.unwrap();
    txn.commit().await.unwrap();

    // b is followed but has no followers of its own, so it is not scored.
    let scored = store.recompute_initial_scores().await.unwrap();
    assert_eq!(scored, 2);

    assert_eq!(store.reference_score("a").await, Some(2.0 / 100.0));
    assert_eq!(store.reference_score("a").await, Some(0.02));
    assert_eq!(store.reference_score("b").await, None);
    assert_eq!(store.reference_score("c").await, Some(0.0));

    let picked = store.select_candidate(0).await.unwrap().unwrap();
    assert_eq!(picked.id, "a");

    // Once a and c are done, b is still never a candidate.
    let w = writer(&store);
    w.merge_page(&crawl_user("a"), &[], "").await.unwrap();
    w.merge_page(&crawl_user("c"), &[], "").await.unwrap();
    assert_eq!(store.select_candidate(0).await.unwrap(), None);
    assert_eq!(store.select_candidate(-1).await.unwrap(), None);
}

#[tokio::test]
async fn negative_threshold_still_excludes_zero_follower_accounts() {
    let store = MemoryStore::new();
    let w = writer(&store);

    w.merge_page(&crawl_user("u"), &[account("zero", 0)], "").await.unwrap();
    assert_eq!(store.select_candidate(-1).await.unwrap(), None);

    w.merge_page(&crawl_user("v"), &[account("one", 1)], "").await.unwrap();
    let picked = store.select_candidate(-1).await.unwrap().unwrap();
    assert_eq!(picked.id, "one");
}
