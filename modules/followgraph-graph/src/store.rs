//! The graph store contract consumed by the crawler and the bulk paths.
//!
//! Two implementations live in this crate: [`crate::Neo4jStore`] (Cypher over
//! bolt) and [`crate::MemoryStore`] (an embedded index used for tests and
//! small graphs). Every write goes through a [`StoreTxn`], which is the only
//! consistency boundary: it commits whole or not at all.

use async_trait::async_trait;
use futures::stream::BoxStream;

use followgraph_common::{Account, CrawlState, CrawlUser, EdgeRecord, NodeRecord};

use crate::coerce::PropertyCoercion;
use crate::error::Result;
use crate::schema::SchemaConfig;

/// Whether an upsert created something or found it already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Existing,
}

impl Upsert {
    pub fn is_created(self) -> bool {
        matches!(self, Upsert::Created)
    }
}

/// Result of upserting one account. `followers_count` is the value stored
/// after the upsert, which for `Existing` is the previously stored one.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOutcome {
    pub id: String,
    pub upsert: Upsert,
    pub followers_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub nodes: u64,
    pub edges: u64,
}

#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Apply schema statements in order. Any failure is fatal for startup.
    async fn setup_schema(&self, schema: &SchemaConfig) -> Result<()>;

    /// Open a write transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTxn>>;

    /// Open a read-only transaction for streaming scans.
    async fn begin_read(&self) -> Result<Box<dyn ReadTxn>>;

    /// Next account to crawl: any frontier account first, otherwise the
    /// highest-scored public, not-started account with more than
    /// `min_followers` followers.
    async fn select_candidate(&self, min_followers: i64) -> Result<Option<CrawlUser>>;

    /// One-shot aggregate score pass over existing follow edges.
    /// Returns the number of accounts scored.
    async fn recompute_initial_scores(&self) -> Result<u64>;

    /// Create whatever the staging correlation key needs (index, side table).
    async fn prepare_import(&self) -> Result<()>;

    /// Coerce raw staged property values to their stored types.
    async fn coerce_staged(&self, coercions: &[PropertyCoercion]) -> Result<()>;

    /// Strip staging markers so the store looks exactly like an exported one.
    async fn finish_import(&self) -> Result<()>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// A write transaction. Dropping it without `commit` discards its writes.
#[async_trait]
pub trait StoreTxn: Send {
    /// Upsert the crawled account and persist its crawl state. Never moves a
    /// complete account back to an earlier state.
    async fn set_crawl_state(&mut self, user: &CrawlUser, state: &CrawlState) -> Result<()>;

    /// Create-if-absent by external id; existing accounts are left untouched.
    /// Outcomes are returned in input order. Ids must be distinct.
    async fn upsert_accounts(&mut self, accounts: &[Account]) -> Result<Vec<UpsertOutcome>>;

    /// Create `from -> to` follow edges where absent. Both endpoints must
    /// exist. Outcomes are returned in input order. Ids must be distinct.
    async fn upsert_follow_edges(&mut self, from_id: &str, to_ids: &[String]) -> Result<Vec<Upsert>>;

    /// Add each delta to the account's `referenceScore`.
    async fn add_reference_scores(&mut self, deltas: &[(String, f64)]) -> Result<()>;

    /// Merge node records under the staging correlation key.
    async fn merge_node_batch(&mut self, batch: &[NodeRecord]) -> Result<()>;

    /// Merge edge records whose endpoints resolve through the staging
    /// correlation key. Returns how many resolved.
    async fn merge_edge_batch(&mut self, batch: &[EdgeRecord]) -> Result<usize>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// A read-only transaction yielding every node or edge as a portable record.
/// Row order is whatever the store's cursor produces.
#[async_trait]
pub trait ReadTxn: Send {
    fn nodes(&mut self) -> BoxStream<'_, Result<NodeRecord>>;

    fn edges(&mut self) -> BoxStream<'_, Result<EdgeRecord>>;

    async fn close(self: Box<Self>) -> Result<()>;
}
