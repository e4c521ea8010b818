//! Embedded graph store: a node arena with an account-id index, an edge set,
//! and a staging side index used by the bulk importer.
//!
//! A write transaction holds the store lock for its whole lifetime and records
//! an undo entry for every change it makes, so its cost is proportional to the
//! writes rather than to the graph. Commit discards the journal; rollback (or
//! dropping the transaction) replays it in reverse. Readers therefore never
//! see a half-applied transaction.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use followgraph_common::{
    Account, CrawlState, CrawlUser, EdgeRecord, NodeRecord, ACCOUNT_LABEL, FOLLOWS,
};

use crate::coerce::PropertyCoercion;
use crate::error::{Result, StoreError};
use crate::frontier::{pick_candidate, CandidateView};
use crate::schema::SchemaConfig;
use crate::score;
use crate::store::{GraphStore, ReadTxn, StoreCounts, StoreTxn, Upsert, UpsertOutcome};

type Handle = usize;

#[derive(Debug, Clone)]
struct StoredNode {
    /// Portable id for nodes that carry no `id` property.
    key: String,
    labels: BTreeSet<String>,
    properties: Map<String, Value>,
}

impl StoredNode {
    fn portable_id(&self) -> String {
        match self.properties.get("id") {
            Some(Value::String(id)) => id.clone(),
            _ => self.key.clone(),
        }
    }

    fn is_account(&self) -> bool {
        self.labels.contains(ACCOUNT_LABEL)
    }

    fn followers_count(&self) -> i64 {
        self.properties
            .get("followersCount")
            .and_then(Value::as_i64)
            .unwrap_or(0)
    }

    fn crawl_state(&self) -> CrawlState {
        let cursor = self.properties.get("paginationCursor").and_then(Value::as_str);
        let imported = self
            .properties
            .get("importedFollowing")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        CrawlState::from_markers(cursor, imported)
    }
}

#[derive(Debug, Clone)]
struct StoredEdge {
    rel_type: String,
    start: Handle,
    end: Handle,
    properties: Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
struct MemoryGraph {
    nodes: Vec<StoredNode>,
    accounts: HashMap<String, Handle>,
    edges: Vec<StoredEdge>,
    edge_keys: HashMap<(String, Handle, Handle), usize>,
    /// Import correlation key: portable id -> node handle. Only populated
    /// between `prepare_import` and `finish_import`.
    staging: HashMap<String, Handle>,
}

/// One reversible change made by a write transaction.
#[derive(Debug)]
enum Undo {
    NodePushed,
    NodeChanged { handle: Handle, previous: StoredNode },
    AccountIndexed { id: String, previous: Option<Handle> },
    EdgePushed,
    EdgePropsChanged { idx: usize, previous: Map<String, Value> },
    Staged { id: String, previous: Option<Handle> },
}

impl MemoryGraph {
    fn undo(&mut self, change: Undo) {
        match change {
            Undo::NodePushed => {
                self.nodes.pop();
            }
            Undo::NodeChanged { handle, previous } => self.nodes[handle] = previous,
            Undo::AccountIndexed { id, previous } => match previous {
                Some(handle) => {
                    self.accounts.insert(id, handle);
                }
                None => {
                    self.accounts.remove(&id);
                }
            },
            Undo::EdgePushed => {
                if let Some(edge) = self.edges.pop() {
                    self.edge_keys.remove(&(edge.rel_type, edge.start, edge.end));
                }
            }
            Undo::EdgePropsChanged { idx, previous } => self.edges[idx].properties = previous,
            Undo::Staged { id, previous } => match previous {
                Some(handle) => {
                    self.staging.insert(id, handle);
                }
                None => {
                    self.staging.remove(&id);
                }
            },
        }
    }

    fn node_record(&self, node: &StoredNode) -> NodeRecord {
        NodeRecord {
            id: node.portable_id(),
            labels: node.labels.iter().cloned().collect(),
            properties: node.properties.clone(),
        }
    }

    fn edge_record(&self, edge: &StoredEdge) -> EdgeRecord {
        EdgeRecord {
            rel_type: edge.rel_type.clone(),
            start_id: self.nodes[edge.start].portable_id(),
            end_id: self.nodes[edge.end].portable_id(),
            properties: edge.properties.clone(),
        }
    }
}

/// In-memory [`GraphStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryGraph>>,
    #[cfg(any(test, feature = "test-support"))]
    faults: Arc<std::sync::Mutex<FaultPlan>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current reference score of an account, if it has one.
    pub async fn reference_score(&self, id: &str) -> Option<f64> {
        let g = self.inner.lock().await;
        let handle = *g.accounts.get(id)?;
        g.nodes[handle]
            .properties
            .get("referenceScore")
            .and_then(Value::as_f64)
    }

    /// Stored properties of an account.
    pub async fn account_properties(&self, id: &str) -> Option<Map<String, Value>> {
        let g = self.inner.lock().await;
        let handle = *g.accounts.get(id)?;
        Some(g.nodes[handle].properties.clone())
    }

    /// Crawl state of an account.
    pub async fn crawl_state(&self, id: &str) -> Option<CrawlState> {
        let g = self.inner.lock().await;
        let handle = *g.accounts.get(id)?;
        Some(g.nodes[handle].crawl_state())
    }

    /// Number of `FOLLOWS` edges from `from` to `to`.
    pub async fn follow_edge_count(&self, from: &str, to: &str) -> usize {
        let g = self.inner.lock().await;
        let (Some(&a), Some(&b)) = (g.accounts.get(from), g.accounts.get(to)) else {
            return 0;
        };
        g.edges
            .iter()
            .filter(|e| e.rel_type == FOLLOWS && e.start == a && e.end == b)
            .count()
    }

    /// Whether any staging correlation entries are left.
    pub async fn has_staging_markers(&self) -> bool {
        !self.inner.lock().await.staging.is_empty()
    }
}

// --- Fault injection ---

#[cfg(any(test, feature = "test-support"))]
#[derive(Debug, Default)]
struct FaultPlan {
    /// Fail the commit of the n-th write transaction (1-based) from now.
    fail_commit: Option<usize>,
    commits_seen: usize,
}

#[cfg(any(test, feature = "test-support"))]
impl MemoryStore {
    /// Make the `nth` commit from now fail (and roll back).
    pub fn fail_nth_commit(&self, nth: usize) {
        if let Ok(mut plan) = self.faults.lock() {
            plan.fail_commit = Some(nth);
            plan.commits_seen = 0;
        }
    }

    /// Remove any planned failure.
    pub fn clear_faults(&self) {
        if let Ok(mut plan) = self.faults.lock() {
            *plan = FaultPlan::default();
        }
    }

    fn should_fail_commit(&self) -> bool {
        let Ok(mut plan) = self.faults.lock() else {
            return false;
        };
        plan.commits_seen += 1;
        plan.fail_commit == Some(plan.commits_seen)
    }
}

#[async_trait]
impl GraphStore for MemoryStore {
    async fn setup_schema(&self, schema: &SchemaConfig) -> Result<()> {
        // Account id uniqueness is structural here; nothing else to create.
        debug!(statements = schema.statements.len(), "Memory store schema setup is a no-op");
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>> {
        let guard = self.inner.clone().lock_owned().await;
        Ok(Box::new(MemoryTxn {
            guard,
            journal: Vec::new(),
            #[cfg(any(test, feature = "test-support"))]
            store: self.clone(),
        }))
    }

    async fn begin_read(&self) -> Result<Box<dyn ReadTxn>> {
        let snapshot = self.inner.lock().await.clone();
        Ok(Box::new(MemoryReadTxn { snapshot }))
    }

    async fn select_candidate(&self, min_followers: i64) -> Result<Option<CrawlUser>> {
        let g = self.inner.lock().await;
        let views = g.nodes.iter().filter(|n| n.is_account()).map(|n| CandidateView {
            id: n.properties.get("id").and_then(Value::as_str).unwrap_or_default(),
            username: n.properties.get("username").and_then(Value::as_str).unwrap_or_default(),
            state: n.crawl_state(),
            is_private: n.properties.get("isPrivate").and_then(Value::as_bool).unwrap_or(false),
            followers_count: n.followers_count(),
            reference_score: n.properties.get("referenceScore").and_then(Value::as_f64),
        });
        Ok(pick_candidate(views, min_followers))
    }

    async fn recompute_initial_scores(&self) -> Result<u64> {
        let mut g = self.inner.lock().await;

        let mut inbound: HashMap<Handle, u64> = HashMap::new();
        for edge in &g.edges {
            if edge.rel_type == FOLLOWS && g.nodes[edge.start].is_account() {
                *inbound.entry(edge.end).or_default() += 1;
            }
        }

        let mut scored = 0u64;
        for (handle, node) in g.nodes.iter_mut().enumerate() {
            if !node.is_account() {
                continue;
            }
            let count = inbound.get(&handle).copied().unwrap_or(0);
            if let Some(s) = score::initial_score(count, node.followers_count()) {
                node.properties.insert("referenceScore".into(), Value::from(s));
                scored += 1;
            }
        }
        Ok(scored)
    }

    async fn prepare_import(&self) -> Result<()> {
        // The staging side index lives in the graph itself; nothing to create.
        Ok(())
    }

    async fn coerce_staged(&self, coercions: &[PropertyCoercion]) -> Result<()> {
        let mut g = self.inner.lock().await;
        let staged: Vec<Handle> = g.staging.values().copied().collect();

        for handle in staged {
            let node = &mut g.nodes[handle];
            for c in coercions {
                let Some(raw) = node.properties.get(&c.property) else {
                    continue;
                };
                match c.kind.apply(raw) {
                    Ok(Value::Null) => {
                        node.properties.remove(&c.property);
                    }
                    Ok(v) => {
                        node.properties.insert(c.property.clone(), v);
                    }
                    Err(reason) => {
                        warn!(node = %node.key, property = %c.property, %reason, "Leaving uncoercible property as-is");
                    }
                }
            }
        }
        Ok(())
    }

    async fn finish_import(&self) -> Result<()> {
        let mut g = self.inner.lock().await;
        g.staging.clear();
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let g = self.inner.lock().await;
        Ok(StoreCounts {
            nodes: g.nodes.len() as u64,
            edges: g.edges.len() as u64,
        })
    }
}

struct MemoryTxn {
    guard: OwnedMutexGuard<MemoryGraph>,
    /// Changes since `begin`, oldest first; empty once committed.
    journal: Vec<Undo>,
    #[cfg(any(test, feature = "test-support"))]
    store: MemoryStore,
}

impl MemoryTxn {
    fn push_node(&mut self, key: String, labels: BTreeSet<String>, properties: Map<String, Value>) -> Handle {
        let handle = self.guard.nodes.len();
        self.guard.nodes.push(StoredNode {
            key,
            labels,
            properties,
        });
        self.journal.push(Undo::NodePushed);
        self.index_account(handle);
        handle
    }

    fn index_account(&mut self, handle: Handle) {
        let node = &self.guard.nodes[handle];
        if !node.is_account() {
            return;
        }
        let Some(Value::String(id)) = node.properties.get("id") else {
            return;
        };
        let id = id.clone();
        let previous = self.guard.accounts.insert(id.clone(), handle);
        if previous != Some(handle) {
            self.journal.push(Undo::AccountIndexed { id, previous });
        }
    }

    /// Mutable access to a node, journaling its prior contents.
    fn node_mut(&mut self, handle: Handle) -> &mut StoredNode {
        let previous = self.guard.nodes[handle].clone();
        self.journal.push(Undo::NodeChanged { handle, previous });
        &mut self.guard.nodes[handle]
    }

    fn insert_edge(&mut self, rel_type: &str, start: Handle, end: Handle) -> (Upsert, usize) {
        let key = (rel_type.to_string(), start, end);
        if let Some(&idx) = self.guard.edge_keys.get(&key) {
            return (Upsert::Existing, idx);
        }
        let idx = self.guard.edges.len();
        self.guard.edges.push(StoredEdge {
            rel_type: rel_type.to_string(),
            start,
            end,
            properties: Map::new(),
        });
        self.guard.edge_keys.insert(key, idx);
        self.journal.push(Undo::EdgePushed);
        (Upsert::Created, idx)
    }

    fn edge_props_mut(&mut self, idx: usize) -> &mut Map<String, Value> {
        let previous = self.guard.edges[idx].properties.clone();
        self.journal.push(Undo::EdgePropsChanged { idx, previous });
        &mut self.guard.edges[idx].properties
    }

    fn stage(&mut self, id: &str, handle: Handle) {
        let previous = self.guard.staging.insert(id.to_string(), handle);
        self.journal.push(Undo::Staged {
            id: id.to_string(),
            previous,
        });
    }

    fn restore(&mut self) {
        while let Some(change) = self.journal.pop() {
            self.guard.undo(change);
        }
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        self.restore();
    }
}

#[async_trait]
impl StoreTxn for MemoryTxn {
    async fn set_crawl_state(&mut self, user: &CrawlUser, state: &CrawlState) -> Result<()> {
        let handle = match self.guard.accounts.get(&user.id) {
            Some(&h) => h,
            None => {
                let mut props = Map::new();
                props.insert("id".into(), Value::from(user.id.as_str()));
                props.insert("username".into(), Value::from(user.username.as_str()));
                self.push_node(user.id.clone(), BTreeSet::from([ACCOUNT_LABEL.to_string()]), props)
            }
        };

        if self.guard.nodes[handle].crawl_state() == CrawlState::Complete {
            return Ok(());
        }
        let (cursor, complete) = state.markers();
        let node = self.node_mut(handle);
        node.properties.insert("paginationCursor".into(), Value::from(cursor));
        node.properties.insert("importedFollowing".into(), Value::from(complete));
        Ok(())
    }

    async fn upsert_accounts(&mut self, accounts: &[Account]) -> Result<Vec<UpsertOutcome>> {
        let mut outcomes = Vec::with_capacity(accounts.len());

        for account in accounts {
            let (handle, upsert) = match self.guard.accounts.get(&account.id) {
                Some(&h) => (h, Upsert::Existing),
                None => {
                    let h = self.push_node(
                        account.id.clone(),
                        BTreeSet::from([ACCOUNT_LABEL.to_string()]),
                        account.creation_properties(),
                    );
                    (h, Upsert::Created)
                }
            };
            outcomes.push(UpsertOutcome {
                id: account.id.clone(),
                upsert,
                followers_count: self.guard.nodes[handle].followers_count(),
            });
        }
        Ok(outcomes)
    }

    async fn upsert_follow_edges(&mut self, from_id: &str, to_ids: &[String]) -> Result<Vec<Upsert>> {
        let from = *self
            .guard
            .accounts
            .get(from_id)
            .ok_or_else(|| StoreError::Unresolved(from_id.to_string()))?;

        let mut outcomes = Vec::with_capacity(to_ids.len());
        for to_id in to_ids {
            let to = *self
                .guard
                .accounts
                .get(to_id)
                .ok_or_else(|| StoreError::Unresolved(to_id.clone()))?;
            outcomes.push(self.insert_edge(FOLLOWS, from, to).0);
        }
        Ok(outcomes)
    }

    async fn add_reference_scores(&mut self, deltas: &[(String, f64)]) -> Result<()> {
        for (id, delta) in deltas {
            let handle = *self
                .guard
                .accounts
                .get(id)
                .ok_or_else(|| StoreError::Unresolved(id.clone()))?;
            let props = &mut self.node_mut(handle).properties;
            let current = props.get("referenceScore").and_then(Value::as_f64).unwrap_or(0.0);
            props.insert("referenceScore".into(), Value::from(current + delta));
        }
        Ok(())
    }

    async fn merge_node_batch(&mut self, batch: &[NodeRecord]) -> Result<()> {
        for record in batch {
            match self.guard.staging.get(&record.id) {
                Some(&handle) => {
                    let node = self.node_mut(handle);
                    node.labels.extend(record.labels.iter().cloned());
                    for (k, v) in &record.properties {
                        if v.is_null() {
                            node.properties.remove(k);
                        } else {
                            node.properties.insert(k.clone(), v.clone());
                        }
                    }
                    self.index_account(handle);
                }
                None => {
                    let props: Map<String, Value> = record
                        .properties
                        .iter()
                        .filter(|(_, v)| !v.is_null())
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let handle = self.push_node(
                        record.id.clone(),
                        record.labels.iter().cloned().collect(),
                        props,
                    );
                    self.stage(&record.id, handle);
                }
            }
        }
        Ok(())
    }

    async fn merge_edge_batch(&mut self, batch: &[EdgeRecord]) -> Result<usize> {
        let mut resolved = 0;
        for record in batch {
            let staging = &self.guard.staging;
            let (Some(&start), Some(&end)) = (staging.get(&record.start_id), staging.get(&record.end_id)) else {
                continue;
            };
            let (_, idx) = self.insert_edge(&record.rel_type, start, end);
            if !record.properties.is_empty() {
                self.edge_props_mut(idx).extend(record.properties.clone());
            }
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        #[cfg(any(test, feature = "test-support"))]
        if self.store.should_fail_commit() {
            self.restore();
            return Err(StoreError::Injected("commit failed".into()));
        }
        self.journal.clear();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.restore();
        Ok(())
    }
}

struct MemoryReadTxn {
    snapshot: MemoryGraph,
}

#[async_trait]
impl ReadTxn for MemoryReadTxn {
    fn nodes(&mut self) -> BoxStream<'_, Result<NodeRecord>> {
        let g = &self.snapshot;
        stream::iter(g.nodes.iter().map(move |n| Ok(g.node_record(n)))).boxed()
    }

    fn edges(&mut self) -> BoxStream<'_, Result<EdgeRecord>> {
        let g = &self.snapshot;
        stream::iter(g.edges.iter().map(move |e| Ok(g.edge_record(e)))).boxed()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
