//! Bulk import: replay the two export files into a fresh store.
//!
//! Nodes are merged first under a temporary staging key (the portable id),
//! staged property values are then coerced to their stored types, and edges
//! are merged last by resolving both endpoints through the staging key.
//! Every batch is its own transaction, so a failure part way through leaves
//! the earlier batches committed. Re-running the same files after such a
//! failure merges onto the already-staged nodes instead of duplicating them.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use followgraph_common::{EdgeRecord, FollowGraphError, NodeRecord, PortableRecord, RecordKind};

use crate::coerce::PropertyCoercion;
use crate::error::{Result, StoreError};
use crate::progress::BulkObserver;
use crate::store::{GraphStore, StoreTxn};

pub const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub nodes_path: PathBuf,
    pub edges_path: PathBuf,
    /// Records per transaction. Zero is treated as one.
    pub batch_size: usize,
    /// Upper bound on each batch transaction.
    pub tx_timeout: Duration,
    pub coercions: Vec<PropertyCoercion>,
}

impl ImportConfig {
    pub fn new(nodes_path: impl Into<PathBuf>, edges_path: impl Into<PathBuf>) -> Self {
        Self {
            nodes_path: nodes_path.into(),
            edges_path: edges_path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            tx_timeout: Duration::from_secs(60),
            coercions: PropertyCoercion::account_defaults(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = timeout;
        self
    }

    pub fn with_coercions(mut self, coercions: Vec<PropertyCoercion>) -> Self {
        self.coercions = coercions;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub nodes: u64,
    pub edges: u64,
    /// Committed batch transactions across both passes.
    pub batches: usize,
    /// Malformed lines skipped.
    pub rejected: usize,
    /// Edge records whose endpoints were not both present.
    pub unresolved_edges: u64,
}

/// Import `config.nodes_path` then `config.edges_path` into `store`.
pub async fn import(
    store: &dyn GraphStore,
    config: &ImportConfig,
    observer: &dyn BulkObserver,
) -> Result<ImportStats> {
    let mut stats = ImportStats::default();

    store.prepare_import().await?;

    import_pass::<NodeRecord>(store, &config.nodes_path, config, observer, &mut stats).await?;
    store.coerce_staged(&config.coercions).await?;
    import_pass::<EdgeRecord>(store, &config.edges_path, config, observer, &mut stats).await?;

    store.finish_import().await?;

    if stats.unresolved_edges > 0 {
        warn!(unresolved = stats.unresolved_edges, "Some edges referenced missing nodes");
    }
    info!(
        nodes = stats.nodes,
        edges = stats.edges,
        batches = stats.batches,
        rejected = stats.rejected,
        "Import complete"
    );
    Ok(stats)
}

/// One record type's import strategy.
#[async_trait]
trait ImportRecord: Sized + Send + Sync {
    const KIND: RecordKind;

    fn from_portable(record: PortableRecord) -> Option<Self>;

    /// Merge a batch, returning how many records landed.
    async fn merge(txn: &mut dyn StoreTxn, batch: &[Self]) -> Result<usize>;
}

#[async_trait]
impl ImportRecord for NodeRecord {
    const KIND: RecordKind = RecordKind::Node;

    fn from_portable(record: PortableRecord) -> Option<Self> {
        match record {
            PortableRecord::Node(node) => Some(node),
            PortableRecord::Edge(_) => None,
        }
    }

    async fn merge(txn: &mut dyn StoreTxn, batch: &[Self]) -> Result<usize> {
        txn.merge_node_batch(batch).await?;
        Ok(batch.len())
    }
}

#[async_trait]
impl ImportRecord for EdgeRecord {
    const KIND: RecordKind = RecordKind::Edge;

    fn from_portable(record: PortableRecord) -> Option<Self> {
        match record {
            PortableRecord::Edge(edge) => Some(edge),
            PortableRecord::Node(_) => None,
        }
    }

    async fn merge(txn: &mut dyn StoreTxn, batch: &[Self]) -> Result<usize> {
        txn.merge_edge_batch(batch).await
    }
}

async fn import_pass<R: ImportRecord>(
    store: &dyn GraphStore,
    path: &Path,
    config: &ImportConfig,
    observer: &dyn BulkObserver,
    stats: &mut ImportStats,
) -> Result<()> {
    let kind = R::KIND;
    let batch_size = config.batch_size.max(1);
    observer.pass_started(kind);

    let mut lines = BufReader::new(File::open(path).await?).lines();
    let mut batch: Vec<R> = Vec::with_capacity(batch_size);
    let mut line_no = 0usize;
    let mut batch_no = 0usize;
    let mut records = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let parsed = PortableRecord::parse(kind, &line).and_then(|record| {
            R::from_portable(record).ok_or_else(|| format!("expected a {kind} record"))
        });
        match parsed {
            Ok(record) => batch.push(record),
            Err(reason) => {
                observer.record_rejected(kind, line_no, &reason);
                let rejected = FollowGraphError::MalformedRecord { line: line_no, reason };
                warn!(%kind, error = %rejected, "Skipping record");
                stats.rejected += 1;
                continue;
            }
        }

        if batch.len() == batch_size {
            batch_no += 1;
            records += flush(store, &mut batch, batch_no, config.tx_timeout, observer, stats).await?;
        }
    }

    if !batch.is_empty() {
        batch_no += 1;
        records += flush(store, &mut batch, batch_no, config.tx_timeout, observer, stats).await?;
    }

    observer.pass_finished(kind, records);
    Ok(())
}

/// Commit `batch` in its own transaction and clear it.
async fn flush<R: ImportRecord>(
    store: &dyn GraphStore,
    batch: &mut Vec<R>,
    batch_no: usize,
    limit: Duration,
    observer: &dyn BulkObserver,
    stats: &mut ImportStats,
) -> Result<u64> {
    let size = batch.len();
    let landed = commit_batch(store, batch, limit).await.map_err(|e| {
        warn!(kind = %R::KIND, batch = batch_no, error = %e, "Batch failed, halting import");
        e
    })?;
    batch.clear();

    stats.batches += 1;
    match R::KIND {
        RecordKind::Node => stats.nodes += landed as u64,
        RecordKind::Edge => {
            stats.edges += landed as u64;
            stats.unresolved_edges += (size - landed) as u64;
        }
    }
    observer.batch_committed(R::KIND, batch_no, size);
    Ok(size as u64)
}

async fn commit_batch<R: ImportRecord>(store: &dyn GraphStore, batch: &[R], limit: Duration) -> Result<usize> {
    let mut txn = store.begin().await?;

    match tokio::time::timeout(limit, R::merge(txn.as_mut(), batch)).await {
        Ok(Ok(landed)) => {
            txn.commit().await?;
            Ok(landed)
        }
        Ok(Err(e)) => {
            rollback_quietly(txn).await;
            Err(e)
        }
        Err(_) => {
            rollback_quietly(txn).await;
            Err(StoreError::Timeout(limit))
        }
    }
}

async fn rollback_quietly(txn: Box<dyn StoreTxn>) {
    if let Err(e) = txn.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}
