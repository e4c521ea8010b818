//! Bulk export: stream every node and then every edge into two JSON-lines
//! files, one portable record per line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::stream::{BoxStream, StreamExt};
use serde::Serialize;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use followgraph_common::RecordKind;

use crate::error::{Result, StoreError};
use crate::progress::BulkObserver;
use crate::store::{GraphStore, ReadTxn};

/// Report progress every this many records.
const PROGRESS_EVERY: u64 = 10_000;

pub const DEFAULT_NODES_FILE: &str = "nodes.jsonl";
pub const DEFAULT_EDGES_FILE: &str = "relationships.jsonl";

#[derive(Debug, Clone)]
pub struct ExportConfig {
    pub nodes_path: PathBuf,
    pub edges_path: PathBuf,
    /// Upper bound on each pass's read transaction.
    pub tx_timeout: Duration,
}

impl ExportConfig {
    pub fn new(nodes_path: impl Into<PathBuf>, edges_path: impl Into<PathBuf>) -> Self {
        Self {
            nodes_path: nodes_path.into(),
            edges_path: edges_path.into(),
            tx_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_tx_timeout(mut self, timeout: Duration) -> Self {
        self.tx_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExportStats {
    pub nodes: u64,
    pub edges: u64,
}

/// Export the whole graph. Nodes are written in full before edges are read.
pub async fn export(
    store: &dyn GraphStore,
    config: &ExportConfig,
    observer: &dyn BulkObserver,
) -> Result<ExportStats> {
    let nodes = export_pass(store, &config.nodes_path, RecordKind::Node, config.tx_timeout, observer).await?;
    let edges = export_pass(store, &config.edges_path, RecordKind::Edge, config.tx_timeout, observer).await?;

    let stats = ExportStats { nodes, edges };
    info!(nodes = stats.nodes, edges = stats.edges, "Export complete");
    Ok(stats)
}

async fn export_pass(
    store: &dyn GraphStore,
    path: &Path,
    kind: RecordKind,
    limit: Duration,
    observer: &dyn BulkObserver,
) -> Result<u64> {
    observer.pass_started(kind);
    let mut out = BufWriter::new(File::create(path).await?);
    let mut txn = store.begin_read().await?;

    let drained = tokio::time::timeout(limit, async {
        match kind {
            RecordKind::Node => write_records(txn.nodes(), &mut out, kind, observer).await,
            RecordKind::Edge => write_records(txn.edges(), &mut out, kind, observer).await,
        }
    })
    .await;

    let written = match drained {
        Ok(Ok(written)) => written,
        Ok(Err(e)) => {
            close_quietly(txn).await;
            return Err(e);
        }
        Err(_) => {
            close_quietly(txn).await;
            return Err(StoreError::Timeout(limit));
        }
    };

    txn.close().await?;
    out.flush().await?;
    observer.pass_finished(kind, written);
    Ok(written)
}

async fn write_records<T: Serialize>(
    mut records: BoxStream<'_, Result<T>>,
    out: &mut BufWriter<File>,
    kind: RecordKind,
    observer: &dyn BulkObserver,
) -> Result<u64> {
    let mut written = 0u64;
    while let Some(record) = records.next().await {
        let mut line = serde_json::to_vec(&record?)?;
        line.push(b'\n');
        out.write_all(&line).await?;

        written += 1;
        if written % PROGRESS_EVERY == 0 {
            observer.progress(kind, written);
        }
    }
    Ok(written)
}

async fn close_quietly(txn: Box<dyn ReadTxn>) {
    if let Err(e) = txn.close().await {
        warn!(error = %e, "Failed to close read transaction");
    }
}
