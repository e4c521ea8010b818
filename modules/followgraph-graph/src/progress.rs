use tracing::info;

use followgraph_common::RecordKind;

/// Progress callbacks for the bulk export/import paths. Every method has a
/// no-op default so callers implement only what they watch.
pub trait BulkObserver: Send + Sync {
    fn pass_started(&self, _kind: RecordKind) {}

    /// Running record count during a pass.
    fn progress(&self, _kind: RecordKind, _records: u64) {}

    /// A batch transaction committed. `batch` is 1-based within the pass.
    fn batch_committed(&self, _kind: RecordKind, _batch: usize, _size: usize) {}

    fn record_rejected(&self, _kind: RecordKind, _line: usize, _reason: &str) {}

    fn pass_finished(&self, _kind: RecordKind, _records: u64) {}
}

/// Ignores everything.
pub struct NoopObserver;

impl BulkObserver for NoopObserver {}

/// Forwards progress to `tracing`.
pub struct TracingObserver;

impl BulkObserver for TracingObserver {
    fn pass_started(&self, kind: RecordKind) {
        info!(%kind, "Pass started");
    }

    fn progress(&self, kind: RecordKind, records: u64) {
        info!(%kind, records, "Pass progress");
    }

    fn batch_committed(&self, kind: RecordKind, batch: usize, size: usize) {
        info!(%kind, batch, size, "Batch committed");
    }

    fn pass_finished(&self, kind: RecordKind, records: u64) {
        info!(%kind, records, "Pass complete");
    }
}
