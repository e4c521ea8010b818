pub mod client;
pub mod coerce;
pub mod error;
pub mod export;
pub mod frontier;
pub mod import;
pub mod memory;
pub mod neo4j;
pub mod progress;
pub mod schema;
pub mod score;
pub mod store;
pub mod writer;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use client::GraphClient;
pub use coerce::{CoercionKind, PropertyCoercion};
pub use error::{Result, StoreError};
pub use export::{export, ExportConfig, ExportStats};
pub use import::{import, ImportConfig, ImportStats};
pub use memory::MemoryStore;
pub use neo4j::Neo4jStore;
pub use progress::{BulkObserver, NoopObserver, TracingObserver};
pub use schema::{SchemaConfig, SchemaStatement};
pub use store::{GraphStore, ReadTxn, StoreCounts, StoreTxn, Upsert, UpsertOutcome};
pub use writer::{MergeReport, MergeWriter};

// Re-export neo4rs query builder for callers that run ad-hoc Cypher.
pub use neo4rs::query;
