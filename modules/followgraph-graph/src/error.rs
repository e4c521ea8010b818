use std::time::Duration;

use thiserror::Error;

use followgraph_common::FollowGraphError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Graph store unreachable: {0}")]
    Connectivity(String),

    #[error("Schema statement failed ({statement}): {message}")]
    Schema { statement: String, message: String },

    #[error("Query failed: {0}")]
    Query(#[from] neo4rs::Error),

    #[error("Could not decode row: {0}")]
    Decode(String),

    #[error("Transaction exceeded its {0:?} timeout")]
    Timeout(Duration),

    #[error("Account {0} is not in the store")]
    Unresolved(String),

    #[error("Invalid identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("Injected failure: {0}")]
    Injected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for FollowGraphError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connectivity(msg) => FollowGraphError::Connectivity(msg),
            StoreError::Schema { .. } => FollowGraphError::Schema(err.to_string()),
            StoreError::Io(io) => FollowGraphError::Io(io),
            other => FollowGraphError::Store(other.to_string()),
        }
    }
}
