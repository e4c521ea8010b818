use thiserror::Error;

#[derive(Error, Debug)]
pub enum FollowGraphError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Graph store unreachable: {0}")]
    Connectivity(String),

    #[error("Schema setup failed: {0}")]
    Schema(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Transient fetch error: {0}")]
    Fetch(String),

    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
