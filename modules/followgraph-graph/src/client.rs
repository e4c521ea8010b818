use neo4rs::{query, ConfigBuilder, Graph};
use tracing::info;

use crate::error::{Result, StoreError};

/// Thin wrapper around neo4rs::Graph providing connection setup.
#[derive(Clone)]
pub struct GraphClient {
    pub(crate) graph: Graph,
}

impl GraphClient {
    /// Connect to Neo4j and verify the server answers. Failure here is fatal
    /// for the caller; there is no retry.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        let config = ConfigBuilder::default()
            .uri(uri)
            .user(user)
            .password(password)
            .fetch_size(500)
            .max_connections(10)
            .build()
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        let graph = Graph::connect(config)
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;

        let client = Self { graph };
        client.verify_connectivity().await?;
        info!(uri, "Connected to graph store");
        Ok(client)
    }

    async fn verify_connectivity(&self) -> Result<()> {
        let mut stream = self
            .graph
            .execute(query("RETURN 1 AS ping"))
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?;
        stream
            .next()
            .await
            .map_err(|e| StoreError::Connectivity(e.to_string()))?
            .ok_or_else(|| StoreError::Connectivity("ping returned no row".into()))?;
        Ok(())
    }

    /// Get a reference to the underlying neo4rs Graph.
    pub fn inner(&self) -> &Graph {
        &self.graph
    }
}
