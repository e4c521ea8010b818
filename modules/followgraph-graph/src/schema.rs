use neo4rs::query;
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::GraphClient;

/// A named, idempotent schema statement (constraint or index).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaStatement {
    pub name: String,
    pub cypher: String,
}

impl SchemaStatement {
    pub fn new(name: impl Into<String>, cypher: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cypher: cypher.into(),
        }
    }
}

/// Ordered schema setup owned by the caller. Statements run in list order and
/// the first failure aborts setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaConfig {
    pub statements: Vec<SchemaStatement>,
}

impl SchemaConfig {
    pub fn new(statements: Vec<SchemaStatement>) -> Self {
        Self { statements }
    }

    /// Constraints and indexes the crawler relies on.
    ///
    /// `username` gets a plain index, not a uniqueness constraint: handles are
    /// reassigned on the platform and a stale sighting must not fail a page.
    pub fn crawl_default() -> Self {
        Self::new(vec![
            SchemaStatement::new(
                "account_id",
                "CREATE CONSTRAINT account_id IF NOT EXISTS FOR (a:Account) REQUIRE a.id IS UNIQUE",
            ),
            SchemaStatement::new(
                "account_username",
                "CREATE INDEX account_username IF NOT EXISTS FOR (a:Account) ON (a.username)",
            ),
            SchemaStatement::new(
                "account_cursor",
                "CREATE INDEX account_cursor IF NOT EXISTS FOR (a:Account) ON (a.paginationCursor)",
            ),
            SchemaStatement::new(
                "account_reference_score",
                "CREATE INDEX account_reference_score IF NOT EXISTS FOR (a:Account) ON (a.referenceScore)",
            ),
        ])
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

/// Run every statement of `schema` against Neo4j, in order.
pub(crate) async fn apply(client: &GraphClient, schema: &SchemaConfig) -> Result<()> {
    info!(statements = schema.statements.len(), "Setting up graph schema");

    for statement in &schema.statements {
        run_ignoring_exists(&client.graph, &statement.cypher)
            .await
            .map_err(|e| StoreError::Schema {
                statement: statement.name.clone(),
                message: e.to_string(),
            })?;
    }

    info!("Schema setup complete");
    Ok(())
}

/// Run a Cypher statement, ignoring errors that indicate the constraint/index already exists.
async fn run_ignoring_exists(g: &neo4rs::Graph, cypher: &str) -> std::result::Result<(), neo4rs::Error> {
    match g.run(query(cypher)).await {
        Ok(_) => Ok(()),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("already exists") || msg.contains("equivalent") {
                warn!("Already exists (skipped): {}", cypher.chars().take(80).collect::<String>());
                Ok(())
            } else {
                Err(e)
            }
        }
    }
}
