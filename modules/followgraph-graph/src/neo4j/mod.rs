//! Neo4j-backed [`GraphStore`].
//!
//! Writes are explicit bolt transactions; batches go down as one `UNWIND`
//! statement per shape. Import staging uses a dedicated label and key so
//! permanent identity (`Account.id` uniqueness) never takes part in
//! correlation.

mod bolt;

use std::collections::{BTreeMap, HashMap};

use async_stream::stream;
use async_trait::async_trait;
use futures::stream::BoxStream;
use neo4rs::{query, Query, Row, Txn};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, info};

use followgraph_common::{Account, CrawlState, CrawlUser, EdgeRecord, NodeRecord};

use crate::coerce::{CoercionKind, PropertyCoercion};
use crate::error::{Result, StoreError};
use crate::schema::{self, SchemaConfig};
use crate::store::{GraphStore, ReadTxn, StoreCounts, StoreTxn, Upsert, UpsertOutcome};
use crate::GraphClient;

use bolt::{map_to_bolt, quote_ident, without_nulls};

const STAGING_LABEL: &str = "_ImportStaging";
const STAGING_KEY: &str = "_importId";
const STAGING_INDEX: &str = "import_staging_id";

/// Nodes un-staged per cleanup statement.
const CLEANUP_CHUNK: i64 = 10_000;

const SELECT_FRONTIER: &str = "
    MATCH (a:Account)
    WHERE coalesce(a.importedFollowing, false) = false
      AND coalesce(a.paginationCursor, '') <> ''
    RETURN a.id AS id, coalesce(a.username, '') AS username, a.paginationCursor AS cursor
    LIMIT 1";

const SELECT_BEST_UNSTARTED: &str = "
    MATCH (a:Account)
    WHERE coalesce(a.importedFollowing, false) = false
      AND coalesce(a.paginationCursor, '') = ''
      AND coalesce(a.isPrivate, false) = false
      AND a.followersCount > 0
      AND a.followersCount > $min_followers
    RETURN a.id AS id, coalesce(a.username, '') AS username, '' AS cursor
    ORDER BY coalesce(a.referenceScore, 0.0) DESC
    LIMIT 1";

const RECOMPUTE_SCORES: &str = "
    MATCH (a:Account)
    WHERE a.followersCount > 0
    OPTIONAL MATCH (a)<-[f:FOLLOWS]-(:Account)
    WITH a, count(f) AS inbound
    SET a.referenceScore = toFloat(inbound) / a.followersCount
    RETURN count(a) AS scored";

const SET_CRAWL_STATE: &str = "
    MERGE (u:Account {id: $id})
    ON CREATE SET u.username = $username, u.importedFollowing = false
    WITH u
    WHERE coalesce(u.importedFollowing, false) = false
    SET u.paginationCursor = $cursor, u.importedFollowing = $complete";

const UPSERT_ACCOUNTS: &str = "
    UNWIND $rows AS row
    OPTIONAL MATCH (existing:Account {id: row.id})
    WITH row, existing IS NULL AS created
    MERGE (a:Account {id: row.id})
    ON CREATE SET a += row.props,
                  a.createdAt = CASE WHEN row.props.createdAt IS NULL THEN null
                                     ELSE datetime(row.props.createdAt) END
    RETURN row.id AS id, created, coalesce(a.followersCount, 0) AS followersCount";

const UPSERT_FOLLOW_EDGES: &str = "
    MATCH (from:Account {id: $from})
    UNWIND $to_ids AS to_id
    MATCH (to:Account {id: to_id})
    OPTIONAL MATCH (from)-[existing:FOLLOWS]->(to)
    WITH from, to, to_id, existing IS NULL AS created
    MERGE (from)-[:FOLLOWS]->(to)
    RETURN to_id AS id, created";

const ADD_REFERENCE_SCORES: &str = "
    UNWIND $rows AS row
    MATCH (a:Account {id: row.id})
    SET a.referenceScore = coalesce(a.referenceScore, 0.0) + row.delta";

const EXPORT_NODES: &str = "
    MATCH (n)
    RETURN toString(coalesce(n.id, elementId(n))) AS id,
           labels(n) AS labels,
           n {.*, createdAt: toString(n.createdAt)} AS props";

const EXPORT_EDGES: &str = "
    MATCH (a)-[r]->(b)
    RETURN type(r) AS type,
           toString(coalesce(a.id, elementId(a))) AS startId,
           toString(coalesce(b.id, elementId(b))) AS endId,
           properties(r) AS props";

/// [`GraphStore`] over a Neo4j server.
#[derive(Clone)]
pub struct Neo4jStore {
    client: GraphClient,
}

impl Neo4jStore {
    pub fn new(client: GraphClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    async fn first_candidate(&self, q: Query) -> Result<Option<CrawlUser>> {
        let mut stream = self.client.graph.execute(q).await?;
        match stream.next().await? {
            Some(row) => Ok(Some(CrawlUser {
                id: decode(&row, "id")?,
                username: decode(&row, "username")?,
                cursor: decode(&row, "cursor")?,
            })),
            None => Ok(None),
        }
    }

    async fn single_count(&self, cypher: &str, column: &str) -> Result<u64> {
        let mut stream = self.client.graph.execute(query(cypher)).await?;
        let count: i64 = match stream.next().await? {
            Some(row) => decode(&row, column)?,
            None => 0,
        };
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl GraphStore for Neo4jStore {
    async fn setup_schema(&self, schema: &SchemaConfig) -> Result<()> {
        schema::apply(&self.client, schema).await
    }

    async fn begin(&self) -> Result<Box<dyn StoreTxn>> {
        let txn = self.client.graph.start_txn().await?;
        Ok(Box::new(Neo4jTxn { txn }))
    }

    async fn begin_read(&self) -> Result<Box<dyn ReadTxn>> {
        let txn = self.client.graph.start_txn().await?;
        Ok(Box::new(Neo4jReadTxn { txn }))
    }

    async fn select_candidate(&self, min_followers: i64) -> Result<Option<CrawlUser>> {
        if let Some(user) = self.first_candidate(query(SELECT_FRONTIER)).await? {
            return Ok(Some(user));
        }
        self.first_candidate(query(SELECT_BEST_UNSTARTED).param("min_followers", min_followers))
            .await
    }

    async fn recompute_initial_scores(&self) -> Result<u64> {
        self.single_count(RECOMPUTE_SCORES, "scored").await
    }

    async fn prepare_import(&self) -> Result<()> {
        let cypher = format!(
            "CREATE INDEX {STAGING_INDEX} IF NOT EXISTS FOR (n:{STAGING_LABEL}) ON (n.{STAGING_KEY})"
        );
        self.client.graph.run(query(&cypher)).await?;
        debug!("Created import staging index");
        Ok(())
    }

    async fn coerce_staged(&self, coercions: &[PropertyCoercion]) -> Result<()> {
        for c in coercions {
            let prop = format!("n.{}", quote_ident(&c.property)?);
            let converted = match c.kind {
                CoercionKind::Timestamp => format!("datetime(toString({prop}))"),
                kind => format!("{}({prop})", kind.cypher_fn()),
            };
            let cypher = format!(
                "MATCH (n:{STAGING_LABEL}) WHERE {prop} IS NOT NULL SET {prop} = {converted}"
            );
            self.client.graph.run(query(&cypher)).await?;
            debug!(property = %c.property, kind = ?c.kind, "Coerced staged property");
        }
        Ok(())
    }

    async fn finish_import(&self) -> Result<()> {
        let cypher = format!(
            "MATCH (n:{STAGING_LABEL}) WITH n LIMIT $chunk
             REMOVE n:{STAGING_LABEL}, n.{STAGING_KEY}
             RETURN count(n) AS cleaned"
        );
        let mut total = 0i64;
        loop {
            let mut stream = self
                .client
                .graph
                .execute(query(&cypher).param("chunk", CLEANUP_CHUNK))
                .await?;
            let cleaned: i64 = match stream.next().await? {
                Some(row) => decode(&row, "cleaned")?,
                None => 0,
            };
            total += cleaned;
            if cleaned == 0 {
                break;
            }
        }

        self.client
            .graph
            .run(query(&format!("DROP INDEX {STAGING_INDEX} IF EXISTS")))
            .await?;
        info!(nodes = total, "Removed import staging markers");
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        Ok(StoreCounts {
            nodes: self.single_count("MATCH (n) RETURN count(n) AS c", "c").await?,
            edges: self.single_count("MATCH ()-[r]->() RETURN count(r) AS c", "c").await?,
        })
    }
}

struct Neo4jTxn {
    txn: Txn,
}

impl Neo4jTxn {
    async fn rows(&mut self, q: Query) -> Result<Vec<Row>> {
        let mut stream = self.txn.execute(q).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next(self.txn.handle()).await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

#[async_trait]
impl StoreTxn for Neo4jTxn {
    async fn set_crawl_state(&mut self, user: &CrawlUser, state: &CrawlState) -> Result<()> {
        let (cursor, complete) = state.markers();
        let q = query(SET_CRAWL_STATE)
            .param("id", user.id.as_str())
            .param("username", user.username.as_str())
            .param("cursor", cursor)
            .param("complete", complete);
        self.txn.run(q).await?;
        Ok(())
    }

    async fn upsert_accounts(&mut self, accounts: &[Account]) -> Result<Vec<UpsertOutcome>> {
        if accounts.is_empty() {
            return Ok(Vec::new());
        }

        let rows: Vec<_> = accounts
            .iter()
            .map(|a| {
                let mut row = Map::new();
                row.insert("id".into(), Value::from(a.id.as_str()));
                row.insert("props".into(), Value::Object(a.creation_properties()));
                map_to_bolt(&row)
            })
            .collect();

        let mut seen: HashMap<String, (bool, i64)> = HashMap::new();
        for row in self.rows(query(UPSERT_ACCOUNTS).param("rows", rows)).await? {
            let id: String = decode(&row, "id")?;
            seen.insert(id, (decode(&row, "created")?, decode(&row, "followersCount")?));
        }

        accounts
            .iter()
            .map(|a| {
                let (created, followers_count) = seen
                    .get(&a.id)
                    .copied()
                    .ok_or_else(|| StoreError::Unresolved(a.id.clone()))?;
                Ok(UpsertOutcome {
                    id: a.id.clone(),
                    upsert: if created { Upsert::Created } else { Upsert::Existing },
                    followers_count,
                })
            })
            .collect()
    }

    async fn upsert_follow_edges(&mut self, from_id: &str, to_ids: &[String]) -> Result<Vec<Upsert>> {
        if to_ids.is_empty() {
            return Ok(Vec::new());
        }

        let q = query(UPSERT_FOLLOW_EDGES)
            .param("from", from_id)
            .param("to_ids", to_ids.to_vec());

        let mut created: HashMap<String, bool> = HashMap::new();
        for row in self.rows(q).await? {
            created.insert(decode(&row, "id")?, decode(&row, "created")?);
        }

        to_ids
            .iter()
            .map(|id| match created.get(id) {
                Some(true) => Ok(Upsert::Created),
                Some(false) => Ok(Upsert::Existing),
                None => Err(StoreError::Unresolved(id.clone())),
            })
            .collect()
    }

    async fn add_reference_scores(&mut self, deltas: &[(String, f64)]) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let rows: Vec<_> = deltas
            .iter()
            .map(|(id, delta)| {
                let mut row = Map::new();
                row.insert("id".into(), Value::from(id.as_str()));
                row.insert("delta".into(), Value::from(*delta));
                map_to_bolt(&row)
            })
            .collect();
        self.txn.run(query(ADD_REFERENCE_SCORES).param("rows", rows)).await?;
        Ok(())
    }

    async fn merge_node_batch(&mut self, batch: &[NodeRecord]) -> Result<()> {
        // Labels cannot be parameters, so one statement per distinct label set.
        let mut by_labels: BTreeMap<Vec<String>, Vec<&NodeRecord>> = BTreeMap::new();
        for record in batch {
            let mut labels = record.labels.clone();
            labels.sort();
            labels.dedup();
            by_labels.entry(labels).or_default().push(record);
        }

        for (labels, records) in by_labels {
            let quoted = labels
                .iter()
                .map(|l| quote_ident(l))
                .collect::<Result<Vec<_>>>()?;
            let set_labels = if quoted.is_empty() {
                String::new()
            } else {
                format!(" SET n:{}", quoted.join(":"))
            };
            let cypher = format!(
                "UNWIND $rows AS row
                 MERGE (n:{STAGING_LABEL} {{{STAGING_KEY}: row.id}})
                 SET n += row.properties{set_labels}"
            );

            let rows: Vec<_> = records
                .iter()
                .map(|r| {
                    let mut row = Map::new();
                    row.insert("id".into(), Value::from(r.id.as_str()));
                    row.insert("properties".into(), Value::Object(without_nulls(r.properties.clone())));
                    map_to_bolt(&row)
                })
                .collect();
            self.txn.run(query(&cypher).param("rows", rows)).await?;
        }
        Ok(())
    }

    async fn merge_edge_batch(&mut self, batch: &[EdgeRecord]) -> Result<usize> {
        let mut by_type: BTreeMap<&str, Vec<&EdgeRecord>> = BTreeMap::new();
        for record in batch {
            by_type.entry(record.rel_type.as_str()).or_default().push(record);
        }

        let mut resolved = 0usize;
        for (rel_type, records) in by_type {
            let cypher = format!(
                "UNWIND $rows AS row
                 MATCH (a:{STAGING_LABEL} {{{STAGING_KEY}: row.startId}})
                 MATCH (b:{STAGING_LABEL} {{{STAGING_KEY}: row.endId}})
                 MERGE (a)-[r:{}]->(b)
                 SET r += row.properties
                 RETURN count(r) AS resolved",
                quote_ident(rel_type)?
            );

            let rows: Vec<_> = records
                .iter()
                .map(|r| {
                    let mut row = Map::new();
                    row.insert("startId".into(), Value::from(r.start_id.as_str()));
                    row.insert("endId".into(), Value::from(r.end_id.as_str()));
                    row.insert("properties".into(), Value::Object(without_nulls(r.properties.clone())));
                    map_to_bolt(&row)
                })
                .collect();

            for row in self.rows(query(&cypher).param("rows", rows)).await? {
                let count: i64 = decode(&row, "resolved")?;
                resolved += count.max(0) as usize;
            }
        }
        Ok(resolved)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await?;
        Ok(())
    }
}

struct Neo4jReadTxn {
    txn: Txn,
}

#[async_trait]
impl ReadTxn for Neo4jReadTxn {
    fn nodes(&mut self) -> BoxStream<'_, Result<NodeRecord>> {
        Box::pin(stream! {
            let mut rows = match self.txn.execute(query(EXPORT_NODES)).await {
                Ok(rows) => rows,
                Err(e) => {
                    yield Err(StoreError::from(e));
                    return;
                }
            };
            loop {
                match rows.next(self.txn.handle()).await {
                    Ok(Some(row)) => {
                        yield node_from_row(&row);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(StoreError::from(e));
                        break;
                    }
                }
            }
        })
    }

    fn edges(&mut self) -> BoxStream<'_, Result<EdgeRecord>> {
        Box::pin(stream! {
            let mut rows = match self.txn.execute(query(EXPORT_EDGES)).await {
                Ok(rows) => rows,
                Err(e) => {
                    yield Err(StoreError::from(e));
                    return;
                }
            };
            loop {
                match rows.next(self.txn.handle()).await {
                    Ok(Some(row)) => {
                        yield edge_from_row(&row);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(StoreError::from(e));
                        break;
                    }
                }
            }
        })
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.txn.commit().await?;
        Ok(())
    }
}

fn node_from_row(row: &Row) -> Result<NodeRecord> {
    Ok(NodeRecord {
        id: decode(row, "id")?,
        labels: decode(row, "labels")?,
        properties: without_nulls(decode(row, "props")?),
    })
}

fn edge_from_row(row: &Row) -> Result<EdgeRecord> {
    Ok(EdgeRecord {
        rel_type: decode(row, "type")?,
        start_id: decode(row, "startId")?,
        end_id: decode(row, "endId")?,
        properties: without_nulls(decode(row, "props")?),
    })
}

fn decode<T: DeserializeOwned>(row: &Row, key: &str) -> Result<T> {
    row.get::<T>(key)
        .map_err(|e| StoreError::Decode(format!("{key}: {e}")))
}
