use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use followgraph_common::{Account, CrawlState, CrawlUser};

use crate::error::Result;
use crate::score;
use crate::store::{GraphStore, StoreTxn};

/// What one merged page changed.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub state: CrawlState,
    pub accounts_created: usize,
    pub edges_created: usize,
    /// Repeat sightings of an account within the same page.
    pub duplicates: usize,
}

/// Applies fetched following pages to the graph, one transaction per page.
#[derive(Clone)]
pub struct MergeWriter {
    store: Arc<dyn GraphStore>,
}

impl MergeWriter {
    pub fn new(store: Arc<dyn GraphStore>) -> Self {
        Self { store }
    }

    /// Merge one page for `user`.
    ///
    /// In a single transaction: record the crawl state implied by
    /// `next_cursor`, create-if-absent every followed account, create any
    /// missing follow edges, and bump the reference score of each account that
    /// gained a new inbound edge. On error nothing is applied.
    pub async fn merge_page(
        &self,
        user: &CrawlUser,
        page: &[Account],
        next_cursor: &str,
    ) -> Result<MergeReport> {
        let mut txn = self.store.begin().await?;

        match apply_page(txn.as_mut(), user, page, next_cursor).await {
            Ok(report) => {
                txn.commit().await?;
                debug!(
                    account_id = %user.id,
                    accounts_created = report.accounts_created,
                    edges_created = report.edges_created,
                    "Merged following page"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(account_id = %user.id, error = %rollback, "Rollback after failed merge also failed");
                }
                Err(e)
            }
        }
    }
}

async fn apply_page(
    txn: &mut dyn StoreTxn,
    user: &CrawlUser,
    page: &[Account],
    next_cursor: &str,
) -> Result<MergeReport> {
    let state = CrawlState::after_page(next_cursor);
    txn.set_crawl_state(user, &state).await?;

    let mut seen = HashSet::with_capacity(page.len());
    let followed: Vec<Account> = page
        .iter()
        .filter(|a| seen.insert(a.id.as_str()))
        .cloned()
        .collect();
    let duplicates = page.len() - followed.len();

    let outcomes = txn.upsert_accounts(&followed).await?;
    let ids: Vec<String> = followed.iter().map(|a| a.id.clone()).collect();
    let edges = txn.upsert_follow_edges(&user.id, &ids).await?;

    // Score only moves when an edge is new; re-sightings leave it alone.
    let deltas: Vec<(String, f64)> = outcomes
        .iter()
        .zip(&edges)
        .filter(|(_, edge)| edge.is_created())
        .filter_map(|(outcome, _)| {
            score::reference_increment(outcome.followers_count).map(|d| (outcome.id.clone(), d))
        })
        .collect();
    txn.add_reference_scores(&deltas).await?;

    Ok(MergeReport {
        state,
        accounts_created: outcomes.iter().filter(|o| o.upsert.is_created()).count(),
        edges_created: edges.iter().filter(|e| e.is_created()).count(),
        duplicates,
    })
}
