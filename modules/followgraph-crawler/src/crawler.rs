//! The crawl loop: select a candidate, fetch one page of its following list,
//! merge it, repeat.
//!
//! Fetch failures never escalate. The same candidate is retried after a fixed
//! backoff until the fetch succeeds or the crawl is cancelled. Store failures
//! are returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use followgraph_common::{Config, CrawlUser, FollowGraphError};
use followgraph_graph::frontier::is_eligible;
use followgraph_graph::{GraphStore, MergeReport, MergeWriter, SchemaConfig};

use crate::traits::{FetchedPage, FollowFetcher, TransientFetchError};

/// What to do when no candidate is left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Stop the loop.
    Terminate,
    /// Sleep and select again; new accounts may arrive from elsewhere.
    Poll(Duration),
}

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub min_followers: i64,
    pub page_size: u32,
    pub backoff: Duration,
    pub idle: IdlePolicy,
    pub schema: SchemaConfig,
}

impl CrawlConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_followers: config.min_followers,
            page_size: config.page_size,
            backoff: config.backoff,
            idle: config.idle_poll.map_or(IdlePolicy::Terminate, IdlePolicy::Poll),
            schema: SchemaConfig::crawl_default(),
        }
    }
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            min_followers: 1000,
            page_size: 1000,
            backoff: Duration::from_secs(15 * 60),
            idle: IdlePolicy::Terminate,
            schema: SchemaConfig::crawl_default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// No candidate left and the idle policy said stop.
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages: u64,
    pub accounts_created: u64,
    pub edges_created: u64,
    pub fetch_failures: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub stats: CrawlStats,
}

/// What seeding did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Seeds that were not in the store yet.
    pub created: usize,
    /// Usernames the platform did not resolve.
    pub unresolved: usize,
    /// Resolved seeds the selector will never pick (private, or too few
    /// followers for the configured threshold).
    pub ineligible: Vec<String>,
}

/// Hooks into crawl progress. All methods default to no-ops.
pub trait CrawlObserver: Send + Sync {
    fn candidate_selected(&self, _user: &CrawlUser) {}
    fn page_merged(&self, _user: &CrawlUser, _report: &MergeReport) {}
    fn fetch_failed(&self, _user: &CrawlUser, _error: &TransientFetchError, _retry_in: Duration) {}
    fn idle(&self) {}
}

/// Logs crawl progress through `tracing`.
pub struct TracingCrawlObserver;

impl CrawlObserver for TracingCrawlObserver {
    fn candidate_selected(&self, user: &CrawlUser) {
        info!(
            account_id = user.id.as_str(),
            username = user.username.as_str(),
            resuming = !user.cursor.is_empty(),
            "Crawling following list"
        );
    }

    fn page_merged(&self, user: &CrawlUser, report: &MergeReport) {
        info!(
            account_id = user.id.as_str(),
            accounts_created = report.accounts_created,
            edges_created = report.edges_created,
            state = ?report.state,
            "Page merged"
        );
    }

    fn fetch_failed(&self, user: &CrawlUser, error: &TransientFetchError, retry_in: Duration) {
        warn!(
            account_id = user.id.as_str(),
            error = %error,
            retry_in_secs = retry_in.as_secs(),
            "Fetch failed, retrying same account"
        );
    }

    fn idle(&self) {
        info!("No crawl candidate available");
    }
}

pub struct Crawler<F> {
    store: Arc<dyn GraphStore>,
    writer: MergeWriter,
    fetcher: F,
    config: CrawlConfig,
    observer: Arc<dyn CrawlObserver>,
}

impl<F: FollowFetcher> Crawler<F> {
    pub fn new(store: Arc<dyn GraphStore>, fetcher: F, config: CrawlConfig) -> Self {
        Self {
            writer: MergeWriter::new(store.clone()),
            store,
            fetcher,
            config,
            observer: Arc::new(TracingCrawlObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CrawlObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    /// Apply the schema and run the one-shot score recompute. Run once before
    /// [`Crawler::run`].
    pub async fn setup(&self) -> Result<(), FollowGraphError> {
        self.store.setup_schema(&self.config.schema).await?;
        let scored = self.store.recompute_initial_scores().await?;
        info!(scored, "Initial reference scores computed");
        Ok(())
    }

    /// Resolve usernames and insert them as not-started accounts so an empty
    /// graph has somewhere to begin. Existing accounts are left untouched.
    /// A failed lookup is fatal here since there is nothing to retry into.
    pub async fn seed(&self, usernames: &[String]) -> Result<SeedReport, FollowGraphError> {
        if usernames.is_empty() {
            return Ok(SeedReport::default());
        }

        let accounts = self
            .fetcher
            .lookup_usernames(usernames)
            .await
            .map_err(|e| FollowGraphError::Fetch(e.to_string()))?;
        if accounts.len() < usernames.len() {
            warn!(
                requested = usernames.len(),
                found = accounts.len(),
                "Some seed usernames did not resolve"
            );
        }

        let mut ineligible = Vec::new();
        for account in &accounts {
            if !is_eligible(account.is_private, account.followers_count, self.config.min_followers) {
                warn!(
                    username = account.username.as_str(),
                    is_private = account.is_private,
                    followers_count = account.followers_count,
                    min_followers = self.config.min_followers,
                    "Seed can never be selected for crawling"
                );
                ineligible.push(account.username.clone());
            }
        }

        let mut txn = self.store.begin().await?;
        let outcomes = match txn.upsert_accounts(&accounts).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                if let Err(rollback) = txn.rollback().await {
                    warn!(error = %rollback, "Rollback after failed seed merge also failed");
                }
                return Err(e.into());
            }
        };
        txn.commit().await?;

        let created = outcomes.iter().filter(|o| o.upsert.is_created()).count();
        info!(seeds = accounts.len(), created, "Seed accounts merged");
        Ok(SeedReport {
            created,
            unresolved: usernames.len().saturating_sub(accounts.len()),
            ineligible,
        })
    }

    /// Crawl until no candidate is left (under [`IdlePolicy::Terminate`]) or
    /// `cancel` flips to `true`.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> Result<CrawlReport, FollowGraphError> {
        let mut stats = CrawlStats::default();

        loop {
            if *cancel.borrow() {
                return Ok(finish(CrawlOutcome::Cancelled, stats));
            }

            let Some(user) = self.store.select_candidate(self.config.min_followers).await? else {
                self.observer.idle();
                match self.config.idle {
                    IdlePolicy::Terminate => return Ok(finish(CrawlOutcome::Exhausted, stats)),
                    IdlePolicy::Poll(interval) => {
                        if sleep_or_cancel(interval, &mut cancel).await {
                            return Ok(finish(CrawlOutcome::Cancelled, stats));
                        }
                        continue;
                    }
                }
            };
            self.observer.candidate_selected(&user);

            let Some(page) = self.fetch_with_retry(&user, &mut stats, &mut cancel).await else {
                return Ok(finish(CrawlOutcome::Cancelled, stats));
            };

            let report = self
                .writer
                .merge_page(&user, &page.accounts, &page.next_cursor)
                .await?;
            stats.pages += 1;
            stats.accounts_created += report.accounts_created as u64;
            stats.edges_created += report.edges_created as u64;
            self.observer.page_merged(&user, &report);
        }
    }

    /// Fetch the next page for `user`, retrying the same request after the
    /// fixed backoff until it succeeds. `None` means cancelled while waiting.
    async fn fetch_with_retry(
        &self,
        user: &CrawlUser,
        stats: &mut CrawlStats,
        cancel: &mut watch::Receiver<bool>,
    ) -> Option<FetchedPage> {
        loop {
            match self
                .fetcher
                .following_page(&user.id, &user.cursor, self.config.page_size)
                .await
            {
                Ok(page) => return Some(page),
                Err(e) => {
                    stats.fetch_failures += 1;
                    self.observer.fetch_failed(user, &e, self.config.backoff);
                    if sleep_or_cancel(self.config.backoff, cancel).await {
                        return None;
                    }
                }
            }
        }
    }
}

fn finish(outcome: CrawlOutcome, stats: CrawlStats) -> CrawlReport {
    info!(
        ?outcome,
        pages = stats.pages,
        accounts_created = stats.accounts_created,
        edges_created = stats.edges_created,
        fetch_failures = stats.fetch_failures,
        "Crawl finished"
    );
    CrawlReport { outcome, stats }
}

/// Sleep for `duration`. Returns `true` if cancellation arrived first.
async fn sleep_or_cancel(duration: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    if *cancel.borrow() {
        return true;
    }
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return *cancel.borrow(),
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Sender gone; nothing can cancel any more.
                    (&mut sleep).await;
                    return false;
                }
                if *cancel.borrow() {
                    return true;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleep_returns_early_on_cancel() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { sleep_or_cancel(Duration::from_secs(3600), &mut rx).await });
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn sleep_completes_without_cancel() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_cancel(Duration::from_millis(5), &mut rx).await);
    }

    #[test]
    fn idle_policy_follows_poll_setting() {
        let mut config = Config {
            neo4j_uri: "neo4j://localhost:7687".into(),
            neo4j_user: "neo4j".into(),
            neo4j_password: "pw".into(),
            twitter_bearer_token: None,
            min_followers: 50,
            backoff: Duration::from_secs(1),
            idle_poll: None,
            page_size: 200,
            bulk_tx_timeout: Duration::from_secs(60),
            import_batch_size: 1000,
        };
        let crawl = CrawlConfig::from_config(&config);
        assert_eq!(crawl.idle, IdlePolicy::Terminate);
        assert_eq!(crawl.min_followers, 50);
        assert_eq!(crawl.page_size, 200);

        config.idle_poll = Some(Duration::from_secs(30));
        assert_eq!(
            CrawlConfig::from_config(&config).idle,
            IdlePolicy::Poll(Duration::from_secs(30))
        );
    }
}
