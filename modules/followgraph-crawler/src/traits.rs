// The crawler's one external boundary: fetching following lists from the
// platform. TwitterClient implements it for real runs; ScriptedFetcher in
// `testing` implements it for tests with no network.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use followgraph_common::Account;
use twitter_client::{TwitterClient, TwitterError, UserObject};

/// A page of accounts the crawled account follows.
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub accounts: Vec<Account>,
    /// Empty once the list is exhausted.
    pub next_cursor: String,
}

/// A fetch that failed in a way the crawl loop recovers from by waiting and
/// asking again.
#[derive(Debug, Error)]
pub struct TransientFetchError {
    pub message: String,
    /// When the platform said the rate limit window resets, if it did.
    pub reset_at: Option<DateTime<Utc>>,
}

impl TransientFetchError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            reset_at: None,
        }
    }
}

impl fmt::Display for TransientFetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reset_at {
            Some(at) => write!(f, "{} (resets at {})", self.message, at.to_rfc3339()),
            None => f.write_str(&self.message),
        }
    }
}

impl From<TwitterError> for TransientFetchError {
    fn from(err: TwitterError) -> Self {
        let reset_at = match &err {
            TwitterError::RateLimited { reset_at } => *reset_at,
            _ => None,
        };
        Self {
            message: err.to_string(),
            reset_at,
        }
    }
}

#[async_trait]
pub trait FollowFetcher: Send + Sync {
    /// One page of `account_id`'s following list. An empty `cursor` means the
    /// first page.
    async fn following_page(
        &self,
        account_id: &str,
        cursor: &str,
        page_size: u32,
    ) -> Result<FetchedPage, TransientFetchError>;

    /// Resolve usernames to accounts. Unknown usernames are left out.
    async fn lookup_usernames(&self, usernames: &[String]) -> Result<Vec<Account>, TransientFetchError>;
}

#[async_trait]
impl FollowFetcher for TwitterClient {
    async fn following_page(
        &self,
        account_id: &str,
        cursor: &str,
        page_size: u32,
    ) -> Result<FetchedPage, TransientFetchError> {
        let cursor = Some(cursor).filter(|c| !c.is_empty());
        let page = TwitterClient::following_page(self, account_id, cursor, page_size).await?;
        Ok(FetchedPage {
            accounts: page.users.into_iter().map(account_from_user).collect(),
            next_cursor: page.next_token.unwrap_or_default(),
        })
    }

    async fn lookup_usernames(&self, usernames: &[String]) -> Result<Vec<Account>, TransientFetchError> {
        let users = TwitterClient::lookup_usernames(self, usernames).await?;
        Ok(users.into_iter().map(account_from_user).collect())
    }
}

/// Map a platform user object onto the stored account shape.
pub fn account_from_user(user: UserObject) -> Account {
    let metrics = user.public_metrics.unwrap_or_default();
    Account {
        id: user.id,
        username: user.username,
        name: user.name,
        created_at: user.created_at,
        followers_count: metrics.followers_count,
        following_count: metrics.following_count,
        tweet_count: metrics.tweet_count,
        is_private: user.protected,
        profile_image_url: user.profile_image_url.filter(|s| !s.is_empty()),
        location: user.location.filter(|s| !s.is_empty()),
        verified: user.verified,
        url: user.url.filter(|s| !s.is_empty()),
    }
}
