// Test doubles for the crawl loop.
//
// ScriptedFetcher (FollowFetcher): pages keyed by (account id, cursor), a
// per-account count of failures to return before succeeding, and a log of
// every request made. Unscripted accounts follow nobody.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use followgraph_common::Account;

use crate::traits::{FetchedPage, FollowFetcher, TransientFetchError};

/// Build a public account with the given follower count.
pub fn account(id: &str, followers: i64) -> Account {
    Account {
        id: id.to_string(),
        username: format!("user_{id}"),
        name: format!("User {id}"),
        created_at: None,
        followers_count: followers,
        following_count: 0,
        tweet_count: 0,
        is_private: false,
        profile_image_url: None,
        location: None,
        verified: false,
        url: None,
    }
}

#[derive(Default)]
pub struct ScriptedFetcher {
    pages: HashMap<(String, String), FetchedPage>,
    users: HashMap<String, Account>,
    failures: Mutex<HashMap<String, usize>>,
    lookup_fails: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `accounts` for `account_id` at `cursor`, pointing on to `next`.
    pub fn on_page(mut self, account_id: &str, cursor: &str, accounts: Vec<Account>, next: &str) -> Self {
        self.pages.insert(
            (account_id.to_string(), cursor.to_string()),
            FetchedPage {
                accounts,
                next_cursor: next.to_string(),
            },
        );
        self
    }

    /// Fail the next `times` page requests for `account_id`.
    pub fn failing(self, account_id: &str, times: usize) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(account_id.to_string(), times);
        }
        self
    }

    /// Make `account` resolvable by its username.
    pub fn with_user(mut self, account: Account) -> Self {
        self.users.insert(account.username.clone(), account);
        self
    }

    /// Make every username lookup fail.
    pub fn failing_lookups(mut self) -> Self {
        self.lookup_fails = true;
        self
    }

    /// Every `(account_id, cursor)` requested so far, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FollowFetcher for ScriptedFetcher {
    async fn following_page(
        &self,
        account_id: &str,
        cursor: &str,
        _page_size: u32,
    ) -> Result<FetchedPage, TransientFetchError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((account_id.to_string(), cursor.to_string()));
        }

        if let Ok(mut failures) = self.failures.lock() {
            if let Some(remaining) = failures.get_mut(account_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransientFetchError::new("scripted rate limit"));
                }
            }
        }

        Ok(self
            .pages
            .get(&(account_id.to_string(), cursor.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn lookup_usernames(&self, usernames: &[String]) -> Result<Vec<Account>, TransientFetchError> {
        if self.lookup_fails {
            return Err(TransientFetchError::new("scripted lookup failure"));
        }
        Ok(usernames
            .iter()
            .filter_map(|u| self.users.get(u).cloned())
            .collect())
    }
}
