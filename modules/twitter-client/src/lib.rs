pub mod error;
pub mod types;

pub use error::{Result, TwitterError};
pub use types::{ApiProblem, FollowingPage, PublicMetrics, ResponseMeta, UserObject};

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use types::UsersResponse;

const BASE_URL: &str = "https://api.twitter.com/2";

/// Largest `max_results` the following endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Maximum usernames per `/users/by` request.
const MAX_LOOKUP_BATCH: usize = 100;

const USER_FIELDS: &str = "created_at,description,entities,id,location,name,profile_image_url,protected,public_metrics,url,username,verified";

pub struct TwitterClient {
    client: reqwest::Client,
    token: String,
    base_url: String,
}

impl TwitterClient {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
            base_url: BASE_URL.to_string(),
        }
    }

    /// Point the client at a different API host (proxies, local fakes).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Fetch one page of the accounts `user_id` follows.
    ///
    /// `pagination_token = None` starts from the beginning. No retry is
    /// attempted here; rate limiting surfaces as [`TwitterError::RateLimited`].
    pub async fn following_page(
        &self,
        user_id: &str,
        pagination_token: Option<&str>,
        max_results: u32,
    ) -> Result<FollowingPage> {
        let url = format!("{}/users/{}/following", self.base_url, user_id);
        let max_results = max_results.clamp(1, MAX_PAGE_SIZE).to_string();

        let mut params: Vec<(&str, &str)> = vec![
            ("max_results", max_results.as_str()),
            ("user.fields", USER_FIELDS),
        ];
        if let Some(token) = pagination_token.filter(|t| !t.is_empty()) {
            params.push(("pagination_token", token));
        }

        let resp: UsersResponse = self.get(&url, &params).await?;
        let page = FollowingPage::from(resp);
        tracing::debug!(
            user_id,
            count = page.users.len(),
            has_more = page.next_token.is_some(),
            "Fetched following page"
        );
        Ok(page)
    }

    /// Resolve usernames to user objects. Unknown usernames are dropped
    /// (the API reports them as partial errors, which are logged).
    pub async fn lookup_usernames(&self, usernames: &[String]) -> Result<Vec<UserObject>> {
        let url = format!("{}/users/by", self.base_url);
        let mut users = Vec::with_capacity(usernames.len());

        for chunk in usernames.chunks(MAX_LOOKUP_BATCH) {
            let joined = chunk.join(",");
            let params = [("usernames", joined.as_str()), ("user.fields", USER_FIELDS)];
            let resp: UsersResponse = self.get(&url, &params).await?;

            for problem in &resp.errors {
                tracing::warn!(
                    value = problem.value.as_deref().unwrap_or(""),
                    detail = problem.detail.as_deref().unwrap_or(""),
                    "Username lookup reported a problem"
                );
            }
            users.extend(resp.data);
        }

        Ok(users)
    }

    async fn get<T: DeserializeOwned>(&self, url: &str, params: &[(&str, &str)]) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TwitterError::RateLimited {
                reset_at: rate_limit_reset(resp.headers()),
            });
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TwitterError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Parse the `x-rate-limit-reset` header (epoch seconds).
fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let secs: i64 = headers
        .get("x-rate-limit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn rate_limit_reset_reads_epoch_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1700000000"));
        let reset = rate_limit_reset(&headers).unwrap();
        assert_eq!(reset.timestamp(), 1_700_000_000);
    }

    #[test]
    fn rate_limit_reset_tolerates_missing_or_garbage() {
        assert!(rate_limit_reset(&HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("x-rate-limit-reset", HeaderValue::from_static("soon"));
        assert!(rate_limit_reset(&headers).is_none());
    }

    #[test]
    fn base_url_override_strips_trailing_slash() {
        let client = TwitterClient::new("t".into()).with_base_url("http://localhost:9999/2/");
        assert_eq!(client.base_url, "http://localhost:9999/2");
    }

    #[test]
    fn rate_limited_error_message_names_reset_time() {
        let err = TwitterError::RateLimited { reset_at: None };
        assert_eq!(err.to_string(), "Rate limited until unknown");
    }
}
