use chrono::{DateTime, Utc};
use serde::Deserialize;

/// A user object as returned by the v2 users endpoints with the
/// `user.fields` set requested by [`crate::TwitterClient`].
#[derive(Debug, Clone, Deserialize)]
pub struct UserObject {
    pub id: String,
    pub name: String,
    pub username: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub protected: bool,
    #[serde(default)]
    pub verified: bool,
    pub location: Option<String>,
    pub url: Option<String>,
    pub profile_image_url: Option<String>,
    pub description: Option<String>,
    pub public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublicMetrics {
    #[serde(default)]
    pub followers_count: i64,
    #[serde(default)]
    pub following_count: i64,
    #[serde(default)]
    pub tweet_count: i64,
    #[serde(default)]
    pub listed_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMeta {
    pub result_count: Option<u32>,
    pub next_token: Option<String>,
}

/// Partial errors the API reports next to (or instead of) `data`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiProblem {
    pub title: Option<String>,
    pub detail: Option<String>,
    pub value: Option<String>,
}

/// Envelope shared by `/users/:id/following` and `/users/by`.
/// `data` is absent when the account follows nobody.
#[derive(Debug, Deserialize)]
pub(crate) struct UsersResponse {
    #[serde(default)]
    pub data: Vec<UserObject>,
    #[serde(default)]
    pub meta: ResponseMeta,
    #[serde(default)]
    pub errors: Vec<ApiProblem>,
}

/// One page of an account's following list.
#[derive(Debug, Clone)]
pub struct FollowingPage {
    pub users: Vec<UserObject>,
    /// `None` once the list is exhausted.
    pub next_token: Option<String>,
}

impl From<UsersResponse> for FollowingPage {
    fn from(resp: UsersResponse) -> Self {
        Self {
            users: resp.data,
            next_token: resp.meta.next_token.filter(|t| !t.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn following_page_decodes_full_user_fields() {
        let body = r#"{
            "data": [{
                "id": "2244994945",
                "name": "Twitter Dev",
                "username": "TwitterDev",
                "created_at": "2013-12-14T04:35:55.000Z",
                "protected": false,
                "verified": true,
                "location": "127.0.0.1",
                "url": "https://t.co/3ZX3TNiZCY",
                "profile_image_url": "https://pbs.twimg.com/profile_images/x.png",
                "public_metrics": {
                    "followers_count": 513958,
                    "following_count": 2039,
                    "tweet_count": 3635,
                    "listed_count": 1672
                }
            }],
            "meta": { "result_count": 1, "next_token": "DFEDBNRFT3MHCZZZ" }
        }"#;

        let resp: UsersResponse = serde_json::from_str(body).unwrap();
        let page = FollowingPage::from(resp);

        assert_eq!(page.users.len(), 1);
        assert_eq!(page.next_token.as_deref(), Some("DFEDBNRFT3MHCZZZ"));
        let user = &page.users[0];
        assert_eq!(user.username, "TwitterDev");
        assert!(user.verified);
        assert_eq!(user.public_metrics.as_ref().unwrap().followers_count, 513958);
        assert_eq!(user.created_at.unwrap().to_rfc3339(), "2013-12-14T04:35:55+00:00");
    }

    #[test]
    fn empty_following_list_has_no_data_and_no_token() {
        let resp: UsersResponse = serde_json::from_str(r#"{"meta":{"result_count":0}}"#).unwrap();
        let page = FollowingPage::from(resp);
        assert!(page.users.is_empty());
        assert!(page.next_token.is_none());
    }

    #[test]
    fn blank_next_token_means_exhausted() {
        let resp: UsersResponse =
            serde_json::from_str(r#"{"data":[],"meta":{"next_token":""}}"#).unwrap();
        assert!(FollowingPage::from(resp).next_token.is_none());
    }

    #[test]
    fn lookup_partial_errors_are_kept() {
        let body = r#"{
            "data": [{"id": "1", "name": "A", "username": "a"}],
            "errors": [{"title": "Not Found Error", "detail": "Could not find user with usernames: [ghost].", "value": "ghost"}]
        }"#;
        let resp: UsersResponse = serde_json::from_str(body).unwrap();
        assert_eq!(resp.data.len(), 1);
        assert!(resp.data[0].public_metrics.is_none());
        assert_eq!(resp.errors[0].value.as_deref(), Some("ghost"));
    }
}
