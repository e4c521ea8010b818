use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Node label carried by every crawled or sighted account.
pub const ACCOUNT_LABEL: &str = "Account";

/// Relationship type of a follow edge.
pub const FOLLOWS: &str = "FOLLOWS";

// --- Accounts ---

/// A platform profile as sighted in a following page or a username lookup.
///
/// Identity is `id`. `username` is unique on the platform but mutable, so it is
/// never used to join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub username: String,
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub followers_count: i64,
    pub following_count: i64,
    pub tweet_count: i64,
    pub is_private: bool,
    pub profile_image_url: Option<String>,
    pub location: Option<String>,
    pub verified: bool,
    pub url: Option<String>,
}

impl Account {
    /// Property map written when the account node is first created.
    ///
    /// Absent optionals are omitted rather than stored as null. Crawl state
    /// starts as *not started*; `referenceScore` starts at zero only for
    /// accounts that can carry one (`followersCount > 0`).
    pub fn creation_properties(&self) -> Map<String, Value> {
        let mut props = Map::new();
        props.insert("id".into(), Value::from(self.id.as_str()));
        props.insert("username".into(), Value::from(self.username.as_str()));
        props.insert("name".into(), Value::from(self.name.as_str()));
        if let Some(created_at) = &self.created_at {
            props.insert("createdAt".into(), Value::from(created_at.to_rfc3339()));
        }
        props.insert("followersCount".into(), Value::from(self.followers_count));
        props.insert("followingCount".into(), Value::from(self.following_count));
        props.insert("tweetCount".into(), Value::from(self.tweet_count));
        props.insert("isPrivate".into(), Value::from(self.is_private));
        if let Some(v) = &self.profile_image_url {
            props.insert("profileImageUrl".into(), Value::from(v.as_str()));
        }
        if let Some(v) = &self.location {
            props.insert("location".into(), Value::from(v.as_str()));
        }
        props.insert("verified".into(), Value::from(self.verified));
        if let Some(v) = &self.url {
            props.insert("url".into(), Value::from(v.as_str()));
        }
        if self.followers_count > 0 {
            props.insert("referenceScore".into(), Value::from(0.0));
        }
        props.insert("importedFollowing".into(), Value::from(false));
        props
    }
}

// --- Crawl state ---

/// The account handed from the Frontier Selector to the fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlUser {
    pub id: String,
    pub username: String,
    /// Empty means "start from the first page".
    pub cursor: String,
}

/// Where an account is in its following-list crawl.
///
/// Transitions only move forward: `NotStarted -> Frontier -> Complete`
/// (a single-page list goes straight to `Complete`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlState {
    NotStarted,
    Frontier { cursor: String },
    Complete,
}

impl CrawlState {
    /// Derive the state from the two stored markers.
    pub fn from_markers(pagination_cursor: Option<&str>, imported_following: bool) -> Self {
        if imported_following {
            return CrawlState::Complete;
        }
        match pagination_cursor {
            Some(c) if !c.is_empty() => CrawlState::Frontier { cursor: c.to_string() },
            _ => CrawlState::NotStarted,
        }
    }

    /// State after a page was merged with the given `next_cursor`.
    pub fn after_page(next_cursor: &str) -> Self {
        if next_cursor.is_empty() {
            CrawlState::Complete
        } else {
            CrawlState::Frontier {
                cursor: next_cursor.to_string(),
            }
        }
    }

    /// The `(paginationCursor, importedFollowing)` pair to persist.
    pub fn markers(&self) -> (&str, bool) {
        match self {
            CrawlState::NotStarted => ("", false),
            CrawlState::Frontier { cursor } => (cursor.as_str(), false),
            CrawlState::Complete => ("", true),
        }
    }
}

// --- Portable records ---

/// One line of a nodes file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// One line of an edges file. Endpoints reference node records by their
/// portable `id`, never by a store-internal handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    #[serde(rename = "type")]
    pub rel_type: String,
    #[serde(rename = "startId")]
    pub start_id: String,
    #[serde(rename = "endId")]
    pub end_id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// Which of the paired files a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Node,
    Edge,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Node => write!(f, "nodes"),
            RecordKind::Edge => write!(f, "edges"),
        }
    }
}

/// A parsed line from either file.
#[derive(Debug, Clone, PartialEq)]
pub enum PortableRecord {
    Node(NodeRecord),
    Edge(EdgeRecord),
}

impl PortableRecord {
    /// Parse and validate one line. Blank identifiers and missing fields are
    /// rejected rather than defaulted.
    pub fn parse(kind: RecordKind, line: &str) -> Result<Self, String> {
        match kind {
            RecordKind::Node => {
                let node: NodeRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;
                if node.id.trim().is_empty() {
                    return Err("node record has an empty id".into());
                }
                Ok(PortableRecord::Node(node))
            }
            RecordKind::Edge => {
                let edge: EdgeRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;
                if edge.rel_type.trim().is_empty() {
                    return Err("edge record has an empty type".into());
                }
                if edge.start_id.trim().is_empty() || edge.end_id.trim().is_empty() {
                    return Err("edge record has an empty endpoint id".into());
                }
                Ok(PortableRecord::Edge(edge))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(followers: i64) -> Account {
        Account {
            id: "42".into(),
            username: "alice".into(),
            name: "Alice".into(),
            created_at: None,
            followers_count: followers,
            following_count: 7,
            tweet_count: 3,
            is_private: false,
            profile_image_url: None,
            location: Some("Berlin".into()),
            verified: false,
            url: None,
        }
    }

    #[test]
    fn creation_properties_omit_absent_optionals() {
        let props = account(10).creation_properties();
        assert!(!props.contains_key("createdAt"));
        assert!(!props.contains_key("url"));
        assert_eq!(props["location"], "Berlin");
        assert_eq!(props["importedFollowing"], false);
        assert_eq!(props["referenceScore"], 0.0);
    }

    #[test]
    fn zero_follower_accounts_get_no_reference_score() {
        let props = account(0).creation_properties();
        assert!(!props.contains_key("referenceScore"));
    }

    #[test]
    fn crawl_state_follows_markers() {
        assert_eq!(CrawlState::from_markers(None, false), CrawlState::NotStarted);
        assert_eq!(CrawlState::from_markers(Some(""), false), CrawlState::NotStarted);
        assert_eq!(
            CrawlState::from_markers(Some("abc"), false),
            CrawlState::Frontier { cursor: "abc".into() }
        );
        assert_eq!(CrawlState::from_markers(Some("abc"), true), CrawlState::Complete);
    }

    #[test]
    fn last_page_completes_and_clears_cursor() {
        let state = CrawlState::after_page("");
        assert_eq!(state, CrawlState::Complete);
        assert_eq!(state.markers(), ("", true));
        assert_eq!(CrawlState::after_page("next").markers(), ("next", false));
    }

    #[test]
    fn node_line_parses_with_portable_field_names() {
        let line = r#"{"id":"1","labels":["Account"],"properties":{"username":"a","followersCount":5}}"#;
        let PortableRecord::Node(node) = PortableRecord::parse(RecordKind::Node, line).unwrap() else {
            panic!("expected node");
        };
        assert_eq!(node.labels, vec!["Account"]);
        assert_eq!(node.properties["followersCount"], 5);
    }

    #[test]
    fn edge_line_uses_camel_case_endpoints() {
        let line = r#"{"type":"FOLLOWS","startId":"1","endId":"2","properties":{}}"#;
        let PortableRecord::Edge(edge) = PortableRecord::parse(RecordKind::Edge, line).unwrap() else {
            panic!("expected edge");
        };
        assert_eq!(edge.start_id, "1");
        assert_eq!(edge.end_id, "2");
        assert_eq!(
            serde_json::to_string(&edge).unwrap(),
            r#"{"type":"FOLLOWS","startId":"1","endId":"2","properties":{}}"#
        );
    }

    #[test]
    fn malformed_lines_are_rejected_not_defaulted() {
        assert!(PortableRecord::parse(RecordKind::Node, "not json").is_err());
        assert!(PortableRecord::parse(RecordKind::Node, r#"{"labels":["Account"]}"#).is_err());
        assert!(PortableRecord::parse(RecordKind::Node, r#"{"id":"  "}"#).is_err());
        assert!(PortableRecord::parse(RecordKind::Node, r#"{"id":17}"#).is_err());
        assert!(PortableRecord::parse(RecordKind::Edge, r#"{"type":"FOLLOWS","startId":"1"}"#).is_err());
        assert!(PortableRecord::parse(RecordKind::Edge, r#"{"type":"","startId":"1","endId":"2"}"#).is_err());
    }
}
