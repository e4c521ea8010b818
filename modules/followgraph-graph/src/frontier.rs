//! Frontier selection policy, evaluated in memory. The Neo4j store expresses
//! the same policy in Cypher.

use followgraph_common::{CrawlState, CrawlUser};

/// The slice of an account the selector looks at.
#[derive(Debug, Clone)]
pub struct CandidateView<'a> {
    pub id: &'a str,
    pub username: &'a str,
    pub state: CrawlState,
    pub is_private: bool,
    pub followers_count: i64,
    pub reference_score: Option<f64>,
}

/// Whether a not-started account may ever be picked under `min_followers`.
/// Zero-follower accounts carry no score and never qualify, whatever the
/// threshold.
pub fn is_eligible(is_private: bool, followers_count: i64, min_followers: i64) -> bool {
    !is_private && followers_count > 0 && followers_count > min_followers
}

/// Pick the next account to crawl.
///
/// 1. Any frontier account wins. Which one, if several, is unspecified.
/// 2. Otherwise the highest `reference_score` among not-started, public
///    accounts with `followers_count > max(min_followers, 0)`.
pub fn pick_candidate<'a>(
    accounts: impl IntoIterator<Item = CandidateView<'a>>,
    min_followers: i64,
) -> Option<CrawlUser> {
    let mut best: Option<(f64, CandidateView<'a>)> = None;

    for view in accounts {
        match &view.state {
            CrawlState::Frontier { cursor } => {
                return Some(CrawlUser {
                    id: view.id.to_string(),
                    username: view.username.to_string(),
                    cursor: cursor.clone(),
                });
            }
            CrawlState::Complete => continue,
            CrawlState::NotStarted => {}
        }

        if !is_eligible(view.is_private, view.followers_count, min_followers) {
            continue;
        }

        let score = view.reference_score.unwrap_or(0.0);
        if best.as_ref().map_or(true, |(s, _)| score > *s) {
            best = Some((score, view));
        }
    }

    best.map(|(_, view)| CrawlUser {
        id: view.id.to_string(),
        username: view.username.to_string(),
        cursor: String::new(),
    })
}
