//! Reference score: how strongly the already-discovered part of the graph
//! points at an account, relative to the account's own audience.
//!
//! `score(a) = Σ 1 / followersCount(a)` over inbound follow edges, where the
//! follower count is the one stored when each edge was created. Accounts with
//! zero followers have no score and never become crawl candidates.

/// Score increment for one newly created inbound follow edge.
/// `None` for accounts with no followers.
pub fn reference_increment(followers_count: i64) -> Option<f64> {
    if followers_count > 0 {
        Some(1.0 / followers_count as f64)
    } else {
        None
    }
}

/// Score from an aggregate count of inbound edges, used by the one-shot
/// recompute at crawl startup.
pub fn initial_score(inbound_edges: u64, followers_count: i64) -> Option<f64> {
    if followers_count > 0 {
        Some(inbound_edges as f64 / followers_count as f64)
    } else {
        None
    }
}
