pub mod crawler;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use crawler::{
    CrawlConfig, CrawlObserver, CrawlOutcome, CrawlReport, CrawlStats, Crawler, IdlePolicy, SeedReport,
    TracingCrawlObserver,
};
pub use traits::{account_from_user, FetchedPage, FollowFetcher, TransientFetchError};
