use crate::types::{ConfiguredFeed, FeedEntry, FeedSource, FetchConfig, Result};
use crate::{FeedParser, Fetcher};
use async_trait::async_trait;
use tracing::warn;

/// Feed source that downloads and parses RSS/Atom documents over HTTP.
pub struct HttpFeedSource {
    fetcher: Fetcher,
}

impl HttpFeedSource {
    pub fn new(fetch_config: FetchConfig) -> Result<Self> {
        Ok(Self {
            fetcher: Fetcher::new(fetch_config)?,
        })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, feed: &ConfiguredFeed) -> anyhow::Result<Vec<FeedEntry>> {
        let content = self.fetcher.fetch_feed(&feed.url).await?;
        if !FeedParser::is_valid_feed_content(&content) {
            warn!("{} does not look like RSS or Atom, parsing anyway", feed.url);
        }
        Ok(FeedParser::parse(&content, feed)?)
    }
}
