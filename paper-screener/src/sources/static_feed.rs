use crate::types::{ConfiguredFeed, FeedEntry, FeedSource};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory feed source keyed by URL. Unknown URLs and URLs registered
/// with `with_failure` fail to fetch.
#[derive(Default)]
pub struct StaticFeedSource {
    feeds: Mutex<HashMap<String, Result<Vec<FeedEntry>, String>>>,
}

impl StaticFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(self, url: impl Into<String>, entries: Vec<FeedEntry>) -> Self {
        self.set(url.into(), Ok(entries));
        self
    }

    pub fn with_failure(self, url: impl Into<String>, error: impl Into<String>) -> Self {
        self.set(url.into(), Err(error.into()));
        self
    }

    /// Replace the entries served for `url`.
    pub fn set_entries(&self, url: impl Into<String>, entries: Vec<FeedEntry>) {
        self.set(url.into(), Ok(entries));
    }

    fn set(&self, url: String, value: Result<Vec<FeedEntry>, String>) {
        self.feeds
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(url, value);
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self, feed: &ConfiguredFeed) -> anyhow::Result<Vec<FeedEntry>> {
        let feeds = self.feeds.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match feeds.get(&feed.url) {
            Some(Ok(entries)) => Ok(entries
                .iter()
                .cloned()
                .map(|mut entry| {
                    entry.group = feed.group;
                    entry.feed_url = feed.url.clone();
                    entry
                })
                .collect()),
            Some(Err(error)) => Err(anyhow::anyhow!("{}", error)),
            None => Err(anyhow::anyhow!("unknown feed: {}", feed.url)),
        }
    }
}
