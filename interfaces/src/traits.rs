use anyhow::Result;
use async_trait::async_trait;

use crate::defs::{ConfiguredFeed, FeedEntry};
use crate::digest::Digest;

/// Capability that turns a configured feed into normalized entries.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current entries of one feed. An error only affects this feed.
    async fn fetch(&self, feed: &ConfiguredFeed) -> Result<Vec<FeedEntry>>;
}

/// Capability that renders and delivers a digest (email, stdout, ...).
#[async_trait]
pub trait DigestDelivery: Send + Sync {
    async fn deliver(&self, digest: &Digest) -> Result<()>;
}
