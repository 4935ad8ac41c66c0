//! The user's screening profile on disk: the feed list and the interests
//! text. Exemplars live in `examples`.

use crate::types::{ConfiguredFeed, FeedGroup, Result, ScreenerError};
use crate::utils::links::is_valid_feed_url;
use std::path::Path;
use tracing::{info, warn};

/// Parse `rss_list.md`:
///
/// ```text
/// # High Quality
/// - https://www.nature.com/nature.rss
///
/// # Preprints
/// - https://www.biorxiv.org/rss
/// ```
///
/// URLs before any header belong to `other`. Duplicates keep their first
/// group.
pub fn parse_feed_list(content: &str) -> Vec<ConfiguredFeed> {
    let mut feeds: Vec<ConfiguredFeed> = Vec::new();
    let mut group = FeedGroup::Other;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(header) = line.strip_prefix('#') {
            group = FeedGroup::from_header(header.trim_start_matches('#'));
            continue;
        }

        let candidate = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line)
            .trim();
        if !candidate.starts_with("http") {
            continue;
        }
        if !is_valid_feed_url(candidate) {
            warn!("Skipping invalid feed URL: {}", candidate);
            continue;
        }
        if feeds.iter().any(|f| f.url == candidate) {
            continue;
        }
        feeds.push(ConfiguredFeed::new(candidate, group));
    }

    feeds
}

pub fn load_feed_list(path: &Path) -> Result<Vec<ConfiguredFeed>> {
    let content = std::fs::read_to_string(path)?;
    let feeds = parse_feed_list(&content);
    info!("Loaded {} feeds from {}", feeds.len(), path.display());
    Ok(feeds)
}

/// Read the free-text research interests. An empty file is an error since
/// every verdict would be meaningless.
pub fn load_interests(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ScreenerError::InvalidConfig(format!("cannot read interests file {}: {}", path.display(), e))
    })?;
    let interests = content.trim().to_string();
    if interests.is_empty() {
        return Err(ScreenerError::InvalidConfig(format!(
            "interests file {} is empty",
            path.display()
        )));
    }
    Ok(interests)
}
