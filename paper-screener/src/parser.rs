use crate::types::{ConfiguredFeed, FeedEntry, Result, ScreenerError};
use crate::utils::text::strip_html;
use chrono::Utc;
use feed_rs::parser;
use std::collections::HashSet;
use tracing::{debug, info};

/// Converts RSS/Atom documents into `FeedEntry` values.
pub struct FeedParser;

impl FeedParser {
    /// Parse `content` fetched from `feed`. Entries repeated inside the
    /// document are dropped.
    pub fn parse(content: &str, feed: &ConfiguredFeed) -> Result<Vec<FeedEntry>> {
        debug!("Parsing feed content ({} bytes) from {}", content.len(), feed.url);

        let parsed = parser::parse(content.as_bytes())
            .map_err(|e| ScreenerError::Parse(format!("Failed to parse feed {}: {}", feed.url, e)))?;

        let source = parsed
            .title
            .map(|t| strip_html(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| feed.url.clone());

        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for entry in parsed.entries {
            let converted = Self::convert_entry(entry, feed, &source);
            if !seen.insert(converted.id.clone()) {
                debug!("Skipping duplicate entry: {}", converted.title);
                continue;
            }
            entries.push(converted);
        }

        info!("Parsed {} entries from {}", entries.len(), source);
        Ok(entries)
    }

    fn convert_entry(entry: feed_rs::model::Entry, feed: &ConfiguredFeed, source: &str) -> FeedEntry {
        let title = entry
            .title
            .map(|t| strip_html(&t.content))
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| "No Title".to_string());

        // Some feeds only carry the link in the entry id
        let link = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .unwrap_or_else(|| entry.id.clone());

        let summary = entry
            .summary
            .map(|s| s.content)
            .filter(|s| !s.trim().is_empty())
            .or_else(|| entry.content.and_then(|c| c.body))
            .map(|s| strip_html(&s))
            .unwrap_or_default();

        let authors = entry
            .authors
            .iter()
            .map(|a| a.name.trim())
            .filter(|name| !name.is_empty())
            .collect::<Vec<_>>()
            .join(", ");

        let published_at = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.with_timezone(&Utc));

        FeedEntry::new(link, title, feed.group)
            .with_summary(summary)
            .with_published_at(published_at)
            .with_feed(feed.url.clone(), source)
            .with_authors(authors)
    }

    /// Cheap sniff for RSS/Atom markup before handing content to feed-rs.
    pub fn is_valid_feed_content(content: &str) -> bool {
        let content_lower = content.to_lowercase();
        content_lower.contains("<rss")
            || content_lower.contains("<feed")
            || content_lower.contains("<rdf:rdf")
            || content_lower.contains("<channel")
    }
}
