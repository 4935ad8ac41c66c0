use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Namespace for deriving entry ids. Changing it invalidates every ledger.
const ENTRY_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93b7_5d08_a1e4_7c2f_0b9d_3e61);

/// Feed classification deciding which combination rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedGroup {
    HighQuality,
    Other,
}

impl FeedGroup {
    pub const ALL: [FeedGroup; 2] = [FeedGroup::HighQuality, FeedGroup::Other];

    /// Map a free-form group header (e.g. `# High Quality Journals`) to a group.
    pub fn from_header(header: &str) -> Self {
        let lower = header.to_lowercase();
        if lower.contains("high") || lower.contains("quality") {
            FeedGroup::HighQuality
        } else {
            FeedGroup::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeedGroup::HighQuality => "high_quality",
            FeedGroup::Other => "other",
        }
    }
}

impl fmt::Display for FeedGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high_quality" => Ok(FeedGroup::HighQuality),
            "other" => Ok(FeedGroup::Other),
            _ => Err(format!("unknown feed group: {}", s)),
        }
    }
}

/// Stable identity of a feed entry, used as the ledger key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(String);

impl EntryId {
    /// Derive the id from the entry link and title.
    ///
    /// The link is trimmed and the title whitespace-normalized, so cosmetic
    /// differences between fetches of the same item do not produce new ids.
    pub fn derive(link: &str, title: &str) -> Self {
        let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
        let key = format!("{}\n{}", link.trim(), title);
        EntryId(Uuid::new_v5(&ENTRY_NAMESPACE, key.as_bytes()).to_string())
    }

    /// Wrap an id read back from storage.
    pub fn from_stored(id: String) -> Self {
        EntryId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One candidate paper discovered in a monitored feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEntry {
    pub id: EntryId,
    pub title: String,
    pub summary_raw: String,
    pub link: String,
    pub published_at: Option<DateTime<Utc>>,
    pub group: FeedGroup,
    pub feed_url: String,
    pub source: String,
    pub authors: String,
}

impl FeedEntry {
    pub fn new(link: impl Into<String>, title: impl Into<String>, group: FeedGroup) -> Self {
        let link = link.into();
        let title = title.into();
        Self {
            id: EntryId::derive(&link, &title),
            title,
            summary_raw: String::new(),
            link,
            published_at: None,
            group,
            feed_url: String::new(),
            source: String::new(),
            authors: String::new(),
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary_raw = summary.into();
        self
    }

    pub fn with_published_at(mut self, published_at: Option<DateTime<Utc>>) -> Self {
        self.published_at = published_at;
        self
    }

    pub fn with_feed(mut self, feed_url: impl Into<String>, source: impl Into<String>) -> Self {
        self.feed_url = feed_url.into();
        self.source = source.into();
        self
    }

    pub fn with_authors(mut self, authors: impl Into<String>) -> Self {
        self.authors = authors.into();
        self
    }

    /// True when the feed carried only a title.
    pub fn is_title_only(&self) -> bool {
        self.summary_raw.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Liked,
    Disliked,
}

/// A liked or disliked reference paper used as few-shot guidance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningExample {
    pub title: String,
    pub reason: String,
    pub abstract_text: Option<String>,
    pub polarity: Polarity,
}

/// One LLM-produced relevance judgment. `matched == None` means the model
/// answer could not be read for this dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Judgment {
    pub matched: Option<bool>,
    pub justification: Option<String>,
}

impl Judgment {
    pub fn new(matched: bool, justification: impl Into<String>) -> Self {
        Self {
            matched: Some(matched),
            justification: Some(justification.into()),
        }
    }

    pub fn missing() -> Self {
        Self::default()
    }

    pub fn is_missing(&self) -> bool {
        self.matched.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriteriaResult {
    pub field_match: Judgment,
    pub method_match: Judgment,
}

/// Structured summary of a paper. Absent fields were not extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub problem: Option<String>,
    pub method: Option<String>,
    pub data: Option<String>,
    pub highlights: Option<String>,
}

impl PaperSummary {
    pub fn is_empty(&self) -> bool {
        self.problem.is_none() && self.method.is_none() && self.data.is_none() && self.highlights.is_none()
    }

    /// Single-line rendering, e.g. `Problem: x | Method: y`.
    pub fn one_line(&self) -> String {
        [
            ("Problem", &self.problem),
            ("Method", &self.method),
            ("Data", &self.data),
            ("Highlights", &self.highlights),
        ]
        .iter()
        .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
        .collect::<Vec<_>>()
        .join(" | ")
    }
}

/// Outcome of screening one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningVerdict {
    pub accepted: bool,
    /// At least one judgment was missing; worth re-screening.
    pub degraded: bool,
    pub criteria: CriteriaResult,
    pub summary: PaperSummary,
    pub raw_model_output: String,
}

/// Persisted bookkeeping row for a screened entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub entry_id: EntryId,
    pub processed_at: DateTime<Utc>,
    pub accepted: bool,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfiguredFeed {
    pub url: String,
    pub group: FeedGroup,
}

impl ConfiguredFeed {
    pub fn new(url: impl Into<String>, group: FeedGroup) -> Self {
        Self { url: url.into(), group }
    }
}
