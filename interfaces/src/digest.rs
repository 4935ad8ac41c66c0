use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::defs::{FeedEntry, FeedGroup, ScreeningVerdict};

/// Report payload handed to a `DigestDelivery`. Rendering is the receiver's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Digest {
    pub generated_at: DateTime<Utc>,
    pub period_from: Option<DateTime<Utc>>,
    pub period_to: Option<DateTime<Utc>>,
    pub sections: Vec<DigestSection>,
    pub stats: DigestStats,
}

impl Digest {
    pub fn item_count(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.item_count() == 0
    }

    pub fn new_item_count(&self) -> usize {
        self.items().filter(|item| item.newly_screened).count()
    }

    pub fn items(&self) -> impl Iterator<Item = &DigestItem> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    /// Copy holding only the items screened by the producing run, i.e. what
    /// has not been sent before. Sections left empty are dropped.
    pub fn only_new(&self) -> Digest {
        let sections: Vec<DigestSection> = self
            .sections
            .iter()
            .map(|section| DigestSection {
                group: section.group,
                items: section.items.iter().filter(|item| item.newly_screened).cloned().collect(),
            })
            .filter(|section| !section.items.is_empty())
            .collect();
        let accepted = sections.iter().map(|s| s.items.len()).sum();

        Digest {
            generated_at: self.generated_at,
            period_from: self.period_from,
            period_to: self.period_to,
            sections,
            stats: DigestStats {
                accepted,
                ..self.stats.clone()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestSection {
    pub group: FeedGroup,
    pub items: Vec<DigestItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigestItem {
    pub entry: FeedEntry,
    pub verdict: ScreeningVerdict,
    /// Screened during the run that produced this digest.
    pub newly_screened: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestStats {
    pub feeds: usize,
    pub screened: usize,
    pub accepted: usize,
}
