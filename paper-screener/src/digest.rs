use crate::ledger::{Ledger, StoredScreening};
use crate::types::{Digest, DigestItem, DigestSection, DigestStats, FeedGroup, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tracing::info;

/// Groups accepted entries into an ordered digest.
pub struct DigestAssembler;

impl DigestAssembler {
    /// High-quality section first; inside a section newest first, undated
    /// entries last, ties broken by title. Empty sections are omitted.
    pub fn assemble(
        items: Vec<DigestItem>,
        period_from: Option<DateTime<Utc>>,
        period_to: Option<DateTime<Utc>>,
        stats: DigestStats,
    ) -> Digest {
        let mut sections = Vec::new();

        for group in FeedGroup::ALL {
            let mut group_items: Vec<DigestItem> = items.iter().filter(|i| i.entry.group == group).cloned().collect();
            if group_items.is_empty() {
                continue;
            }
            group_items.sort_by(compare_items);
            sections.push(DigestSection {
                group,
                items: group_items,
            });
        }

        Digest {
            generated_at: Utc::now(),
            period_from,
            period_to,
            sections,
            stats,
        }
    }

    pub fn item_from_stored(stored: StoredScreening) -> DigestItem {
        DigestItem {
            entry: stored.entry,
            verdict: stored.verdict,
            newly_screened: false,
        }
    }
}

fn compare_items(a: &DigestItem, b: &DigestItem) -> Ordering {
    let by_date = match (a.entry.published_at, b.entry.published_at) {
        (Some(x), Some(y)) => y.cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_date
        .then_with(|| a.entry.title.cmp(&b.entry.title))
        .then_with(|| a.entry.id.cmp(&b.entry.id))
}

/// Digest of everything accepted in the ledger since `since`.
pub async fn build_digest(ledger: &Ledger, since: DateTime<Utc>) -> Result<Digest> {
    let stored = ledger.accepted_since(since).await?;
    let stats = ledger.stats(Some(since)).await?;

    let items: Vec<DigestItem> = stored.into_iter().map(DigestAssembler::item_from_stored).collect();
    info!("Building digest with {} accepted entries since {}", items.len(), since);

    Ok(DigestAssembler::assemble(
        items,
        Some(since),
        Some(Utc::now()),
        DigestStats {
            feeds: stats.feeds as usize,
            screened: stats.total as usize,
            accepted: stats.accepted as usize,
        },
    ))
}
