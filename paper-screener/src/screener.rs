use crate::config::ScreenerConfig;
use crate::digest::{self, DigestAssembler};
use crate::examples::ExampleStore;
use crate::ledger::{Ledger, LedgerStats, StoredScreening};
use crate::llm::{self, RetryPolicy, ScreeningClient};
use crate::profile;
use crate::prompt::PromptBuilder;
use crate::sources::HttpFeedSource;
use crate::types::{
    ConfiguredFeed, Digest, DigestItem, DigestStats, EntryId, FeedEntry, FeedSource, Result, ScreenerError,
    ScreeningExample, ScreeningVerdict,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedFailure {
    pub url: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub entry_id: EntryId,
    pub title: String,
    pub error: String,
}

/// Outcome of one `screen_new_entries` run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub feeds_fetched: usize,
    pub screened: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub degraded: usize,
    pub failed: usize,
    /// Entries left unscreened because the run was aborted.
    pub not_attempted: usize,
    pub skipped_old: usize,
    pub skipped_limit: usize,
    pub already_processed: usize,
    pub feed_failures: Vec<FeedFailure>,
    pub failures: Vec<EntryFailure>,
    /// Accepted entries of the current feed snapshot, new and previously
    /// recorded.
    pub digest: Digest,
    /// Reason the run stopped sending entries to the model.
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn summary_line(&self) -> String {
        format!(
            "screened {}, accepted {}, rejected {}, failed {} (degraded {}, already processed {}, skipped {}, feed failures {})",
            self.screened,
            self.accepted,
            self.rejected,
            self.failed,
            self.degraded,
            self.already_processed,
            self.skipped_old + self.skipped_limit + self.not_attempted,
            self.feed_failures.len()
        )
    }
}

enum EntryOutcome {
    Screened { entry: FeedEntry, verdict: ScreeningVerdict },
    Failed(EntryFailure),
    AlreadyProcessed,
    NotAttempted,
}

/// Removes an id from the in-flight set when the screening task ends.
struct InFlightGuard<'a> {
    in_flight: &'a Mutex<HashSet<EntryId>>,
    id: EntryId,
}

impl<'a> InFlightGuard<'a> {
    fn claim(in_flight: &'a Mutex<HashSet<EntryId>>, id: &EntryId) -> Option<Self> {
        let mut set = in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        set.insert(id.clone()).then(|| Self {
            in_flight,
            id: id.clone(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

/// The screening pipeline: fetch, dedup against the ledger, screen with
/// bounded concurrency, record, and assemble the digest.
pub struct PaperScreener {
    ledger: Arc<Ledger>,
    client: Arc<ScreeningClient>,
    source: Arc<dyn FeedSource>,
    feeds: Vec<ConfiguredFeed>,
    interests: String,
    liked: Vec<ScreeningExample>,
    disliked: Vec<ScreeningExample>,
    prompt_builder: PromptBuilder,
    concurrency: usize,
    /// Entries a task is screening right now, shared by overlapping runs.
    in_flight: Mutex<HashSet<EntryId>>,
}

impl PaperScreener {
    pub fn new(
        ledger: Arc<Ledger>,
        client: Arc<ScreeningClient>,
        source: Arc<dyn FeedSource>,
        feeds: Vec<ConfiguredFeed>,
        interests: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            client,
            source,
            feeds,
            interests: interests.into(),
            liked: Vec::new(),
            disliked: Vec::new(),
            prompt_builder: PromptBuilder::default(),
            concurrency: 4,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_examples(mut self, liked: Vec<ScreeningExample>, disliked: Vec<ScreeningExample>) -> Self {
        self.liked = liked;
        self.disliked = disliked;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_prompt_builder(mut self, prompt_builder: PromptBuilder) -> Self {
        self.prompt_builder = prompt_builder;
        self
    }

    /// Wire up the pipeline from configuration. Fails before anything is
    /// screened if the provider key is unusable or no feeds are configured.
    pub async fn from_config(config: &ScreenerConfig) -> Result<Self> {
        config.preflight()?;

        let feeds = config.configured_feeds()?;
        if feeds.is_empty() {
            return Err(ScreenerError::InvalidConfig(format!(
                "no feeds configured; add URLs to {} or the feeds section",
                config.feed_list_path().display()
            )));
        }

        let interests = profile::load_interests(&config.interests_path())?;
        let (liked, disliked) = ExampleStore::new(config.examples_path()).load()?;

        let provider = llm::create_provider(&config.llm, &config.api_keys)?;
        let client = ScreeningClient::new(provider, RetryPolicy::from_config(&config.llm));
        let ledger = Ledger::open(&config.database_path()).await?;
        let source = HttpFeedSource::new(config.fetch.clone())?;

        info!(
            "Screening {} feeds with {} liked and {} disliked examples",
            feeds.len(),
            liked.len(),
            disliked.len()
        );

        Ok(Self::new(Arc::new(ledger), Arc::new(client), Arc::new(source), feeds, interests)
            .with_examples(liked, disliked)
            .with_concurrency(config.llm.concurrency)
            .with_prompt_builder(PromptBuilder::new(config.llm.max_tokens)))
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn list_configured_feeds(&self) -> &[ConfiguredFeed] {
        &self.feeds
    }

    /// Screen every entry not yet in the ledger. `since` drops entries
    /// published earlier (undated entries are kept); `limit_per_feed` caps
    /// new entries per feed, `None` or `Some(0)` meaning no cap.
    pub async fn screen_new_entries(
        &self,
        since: Option<DateTime<Utc>>,
        limit_per_feed: Option<usize>,
    ) -> Result<RunReport> {
        let started_at = Utc::now();
        let limit = limit_per_feed.filter(|l| *l > 0);

        let mut feeds_fetched = 0;
        let mut skipped_old = 0;
        let mut skipped_limit = 0;
        let mut already_processed = 0;
        let mut feed_failures = Vec::new();
        let mut failures = Vec::new();
        let mut digest_items: Vec<DigestItem> = Vec::new();
        let mut candidates: Vec<FeedEntry> = Vec::new();
        let mut seen: HashSet<EntryId> = HashSet::new();

        info!("Fetching {} feeds", self.feeds.len());

        for feed in &self.feeds {
            let entries = match self.source.fetch(feed).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to fetch feed {}: {}", feed.url, e);
                    feed_failures.push(FeedFailure {
                        url: feed.url.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            feeds_fetched += 1;
            debug!("{} entries from {}", entries.len(), feed.url);

            let mut taken = 0;
            for entry in entries {
                // Same paper listed by two feeds
                if !seen.insert(entry.id.clone()) {
                    continue;
                }

                if let (Some(since), Some(published)) = (since, entry.published_at) {
                    if published < since {
                        skipped_old += 1;
                        continue;
                    }
                }

                match self.ledger.lookup(&entry.id).await {
                    Ok(Some(stored)) => {
                        already_processed += 1;
                        if stored.record.accepted {
                            digest_items.push(DigestAssembler::item_from_stored(stored));
                        }
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Ledger lookup failed for {}: {}", entry.id, e);
                        failures.push(EntryFailure {
                            entry_id: entry.id.clone(),
                            title: entry.title.clone(),
                            error: format!("ledger lookup failed: {}", e),
                        });
                        continue;
                    }
                }

                if limit.is_some_and(|limit| taken >= limit) {
                    skipped_limit += 1;
                    continue;
                }
                taken += 1;
                candidates.push(entry);
            }
        }

        info!(
            "{} new entries to screen ({} already processed, {} older than the window)",
            candidates.len(),
            already_processed,
            skipped_old
        );

        let abort: Mutex<Option<String>> = Mutex::new(None);

        let outcomes: Vec<EntryOutcome> = stream::iter(candidates)
            .map(|entry| self.screen_one(entry, &abort))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut screened = 0;
        let mut accepted = 0;
        let mut rejected = 0;
        let mut degraded = 0;
        let mut not_attempted = 0;

        for outcome in outcomes {
            match outcome {
                EntryOutcome::Screened { entry, verdict } => {
                    screened += 1;
                    if verdict.degraded {
                        degraded += 1;
                    }
                    if verdict.accepted {
                        accepted += 1;
                        digest_items.push(DigestItem {
                            entry,
                            verdict,
                            newly_screened: true,
                        });
                    } else {
                        rejected += 1;
                    }
                }
                EntryOutcome::Failed(failure) => failures.push(failure),
                EntryOutcome::AlreadyProcessed => already_processed += 1,
                EntryOutcome::NotAttempted => not_attempted += 1,
            }
        }
        failures.sort_by(|a, b| a.title.cmp(&b.title));

        let aborted = abort.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(reason) = &aborted {
            error!("Run aborted: {}; {} entries were not screened", reason, not_attempted);
        }

        let stats = DigestStats {
            feeds: feeds_fetched,
            screened: screened + already_processed,
            accepted: digest_items.len(),
        };
        let digest = DigestAssembler::assemble(digest_items, since, Some(started_at), stats);

        let report = RunReport {
            started_at,
            feeds_fetched,
            screened,
            accepted,
            rejected,
            degraded,
            failed: failures.len(),
            not_attempted,
            skipped_old,
            skipped_limit,
            already_processed,
            feed_failures,
            failures,
            digest,
            aborted,
        };
        info!("Run finished: {}", report.summary_line());
        Ok(report)
    }

    async fn screen_one(&self, entry: FeedEntry, abort: &Mutex<Option<String>>) -> EntryOutcome {
        if is_aborted(abort) {
            return EntryOutcome::NotAttempted;
        }

        // Another run is screening it; that run records the verdict
        let Some(_guard) = InFlightGuard::claim(&self.in_flight, &entry.id) else {
            return EntryOutcome::AlreadyProcessed;
        };

        match self.ledger.has_processed(&entry.id).await {
            Ok(true) => return EntryOutcome::AlreadyProcessed,
            Ok(false) => {}
            Err(e) => return EntryOutcome::Failed(failure(&entry, format!("ledger check failed: {}", e))),
        }

        let request = self
            .prompt_builder
            .build(&self.interests, &self.liked, &self.disliked, &entry);

        let verdict = match self.client.screen(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                if e.is_fatal() {
                    let mut reason = abort.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if reason.is_none() {
                        *reason = Some(e.to_string());
                    }
                }
                error!("Screening failed for {}: {}", entry.title, e);
                return EntryOutcome::Failed(failure(&entry, e.to_string()));
            }
        };

        if let Err(e) = self.ledger.record(&entry, &verdict, Utc::now()).await {
            error!("Failed to record {}: {}", entry.id, e);
            return EntryOutcome::Failed(failure(&entry, format!("ledger write failed: {}", e)));
        }

        info!(
            "[{}] F:{} M:{} {}{}",
            if verdict.accepted { "KEEP" } else { "SKIP" },
            judgment_flag(verdict.criteria.field_match.matched),
            judgment_flag(verdict.criteria.method_match.matched),
            entry.title,
            if verdict.degraded { " (degraded)" } else { "" }
        );

        EntryOutcome::Screened { entry, verdict }
    }

    pub async fn build_digest(&self, since: DateTime<Utc>) -> Result<Digest> {
        digest::build_digest(&self.ledger, since).await
    }

    pub async fn ledger_stats(&self, since: Option<DateTime<Utc>>) -> Result<LedgerStats> {
        Ok(self.ledger.stats(since).await?)
    }

    pub async fn degraded_entries(&self, since: Option<DateTime<Utc>>) -> Result<Vec<StoredScreening>> {
        Ok(self.ledger.degraded_entries(since).await?)
    }
}

fn is_aborted(abort: &Mutex<Option<String>>) -> bool {
    abort
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .is_some()
}

fn failure(entry: &FeedEntry, error: String) -> EntryFailure {
    EntryFailure {
        entry_id: entry.id.clone(),
        title: entry.title.clone(),
        error,
    }
}

fn judgment_flag(matched: Option<bool>) -> &'static str {
    match matched {
        Some(true) => "Y",
        Some(false) => "N",
        None => "?",
    }
}
