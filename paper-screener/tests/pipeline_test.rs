use chrono::{Duration, Utc};
use paper_screener::llm::verdict_json;
use paper_screener::{
    types::*, Ledger, LlmProvider, MockProvider, PaperScreener, RetryPolicy, ScreeningClient, ScreeningError,
    StaticFeedSource,
};
use std::sync::Arc;
use tracing::info;

const NATURE: &str = "https://nature.example.org/rss";
const ARXIV: &str = "https://arxiv.example.org/rss";
const BROKEN: &str = "https://broken.example.org/rss";

const INTERESTS: &str = "Deep learning for genomics, especially RNA splicing.";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

fn entry(link: &str, title: &str) -> FeedEntry {
    FeedEntry::new(link, title, FeedGroup::Other)
        .with_summary(format!("Abstract of {}", title))
        .with_published_at(Some(Utc::now() - Duration::days(1)))
}

fn nature_entries() -> Vec<FeedEntry> {
    vec![
        entry("https://nature.example.org/a1", "Splicing transformer"),
        entry("https://nature.example.org/a2", "Genomics field only"),
        entry("https://nature.example.org/a3", "Unrelated ecology survey"),
    ]
}

fn arxiv_entries() -> Vec<FeedEntry> {
    vec![
        entry("https://arxiv.example.org/b1", "Preprint splicing transformer"),
        entry("https://arxiv.example.org/b2", "Preprint field only"),
    ]
}

/// Field match for anything mentioning splicing or "field only", method
/// match only for transformers.
fn judge(request: &paper_screener::ScreeningRequest) -> std::result::Result<String, ScreeningError> {
    let title = request
        .prompt
        .lines()
        .find_map(|line| line.strip_prefix("- Title: "))
        .unwrap_or_default()
        .to_lowercase();
    let field = title.contains("splicing") || title.contains("field only") || title.contains("genomics");
    let method = title.contains("transformer");
    Ok(verdict_json(field, method))
}

fn feeds() -> Vec<ConfiguredFeed> {
    vec![
        ConfiguredFeed::new(NATURE, FeedGroup::HighQuality),
        ConfiguredFeed::new(ARXIV, FeedGroup::Other),
        ConfiguredFeed::new(BROKEN, FeedGroup::Other),
    ]
}

fn source() -> Arc<StaticFeedSource> {
    Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, nature_entries())
            .with_entries(ARXIV, arxiv_entries())
            .with_failure(BROKEN, "connection refused"),
    )
}

async fn screener_with(
    ledger: Arc<Ledger>,
    provider: Arc<MockProvider>,
    source: Arc<StaticFeedSource>,
    retry: RetryPolicy,
) -> PaperScreener {
    let provider: Arc<dyn LlmProvider> = provider;
    let client = ScreeningClient::new(provider, retry);
    PaperScreener::new(ledger, Arc::new(client), source, feeds(), INTERESTS).with_concurrency(2)
}

fn digest_ids(digest: &Digest) -> Vec<EntryId> {
    let mut ids: Vec<EntryId> = digest.items().map(|item| item.entry.id.clone()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn test_group_rules_and_feed_failure() -> Result<()> {
    init_tracing();
    info!("Testing a full screening run");

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge));
    let screener = screener_with(ledger.clone(), provider.clone(), source(), RetryPolicy::immediate(0)).await;

    let report = screener.screen_new_entries(None, None).await?;

    assert_eq!(report.feeds_fetched, 2);
    assert_eq!(report.feed_failures.len(), 1);
    assert_eq!(report.feed_failures[0].url, BROKEN);
    assert_eq!(report.screened, 5);
    assert_eq!(provider.call_count(), 5);

    // High-quality feeds accept on either criterion, other feeds need both
    let titles: Vec<&str> = report.digest.items().map(|i| i.entry.title.as_str()).collect();
    assert!(titles.contains(&"Splicing transformer"));
    assert!(titles.contains(&"Genomics field only"));
    assert!(titles.contains(&"Preprint splicing transformer"));
    assert!(!titles.contains(&"Preprint field only"));
    assert!(!titles.contains(&"Unrelated ecology survey"));
    assert_eq!(report.accepted, 3);
    assert_eq!(report.rejected, 2);

    // High-quality section comes first
    assert_eq!(report.digest.sections[0].group, FeedGroup::HighQuality);
    assert_eq!(report.digest.sections[0].items.len(), 2);
    assert_eq!(report.digest.sections[1].group, FeedGroup::Other);
    assert_eq!(report.digest.new_item_count(), 3);

    let stats = ledger.stats(None).await?;
    assert_eq!(stats.total, 5);
    assert_eq!(stats.accepted, 3);
    assert_eq!(stats.degraded, 0);

    info!("Full screening run passed");
    Ok(())
}

#[tokio::test]
async fn test_second_run_is_idempotent() -> Result<()> {
    init_tracing();

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge));
    let screener = screener_with(ledger.clone(), provider.clone(), source(), RetryPolicy::immediate(0)).await;

    let first = screener.screen_new_entries(None, None).await?;
    let calls_after_first = provider.call_count();

    let second = screener.screen_new_entries(None, None).await?;

    assert_eq!(provider.call_count(), calls_after_first, "no entry is sent to the model twice");
    assert_eq!(second.screened, 0);
    assert_eq!(second.already_processed, 5);
    assert_eq!(digest_ids(&first.digest), digest_ids(&second.digest));
    // Nothing new to send on the repeat run
    assert_eq!(second.digest.new_item_count(), 0);
    assert_eq!(ledger.stats(None).await?.total, 5);

    Ok(())
}

#[tokio::test]
async fn test_new_entry_between_runs() -> Result<()> {
    init_tracing();

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge));
    let source = source();
    let screener = screener_with(ledger.clone(), provider.clone(), source.clone(), RetryPolicy::immediate(0)).await;

    screener.screen_new_entries(None, None).await?;

    let mut entries = arxiv_entries();
    entries.push(entry("https://arxiv.example.org/b3", "Genomics transformer benchmark"));
    source.set_entries(ARXIV, entries);

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(report.screened, 1);
    assert_eq!(provider.call_count(), 6);
    assert_eq!(report.digest.new_item_count(), 1);
    assert_eq!(report.digest.item_count(), 4);

    // Only the new paper goes out by mail
    let outgoing = report.digest.only_new();
    assert_eq!(outgoing.item_count(), 1);
    assert_eq!(outgoing.sections.len(), 1);
    assert_eq!(outgoing.sections[0].items[0].entry.title, "Genomics transformer benchmark");

    Ok(())
}

#[tokio::test]
async fn test_overlapping_runs_screen_each_entry_once() -> Result<()> {
    init_tracing();

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge).with_delay(50));
    let screener = screener_with(ledger.clone(), provider.clone(), source(), RetryPolicy::immediate(0)).await;

    let (first, second) = tokio::join!(
        screener.screen_new_entries(None, None),
        screener.screen_new_entries(None, None)
    );
    let (first, second) = (first?, second?);

    assert_eq!(provider.call_count(), 5);
    assert_eq!(first.screened + second.screened, 5);
    assert_eq!(first.screened + first.already_processed, 5);
    assert_eq!(second.screened + second.already_processed, 5);
    assert_eq!(ledger.stats(None).await?.total, 5);

    Ok(())
}

#[tokio::test]
async fn test_ledger_write_failure_leaves_entry_for_next_run() -> anyhow::Result<()> {
    init_tracing();

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("ledger.db");
    let ledger = Arc::new(Ledger::open(&path).await?);

    // Reads keep working, inserts fail
    let admin = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(sqlx::sqlite::SqliteConnectOptions::new().filename(&path))
        .await?;
    sqlx::query(
        "CREATE TRIGGER reject_inserts BEFORE INSERT ON processed_entries \
         BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END",
    )
    .execute(&admin)
    .await?;

    let paper = entry("https://nature.example.org/unwritable", "Splicing transformer on a full disk");
    let source = Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, vec![paper.clone()])
            .with_entries(ARXIV, vec![])
            .with_entries(BROKEN, vec![]),
    );
    let provider = Arc::new(MockProvider::from_fn(judge));
    let screener = screener_with(ledger.clone(), provider.clone(), source, RetryPolicy::immediate(0)).await;

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(provider.call_count(), 1);
    assert_eq!(report.screened, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].entry_id, paper.id);
    assert!(report.failures[0].error.contains("ledger write failed"));
    assert!(report.digest.is_empty());
    assert!(!ledger.has_processed(&paper.id).await?);

    sqlx::query("DROP TRIGGER reject_inserts").execute(&admin).await?;
    admin.close().await;

    let retry = screener.screen_new_entries(None, None).await?;
    assert_eq!(provider.call_count(), 2);
    assert_eq!(retry.screened, 1);
    assert_eq!(retry.accepted, 1);
    assert!(ledger.has_processed(&paper.id).await?);

    Ok(())
}

#[tokio::test]
async fn test_same_paper_in_two_feeds_is_screened_once() -> Result<()> {
    init_tracing();

    let shared = entry("https://doi.example.org/shared", "Shared splicing transformer");
    let source = Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, vec![shared.clone()])
            .with_entries(ARXIV, vec![shared])
            .with_entries(BROKEN, vec![]),
    );

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge));
    let screener = screener_with(ledger.clone(), provider.clone(), source, RetryPolicy::immediate(0)).await;

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(provider.call_count(), 1);
    assert_eq!(report.screened, 1);
    assert_eq!(report.digest.item_count(), 1);
    // The first feed listing it decides the group
    assert_eq!(report.digest.sections[0].group, FeedGroup::HighQuality);

    Ok(())
}

#[tokio::test]
async fn test_malformed_answer_is_degraded_and_recorded() -> Result<()> {
    init_tracing();

    let source = Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, vec![entry("https://nature.example.org/x", "Garbled answer")])
            .with_entries(ARXIV, vec![])
            .with_entries(BROKEN, vec![]),
    );
    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::new("I am not sure what you want from me."));
    let screener = screener_with(ledger.clone(), provider.clone(), source, RetryPolicy::immediate(0)).await;

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(report.screened, 1);
    assert_eq!(report.degraded, 1);
    assert_eq!(report.accepted, 0);
    assert!(report.digest.is_empty());

    let degraded = ledger.degraded_entries(None).await?;
    assert_eq!(degraded.len(), 1);
    assert_eq!(degraded[0].entry.title, "Garbled answer");
    assert_eq!(degraded[0].verdict.raw_model_output, "I am not sure what you want from me.");

    // Recorded, so it is not retried
    screener.screen_new_entries(None, None).await?;
    assert_eq!(provider.call_count(), 1);

    Ok(())
}

#[tokio::test]
async fn test_auth_failure_aborts_run() -> Result<()> {
    init_tracing();

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(|_| {
        Err(ScreeningError::Auth {
            provider: "mock".to_string(),
            message: "invalid x-api-key".to_string(),
        })
    }));
    let provider_dyn: Arc<dyn LlmProvider> = provider.clone();
    let client = ScreeningClient::new(provider_dyn, RetryPolicy::immediate(3));
    let screener = PaperScreener::new(ledger.clone(), Arc::new(client), source(), feeds(), INTERESTS).with_concurrency(1);

    let report = screener.screen_new_entries(None, None).await?;

    assert!(report.aborted.as_deref().unwrap_or_default().contains("invalid x-api-key"));
    // Fatal errors are not retried and stop the remaining entries
    assert_eq!(provider.call_count(), 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.not_attempted, 4);
    assert_eq!(report.screened, 0);
    assert_eq!(ledger.stats(None).await?.total, 0);

    Ok(())
}

#[tokio::test]
async fn test_exhausted_retries_leave_entry_unrecorded() -> Result<()> {
    init_tracing();

    let flaky = entry("https://nature.example.org/flaky", "Splicing transformer under load");
    let source = Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, vec![flaky.clone()])
            .with_entries(ARXIV, vec![])
            .with_entries(BROKEN, vec![]),
    );
    let ledger = Arc::new(Ledger::in_memory().await?);
    let rate_limited = || -> std::result::Result<String, ScreeningError> {
        Err(ScreeningError::RateLimited {
            provider: "mock".to_string(),
            retry_after: None,
        })
    };
    let provider = Arc::new(
        MockProvider::from_fn(judge).with_responses(vec![rate_limited(), rate_limited(), rate_limited()]),
    );
    let screener = screener_with(ledger.clone(), provider.clone(), source, RetryPolicy::immediate(2)).await;

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(provider.call_count(), 3);
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].error.contains("3 attempts"));
    assert!(report.aborted.is_none());
    assert!(!ledger.has_processed(&flaky.id).await?);

    // The scripted failures are used up; the next run screens it
    let retry = screener.screen_new_entries(None, None).await?;
    assert_eq!(retry.screened, 1);
    assert_eq!(retry.accepted, 1);
    assert!(ledger.has_processed(&flaky.id).await?);

    Ok(())
}

#[tokio::test]
async fn test_transient_failure_recovers_within_run() -> Result<()> {
    init_tracing();

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge).with_responses(vec![Err(ScreeningError::Api {
        provider: "mock".to_string(),
        status: 503,
        message: "overloaded".to_string(),
    })]));
    let screener = screener_with(ledger.clone(), provider.clone(), source(), RetryPolicy::immediate(2)).await;

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(report.failed, 0);
    assert_eq!(report.screened, 5);
    assert_eq!(provider.call_count(), 6);

    Ok(())
}

#[tokio::test]
async fn test_window_and_per_feed_limit() -> Result<()> {
    init_tracing();

    let old = entry("https://nature.example.org/old", "Old splicing transformer")
        .with_published_at(Some(Utc::now() - Duration::days(30)));
    let undated = entry("https://nature.example.org/undated", "Undated splicing transformer").with_published_at(None);

    let mut nature = nature_entries();
    nature.push(old);
    nature.push(undated);

    let source = Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, nature)
            .with_entries(ARXIV, arxiv_entries())
            .with_entries(BROKEN, vec![]),
    );
    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge));
    let screener = screener_with(ledger.clone(), provider.clone(), source, RetryPolicy::immediate(0)).await;

    let report = screener
        .screen_new_entries(Some(Utc::now() - Duration::days(10)), Some(2))
        .await?;

    assert_eq!(report.skipped_old, 1);
    // 4 recent-or-undated nature entries capped at 2, arxiv has exactly 2
    assert_eq!(report.skipped_limit, 2);
    assert_eq!(report.screened, 4);

    // Entries skipped by the cap are picked up next time
    let next = screener
        .screen_new_entries(Some(Utc::now() - Duration::days(10)), Some(2))
        .await?;
    assert_eq!(next.screened, 2);
    assert_eq!(ledger.stats(None).await?.total, 6);

    Ok(())
}

#[tokio::test]
async fn test_report_digest_from_ledger() -> Result<()> {
    init_tracing();

    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::from_fn(judge));
    let screener = screener_with(ledger.clone(), provider.clone(), source(), RetryPolicy::immediate(0)).await;

    let run = screener.screen_new_entries(None, None).await?;
    let report = screener.build_digest(Utc::now() - Duration::days(7)).await?;

    assert_eq!(report.item_count(), run.digest.item_count());
    assert_eq!(digest_ids(&run.digest), digest_ids(&report));
    assert_eq!(report.new_item_count(), 0);

    Ok(())
}

#[tokio::test]
async fn test_field_only_match_depends_on_group() -> Result<()> {
    init_tracing();

    let splicing = entry("https://nature.example.org/splicing", "Deep learning predicts RNA splicing");
    let survey = entry("https://arxiv.example.org/survey", "Survey of ML in healthcare");
    let source = Arc::new(
        StaticFeedSource::new()
            .with_entries(NATURE, vec![splicing.clone()])
            .with_entries(ARXIV, vec![survey.clone()])
            .with_entries(BROKEN, vec![]),
    );
    let ledger = Arc::new(Ledger::in_memory().await?);
    let provider = Arc::new(MockProvider::new(verdict_json(true, false)));
    let screener = screener_with(ledger.clone(), provider, source, RetryPolicy::immediate(0)).await;

    let report = screener.screen_new_entries(None, None).await?;
    assert_eq!(report.accepted, 1);
    assert_eq!(report.rejected, 1);

    let splicing_record = ledger.get(&splicing.id).await?.expect("recorded");
    let survey_record = ledger.get(&survey.id).await?.expect("recorded");
    assert!(splicing_record.accepted);
    assert!(!survey_record.accepted);

    Ok(())
}
