use crate::types::{
    CriteriaResult, EntryId, FeedEntry, FeedGroup, Judgment, LedgerRecord, PaperSummary, ScreeningVerdict,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Ledger IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt ledger row for {entry_id}: {reason}")]
    Corrupt { entry_id: String, reason: String },
}

/// A ledger row rebuilt into the entry and verdict it was recorded from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredScreening {
    pub record: LedgerRecord,
    pub entry: FeedEntry,
    pub verdict: ScreeningVerdict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: i64,
    pub accepted: i64,
    pub rejected: i64,
    pub degraded: i64,
    pub feeds: i64,
    pub first_processed: Option<DateTime<Utc>>,
    pub last_processed: Option<DateTime<Utc>>,
}

/// Durable record of screened entries, backed by SQLite.
///
/// The pool holds a single connection, so every ledger call is serialized
/// and there is exactly one writer.
pub struct Ledger {
    pool: SqlitePool,
}

const SELECT_COLUMNS: &str = "entry_id, processed_at, accepted, degraded, feed_url, feed_group, title, link, \
     source, authors, summary_raw, published_at, field_match, field_reason, method_match, method_reason, \
     problem, method, data, highlights, raw_model_output";

impl Ledger {
    /// Open (or create) the ledger file at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let ledger = Self::connect(options).await?;
        info!("Opened ledger at {}", path.display());
        Ok(ledger)
    }

    /// Ledger that lives only as long as this value. Used by tests and dry demos.
    pub async fn in_memory() -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, LedgerError> {
        // Never recycle the connection: an in-memory database dies with it
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        MIGRATOR.run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn has_processed(&self, entry_id: &EntryId) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM processed_entries WHERE entry_id = ?1")
            .bind(entry_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Record the verdict for `entry`. Returns `true` when a new row was
    /// written; a second record for the same id is a no-op and keeps the
    /// first verdict.
    pub async fn record(
        &self,
        entry: &FeedEntry,
        verdict: &ScreeningVerdict,
        processed_at: DateTime<Utc>,
    ) -> Result<bool, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO processed_entries (
                entry_id, processed_at, accepted, degraded, feed_url, feed_group, title, link,
                source, authors, summary_raw, published_at, field_match, field_reason,
                method_match, method_reason, problem, method, data, highlights, raw_model_output
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)
            ON CONFLICT(entry_id) DO NOTHING
            "#,
        )
        .bind(entry.id.as_str())
        .bind(processed_at)
        .bind(verdict.accepted)
        .bind(verdict.degraded)
        .bind(&entry.feed_url)
        .bind(entry.group.as_str())
        .bind(&entry.title)
        .bind(&entry.link)
        .bind(&entry.source)
        .bind(&entry.authors)
        .bind(&entry.summary_raw)
        .bind(entry.published_at)
        .bind(verdict.criteria.field_match.matched)
        .bind(verdict.criteria.field_match.justification.as_deref())
        .bind(verdict.criteria.method_match.matched)
        .bind(verdict.criteria.method_match.justification.as_deref())
        .bind(verdict.summary.problem.as_deref())
        .bind(verdict.summary.method.as_deref())
        .bind(verdict.summary.data.as_deref())
        .bind(verdict.summary.highlights.as_deref())
        .bind(&verdict.raw_model_output)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            debug!("Recorded {} (accepted: {}, degraded: {})", entry.id, verdict.accepted, verdict.degraded);
        } else {
            debug!("Entry {} already recorded, keeping the first verdict", entry.id);
        }
        Ok(inserted)
    }

    pub async fn get(&self, entry_id: &EntryId) -> Result<Option<LedgerRecord>, LedgerError> {
        let row = sqlx::query(
            "SELECT entry_id, processed_at, accepted, degraded FROM processed_entries WHERE entry_id = ?1",
        )
        .bind(entry_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    /// Full stored screening for one entry, if any.
    pub async fn lookup(&self, entry_id: &EntryId) -> Result<Option<StoredScreening>, LedgerError> {
        let sql = format!("SELECT {} FROM processed_entries WHERE entry_id = ?1", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(entry_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| screening_from_row(&row)).transpose()
    }

    /// Accepted entries processed at or after `since`, newest first.
    pub async fn accepted_since(&self, since: DateTime<Utc>) -> Result<Vec<StoredScreening>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM processed_entries WHERE accepted AND processed_at >= ?1 ORDER BY processed_at DESC, title",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;
        rows.iter().map(screening_from_row).collect()
    }

    /// Entries whose verdict was built from an incomplete model answer.
    pub async fn degraded_entries(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredScreening>, LedgerError> {
        let sql = format!(
            "SELECT {} FROM processed_entries WHERE degraded AND (?1 IS NULL OR processed_at >= ?1) \
             ORDER BY processed_at DESC, title",
            SELECT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(since).fetch_all(&self.pool).await?;
        rows.iter().map(screening_from_row).collect()
    }

    pub async fn stats(&self, since: Option<DateTime<Utc>>) -> Result<LedgerStats, LedgerError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN accepted THEN 1 ELSE 0 END), 0) AS accepted,
                COALESCE(SUM(CASE WHEN degraded THEN 1 ELSE 0 END), 0) AS degraded,
                COUNT(DISTINCT feed_url) AS feeds,
                MIN(processed_at) AS first_processed,
                MAX(processed_at) AS last_processed
            FROM processed_entries
            WHERE ?1 IS NULL OR processed_at >= ?1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.try_get("total")?;
        let accepted: i64 = row.try_get("accepted")?;

        Ok(LedgerStats {
            total,
            accepted,
            rejected: total - accepted,
            degraded: row.try_get("degraded")?,
            feeds: row.try_get("feeds")?,
            first_processed: row.try_get("first_processed")?,
            last_processed: row.try_get("last_processed")?,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn record_from_row(row: &SqliteRow) -> Result<LedgerRecord, LedgerError> {
    let entry_id: String = row.try_get("entry_id")?;
    Ok(LedgerRecord {
        entry_id: EntryId::from_stored(entry_id),
        processed_at: row.try_get("processed_at")?,
        accepted: row.try_get("accepted")?,
        degraded: row.try_get("degraded")?,
    })
}

fn screening_from_row(row: &SqliteRow) -> Result<StoredScreening, LedgerError> {
    let record = record_from_row(row)?;

    let group_name: String = row.try_get("feed_group")?;
    let group = FeedGroup::from_str(&group_name).map_err(|reason| LedgerError::Corrupt {
        entry_id: record.entry_id.to_string(),
        reason,
    })?;

    let entry = FeedEntry {
        id: record.entry_id.clone(),
        title: row.try_get("title")?,
        summary_raw: row.try_get("summary_raw")?,
        link: row.try_get("link")?,
        published_at: row.try_get("published_at")?,
        group,
        feed_url: row.try_get("feed_url")?,
        source: row.try_get("source")?,
        authors: row.try_get("authors")?,
    };

    let verdict = ScreeningVerdict {
        accepted: record.accepted,
        degraded: record.degraded,
        criteria: CriteriaResult {
            field_match: Judgment {
                matched: row.try_get("field_match")?,
                justification: row.try_get("field_reason")?,
            },
            method_match: Judgment {
                matched: row.try_get("method_match")?,
                justification: row.try_get("method_reason")?,
            },
        },
        summary: PaperSummary {
            problem: row.try_get("problem")?,
            method: row.try_get("method")?,
            data: row.try_get("data")?,
            highlights: row.try_get("highlights")?,
        },
        raw_model_output: row.try_get("raw_model_output")?,
    };

    Ok(StoredScreening { record, entry, verdict })
}
