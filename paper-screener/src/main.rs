use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use email_delivery::{render_plain, SmtpDelivery};
use paper_screener::digest::build_digest;
use paper_screener::utils::time::{days_ago, format_duration};
use paper_screener::{Digest, DigestDelivery, Ledger, PaperScreener, RunReport, ScreenerConfig};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paper-screener", version, about = "Screen academic RSS feeds against your research interests")]
struct Cli {
    /// Path to config.yaml (default: ./config.yaml, then ~/.paper-screener/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch feeds, screen new papers and email the relevant ones
    Run {
        /// Only screen papers published in the last N days
        #[arg(short, long, default_value_t = 10)]
        days: i64,
        /// Screen and record, but print the digest instead of emailing it
        #[arg(long)]
        dry_run: bool,
        /// Screen at most N new papers per feed (0 = unlimited)
        #[arg(short, long, default_value_t = 0)]
        max_per_feed: usize,
    },
    /// Email a report of papers accepted in the last N days
    SendReport {
        #[arg(short, long, default_value_t = 7)]
        days: i64,
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the configured feeds and their groups
    ListFeeds,
    /// Show ledger statistics
    Stats {
        /// Restrict to the last N days
        #[arg(short, long)]
        days: Option<i64>,
    },
    /// Send a test email to check the SMTP settings
    TestEmail,
    /// List papers whose verdict was built from an incomplete model answer
    Review {
        #[arg(short, long)]
        days: Option<i64>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}

fn load_config(explicit: Option<PathBuf>) -> anyhow::Result<ScreenerConfig> {
    let path = ScreenerConfig::discover(explicit.as_deref())?;
    ScreenerConfig::load(&path).with_context(|| format!("loading {}", path.display()))
}

fn smtp_delivery(config: &ScreenerConfig) -> anyhow::Result<SmtpDelivery> {
    let email = config
        .email
        .clone()
        .context("no email section in the configuration")?;
    SmtpDelivery::new(email)
}

fn print_digest(digest: &Digest) {
    println!("{}", render_plain(digest));
}

fn print_report(report: &RunReport) {
    println!();
    println!("Results: {}", report.summary_line());
    for failure in &report.feed_failures {
        println!("  feed failed: {} ({})", failure.url, failure.error);
    }
    for failure in &report.failures {
        println!("  entry failed: {} ({})", failure.title, failure.error);
    }
}

async fn run(
    config: &ScreenerConfig,
    days: i64,
    dry_run: bool,
    max_per_feed: usize,
) -> anyhow::Result<()> {
    let screener = PaperScreener::from_config(config).await?;
    let since = days_ago(days);

    info!("Screening papers published since {}", since.format("%Y-%m-%d"));
    let report = screener.screen_new_entries(Some(since), Some(max_per_feed)).await?;
    print_report(&report);

    // Earlier runs already sent the rest of the snapshot
    let digest = report.digest.only_new();
    if digest.is_empty() {
        println!("No newly accepted papers, nothing to send.");
    } else if dry_run {
        println!("\n[dry run] Would send {} papers:\n", digest.item_count());
        print_digest(&digest);
    } else {
        smtp_delivery(config)?.deliver(&digest).await?;
        println!("Sent digest with {} papers.", digest.item_count());
    }

    if let Some(reason) = &report.aborted {
        bail!("run aborted: {}", reason);
    }
    Ok(())
}

async fn send_report(config: &ScreenerConfig, days: i64, dry_run: bool) -> anyhow::Result<()> {
    let ledger = Ledger::open(&config.database_path()).await?;
    let digest = build_digest(&ledger, days_ago(days)).await?;

    if digest.is_empty() {
        println!("No relevant papers in the last {} days.", days);
        return Ok(());
    }
    if dry_run {
        print_digest(&digest);
        return Ok(());
    }
    smtp_delivery(config)?.deliver(&digest).await?;
    println!("Sent report with {} papers.", digest.item_count());
    Ok(())
}

fn list_feeds(config: &ScreenerConfig) -> anyhow::Result<()> {
    let feeds = config.configured_feeds()?;
    if feeds.is_empty() {
        warn!("No feeds configured");
    }
    for feed in &feeds {
        println!("[{}] {}", feed.group, feed.url);
    }
    println!("\n{} feeds", feeds.len());
    Ok(())
}

fn describe(date: Option<DateTime<Utc>>) -> String {
    date.map(|d| d.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

async fn stats(config: &ScreenerConfig, days: Option<i64>) -> anyhow::Result<()> {
    let ledger = Ledger::open(&config.database_path()).await?;
    let stats = ledger.stats(days.map(days_ago)).await?;

    println!("Database: {}", config.database_path().display());
    println!("Total screened: {}", stats.total);
    println!("Accepted: {}", stats.accepted);
    println!("Rejected: {}", stats.rejected);
    println!("Degraded: {}", stats.degraded);
    println!("Feeds: {}", stats.feeds);
    println!("First processed: {}", describe(stats.first_processed));
    println!("Last processed: {}", describe(stats.last_processed));
    if let (Some(first), Some(last)) = (stats.first_processed, stats.last_processed) {
        println!("Span: {}", format_duration(last - first));
    }
    Ok(())
}

async fn review(config: &ScreenerConfig, days: Option<i64>) -> anyhow::Result<()> {
    let ledger = Ledger::open(&config.database_path()).await?;
    let degraded = ledger.degraded_entries(days.map(days_ago)).await?;

    if degraded.is_empty() {
        println!("No degraded verdicts.");
        return Ok(());
    }
    for stored in &degraded {
        println!(
            "{} [{}] {}",
            describe(Some(stored.record.processed_at)),
            if stored.verdict.accepted { "KEEP" } else { "SKIP" },
            stored.entry.title
        );
        println!("    {}", stored.entry.link);
    }
    println!("\n{} degraded verdicts", degraded.len());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(cli.config)?;

    match cli.command {
        Command::Run {
            days,
            dry_run,
            max_per_feed,
        } => run(&config, days, dry_run, max_per_feed).await,
        Command::SendReport { days, dry_run } => send_report(&config, days, dry_run).await,
        Command::ListFeeds => list_feeds(&config),
        Command::Stats { days } => stats(&config, days).await,
        Command::TestEmail => {
            smtp_delivery(&config)?.send_test_email().await?;
            println!("Test email sent.");
            Ok(())
        }
        Command::Review { days } => review(&config, days).await,
    }
}
