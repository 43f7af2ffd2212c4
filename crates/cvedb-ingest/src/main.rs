//! cvedb Ingest - NVD CVE import tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use cvedb_common::logging::{init_logging, LogConfig, LogLevel};
use cvedb_common::types::CveRecord;
use cvedb_ingest::config::{default_max_connections, DatabaseConfig, ImportConfig};
use cvedb_ingest::nvd::{NvdClient, RetryPolicy, RetryingSource};
use cvedb_ingest::orchestrator::{ImportOptions, ImportSummary, Importer};
use cvedb_ingest::progress::ProgressReporter;
use cvedb_ingest::store::{
    CveFilter, InMemoryConnector, PaginationParams, PgConnector, StoreConnector,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cvedb-ingest")]
#[command(author, version, about = "Import the NVD CVE catalog into a local database")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every CVE page and upsert it into the store
    Import(ImportArgs),

    /// List stored CVEs
    Query(QueryArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Records per page (overrides RESULTS_PER_PAGE)
    #[arg(long)]
    results_per_page: Option<u64>,

    /// Pause between pages in milliseconds (overrides DELAY_MS)
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Concurrent upsert workers (overrides CONCURRENCY)
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Retries per failed page fetch (overrides FETCH_MAX_RETRIES)
    #[arg(long)]
    max_retries: Option<u32>,

    /// Write to an in-memory store instead of the database
    #[arg(long)]
    dry_run: bool,

    /// Do not draw a progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Exact CVE id
    #[arg(long)]
    id: Option<String>,

    /// Publication year
    #[arg(long)]
    year: Option<i32>,

    /// CVSS v2/v3 base score
    #[arg(long)]
    score: Option<f64>,

    /// Only CVEs modified within this many days
    #[arg(long)]
    last_modified_days: Option<i64>,

    /// Page number (1-based)
    #[arg(long, default_value_t = 1)]
    page: i64,

    /// Results per page (max 100)
    #[arg(long, default_value_t = 20)]
    limit: i64,

    /// Print the raw page as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag.
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("cvedb-ingest")
        .build()
        .merge_vars(|key| std::env::var(key).ok())?;

    init_logging(&log_config)?;

    match cli.command {
        Command::Import(args) => import(args).await,
        Command::Query(args) => query(args).await,
    }
}

async fn import(args: ImportArgs) -> Result<()> {
    let config = import_config(&args)?;

    let client = NvdClient::new(&config.source_url, config.http_timeout())
        .context("Failed to build NVD client")?;
    let source = RetryingSource::new(
        client,
        RetryPolicy::new(config.fetch_max_retries, config.retry_backoff()),
    );

    let memory = InMemoryConnector::default();
    let connector: Arc<dyn StoreConnector> = if args.dry_run {
        info!("Dry run: records are kept in memory only");
        Arc::new(memory.clone())
    } else {
        Arc::new(PgConnector::new(config.database.clone()))
    };

    let progress = if args.no_progress {
        ProgressReporter::hidden()
    } else {
        ProgressReporter::new()
    };

    info!(source = %config.source_url, "Importing CVEs");
    let summary = match Importer::new(source, connector, ImportOptions::from(&config))
        .with_progress(progress)
        .run()
        .await
    {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(partial) = e.partial_summary() {
                print_summary(partial);
                println!("Import stopped at startIndex {}", partial.final_start_index);
            }
            return Err(e.into());
        },
    };

    print_summary(&summary);
    if args.dry_run {
        println!("Dry run kept {} distinct CVEs in memory", memory.store().len());
    }
    Ok(())
}

/// Environment first, then command-line overrides.
fn import_config(args: &ImportArgs) -> Result<ImportConfig> {
    let env = |key: &str| std::env::var(key).ok();
    let dry_run = args.dry_run;

    let mut config = ImportConfig::from_vars(|key| match key {
        // A dry run never opens the database.
        "DATABASE_URL" if dry_run => env(key).or_else(|| Some("memory://".to_string())),
        _ => env(key),
    })?;

    if let Some(results_per_page) = args.results_per_page {
        config.results_per_page = results_per_page;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.delay_ms = delay_ms;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
        if env("DB_MAX_CONNECTIONS").is_none() {
            config.database.max_connections = default_max_connections(concurrency);
        }
    }
    if let Some(max_retries) = args.max_retries {
        config.fetch_max_retries = max_retries;
    }

    config.validate()?;
    Ok(config)
}

fn print_summary(summary: &ImportSummary) {
    println!("{}", summary);
    if summary.failed > 0 {
        println!(
            "{} records failed to write; rerun the import to retry them",
            summary.failed
        );
    }
}

async fn query(args: QueryArgs) -> Result<()> {
    let database = DatabaseConfig::load()?;
    let store = PgConnector::new(database)
        .connect()
        .await
        .context("Failed to connect to the CVE database")?;

    let filter = CveFilter {
        id: args.id,
        year: args.year,
        score: args.score,
        last_modified_days: args.last_modified_days,
    };
    let pagination = PaginationParams::new(Some(args.page), Some(args.limit));

    let result = store.list(&filter, &pagination).await;
    store.close().await;
    let page = result?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&page)?);
        return Ok(());
    }

    for record in &page.data {
        println!("{}", summary_line(record));
    }
    println!(
        "Page {}/{} ({} total, {} per page)",
        page.page, page.pages, page.total, page.limit
    );
    Ok(())
}

fn summary_line(record: &CveRecord) -> String {
    let published = record
        .published
        .map(|p| p.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string());
    let score = record
        .base_scores()
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))))
        .map(|s| format!("{:.1}", s))
        .unwrap_or_else(|| "-".to_string());
    let mut description = record.description().unwrap_or("").replace('\n', " ");
    if description.chars().count() > 80 {
        description = description.chars().take(77).collect::<String>() + "...";
    }

    format!(
        "{:<18} {:<10} {:>4}  {:<19} {}",
        record.id,
        published,
        score,
        record.vuln_status.as_deref().unwrap_or("-"),
        description
    )
}
