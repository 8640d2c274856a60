use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use arxiv_scout::config::Config;
use arxiv_scout::digest::{self, DigestOutcome};
use arxiv_scout::logging;
use arxiv_scout::pipeline::Pipeline;
use arxiv_scout::store::{OrderBy, Paper, PaperQuery, PaperStore, SqlitePaperStore};

#[derive(Parser)]
#[command(name = "arxiv-scout", version, about = "Fetch, enrich and rank new arXiv papers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML config file (default: ./arxiv-scout.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database URL, overrides db_path from config
    #[arg(long, global = true, env = "SCOUT_DB")]
    db: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch today's listings for the configured categories
    Fetch,
    /// Enrich pending papers with Semantic Scholar data
    Enrich,
    /// Score papers that have no score yet
    Score,
    /// Fetch, enrich and score (default); sends the digest when email.enabled
    RunAll,
    /// Load papers from the last N days via the arXiv search API
    Backfill {
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Print ranked papers as JSON
    List {
        #[arg(long)]
        min_score: Option<f64>,
        /// Exact category tag, e.g. cs.LG
        #[arg(long)]
        category: Option<String>,
        #[arg(long, default_value_t = OrderBy::CombinedScore)]
        order_by: OrderBy,
        #[arg(long, default_value_t = 50)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// Only papers fetched on or after this date (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },
    /// Email a digest of the top-scored papers
    Email {
        /// Number of papers to include (default: email.top_n)
        #[arg(long)]
        top: Option<usize>,
        /// Print the digest HTML instead of sending it
        #[arg(long)]
        dry_run: bool,
    },
    /// Print pipeline counts as JSON
    Stats,
    /// Run database migrations and exit
    Migrate,
}

#[derive(Serialize)]
struct Listing {
    count: usize,
    papers: Vec<Paper>,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_digest(outcome: DigestOutcome) -> Result<()> {
    match outcome {
        DigestOutcome::DryRun { html, .. } => {
            println!("{}", html);
            Ok(())
        }
        sent => print_json(&sent),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }

    // Logging goes to stderr only; stdout carries the JSON reports.
    logging::init_logging(&config);

    let command = cli.command.unwrap_or(Commands::RunAll);
    let needs_pipeline = matches!(
        command,
        Commands::Fetch | Commands::Enrich | Commands::Score | Commands::RunAll | Commands::Backfill { .. }
    );
    if needs_pipeline {
        config.validate().context("Invalid configuration")?;
    }

    let store = Arc::new(
        SqlitePaperStore::new(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database {}", config.db_path))?,
    );
    tracing::debug!(db_path = %config.db_path, "Store initialized");

    match command {
        Commands::Migrate => {
            tracing::info!("Migrations applied");
        }
        Commands::Stats => print_json(&store.stats().await?)?,
        Commands::Email { top, dry_run } => {
            let top_n = top.unwrap_or(config.email.top_n);
            let outcome = digest::send_digest(store.as_ref(), &config.email, top_n, dry_run)
                .await
                .context("Failed to send digest")?;
            print_digest(outcome)?;
        }
        Commands::List {
            min_score,
            category,
            order_by,
            limit,
            offset,
            since,
        } => {
            let query = PaperQuery {
                min_score,
                category,
                order_by,
                limit,
                offset,
                since,
            };
            let papers = store.query_papers(&query).await?;
            print_json(&Listing {
                count: papers.len(),
                papers,
            })?;
        }
        stage => {
            let pipeline = Pipeline::from_config(&config, store.clone())?;
            match stage {
                Commands::Fetch => print_json(&pipeline.fetch().await?)?,
                Commands::Enrich => print_json(&pipeline.enrich().await?)?,
                Commands::Score => print_json(&pipeline.score().await?)?,
                Commands::Backfill { days } => print_json(&pipeline.backfill(days).await?)?,
                _ => {
                    print_json(&pipeline.run_all().await?)?;
                    if config.email.enabled {
                        // A failed send does not undo the run; it is reported and the exit code set.
                        let outcome =
                            digest::send_digest(store.as_ref(), &config.email, config.email.top_n, false)
                                .await
                                .context("Pipeline finished but the digest could not be sent")?;
                        print_json(&outcome)?;
                    }
                }
            }
        }
    }

    Ok(())
}
