use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use newsfeed::config::Config;
use newsfeed::feed_query::{query_feed, FeedQuery};
use newsfeed::matching::{run_matching, MatchingOptions, UserScope};
use newsfeed::read_state;
use newsfeed::retention::{run_retention, RetentionOptions};
use newsfeed::scheduler::Scheduler;
use newsfeed::storage::{Database, DatabaseError};
use newsfeed::{logging, ErrorKind};

/// Get the config directory path (~/.config/newsfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("newsfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "newsfeed", about = "Per-user news feeds built from declared preferences")]
struct Args {
    /// Config file (default: ~/.config/newsfeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database, overrides `database_path` from the config
    #[arg(long, global = true, value_name = "FILE")]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Materialize new matching articles into user feeds
    UpdatePreferred {
        /// Lookback window in days
        #[arg(long)]
        days: Option<u32>,
        /// Maximum entries added per user
        #[arg(long)]
        limit: Option<usize>,
        /// Only process this user
        #[arg(long)]
        user_id: Option<i64>,
    },
    /// Delete feed entries older than the retention horizon
    CleanupPreferred {
        /// Retention horizon in days
        #[arg(long)]
        days: Option<u32>,
        /// Count matching entries without deleting
        #[arg(long)]
        dry_run: bool,
        /// Confirm deletion
        #[arg(long)]
        force: bool,
    },
    /// Print one page of a user's feed as JSON
    Feed {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        is_read: Option<bool>,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        days: Option<u32>,
        /// YYYY-MM-DD
        #[arg(long)]
        start_date: Option<String>,
        /// YYYY-MM-DD
        #[arg(long)]
        end_date: Option<String>,
        #[arg(long)]
        author_id: Option<i64>,
        #[arg(long)]
        category_id: Option<i64>,
        #[arg(long)]
        publisher_id: Option<i64>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        page: Option<u32>,
    },
    /// Mark a feed entry read (or unread)
    MarkRead {
        #[arg(long)]
        user_id: i64,
        #[arg(long)]
        article_id: i64,
        #[arg(long)]
        unread: bool,
    },
    /// Remove every entry from a user's feed
    ClearFeed {
        #[arg(long)]
        user_id: i64,
    },
    /// Run matching and retention on their schedules until Ctrl-C
    Schedule,
}

/// Resolve the database path: flag first, then config (relative to the config directory)
fn database_path(args: &Args, config: &Config, config_dir: &Path) -> Result<String> {
    let path = match &args.database {
        Some(path) => path.clone(),
        None => {
            let configured = PathBuf::from(&config.database_path);
            if configured.is_absolute() {
                configured
            } else {
                config_dir.join(configured)
            }
        }
    };
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    logging::init(&config.log_level);

    let db_path = database_path(&args, &config, &config_dir)?;
    if args.database.is_none() && !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
    }

    let db = match Database::open(&db_path).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: The database at {db_path} is locked by another process.");
            std::process::exit(1);
        }
        Err(e) => {
            return Err(anyhow::anyhow!("Failed to open database: {}", e));
        }
    };

    match args.command {
        Command::UpdatePreferred {
            days,
            limit,
            user_id,
        } => {
            let options = MatchingOptions {
                lookback_days: days.unwrap_or(config.matching.lookback_days),
                per_user_limit: limit.unwrap_or(config.matching.per_user_limit),
                scope: user_id.map_or(UserScope::All, |id| UserScope::Only(vec![id])),
                concurrency: config.matching.concurrency,
                budget: None,
            };
            let report = run_matching(&db, &options)
                .await
                .context("Preference matching failed")?;
            println!(
                "Processed {} users: {} candidates, {} entries added",
                report.users_processed, report.total_processed, report.total_added
            );
            for failure in &report.failures {
                eprintln!(
                    "  user {}: {} ({} added before the error)",
                    failure.user_id, failure.error, failure.added
                );
            }
        }
        Command::CleanupPreferred {
            days,
            dry_run,
            force,
        } => {
            let options = RetentionOptions {
                horizon_days: days.unwrap_or(config.retention.horizon_days),
                dry_run,
                force,
            };
            let report = match run_retention(&db, &options).await {
                Ok(report) => report,
                Err(e) if e.kind() == ErrorKind::InvalidArgument => {
                    eprintln!("Error: {e}");
                    eprintln!("Re-run with --force to delete, or --dry-run to preview.");
                    std::process::exit(2);
                }
                Err(e) => return Err(e).context("Cleanup failed"),
            };
            if report.dry_run {
                println!(
                    "Would delete {} entries older than {} days",
                    report.matched, report.horizon_days
                );
            } else {
                println!(
                    "Deleted {} entries older than {} days",
                    report.deleted, report.horizon_days
                );
            }
        }
        Command::Feed {
            user_id,
            is_read,
            limit,
            days,
            start_date,
            end_date,
            author_id,
            category_id,
            publisher_id,
            search,
            page,
        } => {
            let query = FeedQuery {
                is_read,
                limit,
                days,
                start_date,
                end_date,
                author_id,
                category_id,
                publisher_id,
                search,
                page,
            };
            let page = query_feed(&db, user_id, &query, &config.feed)
                .await
                .context("Failed to query feed")?;
            let json = serde_json::to_string_pretty(&page).context("Failed to encode feed page")?;
            println!("{json}");
        }
        Command::MarkRead {
            user_id,
            article_id,
            unread,
        } => {
            let entry = read_state::mark_read(&db, user_id, article_id, Some(!unread))
                .await
                .context("Failed to update read state")?;
            let json = serde_json::to_string_pretty(&entry).context("Failed to encode entry")?;
            println!("{json}");
        }
        Command::ClearFeed { user_id } => {
            let removed = read_state::clear_feed(&db, user_id)
                .await
                .context("Failed to clear feed")?;
            println!("Removed {removed} entries");
        }
        Command::Schedule => {
            let scheduler = Scheduler::new(db, &config).context("Invalid scheduler config")?;
            scheduler
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                        std::future::pending::<()>().await;
                    }
                })
                .await;
        }
    }

    Ok(())
}
