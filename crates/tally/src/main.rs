//! Tally: incremental task summary maintenance.
//!
//! Subcommands:
//! - `ingest`: replay task change events from a JSON-lines file
//! - `compact`: fold pending journal entries into the counters
//! - `daemon`: run the periodic compaction loop
//! - `query`: combined aggregate rows, optionally folded to totals
//! - `stats`: journal depth and counter statistics
//! - `verify`: invariant scan over persisted counters

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_store::{AggregateFilter, SummaryStore, ValueFilter, fold_totals};

mod daemon;
mod ingest;

/// Batch size used when draining the whole journal.
const DEFAULT_DRAIN_BATCH: usize = 1000;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Incremental task summary maintenance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay task change events from a JSON-lines file
    Ingest {
        /// Summary database path
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,

        /// JSON file mapping access-policy ids to granted viewer ids
        #[arg(long, env = "TALLY_GRANTS")]
        grants: Option<PathBuf>,

        /// Events file; `-` reads stdin
        file: PathBuf,
    },

    /// Fold pending journal entries into the summary counters
    Compact {
        /// Summary database path
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,

        /// Bound on journal entries folded per pass
        #[arg(long)]
        max_batch: Option<usize>,

        /// Keep compacting in bounded batches until the journal is empty
        #[arg(long)]
        all: bool,
    },

    /// Run the periodic compaction daemon
    Daemon {
        /// Summary database path
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,

        /// Seconds between compaction passes
        #[arg(long, default_value = "60")]
        interval: u64,

        /// Bound on journal entries folded per pass
        #[arg(long)]
        max_batch: Option<usize>,
    },

    /// Query combined aggregate rows
    Query {
        /// Summary database path
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,

        #[arg(long)]
        project: Option<i64>,

        #[arg(long)]
        project_series: Option<i64>,

        #[arg(long)]
        distribution: Option<i64>,

        #[arg(long)]
        package: Option<i64>,

        /// Restrict to distribution-wide rows (package IS NULL)
        #[arg(long, conflicts_with = "package")]
        no_package: bool,

        #[arg(long)]
        status: Option<i32>,

        #[arg(long)]
        importance: Option<i32>,

        #[arg(long)]
        has_patch: Option<bool>,

        #[arg(long)]
        tag: Option<String>,

        /// Restrict to the any-tag buckets (tag IS NULL)
        #[arg(long, conflicts_with = "tag")]
        no_tag: bool,

        #[arg(long)]
        viewer: Option<i64>,

        /// Restrict to publicly visible buckets (viewer IS NULL)
        #[arg(long, conflicts_with = "viewer")]
        public: bool,

        /// Sum counter and journal contributions into one total per bucket
        #[arg(long)]
        fold: bool,
    },

    /// Show journal depth and counter statistics
    Stats {
        /// Summary database path
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,
    },

    /// Scan for persisted rows violating the positive-count invariant
    Verify {
        /// Summary database path
        #[arg(long, env = "TALLY_DB")]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "tally=info,tally_store=info,tally_scheduler=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest { db, grants, file } => ingest::run(&db, grants.as_deref(), &file),

        Commands::Compact { db, max_batch, all } => run_compact(&db, max_batch, all),

        Commands::Daemon {
            db,
            interval,
            max_batch,
        } => daemon::run(&db, interval, max_batch).await,

        Commands::Query {
            db,
            project,
            project_series,
            distribution,
            package,
            no_package,
            status,
            importance,
            has_patch,
            tag,
            no_tag,
            viewer,
            public,
            fold,
        } => {
            let filter = AggregateFilter {
                project: id_filter(project, false),
                project_series: id_filter(project_series, false),
                distribution: id_filter(distribution, false),
                package: id_filter(package, no_package),
                viewer: id_filter(viewer, public),
                tag: match (tag, no_tag) {
                    (Some(tag), _) => ValueFilter::Is(tag),
                    (None, true) => ValueFilter::IsNull,
                    (None, false) => ValueFilter::Any,
                },
                status,
                importance,
                has_patch,
                access_policy: ValueFilter::Any,
            };
            run_query(&db, &filter, fold)
        }

        Commands::Stats { db } => run_stats(&db),

        Commands::Verify { db } => run_verify(&db),
    }
}

/// Turn an optional id flag plus an explicit "must be NULL" flag into a
/// dimension filter.
fn id_filter(value: Option<i64>, must_be_null: bool) -> ValueFilter<i64> {
    match (value, must_be_null) {
        (Some(id), _) => ValueFilter::Is(id),
        (None, true) => ValueFilter::IsNull,
        (None, false) => ValueFilter::Any,
    }
}

fn open_store(db: &Path) -> Result<SummaryStore> {
    SummaryStore::open(db).map_err(|e| miette::miette!("{}", e))
}

fn run_compact(db: &Path, max_batch: Option<usize>, all: bool) -> Result<()> {
    let store = open_store(db)?;
    let stats = if all {
        store
            .compact_fully(max_batch.unwrap_or(DEFAULT_DRAIN_BATCH))
            .map_err(|e| miette::miette!("{}", e))?
    } else {
        store
            .compact(max_batch)
            .map_err(|e| miette::miette!("{}", e))?
    };
    print_json(&stats)
}

fn run_query(db: &Path, filter: &AggregateFilter, fold: bool) -> Result<()> {
    let store = open_store(db)?;
    let rows = store.query(filter).map_err(|e| miette::miette!("{}", e))?;
    if fold {
        print_json(&fold_totals(&rows))
    } else {
        print_json(&rows)
    }
}

fn run_stats(db: &Path) -> Result<()> {
    let store = open_store(db)?;
    let stats = store
        .journal_stats()
        .map_err(|e| miette::miette!("{}", e))?;
    print_json(&stats)
}

fn run_verify(db: &Path) -> Result<()> {
    let store = open_store(db)?;
    let breaches = store.verify().map_err(|e| miette::miette!("{}", e))?;
    print_json(&breaches)?;
    if breaches.is_empty() {
        Ok(())
    } else {
        Err(miette::miette!(
            "{} persisted rows violate the positive-count invariant",
            breaches.len()
        ))
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).map_err(|e| miette::miette!("{}", e))?;
    println!("{rendered}");
    Ok(())
}
