//! # wordchunk CLI
//!
//! Imports a text source into chunked word-count records and aggregates the
//! totals per word.
//!
//! ## Usage
//!
//! ```bash
//! wordchunk --config ./config/wordchunk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `wordchunk init` | Create the SQLite database and run schema migrations |
//! | `wordchunk run --source <file>` | Clean, import and optionally aggregate a source |
//! | `wordchunk stats` | Per-source chunk and word summary |
//! | `wordchunk show <collection>` | Print an aggregated collection |
//!
//! ## Examples
//!
//! ```bash
//! # Import in chunks of 10 lines, then compute totals both ways
//! wordchunk run --source dump.txt --chunk 10 --aggregate --map-reduce
//!
//! # Re-aggregate an existing import into a custom collection
//! wordchunk run --source dump.txt --no-import --aggregate totals
//!
//! # Import the second half of a file as its own instance
//! wordchunk run --source dump.txt --id host2 --skip 50000
//! ```

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use wordchunk::aggregate::Strategy;
use wordchunk::config::{self, Config};
use wordchunk::import::{self, Importer};
use wordchunk::progress::ProgressMode;
use wordchunk::store::sqlite::SqliteStore;
use wordchunk::{db, migrate, show, stats};

/// wordchunk: chunked word-count import with pipeline and map-reduce
/// aggregation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "wordchunk",
    about = "Chunked word-count import with pipeline and map-reduce aggregation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/wordchunk.toml")]
    config: PathBuf,

    /// SQLite database file; overrides `db.path`.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Chunk collection name; overrides `db.collection`.
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite file and the chunk and result tables. Safe to run
    /// repeatedly.
    Init,

    /// Import a source and optionally aggregate it.
    ///
    /// Previously imported chunks of the same source (and instance id, when
    /// given) are removed first, so re-running an import is idempotent.
    Run(RunArgs),

    /// Show chunk counts and word totals per source and instance.
    Stats,

    /// Print an aggregated collection, highest totals first.
    Show {
        /// Collection name, e.g. `words_aggr` or `words_mr`.
        collection: String,

        /// Number of rows to print; 0 prints everything.
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Text file to import. Its path, as given, is the source name.
    #[arg(long)]
    source: PathBuf,

    /// Instance id distinguishing separate imports of the same source.
    #[arg(long)]
    id: Option<String>,

    /// Lines to skip before importing.
    #[arg(long)]
    skip: Option<u64>,

    /// Lines to import after skipping; 0 means no limit.
    #[arg(long)]
    limit: Option<u64>,

    /// Lines per chunk record; 0 keeps everything in one chunk.
    #[arg(long)]
    chunk: Option<u64>,

    /// Skip the import and only run the requested aggregations.
    #[arg(long)]
    no_import: bool,

    /// Aggregate with the pipeline strategy into COLLECTION
    /// (default `<collection>_aggr`).
    #[arg(long, value_name = "COLLECTION", num_args = 0..=1)]
    aggregate: Option<Option<String>>,

    /// Aggregate with the map-reduce strategy into COLLECTION
    /// (default `<collection>_mr`).
    #[arg(long, value_name = "COLLECTION", num_args = 0..=1)]
    map_reduce: Option<Option<String>>,

    /// Progress output on stderr. Defaults to human on a TTY, off otherwise.
    #[arg(long, value_enum)]
    progress: Option<ProgressMode>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load_or_default(&cli.config)?;
    if let Some(path) = cli.db {
        cfg.db.path = path;
    }
    if let Some(collection) = cli.collection {
        cfg.db.collection = collection;
    }
    cfg.validate()?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Run(args) => {
            run_job(&cfg, args).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Show { collection, top } => {
            show::run_show(&cfg, &collection, top).await?;
        }
    }

    Ok(())
}

async fn run_job(cfg: &Config, args: RunArgs) -> anyhow::Result<()> {
    let source_name = args.source.display().to_string();
    let skip = args.skip.unwrap_or(cfg.import.skip_lines);
    let limit = args.limit.unwrap_or(cfg.import.limit_lines);
    let chunk = args.chunk.unwrap_or(cfg.import.chunk_size);

    if args.no_import && args.aggregate.is_none() && args.map_reduce.is_none() {
        warn!("--no-import without --aggregate or --map-reduce: nothing to do");
        return Ok(());
    }

    // Validate the source before anything touches the store.
    let reader = if args.no_import {
        None
    } else {
        Some(import::open_source(&args.source).await?)
    };

    let store = SqliteStore::open(cfg).await?;

    if let Some(reader) = reader {
        let mode = args.progress.unwrap_or_else(ProgressMode::default_for_tty);
        let reporter = mode.reporter();
        let importer = Importer::new(source_name.as_str(), args.id.clone(), &store)
            .with_progress(reporter.as_ref());

        let started = Instant::now();
        let deleted = importer
            .clean_data()
            .await
            .with_context(|| format!("Failed to clean previous import of {}", source_name))?;
        let summary = importer
            .import_in_chunks(reader, skip, limit, chunk)
            .await
            .with_context(|| format!("Failed to import {}", source_name))?;
        let elapsed = started.elapsed();

        info!(
            source = %source_name,
            instance_id = ?args.id,
            deleted,
            skipped = summary.lines_skipped,
            elapsed_ms = elapsed.as_millis() as u64,
            "import finished"
        );
        println!(
            "Imported {} lines from {} into {} chunks ({} words).",
            summary.lines_consumed, source_name, summary.chunks_written, summary.words_counted
        );
        println!("Imported data in {} seconds.", elapsed.as_secs());
    }

    if let Some(destination) = args.aggregate {
        let destination = destination.unwrap_or_else(|| cfg.aggregate_collection());
        let elapsed = Strategy::Pipeline
            .aggregate(&store, &source_name, &destination)
            .await
            .with_context(|| format!("Failed to aggregate {} into {}", source_name, destination))?;
        println!("Aggregated results in {} seconds.", elapsed.as_secs());
    }

    if let Some(destination) = args.map_reduce {
        let destination = destination.unwrap_or_else(|| cfg.map_reduce_collection());
        let elapsed = Strategy::MapReduce
            .aggregate(&store, &source_name, &destination)
            .await
            .with_context(|| format!("Failed to map-reduce {} into {}", source_name, destination))?;
        println!("MapReduced results in {} seconds.", elapsed.as_secs());
    }

    store.close().await;
    Ok(())
}
