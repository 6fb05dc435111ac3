#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use output::OutputMode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "tally: incremental aggregation engine for itemized filings",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the SQLite store.
    #[arg(long, global = true, default_value = "tally.db")]
    db: PathBuf,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags.
    const fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Create or migrate a store",
        after_help = "EXAMPLES:\n    # Create a fresh store\n    tally init --db filings.db"
    )]
    Init,

    #[command(
        about = "Load newline-delimited JSON records",
        long_about = "Load itemized records from a newline-delimited JSON file, \
                      one record per line, applying aggregation deltas with each insert.",
        after_help = "EXAMPLES:\n    # Load a filing batch\n    tally load receipts.ndjson --db filings.db"
    )]
    Load(cmd::load::LoadArgs),

    #[command(
        about = "Rebuild rollups and search rows from the ledger",
        long_about = "Truncate the scope's derived rows and re-derive them from the live \
                      ledger. Used for initial population, backfill, and recovery.",
        after_help = "EXAMPLES:\n    # Rebuild everything\n    tally rebuild\n\n    # Rebuild two cycles\n    tally rebuild --cycles 2016:2018"
    )]
    Rebuild(cmd::rebuild::RebuildArgs),

    #[command(
        about = "Audit rollups against a fresh ledger scan",
        after_help = "EXAMPLES:\n    # Audit the whole store\n    tally audit\n\n    # Audit one cycle, machine-readable\n    tally audit --cycles 2016 --json"
    )]
    Audit(cmd::audit::AuditArgs),

    #[command(
        about = "Show rollup totals for a committee",
        after_help = "EXAMPLES:\n    # State totals\n    tally totals --committee C12345 --cycle 2016\n\n    # Size buckets as JSON\n    tally totals --committee C12345 --cycle 2016 --by size --json"
    )]
    Totals(cmd::totals::TotalsArgs),

    #[command(
        about = "Full-text search contributor names",
        after_help = "EXAMPLES:\n    # Ranked name lookup\n    tally search \"sheldon adelson\""
    )]
    Search(cmd::search::SearchArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config_dir = cli.db.parent().unwrap_or_else(|| Path::new("."));
    let config = tally_core::config::load_store_config(config_dir)?;
    let mode = cli.output_mode();

    match &cli.command {
        Commands::Init => cmd::init::run(&cli.db, mode),
        Commands::Load(args) => cmd::load::run(&cli.db, &config, args, mode),
        Commands::Rebuild(args) => cmd::rebuild::run(&cli.db, &config, args, mode),
        Commands::Audit(args) => cmd::audit::run(&cli.db, &config, args, mode),
        Commands::Totals(args) => cmd::totals::run(&cli.db, args, mode),
        Commands::Search(args) => cmd::search::run(&cli.db, args, mode),
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}
