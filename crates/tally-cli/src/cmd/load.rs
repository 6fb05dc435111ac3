use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use tally_core::config::StoreConfig;
use tally_core::db::{ledger, open_store};
use tally_core::model::ItemizedRecord;

use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct LoadArgs {
    /// Newline-delimited JSON file, one itemized record per line.
    pub file: PathBuf,
}

/// Run `tally load`: insert each record through the ledger mutation API,
/// so every row lands with its aggregation deltas.
///
/// The load stops at the first bad line; everything inserted before it
/// has already committed record-by-record.
///
/// # Errors
///
/// Returns an error if the file cannot be read, a line fails to parse,
/// or an insert is rejected (invalid date, locked scope).
pub fn run(db: &Path, config: &StoreConfig, args: &LoadArgs, mode: OutputMode) -> Result<()> {
    let mut conn = open_store(db)?;
    let file = File::open(&args.file)
        .with_context(|| format!("open {}", args.file.display()))?;
    let reader = BufReader::new(file);

    let mut loaded = 0_usize;
    for (line_idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read line {}", line_idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }

        let mut record: ItemizedRecord = serde_json::from_str(&line)
            .with_context(|| format!("parse record on line {}", line_idx + 1))?;
        if record.loaded_at_us == 0 {
            record.loaded_at_us = Utc::now().timestamp_micros();
        }

        ledger::insert_record(&mut conn, config, &record)
            .with_context(|| format!("insert record on line {}", line_idx + 1))?;
        loaded += 1;
    }

    tracing::info!(loaded, file = %args.file.display(), "ledger load complete");
    match mode {
        OutputMode::Json => println!(
            "{}",
            serde_json::json!({
                "loaded": loaded,
                "db": db.display().to_string(),
            })
        ),
        OutputMode::Human => println!("loaded {loaded} records into {}", db.display()),
    }
    Ok(())
}
