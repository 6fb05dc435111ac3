use std::path::Path;

use anyhow::Result;
use clap::{Args, ValueEnum};
use tally_core::db::{open_store, query};

use crate::output::OutputMode;

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum By {
    State,
    Zip,
    Size,
}

#[derive(Args, Debug)]
pub struct TotalsArgs {
    /// Committee identifier, e.g. C12345.
    #[arg(long)]
    pub committee: String,

    /// Two-year election cycle (even end-year).
    #[arg(long)]
    pub cycle: i64,

    /// Dimension to list totals for.
    #[arg(long, value_enum, default_value = "state")]
    pub by: By,
}

/// Run `tally totals`: list (count, total) rollup rows for one
/// committee and cycle along one dimension.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the query fails.
pub fn run(db: &Path, args: &TotalsArgs, mode: OutputMode) -> Result<()> {
    let conn = open_store(db)?;

    let rows: Vec<(String, i64, i64)> = match args.by {
        By::State => query::state_totals(&conn, &args.committee, args.cycle)?
            .into_iter()
            .map(|row| (row.state, row.count, row.total_cents))
            .collect(),
        By::Zip => query::zip_totals(&conn, &args.committee, args.cycle)?
            .into_iter()
            .map(|row| (row.zip, row.count, row.total_cents))
            .collect(),
        By::Size => query::size_totals(&conn, &args.committee, args.cycle)?
            .into_iter()
            .map(|row| (row.size_cents.to_string(), row.count, row.total_cents))
            .collect(),
    };

    match mode {
        OutputMode::Json => {
            let objects: Vec<serde_json::Value> = rows
                .iter()
                .map(|(value, count, total_cents)| {
                    serde_json::json!({
                        "value": value,
                        "count": count,
                        "total_cents": total_cents,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "committee_id": args.committee,
                    "cycle": args.cycle,
                    "rows": objects,
                })
            );
        }
        OutputMode::Human => {
            if rows.is_empty() {
                println!(
                    "no totals for committee {} in cycle {}",
                    args.committee, args.cycle
                );
            }
            for (value, count, total_cents) in &rows {
                println!("{value}\tcount={count}\ttotal_cents={total_cents}");
            }
        }
    }
    Ok(())
}
