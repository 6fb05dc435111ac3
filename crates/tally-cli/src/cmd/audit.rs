use std::path::Path;

use anyhow::Result;
use clap::Args;
use tally_core::config::StoreConfig;
use tally_core::db::{audit, open_store};
use tally_core::error::CoreError;

use crate::cmd::rebuild::parse_scope;
use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Restrict the audit to a cycle range (`FIRST:LAST`, or one cycle).
    #[arg(long)]
    pub cycles: Option<String>,
}

/// Run `tally audit`: diff the rollups against a fresh ledger scan.
/// Discrepancies are printed and surfaced as a nonzero exit; nothing is
/// repaired.
///
/// # Errors
///
/// [`CoreError::InconsistentAggregate`] when any row disagrees, or a scan
/// failure.
pub fn run(db: &Path, config: &StoreConfig, args: &AuditArgs, mode: OutputMode) -> Result<()> {
    let conn = open_store(db)?;
    let scope = parse_scope(args.cycles.as_deref())?;
    let discrepancies = audit::check_aggregates(&conn, config, scope)?;

    match mode {
        OutputMode::Json => {
            let rows: Vec<serde_json::Value> = discrepancies
                .iter()
                .map(|d| {
                    serde_json::json!({
                        "table": d.table,
                        "committee_id": d.committee_id,
                        "cycle": d.cycle,
                        "value": d.value,
                        "expected_count": d.expected_count,
                        "actual_count": d.actual_count,
                        "expected_total_cents": d.expected_total_cents,
                        "actual_total_cents": d.actual_total_cents,
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::json!({
                    "scope": scope.to_string(),
                    "consistent": discrepancies.is_empty(),
                    "discrepancies": rows,
                })
            );
        }
        OutputMode::Human => {
            for d in &discrepancies {
                println!(
                    "{}: committee={} cycle={} value={} expected=({}, {}) actual=({}, {})",
                    d.table,
                    d.committee_id,
                    d.cycle,
                    d.value,
                    d.expected_count,
                    d.expected_total_cents,
                    d.actual_count,
                    d.actual_total_cents
                );
            }
            if discrepancies.is_empty() {
                println!("audit: scope={scope} consistent");
            }
        }
    }

    if let Some(first) = discrepancies.first() {
        return Err(CoreError::InconsistentAggregate {
            table: first.table.to_string(),
            mismatches: discrepancies.len(),
        }
        .into());
    }
    Ok(())
}
