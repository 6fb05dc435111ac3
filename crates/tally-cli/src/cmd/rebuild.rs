use std::path::Path;

use anyhow::{Context, Result, ensure};
use clap::Args;
use tally_core::config::StoreConfig;
use tally_core::db::{open_store, rebuild};

use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct RebuildArgs {
    /// Restrict the rebuild to a cycle range (`FIRST:LAST`, or one cycle).
    #[arg(long)]
    pub cycles: Option<String>,

    /// Clear locks leaked by a crashed rebuild before starting.
    #[arg(long)]
    pub break_locks: bool,
}

/// Run `tally rebuild`: truncate the scope and re-derive it from the
/// live ledger.
///
/// # Errors
///
/// Returns an error if the scope spec is malformed, the scope is already
/// being rebuilt, or the rebuild itself fails (in which case the scope
/// keeps its pre-rebuild state).
pub fn run(db: &Path, config: &StoreConfig, args: &RebuildArgs, mode: OutputMode) -> Result<()> {
    let mut conn = open_store(db)?;
    if args.break_locks {
        rebuild::clear_scope_locks(&conn)?;
    }

    let scope = parse_scope(args.cycles.as_deref())?;
    let report = rebuild::rebuild(&mut conn, config, scope)?;

    match mode {
        OutputMode::Json => println!(
            "{}",
            serde_json::json!({
                "scope": scope.to_string(),
                "records_scanned": report.records_scanned,
                "aggregate_rows": report.aggregate_rows,
                "search_rows": report.search_rows,
                "elapsed_ms": report.elapsed.as_millis() as u64,
            })
        ),
        OutputMode::Human => println!(
            "rebuild: scope={scope} records={} aggregate_rows={} search_rows={} elapsed_ms={}",
            report.records_scanned,
            report.aggregate_rows,
            report.search_rows,
            report.elapsed.as_millis()
        ),
    }
    Ok(())
}

/// Parse `--cycles`: absent means everything, `2016` one cycle,
/// `2016:2020` an inclusive range.
pub(crate) fn parse_scope(cycles: Option<&str>) -> Result<rebuild::Scope> {
    let Some(spec) = cycles else {
        return Ok(rebuild::Scope::All);
    };

    let (first, last) = match spec.split_once(':') {
        Some((first, last)) => (
            first
                .trim()
                .parse::<i64>()
                .with_context(|| format!("bad cycle '{first}'"))?,
            last.trim()
                .parse::<i64>()
                .with_context(|| format!("bad cycle '{last}'"))?,
        ),
        None => {
            let cycle = spec
                .trim()
                .parse::<i64>()
                .with_context(|| format!("bad cycle '{spec}'"))?;
            (cycle, cycle)
        }
    };
    ensure!(first <= last, "cycle range is inverted: {first}:{last}");
    Ok(rebuild::Scope::Cycles { first, last })
}

#[cfg(test)]
mod tests {
    use super::parse_scope;
    use tally_core::db::rebuild::Scope;

    #[test]
    fn absent_spec_means_all() {
        assert_eq!(parse_scope(None).expect("parse"), Scope::All);
    }

    #[test]
    fn single_cycle_becomes_degenerate_range() {
        assert_eq!(
            parse_scope(Some("2016")).expect("parse"),
            Scope::Cycles {
                first: 2016,
                last: 2016
            }
        );
    }

    #[test]
    fn range_parses_inclusive_bounds() {
        assert_eq!(
            parse_scope(Some("2016:2020")).expect("parse"),
            Scope::Cycles {
                first: 2016,
                last: 2020
            }
        );
    }

    #[test]
    fn rejects_garbage_and_inverted_ranges() {
        assert!(parse_scope(Some("latest")).is_err());
        assert!(parse_scope(Some("2020:2016")).is_err());
    }
}
