//! Scope-locked full recomputation of rollups and search rows.
//!
//! The incremental engine keeps the derived tables exact; `rebuild`
//! exists for initial population, backfill after schema changes, and
//! recovery when an audit finds drift. A rebuild truncates its scope and
//! re-derives it from the live ledger inside a single transaction, so a
//! failed rebuild leaves the prior state intact and a rebuild is
//! restartable from scratch, never resumed mid-way.
//!
//! While a scope is locked, incremental writes into it (and overlapping
//! rebuilds) fail with [`CoreError::RebuildInProgress`]. Disjoint scopes
//! may rebuild in parallel from separate connections.

use std::fmt;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::config::StoreConfig;
use crate::db::aggregate::AGGREGATE_TABLES;
use crate::db::engine::{Engine, LedgerEvent};
use crate::error::CoreError;
use crate::model::ItemizedRecord;

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Which slice of the store a rebuild owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    All,
    Cycles { first: i64, last: i64 },
}

impl Scope {
    /// Inclusive cycle bounds; `All` spans every plausible cycle.
    pub(crate) const fn bounds(self) -> (i64, i64) {
        match self {
            Self::All => (0, 9998),
            Self::Cycles { first, last } => (first, last),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Cycles { first, last } => write!(f, "{first}:{last}"),
        }
    }
}

// ---------------------------------------------------------------------------
// RebuildReport
// ---------------------------------------------------------------------------

/// Report returned after a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebuildReport {
    /// Live ledger records folded back into the rollups.
    pub records_scanned: usize,
    /// Rollup rows present in scope after the rebuild, across all tables.
    pub aggregate_rows: usize,
    /// Search rows re-derived.
    pub search_rows: usize,
    /// Wall-clock elapsed time.
    pub elapsed: std::time::Duration,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Truncate the scope's derived rows and re-derive them from the live
/// ledger, folding insert deltas in scan order (the deltas commute, so
/// the order is immaterial).
///
/// # Errors
///
/// [`CoreError::RebuildInProgress`] when an overlapping scope is already
/// locked; otherwise any categorization or store failure. On failure the
/// transaction rolls back and the scope keeps its pre-rebuild state.
pub fn rebuild(conn: &mut Connection, config: &StoreConfig, scope: Scope) -> Result<RebuildReport> {
    let start = Instant::now();
    acquire_scope_lock(conn, scope)?;

    let outcome = rebuild_locked(conn, config, scope, start);

    if let Err(release_err) = release_scope_lock(conn, scope) {
        if outcome.is_ok() {
            return Err(release_err.context("release rebuild scope lock"));
        }
        tracing::warn!(
            scope = %scope,
            error = %release_err,
            "failed to release scope lock after failed rebuild"
        );
    }

    outcome
}

/// Fail when any of the given cycles falls inside a locked scope. Called
/// by the incremental path before it writes.
///
/// # Errors
///
/// [`CoreError::RebuildInProgress`] naming the locked scope.
pub fn ensure_cycles_unlocked(conn: &Connection, cycles: &[i64]) -> Result<()> {
    for &cycle in cycles {
        let locked: Option<(i64, i64)> = conn
            .query_row(
                "SELECT cycle_first, cycle_last FROM rebuild_locks
                 WHERE ?1 BETWEEN cycle_first AND cycle_last
                 LIMIT 1",
                params![cycle],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("probe rebuild locks")?;

        if let Some((first, last)) = locked {
            let scope = if (first, last) == Scope::All.bounds() {
                Scope::All
            } else {
                Scope::Cycles { first, last }
            };
            return Err(CoreError::RebuildInProgress {
                scope: scope.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

/// Drop every scope lock. Recovery hook for locks leaked by a crashed
/// rebuild process; never called on the happy path.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn clear_scope_locks(conn: &Connection) -> Result<usize> {
    let cleared = conn
        .execute("DELETE FROM rebuild_locks", [])
        .context("clear rebuild locks")?;
    if cleared > 0 {
        tracing::warn!(cleared, "cleared leftover rebuild scope locks");
    }
    Ok(cleared)
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

fn rebuild_locked(
    conn: &mut Connection,
    config: &StoreConfig,
    scope: Scope,
    start: Instant,
) -> Result<RebuildReport> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin rebuild transaction")?;
    let (first, last) = scope.bounds();

    // Truncate the scope: rollup rows are removed outright (this is the
    // one path that may drop a drained key), search rows via their
    // ledger linkage.
    for table in AGGREGATE_TABLES {
        tx.execute(
            &format!(
                "DELETE FROM {} WHERE cycle BETWEEN ?1 AND ?2",
                table.table
            ),
            params![first, last],
        )
        .with_context(|| format!("truncate {} in scope", table.table))?;
    }
    tx.execute(
        "DELETE FROM itemized_search WHERE sub_id IN (
             SELECT sub_id FROM itemized
             WHERE report_year IS NOT NULL
               AND (report_year + (report_year % 2)) BETWEEN ?1 AND ?2)",
        params![first, last],
    )
    .context("truncate search rows in scope")?;

    let records = scope_records(&tx, first, last)?;
    let engine = Engine::new(&tx, &config.aggregation);
    for record in &records {
        engine
            .apply(&LedgerEvent::Inserted(record.clone()))
            .with_context(|| format!("refold ledger record {}", record.sub_id))?;
    }

    let mut aggregate_rows = 0_usize;
    for table in AGGREGATE_TABLES {
        let rows: i64 = tx
            .query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE cycle BETWEEN ?1 AND ?2",
                    table.table
                ),
                params![first, last],
                |row| row.get(0),
            )
            .with_context(|| format!("count rebuilt rows in {}", table.table))?;
        aggregate_rows += usize::try_from(rows).unwrap_or(0);
    }

    tx.execute(
        "UPDATE store_meta SET last_rebuild_at_us = ?1 WHERE id = 1",
        params![Utc::now().timestamp_micros()],
    )
    .context("stamp rebuild time")?;

    tx.commit().context("commit rebuild")?;

    let elapsed = start.elapsed();
    tracing::info!(
        scope = %scope,
        records_scanned = records.len(),
        aggregate_rows,
        search_rows = records.len(),
        elapsed_ms = elapsed.as_millis(),
        "aggregate rebuild complete"
    );

    Ok(RebuildReport {
        records_scanned: records.len(),
        aggregate_rows,
        search_rows: records.len(),
        elapsed,
    })
}

fn scope_records(conn: &Connection, first: i64, last: i64) -> Result<Vec<ItemizedRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT sub_id, committee_id, report_year, amount_cents,
                    state, zip, contributor_name, is_memo, loaded_at_us
             FROM itemized
             WHERE report_year IS NOT NULL
               AND (report_year + (report_year % 2)) BETWEEN ?1 AND ?2
             ORDER BY sub_id",
        )
        .context("prepare scope scan")?;

    let rows = stmt
        .query_map(params![first, last], |row| {
            Ok(ItemizedRecord {
                sub_id: row.get(0)?,
                committee_id: row.get(1)?,
                report_year: row.get(2)?,
                amount_cents: row.get(3)?,
                state: row.get(4)?,
                zip: row.get(5)?,
                contributor_name: row.get(6)?,
                is_memo: row.get(7)?,
                loaded_at_us: row.get(8)?,
            })
        })
        .context("scan ledger records in scope")?;

    let mut records = Vec::new();
    for row in rows {
        records.push(row.context("read ledger record")?);
    }
    Ok(records)
}

fn acquire_scope_lock(conn: &mut Connection, scope: Scope) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin lock acquisition")?;
    let (first, last) = scope.bounds();

    let overlapping: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM rebuild_locks
             WHERE cycle_first <= ?2 AND cycle_last >= ?1",
            params![first, last],
            |row| row.get(0),
        )
        .context("probe for overlapping scope locks")?;
    if overlapping > 0 {
        return Err(CoreError::RebuildInProgress {
            scope: scope.to_string(),
        }
        .into());
    }

    tx.execute(
        "INSERT INTO rebuild_locks (cycle_first, cycle_last, locked_at_us)
         VALUES (?1, ?2, ?3)",
        params![first, last, Utc::now().timestamp_micros()],
    )
    .context("insert scope lock")?;
    tx.commit().context("commit scope lock")?;
    Ok(())
}

fn release_scope_lock(conn: &Connection, scope: Scope) -> Result<()> {
    let (first, last) = scope.bounds();
    conn.execute(
        "DELETE FROM rebuild_locks WHERE cycle_first = ?1 AND cycle_last = ?2",
        params![first, last],
    )
    .context("delete scope lock")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
