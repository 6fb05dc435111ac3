//! Read-only typed queries over the rollup tables.
//!
//! This is the surface the API layer consumes: typed structs, never raw
//! rows, keyed or range-scanned by (committee, cycle). Reads observe
//! whatever the engine has committed and never trigger recomputation.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Rollup row from `totals_by_state`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTotal {
    pub state: String,
    pub count: i64,
    pub total_cents: i64,
}

/// Rollup row from `totals_by_zip`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipTotal {
    pub zip: String,
    pub count: i64,
    pub total_cents: i64,
}

/// Rollup row from `totals_by_size`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeTotal {
    pub size_cents: i64,
    pub count: i64,
    pub total_cents: i64,
}

/// A full-text hit with its BM25 relevance score (lower = better).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub sub_id: i64,
    pub contributor_name: String,
    pub rank: f64,
}

// ---------------------------------------------------------------------------
// By-state
// ---------------------------------------------------------------------------

/// Every state rollup row for one (committee, cycle), ordered by state.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn state_totals(conn: &Connection, committee_id: &str, cycle: i64) -> Result<Vec<StateTotal>> {
    let mut stmt = conn
        .prepare(
            "SELECT state, count, total_cents FROM totals_by_state
             WHERE committee_id = ?1 AND cycle = ?2
             ORDER BY state",
        )
        .context("prepare state totals query")?;
    let rows = stmt
        .query_map(params![committee_id, cycle], |row| {
            Ok(StateTotal {
                state: row.get(0)?,
                count: row.get(1)?,
                total_cents: row.get(2)?,
            })
        })
        .context("query state totals")?;
    collect(rows)
}

/// Point lookup of one state rollup row.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn state_total(
    conn: &Connection,
    committee_id: &str,
    cycle: i64,
    state: &str,
) -> Result<Option<StateTotal>> {
    conn.query_row(
        "SELECT state, count, total_cents FROM totals_by_state
         WHERE committee_id = ?1 AND cycle = ?2 AND state = ?3",
        params![committee_id, cycle, state],
        |row| {
            Ok(StateTotal {
                state: row.get(0)?,
                count: row.get(1)?,
                total_cents: row.get(2)?,
            })
        },
    )
    .optional()
    .context("query state total")
}

// ---------------------------------------------------------------------------
// By-zip
// ---------------------------------------------------------------------------

/// Every zip rollup row for one (committee, cycle), ordered by zip.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn zip_totals(conn: &Connection, committee_id: &str, cycle: i64) -> Result<Vec<ZipTotal>> {
    let mut stmt = conn
        .prepare(
            "SELECT zip, count, total_cents FROM totals_by_zip
             WHERE committee_id = ?1 AND cycle = ?2
             ORDER BY zip",
        )
        .context("prepare zip totals query")?;
    let rows = stmt
        .query_map(params![committee_id, cycle], |row| {
            Ok(ZipTotal {
                zip: row.get(0)?,
                count: row.get(1)?,
                total_cents: row.get(2)?,
            })
        })
        .context("query zip totals")?;
    collect(rows)
}

/// Point lookup of one zip rollup row.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn zip_total(
    conn: &Connection,
    committee_id: &str,
    cycle: i64,
    zip: &str,
) -> Result<Option<ZipTotal>> {
    conn.query_row(
        "SELECT zip, count, total_cents FROM totals_by_zip
         WHERE committee_id = ?1 AND cycle = ?2 AND zip = ?3",
        params![committee_id, cycle, zip],
        |row| {
            Ok(ZipTotal {
                zip: row.get(0)?,
                count: row.get(1)?,
                total_cents: row.get(2)?,
            })
        },
    )
    .optional()
    .context("query zip total")
}

// ---------------------------------------------------------------------------
// By-size
// ---------------------------------------------------------------------------

/// Every size-bucket rollup row for one (committee, cycle), ordered by
/// bucket (the negative bucket first).
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn size_totals(conn: &Connection, committee_id: &str, cycle: i64) -> Result<Vec<SizeTotal>> {
    let mut stmt = conn
        .prepare(
            "SELECT size_cents, count, total_cents FROM totals_by_size
             WHERE committee_id = ?1 AND cycle = ?2
             ORDER BY size_cents",
        )
        .context("prepare size totals query")?;
    let rows = stmt
        .query_map(params![committee_id, cycle], |row| {
            Ok(SizeTotal {
                size_cents: row.get(0)?,
                count: row.get(1)?,
                total_cents: row.get(2)?,
            })
        })
        .context("query size totals")?;
    collect(rows)
}

/// Point lookup of one size-bucket rollup row.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn size_total(
    conn: &Connection,
    committee_id: &str,
    cycle: i64,
    size_cents: i64,
) -> Result<Option<SizeTotal>> {
    conn.query_row(
        "SELECT size_cents, count, total_cents FROM totals_by_size
         WHERE committee_id = ?1 AND cycle = ?2 AND size_cents = ?3",
        params![committee_id, cycle, size_cents],
        |row| {
            Ok(SizeTotal {
                size_cents: row.get(0)?,
                count: row.get(1)?,
                total_cents: row.get(2)?,
            })
        },
    )
    .optional()
    .context("query size total")
}

/// Cycles a committee has rollup rows for, ascending.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn committee_cycles(conn: &Connection, committee_id: &str) -> Result<Vec<i64>> {
    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT cycle FROM totals_by_state
             WHERE committee_id = ?1
             ORDER BY cycle",
        )
        .context("prepare committee cycles query")?;
    let rows = stmt
        .query_map(params![committee_id], |row| row.get::<_, i64>(0))
        .context("query committee cycles")?;
    collect(rows)
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read query row")?);
    }
    Ok(out)
}
