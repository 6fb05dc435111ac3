//! Additive rollup tables and the delta API that mutates them.
//!
//! One table per dimension, each row keyed by (committee, cycle, value)
//! and carrying an additive (count, total). The tables are listed in
//! [`AGGREGATE_TABLES`]; the engine and the recompute scheduler both
//! iterate that list rather than discovering tables at runtime.
//!
//! Rows that drain to zero are retained as (0, 0), never deleted, so a
//! key that once existed stays queryable for callers that cached it.
//! Only a scoped rebuild removes rows.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::categorize::{Dimension, DimensionKeys};
use crate::error::CoreError;

/// Descriptor for one rollup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateTable {
    pub table: &'static str,
    pub value_column: &'static str,
    pub dimension: Dimension,
}

/// Every rollup table, in a fixed order.
pub const AGGREGATE_TABLES: &[AggregateTable] = &[
    AggregateTable {
        table: "totals_by_state",
        value_column: "state",
        dimension: Dimension::State,
    },
    AggregateTable {
        table: "totals_by_zip",
        value_column: "zip",
        dimension: Dimension::Zip,
    },
    AggregateTable {
        table: "totals_by_size",
        value_column: "size_cents",
        dimension: Dimension::Size,
    },
];

/// One rollup row in a canonical, comparison-friendly form (the dimension
/// value rendered as text regardless of its column type).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRow {
    pub committee_id: String,
    pub cycle: i64,
    pub value: String,
    pub count: i64,
    pub total_cents: i64,
}

/// Create-or-increment for an inserted record: count += 1, total += amount.
///
/// # Errors
///
/// Returns an error if the upsert fails.
pub fn increment(
    conn: &Connection,
    table: &AggregateTable,
    committee_id: &str,
    keys: &DimensionKeys,
    amount_cents: i64,
) -> Result<()> {
    let sql = format!(
        "INSERT INTO {t} (committee_id, cycle, {c}, count, total_cents)
         VALUES (?1, ?2, ?3, 1, ?4)
         ON CONFLICT (committee_id, cycle, {c})
         DO UPDATE SET count = count + 1, total_cents = total_cents + excluded.total_cents",
        t = table.table,
        c = table.value_column,
    );
    conn.execute(
        &sql,
        params![
            committee_id,
            keys.cycle,
            keys.value(table.dimension),
            amount_cents
        ],
    )
    .with_context(|| format!("increment {} for committee {committee_id}", table.table))?;
    Ok(())
}

/// Decrement for a deleted or moved-away record: count -= 1, total -=
/// amount. The row is zeroed in place, never removed.
///
/// # Errors
///
/// A missing row means the rollup has drifted from the ledger and
/// surfaces as [`CoreError::InconsistentAggregate`]; draining below zero
/// trips the `count >= 0` constraint.
pub fn decrement(
    conn: &Connection,
    table: &AggregateTable,
    committee_id: &str,
    keys: &DimensionKeys,
    amount_cents: i64,
) -> Result<()> {
    let sql = format!(
        "UPDATE {t}
         SET count = count - 1, total_cents = total_cents - ?4
         WHERE committee_id = ?1 AND cycle = ?2 AND {c} = ?3",
        t = table.table,
        c = table.value_column,
    );
    let changed = conn
        .execute(
            &sql,
            params![
                committee_id,
                keys.cycle,
                keys.value(table.dimension),
                amount_cents
            ],
        )
        .with_context(|| format!("decrement {} for committee {committee_id}", table.table))?;
    if changed == 0 {
        return Err(CoreError::InconsistentAggregate {
            table: table.table.to_string(),
            mismatches: 1,
        }
        .into());
    }
    Ok(())
}

/// In-place total adjustment for an update that kept its key; count is
/// unchanged.
///
/// # Errors
///
/// As [`decrement`]: a missing row is [`CoreError::InconsistentAggregate`].
pub fn adjust_total(
    conn: &Connection,
    table: &AggregateTable,
    committee_id: &str,
    keys: &DimensionKeys,
    delta_cents: i64,
) -> Result<()> {
    let sql = format!(
        "UPDATE {t}
         SET total_cents = total_cents + ?4
         WHERE committee_id = ?1 AND cycle = ?2 AND {c} = ?3",
        t = table.table,
        c = table.value_column,
    );
    let changed = conn
        .execute(
            &sql,
            params![
                committee_id,
                keys.cycle,
                keys.value(table.dimension),
                delta_cents
            ],
        )
        .with_context(|| format!("adjust {} for committee {committee_id}", table.table))?;
    if changed == 0 {
        return Err(CoreError::InconsistentAggregate {
            table: table.table.to_string(),
            mismatches: 1,
        }
        .into());
    }
    Ok(())
}

/// Every row of one rollup table within a cycle range, deterministically
/// ordered. Used by the audit and by idempotence checks.
///
/// # Errors
///
/// Returns an error if the scan fails.
pub fn snapshot(
    conn: &Connection,
    table: &AggregateTable,
    cycle_first: i64,
    cycle_last: i64,
) -> Result<Vec<SnapshotRow>> {
    let sql = format!(
        "SELECT committee_id, cycle, CAST({c} AS TEXT), count, total_cents
         FROM {t}
         WHERE cycle BETWEEN ?1 AND ?2
         ORDER BY committee_id, cycle, {c}",
        t = table.table,
        c = table.value_column,
    );
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("prepare snapshot of {}", table.table))?;
    let rows = stmt
        .query_map(params![cycle_first, cycle_last], |row| {
            Ok(SnapshotRow {
                committee_id: row.get(0)?,
                cycle: row.get(1)?,
                value: row.get(2)?,
                count: row.get(3)?,
                total_cents: row.get(4)?,
            })
        })
        .with_context(|| format!("snapshot {}", table.table))?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read snapshot row")?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;
    use crate::error::CoreError;

    const STATE: &AggregateTable = &AGGREGATE_TABLES[0];
    const SIZE: &AggregateTable = &AGGREGATE_TABLES[2];

    fn keys(cycle: i64, state: &str) -> DimensionKeys {
        DimensionKeys {
            cycle,
            state: state.into(),
            zip5: "07605".into(),
            size_bucket: 50_000,
        }
    }

    fn state_row(conn: &rusqlite::Connection, cycle: i64, state: &str) -> (i64, i64) {
        conn.query_row(
            "SELECT count, total_cents FROM totals_by_state
             WHERE committee_id = 'C12345' AND cycle = ?1 AND state = ?2",
            rusqlite::params![cycle, state],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("state row")
    }

    #[test]
    fn increment_creates_then_accumulates() {
        let conn = test_store();
        increment(&conn, STATE, "C12345", &keys(2016, "NY"), 53_800).expect("first");
        assert_eq!(state_row(&conn, 2016, "NY"), (1, 53_800));

        increment(&conn, STATE, "C12345", &keys(2016, "NY"), 10_000).expect("second");
        assert_eq!(state_row(&conn, 2016, "NY"), (2, 63_800));
    }

    #[test]
    fn integer_dimension_values_bind_correctly() {
        let conn = test_store();
        increment(&conn, SIZE, "C12345", &keys(2016, "NY"), 53_800).expect("increment");

        let (count, total): (i64, i64) = conn
            .query_row(
                "SELECT count, total_cents FROM totals_by_size
                 WHERE committee_id = 'C12345' AND cycle = 2016 AND size_cents = 50000",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("size row");
        assert_eq!((count, total), (1, 53_800));
    }

    #[test]
    fn decrement_zeroes_and_retains_the_row() {
        let conn = test_store();
        increment(&conn, STATE, "C12345", &keys(2016, "NY"), 53_800).expect("increment");
        decrement(&conn, STATE, "C12345", &keys(2016, "NY"), 53_800).expect("decrement");

        assert_eq!(state_row(&conn, 2016, "NY"), (0, 0));
    }

    #[test]
    fn decrement_of_missing_row_is_inconsistency() {
        let conn = test_store();
        let err = decrement(&conn, STATE, "C12345", &keys(2016, "NY"), 53_800)
            .expect_err("no row to decrement");
        let core = err
            .downcast_ref::<CoreError>()
            .expect("typed inconsistency error");
        assert_eq!(core.code(), "E3001");
    }

    #[test]
    fn adjust_total_leaves_count_alone() {
        let conn = test_store();
        increment(&conn, STATE, "C12345", &keys(2016, "NY"), 53_800).expect("increment");
        adjust_total(&conn, STATE, "C12345", &keys(2016, "NY"), 5_300 - 53_800)
            .expect("adjust");

        assert_eq!(state_row(&conn, 2016, "NY"), (1, 5_300));
    }

    #[test]
    fn snapshot_orders_deterministically_and_respects_scope() {
        let conn = test_store();
        increment(&conn, STATE, "C12345", &keys(2016, "NY"), 100).expect("ny");
        increment(&conn, STATE, "C12345", &keys(2016, "CA"), 200).expect("ca");
        increment(&conn, STATE, "C12345", &keys(2018, "NY"), 300).expect("later cycle");

        let rows = snapshot(&conn, STATE, 2016, 2016).expect("snapshot");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, "CA");
        assert_eq!(rows[1].value, "NY");

        let all = snapshot(&conn, STATE, 0, 9998).expect("full snapshot");
        assert_eq!(all.len(), 3);
    }
}
