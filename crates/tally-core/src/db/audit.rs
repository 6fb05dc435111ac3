//! Aggregate consistency audit.
//!
//! Recomputes expected (count, total) per key from a fresh ledger scan
//! and diffs both directions against the stored rollups. Discrepancies
//! are reported, never repaired here — a mismatch means a delta was
//! missed or applied twice and deserves investigation; recovery is a
//! scoped [`crate::db::rebuild::rebuild`].
//!
//! Rows legitimately retained at (0, 0) after draining are consistent,
//! not discrepancies.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use crate::categorize::Dimension;
use crate::config::StoreConfig;
use crate::db::aggregate::{self, AGGREGATE_TABLES, AggregateTable};
use crate::db::rebuild::Scope;
use crate::error::CoreError;

/// One rollup row that disagrees with a fresh ledger scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    pub table: &'static str,
    pub committee_id: String,
    pub cycle: i64,
    pub value: String,
    pub expected_count: i64,
    pub actual_count: i64,
    pub expected_total_cents: i64,
    pub actual_total_cents: i64,
}

/// Diff every rollup table in scope against a fresh ledger scan.
///
/// # Errors
///
/// Returns an error if any scan fails; an inconsistent store is a
/// successful (non-empty) result, not an error.
pub fn check_aggregates(
    conn: &Connection,
    config: &StoreConfig,
    scope: Scope,
) -> Result<Vec<Discrepancy>> {
    let (first, last) = scope.bounds();
    let mut discrepancies = Vec::new();

    for table in AGGREGATE_TABLES {
        let expected = expected_rows(conn, config, table, first, last)?;
        let mut actual = BTreeMap::new();
        for row in aggregate::snapshot(conn, table, first, last)? {
            actual.insert(
                (row.committee_id, row.cycle, row.value),
                (row.count, row.total_cents),
            );
        }

        let keys: std::collections::BTreeSet<_> =
            expected.keys().chain(actual.keys()).cloned().collect();
        for key in keys {
            let (expected_count, expected_total_cents) =
                expected.get(&key).copied().unwrap_or((0, 0));
            let (actual_count, actual_total_cents) = actual.get(&key).copied().unwrap_or((0, 0));
            if expected_count != actual_count || expected_total_cents != actual_total_cents {
                let (committee_id, cycle, value) = key;
                discrepancies.push(Discrepancy {
                    table: table.table,
                    committee_id,
                    cycle,
                    value,
                    expected_count,
                    actual_count,
                    expected_total_cents,
                    actual_total_cents,
                });
            }
        }
    }

    Ok(discrepancies)
}

/// Fail with [`CoreError::InconsistentAggregate`] when any rollup row
/// disagrees with a fresh scan. The store is left exactly as found.
///
/// # Errors
///
/// [`CoreError::InconsistentAggregate`] on any mismatch, or a scan
/// failure.
pub fn verify_aggregates(conn: &Connection, config: &StoreConfig, scope: Scope) -> Result<()> {
    let discrepancies = check_aggregates(conn, config, scope)?;
    let Some(worst) = discrepancies.first() else {
        return Ok(());
    };

    for discrepancy in &discrepancies {
        tracing::warn!(
            table = discrepancy.table,
            committee_id = %discrepancy.committee_id,
            cycle = discrepancy.cycle,
            value = %discrepancy.value,
            expected_count = discrepancy.expected_count,
            actual_count = discrepancy.actual_count,
            expected_total_cents = discrepancy.expected_total_cents,
            actual_total_cents = discrepancy.actual_total_cents,
            "aggregate row disagrees with ledger scan"
        );
    }

    Err(CoreError::InconsistentAggregate {
        table: worst.table.to_string(),
        mismatches: discrepancies.len(),
    }
    .into())
}

type KeyedTotals = BTreeMap<(String, i64, String), (i64, i64)>;

/// Recompute expected rollup rows with a GROUP BY scan whose key
/// expressions mirror the categorizer.
fn expected_rows(
    conn: &Connection,
    config: &StoreConfig,
    table: &AggregateTable,
    cycle_first: i64,
    cycle_last: i64,
) -> Result<KeyedTotals> {
    let value_expr = match table.dimension {
        Dimension::State => "UPPER(TRIM(COALESCE(state, '')))".to_string(),
        Dimension::Zip => "SUBSTR(TRIM(COALESCE(zip, '')), 1, 5)".to_string(),
        Dimension::Size => format!(
            "CASE WHEN amount_cents < 0 THEN -1 \
             ELSE (amount_cents / {w}) * {w} END",
            w = config.aggregation.size_bucket_cents
        ),
    };

    let sql = format!(
        "SELECT committee_id,
                report_year + (report_year % 2) AS cycle,
                CAST({value_expr} AS TEXT) AS value,
                COUNT(*),
                SUM(amount_cents)
         FROM itemized
         WHERE report_year IS NOT NULL
           AND (report_year + (report_year % 2)) BETWEEN ?1 AND ?2
         GROUP BY committee_id, cycle, value"
    );

    let mut stmt = stmt_with_context(conn, &sql, table)?;
    let rows = stmt
        .query_map(params![cycle_first, cycle_last], |row| {
            Ok((
                (
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ),
                (row.get::<_, i64>(3)?, row.get::<_, i64>(4)?),
            ))
        })
        .with_context(|| format!("scan expected rows for {}", table.table))?;

    let mut expected = BTreeMap::new();
    for row in rows {
        let (key, totals) = row.context("read expected row")?;
        expected.insert(key, totals);
    }
    Ok(expected)
}

fn stmt_with_context<'conn>(
    conn: &'conn Connection,
    sql: &str,
    table: &AggregateTable,
) -> Result<rusqlite::Statement<'conn>> {
    conn.prepare(sql)
        .with_context(|| format!("prepare expected-row scan for {}", table.table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ledger, test_store};
    use crate::model::ItemizedRecord;

    fn config() -> StoreConfig {
        StoreConfig::default()
    }

    fn record(sub_id: i64, amount_cents: i64, state: &str, report_year: i64) -> ItemizedRecord {
        ItemizedRecord {
            sub_id,
            committee_id: "C12345".into(),
            report_year: Some(report_year),
            amount_cents,
            state: Some(state.into()),
            zip: Some("07605-1234".into()),
            contributor_name: Some(format!("Donor {sub_id}")),
            is_memo: false,
            loaded_at_us: 0,
        }
    }

    fn seed(conn: &mut rusqlite::Connection) {
        ledger::insert_record(conn, &config(), &record(1, 53_800, "NY", 2015)).expect("insert");
        ledger::insert_record(conn, &config(), &record(2, 10_000, "ny", 2015)).expect("insert");
        ledger::insert_record(conn, &config(), &record(3, -2_500, "CA", 2016)).expect("insert");
    }

    #[test]
    fn consistent_store_has_no_discrepancies() {
        let mut conn = test_store();
        seed(&mut conn);

        let discrepancies =
            check_aggregates(&conn, &config(), Scope::All).expect("check");
        assert!(discrepancies.is_empty(), "unexpected: {discrepancies:?}");
        verify_aggregates(&conn, &config(), Scope::All).expect("verify");
    }

    #[test]
    fn drained_zero_rows_are_consistent() {
        let mut conn = test_store();
        seed(&mut conn);
        ledger::delete_record(&mut conn, &config(), 3).expect("delete");

        let discrepancies =
            check_aggregates(&conn, &config(), Scope::All).expect("check");
        assert!(discrepancies.is_empty(), "unexpected: {discrepancies:?}");
    }

    #[test]
    fn tampered_total_is_reported_not_repaired() {
        let mut conn = test_store();
        seed(&mut conn);

        conn.execute(
            "UPDATE totals_by_state SET total_cents = total_cents + 1
             WHERE cycle = 2016 AND state = 'NY'",
            [],
        )
        .expect("tamper");

        let discrepancies =
            check_aggregates(&conn, &config(), Scope::All).expect("check");
        assert_eq!(discrepancies.len(), 1);
        let d = &discrepancies[0];
        assert_eq!(d.table, "totals_by_state");
        assert_eq!(d.value, "NY");
        assert_eq!(d.expected_total_cents, 63_800);
        assert_eq!(d.actual_total_cents, 63_801);

        // Still tampered afterwards: the audit never repairs.
        let total: i64 = conn
            .query_row(
                "SELECT total_cents FROM totals_by_state WHERE cycle = 2016 AND state = 'NY'",
                [],
                |row| row.get(0),
            )
            .expect("row");
        assert_eq!(total, 63_801);
    }

    #[test]
    fn missing_row_is_reported() {
        let mut conn = test_store();
        seed(&mut conn);

        conn.execute(
            "DELETE FROM totals_by_zip WHERE cycle = 2016 AND zip = '07605'",
            [],
        )
        .expect("drop row");

        let discrepancies =
            check_aggregates(&conn, &config(), Scope::All).expect("check");
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].table, "totals_by_zip");
        assert_eq!(discrepancies[0].actual_count, 0);
        assert_eq!(discrepancies[0].expected_count, 3);
    }

    #[test]
    fn phantom_nonzero_row_is_reported() {
        let mut conn = test_store();
        seed(&mut conn);

        conn.execute(
            "INSERT INTO totals_by_state (committee_id, cycle, state, count, total_cents)
             VALUES ('C99999', 2016, 'TX', 2, 777)",
            [],
        )
        .expect("phantom row");

        let discrepancies =
            check_aggregates(&conn, &config(), Scope::All).expect("check");
        assert_eq!(discrepancies.len(), 1);
        assert_eq!(discrepancies[0].committee_id, "C99999");
        assert_eq!(discrepancies[0].expected_count, 0);
        assert_eq!(discrepancies[0].actual_count, 2);
    }

    #[test]
    fn verify_surfaces_typed_error() {
        let mut conn = test_store();
        seed(&mut conn);
        conn.execute(
            "UPDATE totals_by_size SET count = count + 1 WHERE cycle = 2016",
            [],
        )
        .expect("tamper");

        let err = verify_aggregates(&conn, &config(), Scope::All).expect_err("inconsistent");
        let core = err.downcast_ref::<CoreError>().expect("typed error");
        assert_eq!(core.code(), "E3001");
    }

    #[test]
    fn scoped_audit_ignores_other_cycles() {
        let mut conn = test_store();
        seed(&mut conn);
        ledger::insert_record(&mut conn, &config(), &record(9, 100, "NY", 2017))
            .expect("insert 2018");

        conn.execute(
            "UPDATE totals_by_state SET total_cents = 5 WHERE cycle = 2018",
            [],
        )
        .expect("tamper out of scope");

        let discrepancies = check_aggregates(
            &conn,
            &config(),
            Scope::Cycles {
                first: 2016,
                last: 2016,
            },
        )
        .expect("check");
        assert!(discrepancies.is_empty(), "unexpected: {discrepancies:?}");
    }
}
