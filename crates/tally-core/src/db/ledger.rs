//! Source-ledger mutations, bracketed with their aggregation deltas.
//!
//! Every mutation runs in one IMMEDIATE transaction: the ledger row and
//! its rollup/search deltas commit together or not at all. A reader that
//! observes a ledger write therefore always observes its aggregates, and
//! a categorization failure rolls the whole event back. Writes into a
//! cycle that is currently being rebuilt fail with
//! [`CoreError::RebuildInProgress`].

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use crate::categorize;
use crate::config::StoreConfig;
use crate::db::engine::{Engine, LedgerEvent};
use crate::db::rebuild;
use crate::error::CoreError;
use crate::model::ItemizedRecord;

/// Insert a new itemized record and its derived rows.
///
/// # Errors
///
/// [`CoreError::InvalidDate`] when the record has no derivable cycle
/// (nothing is written), [`CoreError::RebuildInProgress`] when the
/// record's cycle is locked, or any store failure.
pub fn insert_record(
    conn: &mut Connection,
    config: &StoreConfig,
    record: &ItemizedRecord,
) -> Result<()> {
    let cycle = categorize::record_cycle(record, &config.aggregation)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin insert transaction")?;
    rebuild::ensure_cycles_unlocked(&tx, &[cycle])?;

    tx.execute(
        "INSERT INTO itemized (
            sub_id, committee_id, report_year, amount_cents,
            state, zip, contributor_name, is_memo, loaded_at_us
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.sub_id,
            record.committee_id,
            record.report_year,
            record.amount_cents,
            record.state,
            record.zip,
            record.contributor_name,
            record.is_memo,
            record.loaded_at_us,
        ],
    )
    .with_context(|| format!("insert ledger record {}", record.sub_id))?;

    Engine::new(&tx, &config.aggregation).apply(&LedgerEvent::Inserted(record.clone()))?;

    tx.commit().context("commit insert")?;
    tracing::debug!(sub_id = record.sub_id, cycle, "ledger insert applied");
    Ok(())
}

/// Replace a record's content with the given post-image (keyed by
/// `new.sub_id`) and move its rollup contributions accordingly.
///
/// The pre-image is read inside the same transaction, so delta
/// computation and the row write cannot observe different snapshots.
///
/// # Errors
///
/// [`CoreError::RecordNotFound`] when no such row exists,
/// [`CoreError::InvalidDate`] when either snapshot has no derivable
/// cycle, [`CoreError::RebuildInProgress`] when either cycle is locked,
/// or any store failure. Nothing is committed on error.
pub fn update_record(
    conn: &mut Connection,
    config: &StoreConfig,
    new: &ItemizedRecord,
) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin update transaction")?;

    let old = get_record(&tx, new.sub_id)?.ok_or(CoreError::RecordNotFound {
        sub_id: new.sub_id,
    })?;

    let old_cycle = categorize::record_cycle(&old, &config.aggregation)?;
    let new_cycle = categorize::record_cycle(new, &config.aggregation)?;
    rebuild::ensure_cycles_unlocked(&tx, &[old_cycle, new_cycle])?;

    tx.execute(
        "UPDATE itemized SET
            committee_id = ?2, report_year = ?3, amount_cents = ?4,
            state = ?5, zip = ?6, contributor_name = ?7, is_memo = ?8,
            loaded_at_us = ?9
         WHERE sub_id = ?1",
        params![
            new.sub_id,
            new.committee_id,
            new.report_year,
            new.amount_cents,
            new.state,
            new.zip,
            new.contributor_name,
            new.is_memo,
            new.loaded_at_us,
        ],
    )
    .with_context(|| format!("update ledger record {}", new.sub_id))?;

    Engine::new(&tx, &config.aggregation).apply(&LedgerEvent::Updated {
        old,
        new: new.clone(),
    })?;

    tx.commit().context("commit update")?;
    tracing::debug!(sub_id = new.sub_id, "ledger update applied");
    Ok(())
}

/// Delete a record, decrement its rollup rows (retained zeroed), and drop
/// its search row.
///
/// # Errors
///
/// [`CoreError::RecordNotFound`] when no such row exists,
/// [`CoreError::RebuildInProgress`] when the record's cycle is locked, or
/// any store failure.
pub fn delete_record(conn: &mut Connection, config: &StoreConfig, sub_id: i64) -> Result<()> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .context("begin delete transaction")?;

    let old = get_record(&tx, sub_id)?.ok_or(CoreError::RecordNotFound { sub_id })?;

    let cycle = categorize::record_cycle(&old, &config.aggregation)?;
    rebuild::ensure_cycles_unlocked(&tx, &[cycle])?;

    // The search row cascades with this delete.
    tx.execute("DELETE FROM itemized WHERE sub_id = ?1", params![sub_id])
        .with_context(|| format!("delete ledger record {sub_id}"))?;

    Engine::new(&tx, &config.aggregation).apply(&LedgerEvent::Deleted(old))?;

    tx.commit().context("commit delete")?;
    tracing::debug!(sub_id, "ledger delete applied");
    Ok(())
}

/// Fetch one ledger record by surrogate key.
///
/// # Errors
///
/// Returns an error if the query fails.
pub fn get_record(conn: &Connection, sub_id: i64) -> Result<Option<ItemizedRecord>> {
    conn.query_row(
        "SELECT sub_id, committee_id, report_year, amount_cents,
                state, zip, contributor_name, is_memo, loaded_at_us
         FROM itemized WHERE sub_id = ?1",
        params![sub_id],
        |row| {
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
        },
    )
    .optional()
    .with_context(|| format!("fetch ledger record {sub_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_store;

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
            zip: Some("07605".into()),
            contributor_name: Some("Sheldon Adelson".into()),
            is_memo: false,
            loaded_at_us: 7,
        }
    }

    fn state_row(conn: &Connection, cycle: i64, state: &str) -> (i64, i64) {
        conn.query_row(
            "SELECT count, total_cents FROM totals_by_state
             WHERE committee_id = 'C12345' AND cycle = ?1 AND state = ?2",
            params![cycle, state],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("state row")
    }

    #[test]
    fn insert_resolves_cycle_and_populates_rollups() {
        let mut conn = test_store();
        insert_record(&mut conn, &config(), &record(1, 53_800, "NY", 2015)).expect("insert");

        assert_eq!(state_row(&conn, 2016, "NY"), (1, 53_800));
    }

    #[test]
    fn two_inserts_accumulate_independent_of_order() {
        let a = record(1, 53_800, "NY", 2015);
        let b = record(2, 10_000, "NY", 2015);

        let mut forward = test_store();
        insert_record(&mut forward, &config(), &a).expect("insert a");
        insert_record(&mut forward, &config(), &b).expect("insert b");

        let mut reverse = test_store();
        insert_record(&mut reverse, &config(), &b).expect("insert b");
        insert_record(&mut reverse, &config(), &a).expect("insert a");

        assert_eq!(state_row(&forward, 2016, "NY"), (2, 63_800));
        assert_eq!(state_row(&reverse, 2016, "NY"), (2, 63_800));
    }

    #[test]
    fn same_key_update_adjusts_total_in_place() {
        let mut conn = test_store();
        insert_record(&mut conn, &config(), &record(1, 53_800, "NY", 2015)).expect("insert");

        update_record(&mut conn, &config(), &record(1, 5_300, "NY", 2015)).expect("update");

        assert_eq!(state_row(&conn, 2016, "NY"), (1, 5_300));
    }

    #[test]
    fn cross_key_update_zeroes_old_row_and_creates_new() {
        let mut conn = test_store();
        insert_record(&mut conn, &config(), &record(1, 53_800, "NY", 2015)).expect("insert");

        update_record(&mut conn, &config(), &record(1, 53_800, "CA", 2015)).expect("update");

        assert_eq!(state_row(&conn, 2016, "NY"), (0, 0));
        assert_eq!(state_row(&conn, 2016, "CA"), (1, 53_800));
    }

    #[test]
    fn committee_change_moves_the_row_across_keys() {
        let mut conn = test_store();
        insert_record(&mut conn, &config(), &record(1, 53_800, "NY", 2015)).expect("insert");

        let mut moved = record(1, 53_800, "NY", 2015);
        moved.committee_id = "C67890".into();
        update_record(&mut conn, &config(), &moved).expect("update");

        assert_eq!(state_row(&conn, 2016, "NY"), (0, 0));
        let other: (i64, i64) = conn
            .query_row(
                "SELECT count, total_cents FROM totals_by_state
                 WHERE committee_id = 'C67890' AND cycle = 2016 AND state = 'NY'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("moved row");
        assert_eq!(other, (1, 53_800));
    }

    #[test]
    fn delete_zeroes_rollups_and_removes_search_row() {
        let mut conn = test_store();
        insert_record(&mut conn, &config(), &record(1, 53_800, "NY", 2015)).expect("insert");

        delete_record(&mut conn, &config(), 1).expect("delete");

        // Rollup rows are retained, zeroed.
        assert_eq!(state_row(&conn, 2016, "NY"), (0, 0));

        let ledger_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM itemized", [], |row| row.get(0))
            .expect("ledger count");
        assert_eq!(ledger_rows, 0);

        let search_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM itemized_search", [], |row| row.get(0))
            .expect("search count");
        assert_eq!(search_rows, 0);
    }

    #[test]
    fn search_row_tracks_the_name_through_its_lifecycle() {
        let mut conn = test_store();
        insert_record(&mut conn, &config(), &record(42, 53_800, "NY", 2014)).expect("insert");
        insert_record(&mut conn, &config(), &record(43, 100, "CA", 2014)).expect("bystander");

        let vector: String = conn
            .query_row(
                "SELECT name_vector FROM itemized_search WHERE sub_id = 42",
                [],
                |row| row.get(0),
            )
            .expect("search row");
        assert_eq!(vector, "'adelson':2 'sheldon':1");

        let mut renamed = record(42, 53_800, "NY", 2014);
        renamed.contributor_name = Some("Shelly Adelson".into());
        update_record(&mut conn, &config(), &renamed).expect("rename");

        let vector: String = conn
            .query_row(
                "SELECT name_vector FROM itemized_search WHERE sub_id = 42",
                [],
                |row| row.get(0),
            )
            .expect("search row");
        assert_eq!(vector, "'adelson':2 'shelli':1");

        // The unrelated row is untouched.
        let bystander: String = conn
            .query_row(
                "SELECT name_vector FROM itemized_search WHERE sub_id = 43",
                [],
                |row| row.get(0),
            )
            .expect("bystander row");
        assert_eq!(bystander, "'adelson':2 'sheldon':1");

        delete_record(&mut conn, &config(), 42).expect("delete");
        let remaining: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM itemized_search WHERE sub_id = 42",
                [],
                |row| row.get(0),
            )
            .expect("count");
        assert_eq!(remaining, 0);
    }

    #[test]
    fn invalid_date_rejects_the_whole_event() {
        let mut conn = test_store();
        let mut bad = record(1, 53_800, "NY", 2015);
        bad.report_year = None;

        let err = insert_record(&mut conn, &config(), &bad).expect_err("no derivable cycle");
        let core = err.downcast_ref::<CoreError>().expect("typed error");
        assert_eq!(core.code(), "E2001");

        // Atomicity: neither the ledger row nor any derived row exists.
        let ledger_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM itemized", [], |row| row.get(0))
            .expect("ledger count");
        assert_eq!(ledger_rows, 0);
        let rollup_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM totals_by_state", [], |row| row.get(0))
            .expect("rollup count");
        assert_eq!(rollup_rows, 0);
        let search_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM itemized_search", [], |row| row.get(0))
            .expect("search count");
        assert_eq!(search_rows, 0);
    }

    #[test]
    fn update_of_missing_record_is_not_found() {
        let mut conn = test_store();
        let err = update_record(&mut conn, &config(), &record(9, 100, "NY", 2015))
            .expect_err("nothing to update");
        let core = err.downcast_ref::<CoreError>().expect("typed error");
        assert_eq!(core.code(), "E2002");
    }

    #[test]
    fn delete_of_missing_record_is_not_found() {
        let mut conn = test_store();
        let err = delete_record(&mut conn, &config(), 9).expect_err("nothing to delete");
        let core = err.downcast_ref::<CoreError>().expect("typed error");
        assert_eq!(core.code(), "E2002");
    }

    #[test]
    fn get_record_round_trips() {
        let mut conn = test_store();
        let rec = record(5, 53_800, "NY", 2015);
        insert_record(&mut conn, &config(), &rec).expect("insert");

        let fetched = get_record(&conn, 5).expect("query").expect("present");
        assert_eq!(fetched, rec);
        assert!(get_record(&conn, 6).expect("query").is_none());
    }
}
