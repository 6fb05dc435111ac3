//! The aggregation engine: ledger change events → minimal rollup deltas.
//!
//! Invariant maintained: after every committed mutation, each rollup row
//! equals (count, sum) over the live ledger rows categorizing to its key.
//! Deltas to different keys commute; deltas to the same key are
//! serialized by the enclosing transaction, so the engine must run inside
//! the same transaction as the ledger write it reacts to.

use anyhow::{Context, Result, ensure};
use rusqlite::Connection;

use crate::categorize;
use crate::config::AggregationConfig;
use crate::db::aggregate::{self, AGGREGATE_TABLES};
use crate::db::search;
use crate::model::ItemizedRecord;

/// A change event on the source ledger.
///
/// `Updated` carries both snapshots so the engine can categorize the
/// pre-image and post-image independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    Inserted(ItemizedRecord),
    Updated {
        old: ItemizedRecord,
        new: ItemizedRecord,
    },
    Deleted(ItemizedRecord),
}

/// Applies ledger change events to the rollup tables and the search
/// shadow. Bind it to the transaction that carries the ledger write.
pub struct Engine<'conn> {
    conn: &'conn Connection,
    config: &'conn AggregationConfig,
}

impl<'conn> Engine<'conn> {
    #[must_use]
    pub const fn new(conn: &'conn Connection, config: &'conn AggregationConfig) -> Self {
        Self { conn, config }
    }

    /// Apply one event's deltas.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::CoreError::InvalidDate`] when a snapshot
    /// cannot be categorized — the caller's transaction must roll back so
    /// no partial state survives — or any store failure.
    pub fn apply(&self, event: &LedgerEvent) -> Result<()> {
        match event {
            LedgerEvent::Inserted(record) => self.apply_insert(record),
            LedgerEvent::Updated { old, new } => self.apply_update(old, new),
            LedgerEvent::Deleted(record) => self.apply_delete(record),
        }
    }

    fn apply_insert(&self, record: &ItemizedRecord) -> Result<()> {
        let keys = categorize::categorize(record, self.config)?;
        for table in AGGREGATE_TABLES {
            aggregate::increment(self.conn, table, &record.committee_id, &keys, record.amount_cents)?;
        }
        search::upsert_row(self.conn, record.sub_id, record.contributor_name.as_deref())
            .with_context(|| format!("project search row for record {}", record.sub_id))?;
        Ok(())
    }

    fn apply_update(&self, old: &ItemizedRecord, new: &ItemizedRecord) -> Result<()> {
        ensure!(
            old.sub_id == new.sub_id,
            "update changed ledger identity: {} -> {}",
            old.sub_id,
            new.sub_id
        );

        let old_keys = categorize::categorize(old, self.config)?;
        let new_keys = categorize::categorize(new, self.config)?;

        for table in AGGREGATE_TABLES {
            let same_key = old.committee_id == new.committee_id
                && old_keys.cycle == new_keys.cycle
                && old_keys.value(table.dimension) == new_keys.value(table.dimension);

            if same_key {
                let delta = new.amount_cents - old.amount_cents;
                if delta != 0 {
                    aggregate::adjust_total(self.conn, table, &new.committee_id, &new_keys, delta)?;
                }
            } else {
                // Moved across keys: decrement the old row and increment
                // the new one as two independent deltas, never one
                // in-place rewrite.
                aggregate::decrement(self.conn, table, &old.committee_id, &old_keys, old.amount_cents)?;
                aggregate::increment(self.conn, table, &new.committee_id, &new_keys, new.amount_cents)?;
            }
        }

        // The search row is a pure function of the current name: re-derive
        // it whole rather than diffing against the old vector.
        search::upsert_row(self.conn, new.sub_id, new.contributor_name.as_deref())
            .with_context(|| format!("reproject search row for record {}", new.sub_id))?;
        Ok(())
    }

    fn apply_delete(&self, record: &ItemizedRecord) -> Result<()> {
        let keys = categorize::categorize(record, self.config)?;
        for table in AGGREGATE_TABLES {
            aggregate::decrement(self.conn, table, &record.committee_id, &keys, record.amount_cents)?;
        }
        // When the caller has already deleted the base row the FK cascade
        // removed this one; the explicit delete covers engine use against
        // a still-present ledger row.
        search::delete_row(self.conn, record.sub_id)?;
        Ok(())
    }
}
