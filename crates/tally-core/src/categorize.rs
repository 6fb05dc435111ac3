//! Pure derivation of aggregation dimension keys from a ledger record.
//!
//! Categorization is a pure function of the record snapshot so the engine
//! can categorize the pre-image and post-image of an update independently
//! and emit minimal deltas. No I/O, no clock, no connection.

use rusqlite::types::Value;

use crate::config::AggregationConfig;
use crate::error::CoreError;
use crate::model::ItemizedRecord;

/// Sentinel size bucket shared by all negative amounts (refunds,
/// reattributions); never merged with the positive bucket of the same
/// magnitude.
pub const NEGATIVE_BUCKET: i64 = -1;

/// Categorical axes the rollup tables are partitioned on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    State,
    Zip,
    Size,
}

/// The dimension keys one record snapshot contributes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DimensionKeys {
    pub cycle: i64,
    pub state: String,
    pub zip5: String,
    pub size_bucket: i64,
}

impl DimensionKeys {
    /// The key value along one axis, typed for `SQLite` binding.
    #[must_use]
    pub fn value(&self, dimension: Dimension) -> Value {
        match dimension {
            Dimension::State => Value::Text(self.state.clone()),
            Dimension::Zip => Value::Text(self.zip5.clone()),
            Dimension::Size => Value::Integer(self.size_bucket),
        }
    }
}

/// Resolve the two-year election cycle for a record: the smallest even
/// year at or after the report year.
///
/// # Errors
///
/// Returns [`CoreError::InvalidDate`] when the report year is missing or
/// outside the configured plausible range.
pub fn record_cycle(
    record: &ItemizedRecord,
    config: &AggregationConfig,
) -> Result<i64, CoreError> {
    let year = record.report_year.ok_or(CoreError::InvalidDate {
        sub_id: record.sub_id,
        report_year: None,
    })?;
    if year < config.min_report_year || year > config.max_report_year {
        return Err(CoreError::InvalidDate {
            sub_id: record.sub_id,
            report_year: Some(year),
        });
    }
    Ok(year + year.rem_euclid(2))
}

/// Derive every dimension key for a record snapshot.
///
/// Absent state or zip still categorize (the empty-string key is a
/// legitimate bucket, not a drop).
///
/// # Errors
///
/// Returns [`CoreError::InvalidDate`] as [`record_cycle`] does.
pub fn categorize(
    record: &ItemizedRecord,
    config: &AggregationConfig,
) -> Result<DimensionKeys, CoreError> {
    let cycle = record_cycle(record, config)?;
    Ok(DimensionKeys {
        cycle,
        state: normalize_state(record.state.as_deref()),
        zip5: zip5(record.zip.as_deref()),
        size_bucket: size_bucket(record.amount_cents, config.size_bucket_cents),
    })
}

/// Floor an amount onto a bucket boundary. Pure floor division on the
/// configured width, no upper clamp; all negative amounts share
/// [`NEGATIVE_BUCKET`].
#[must_use]
pub const fn size_bucket(amount_cents: i64, width_cents: i64) -> i64 {
    if amount_cents < 0 {
        NEGATIVE_BUCKET
    } else {
        (amount_cents / width_cents) * width_cents
    }
}

fn normalize_state(state: Option<&str>) -> String {
    state.map_or("", str::trim).to_ascii_uppercase()
}

fn zip5(zip: Option<&str>) -> String {
    zip.map_or("", str::trim).chars().take(5).collect()
}
