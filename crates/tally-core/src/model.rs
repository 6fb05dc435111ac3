//! Ledger record types.

use serde::{Deserialize, Serialize};

/// One itemized transaction (receipt or disbursement) as filed.
///
/// Identity is the `sub_id` surrogate key; content is mutable through
/// [`crate::db::ledger::update_record`]. Amounts are signed fixed-point
/// cents, receipts positive, so the additive rollups sum exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemizedRecord {
    pub sub_id: i64,
    pub committee_id: String,
    /// Raw filing year; the election cycle is derived, never stored here.
    #[serde(default)]
    pub report_year: Option<i64>,
    pub amount_cents: i64,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub contributor_name: Option<String>,
    #[serde(default)]
    pub is_memo: bool,
    #[serde(default)]
    pub loaded_at_us: i64,
}
