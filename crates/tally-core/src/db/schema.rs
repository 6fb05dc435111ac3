//! Canonical `SQLite` schema for the tally store.
//!
//! One mutable base table (`itemized`) plus derived tables the engine
//! keeps consistent with it:
//! - `totals_by_state` / `totals_by_zip` / `totals_by_size` hold additive
//!   (count, total) rollups keyed by (committee, cycle, dimension value)
//! - `itemized_search` shadows the ledger 1:1 with the rendered lexical
//!   vector; `itemized_fts` indexes its token text for ranked lookup
//! - `store_meta` tracks schema version and the last rebuild timestamp
//! - `rebuild_locks` grants a rebuild exclusive ownership of a cycle range

/// Migration v1: ledger, rollup tables, metadata, rebuild locks.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS itemized (
    sub_id INTEGER PRIMARY KEY,
    committee_id TEXT NOT NULL CHECK (length(trim(committee_id)) > 0),
    report_year INTEGER,
    amount_cents INTEGER NOT NULL,
    state TEXT,
    zip TEXT,
    contributor_name TEXT,
    is_memo INTEGER NOT NULL DEFAULT 0 CHECK (is_memo IN (0, 1)),
    loaded_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS totals_by_state (
    committee_id TEXT NOT NULL,
    cycle INTEGER NOT NULL,
    state TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    total_cents INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (committee_id, cycle, state)
);

CREATE TABLE IF NOT EXISTS totals_by_zip (
    committee_id TEXT NOT NULL,
    cycle INTEGER NOT NULL,
    zip TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    total_cents INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (committee_id, cycle, zip)
);

CREATE TABLE IF NOT EXISTS totals_by_size (
    committee_id TEXT NOT NULL,
    cycle INTEGER NOT NULL,
    size_cents INTEGER NOT NULL,
    count INTEGER NOT NULL DEFAULT 0 CHECK (count >= 0),
    total_cents INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (committee_id, cycle, size_cents)
);

CREATE TABLE IF NOT EXISTS rebuild_locks (
    cycle_first INTEGER NOT NULL,
    cycle_last INTEGER NOT NULL,
    locked_at_us INTEGER NOT NULL,
    PRIMARY KEY (cycle_first, cycle_last),
    CHECK (cycle_first <= cycle_last)
);

CREATE TABLE IF NOT EXISTS store_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    last_rebuild_at_us INTEGER NOT NULL DEFAULT 0
);

INSERT OR IGNORE INTO store_meta (id, schema_version, last_rebuild_at_us)
VALUES (1, 1, 0);
";

/// Migration v2: read-path indexes, the search shadow table, and the FTS5
/// index with its sync triggers.
///
/// The FTS tokenizer is plain `unicode61` on purpose: token text arrives
/// pre-stemmed from the lexical projector, and queries are stemmed
/// through the same projector before matching.
pub const MIGRATION_V2_SQL: &str = r"
CREATE INDEX IF NOT EXISTS idx_itemized_committee_year
    ON itemized(committee_id, report_year);

CREATE INDEX IF NOT EXISTS idx_itemized_year
    ON itemized(report_year);

CREATE INDEX IF NOT EXISTS idx_totals_by_state_cycle
    ON totals_by_state(cycle);

CREATE INDEX IF NOT EXISTS idx_totals_by_zip_cycle
    ON totals_by_zip(cycle);

CREATE INDEX IF NOT EXISTS idx_totals_by_size_cycle
    ON totals_by_size(cycle);

CREATE TABLE IF NOT EXISTS itemized_search (
    sub_id INTEGER PRIMARY KEY REFERENCES itemized(sub_id) ON DELETE CASCADE,
    name_vector TEXT NOT NULL,
    tokens TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS itemized_fts USING fts5(
    tokens,
    sub_id UNINDEXED,
    tokenize='unicode61'
);

CREATE TRIGGER IF NOT EXISTS itemized_search_ai
AFTER INSERT ON itemized_search
BEGIN
    INSERT INTO itemized_fts(rowid, tokens, sub_id)
    VALUES (new.sub_id, new.tokens, new.sub_id);
END;

CREATE TRIGGER IF NOT EXISTS itemized_search_au
AFTER UPDATE ON itemized_search
BEGIN
    DELETE FROM itemized_fts WHERE rowid = old.sub_id;

    INSERT INTO itemized_fts(rowid, tokens, sub_id)
    VALUES (new.sub_id, new.tokens, new.sub_id);
END;

CREATE TRIGGER IF NOT EXISTS itemized_search_ad
AFTER DELETE ON itemized_search
BEGIN
    DELETE FROM itemized_fts WHERE rowid = old.sub_id;
END;

DELETE FROM itemized_fts;
INSERT INTO itemized_fts(rowid, tokens, sub_id)
SELECT sub_id, tokens, sub_id FROM itemized_search;

UPDATE store_meta
SET schema_version = 2
WHERE id = 1;
";

/// Indexes expected by the ledger-scan and rollup read paths.
pub const REQUIRED_INDEXES: &[&str] = &[
    "idx_itemized_committee_year",
    "idx_itemized_year",
    "idx_totals_by_state_cycle",
    "idx_totals_by_zip_cycle",
    "idx_totals_by_size_cycle",
];
