//! Search-shadow maintenance and BM25-ranked name lookup.
//!
//! `itemized_search` holds the rendered lexical vector for every ledger
//! row (1:1, FK cascade); `itemized_fts` indexes the pre-stemmed token
//! text and is kept in sync by the triggers in [`super::schema`].
//! Stemming happens in [`crate::lexical`], so free-form queries are
//! stemmed here through the same pipeline before matching.

use anyhow::{Context, Result};
use rusqlite::{Connection, params};

use super::query::SearchHit;
use crate::lexical;

/// Write (or rewrite) the search row for one ledger record. The whole
/// vector is re-derived from the current name, never patched.
///
/// # Errors
///
/// Returns an error if the upsert fails (including an FK violation when
/// the ledger row does not exist).
pub fn upsert_row(conn: &Connection, sub_id: i64, name: Option<&str>) -> Result<()> {
    let vector = lexical::project(name.unwrap_or_default());
    conn.execute(
        "INSERT INTO itemized_search (sub_id, name_vector, tokens)
         VALUES (?1, ?2, ?3)
         ON CONFLICT (sub_id)
         DO UPDATE SET name_vector = excluded.name_vector, tokens = excluded.tokens",
        params![sub_id, vector.to_string(), vector.token_text()],
    )
    .with_context(|| format!("upsert search row {sub_id}"))?;
    Ok(())
}

/// Remove the search row for a deleted ledger record. A no-op when the
/// FK cascade already dropped it.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_row(conn: &Connection, sub_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM itemized_search WHERE sub_id = ?1",
        params![sub_id],
    )
    .with_context(|| format!("delete search row {sub_id}"))?;
    Ok(())
}

/// Search contributor names, ranked by BM25 relevance.
///
/// Query terms are stemmed through the projector and combined with AND,
/// so `"Shelly"` finds rows stored as `shelli`. An empty or
/// all-punctuation query returns no hits.
///
/// # Errors
///
/// Returns an error if the FTS query fails.
pub fn search_names(conn: &Connection, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
    let tokens = lexical::stem_query(query);
    if tokens.is_empty() {
        return Ok(Vec::new());
    }
    let match_expr = tokens
        .iter()
        .map(|token| format!("\"{token}\""))
        .collect::<Vec<_>>()
        .join(" AND ");

    let sql = "SELECT itemized_fts.sub_id, COALESCE(i.contributor_name, ''), \
                      bm25(itemized_fts) AS rank \
               FROM itemized_fts \
               INNER JOIN itemized i ON i.sub_id = itemized_fts.sub_id \
               WHERE itemized_fts MATCH ?1 \
               ORDER BY rank \
               LIMIT ?2";

    let mut stmt = conn.prepare(sql).context("prepare name search query")?;
    let rows = stmt
        .query_map(params![match_expr, limit], |row| {
            Ok(SearchHit {
                sub_id: row.get(0)?,
                contributor_name: row.get(1)?,
                rank: row.get(2)?,
            })
        })
        .with_context(|| format!("execute name search for '{query}'"))?;

    let mut hits = Vec::new();
    for row in rows {
        hits.push(row.context("read search hit")?);
    }
    Ok(hits)
}

/// Rebuild the FTS index from the current search-shadow content. Useful
/// when the index is suspected to be out of sync.
///
/// # Errors
///
/// Returns an error if the rebuild SQL fails.
pub fn rebuild_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "DELETE FROM itemized_fts;
         INSERT INTO itemized_fts(rowid, tokens, sub_id)
         SELECT sub_id, tokens, sub_id FROM itemized_search;",
    )
    .context("rebuild FTS index from itemized_search")?;
    Ok(())
}

/// Validate that the search shadow is 1:1 with the ledger and the FTS
/// index tracks it.
///
/// # Errors
///
/// Returns an error if the counting queries fail.
pub fn search_in_sync(conn: &Connection) -> Result<bool> {
    let ledger: i64 = conn
        .query_row("SELECT COUNT(*) FROM itemized", [], |row| row.get(0))
        .context("count ledger rows")?;
    let shadow: i64 = conn
        .query_row("SELECT COUNT(*) FROM itemized_search", [], |row| row.get(0))
        .context("count search rows")?;
    let fts: i64 = conn
        .query_row("SELECT COUNT(*) FROM itemized_fts", [], |row| row.get(0))
        .context("count FTS rows")?;

    Ok(ledger == shadow && shadow == fts)
}
