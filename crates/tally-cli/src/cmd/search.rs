use std::path::Path;

use anyhow::Result;
use clap::Args;
use tally_core::db::{open_store, search};

use crate::output::OutputMode;

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Free-form name query; terms are stemmed and ANDed.
    pub query: String,

    /// Maximum number of hits.
    #[arg(long, default_value_t = 10)]
    pub limit: u32,
}

/// Run `tally search`: BM25-ranked contributor-name lookup.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or the query fails.
pub fn run(db: &Path, args: &SearchArgs, mode: OutputMode) -> Result<()> {
    let conn = open_store(db)?;
    let hits = search::search_names(&conn, &args.query, args.limit)?;

    match mode {
        OutputMode::Json => {
            let objects: Vec<serde_json::Value> = hits
                .iter()
                .map(|hit| {
                    serde_json::json!({
                        "sub_id": hit.sub_id,
                        "contributor_name": hit.contributor_name,
                        "rank": hit.rank,
                    })
                })
                .collect();
            println!("{}", serde_json::json!({ "hits": objects }));
        }
        OutputMode::Human => {
            if hits.is_empty() {
                println!("no matches for '{}'", args.query);
            }
            for hit in &hits {
                println!("{}\t{}\trank={:.3}", hit.sub_id, hit.contributor_name, hit.rank);
            }
        }
    }
    Ok(())
}
