use std::path::Path;

use anyhow::Result;
use tally_core::db::{migrations, open_store};

use crate::output::OutputMode;

/// Run `tally init`: create (or migrate) the store at `db`.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or migrated.
pub fn run(db: &Path, mode: OutputMode) -> Result<()> {
    let conn = open_store(db)?;
    let version = migrations::current_schema_version(&conn)?;

    match mode {
        OutputMode::Json => println!(
            "{}",
            serde_json::json!({
                "db": db.display().to_string(),
                "schema_version": version,
            })
        ),
        OutputMode::Human => {
            println!("initialized {} at schema v{version}", db.display());
        }
    }
    Ok(())
}
