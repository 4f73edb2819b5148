//! Migrate command implementation.

use crate::cli::commands::open_repository;
use crate::error::Result;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct MigrateOutput<'a> {
    path: String,
    applied: &'a [String],
    skipped: usize,
}

/// Open the store, applying any pending migrations, and report what ran.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or a migration fails.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let repo = open_repository(db_path)?;
    let report = repo.migration_report();

    if json {
        let output = MigrateOutput {
            path: repo.path().display().to_string(),
            applied: &report.applied,
            skipped: report.skipped,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if report.applied.is_empty() {
        println!(
            "{} ({} already applied)",
            "Schema is up to date".green(),
            report.skipped
        );
    } else {
        for id in &report.applied {
            println!("{} {id}", "Applied".green().bold());
        }
        println!("{} applied, {} skipped", report.applied.len(), report.skipped);
    }

    repo.close()
}
