//! Status command implementation.

use crate::cli::commands::open_repository;
use crate::error::Result;
use crate::storage::LedgerRow;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct StatusOutput {
    path: String,
    migrations: Vec<LedgerRow>,
    counts: Vec<EntityCount>,
}

#[derive(Serialize)]
struct EntityCount {
    entity_type: &'static str,
    count: u64,
}

/// Show the migration ledger and row counts per entity type.
///
/// # Errors
///
/// Returns an error if the store cannot be opened or read.
pub fn execute(db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let repo = open_repository(db_path)?;
    let migrations = repo.ledger()?;
    let counts: Vec<EntityCount> = repo
        .entity_counts()?
        .into_iter()
        .map(|(entity_type, count)| EntityCount { entity_type, count })
        .collect();

    if json {
        let output = StatusOutput {
            path: repo.path().display().to_string(),
            migrations,
            counts,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("{}", "Entity Store Status".bold());
        println!("Store: {}", repo.path().display());
        println!();

        println!("{}", "Migrations".cyan().bold());
        for row in &migrations {
            println!("  {} {} {}", row.id, row.name, row.applied_at.dimmed());
        }
        println!();

        println!("{}", "Entities".cyan().bold());
        for c in &counts {
            println!("  {:<12} {}", c.entity_type, c.count);
        }
    }

    repo.close()
}
