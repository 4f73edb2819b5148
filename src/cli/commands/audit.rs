//! Audit command implementation.

use crate::cli::commands::open_repository;
use crate::error::Result;
use crate::model::{AuditFilter, AuditTransition};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct AuditOutput {
    transitions: Vec<AuditTransition>,
    count: usize,
}

/// Show audit transitions, oldest first.
///
/// # Errors
///
/// Returns an error if the store cannot be read or a row is corrupt.
pub fn execute(
    entity_type: Option<&str>,
    entity_id: Option<&str>,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let filter = AuditFilter {
        entity_type: entity_type.map(ToString::to_string),
        entity_id: entity_id.map(ToString::to_string),
    };

    let repo = open_repository(db_path)?;
    let transitions = repo.list_audit_trail(&filter)?;

    if json {
        let output = AuditOutput {
            count: transitions.len(),
            transitions,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if transitions.is_empty() {
        println!("No transitions.");
    } else {
        for t in &transitions {
            println!(
                "{} {} {} {} -> {} by {}:{}",
                t.at.format("%Y-%m-%d %H:%M:%S").to_string().dimmed(),
                t.entity_type,
                t.entity_id.bold(),
                t.from_state.as_deref().unwrap_or("-"),
                t.to_state,
                t.actor.kind,
                t.actor.id
            );
            if let Some(reason) = &t.reason {
                println!("    {reason}");
            }
        }
    }

    repo.close()
}
