//! Job run history command implementation.

use crate::cli::commands::open_repository;
use crate::error::Result;
use crate::model::{Entity, JobRunHistoryQuery};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobsOutput<'a> {
    job_id: &'a str,
    runs: Vec<Entity>,
    count: usize,
}

fn field<'a>(run: &'a Entity, name: &str) -> &'a str {
    run.get(name)
        .and_then(serde_json::Value::as_str)
        .unwrap_or("-")
}

/// Show runs of a job, most recent first.
///
/// # Errors
///
/// Returns an error if the store cannot be read or a row is corrupt.
pub fn execute(
    job_id: &str,
    before: Option<&str>,
    limit: Option<u32>,
    db_path: Option<&PathBuf>,
    json: bool,
) -> Result<()> {
    let query = JobRunHistoryQuery {
        job_id: job_id.to_string(),
        before_at: before.map(ToString::to_string),
        limit,
    };

    let repo = open_repository(db_path)?;
    let runs = repo.list_job_run_history(&query)?;

    if json {
        let output = JobsOutput {
            job_id,
            count: runs.len(),
            runs,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if runs.is_empty() {
        println!("No runs for job {job_id}.");
    } else {
        for run in &runs {
            let status = field(run, "status");
            let status = if status == "failed" {
                status.red()
            } else {
                status.green()
            };
            println!("{} {} {status}", field(run, "at").dimmed(), field(run, "id"));
            if let Some(error) = run.get("error").and_then(serde_json::Value::as_str) {
                println!("    {}", error.red());
            }
        }
    }

    repo.close()
}
