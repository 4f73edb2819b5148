//! Version command implementation.

use crate::error::Result;
use crate::storage::migrations::default_catalog;
use serde::Serialize;

#[derive(Serialize)]
struct VersionOutput<'a> {
    version: &'a str,
    build: &'a str,
    schema: Option<String>,
}

/// Print the crate version and the newest built-in migration id.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(json: bool) -> Result<()> {
    let version = env!("CARGO_PKG_VERSION");
    let build = if cfg!(debug_assertions) {
        "dev"
    } else {
        "release"
    };
    let schema = default_catalog().into_iter().map(|m| m.id).max();

    if json {
        let output = VersionOutput {
            version,
            build,
            schema,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    match schema {
        Some(schema) => println!("estore version {version} ({build}, schema {schema})"),
        None => println!("estore version {version} ({build})"),
    }
    Ok(())
}
