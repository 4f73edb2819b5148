//! Command implementations.

pub mod audit;
pub mod completions;
pub mod entity;
pub mod jobs;
pub mod migrate;
pub mod status;
pub mod version;

use crate::config::resolve_db_path;
use crate::error::{Error, Result};
use crate::storage::{CoreRepository, RepositoryOptions};
use std::path::PathBuf;

/// Open the repository at the resolved path, creating its directory if needed.
///
/// Opening always brings the schema up to date.
pub(crate) fn open_repository(db_path: Option<&PathBuf>) -> Result<CoreRepository> {
    let db_path = resolve_db_path(db_path.map(PathBuf::as_path))
        .ok_or_else(|| Error::Config("Cannot determine home directory for the store".into()))?;

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    CoreRepository::open(RepositoryOptions::from_env(db_path))
}
