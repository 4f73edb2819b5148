//! Configuration management.
//!
//! This module resolves the store path, the SQLite busy timeout and the
//! default actor from CLI flags, environment variables and the home
//! directory.
//!
//! Every store lives at a single global location unless overridden:
//! `~/.estore/data/estore.db`.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Busy timeout used when `ESTORE_BUSY_TIMEOUT_MS` is unset or invalid.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Get the global estore directory location (`~/.estore/`).
#[must_use]
pub fn global_estore_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|b| b.home_dir().join(".estore"))
}

/// Check if test mode is enabled.
///
/// Test mode is enabled by setting `ESTORE_TEST_DB=1` (or any non-empty value
/// other than `0`/`false`). All store access is then redirected to an
/// isolated test database.
#[must_use]
pub fn is_test_mode() -> bool {
    std::env::var("ESTORE_TEST_DB").is_ok_and(|v| is_truthy(&v))
}

fn is_truthy(value: &str) -> bool {
    !value.is_empty() && value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Get the test database path (`~/.estore/test/estore.db`).
#[must_use]
pub fn test_db_path() -> Option<PathBuf> {
    global_estore_dir().map(|dir| dir.join("test").join("estore.db"))
}

/// Resolve the database path.
///
/// Priority:
/// 1. If `explicit_path` is provided, use it directly
/// 2. `ESTORE_TEST_DB` environment variable → uses test database
/// 3. `ESTORE_DB` environment variable
/// 4. Global location: `~/.estore/data/estore.db`
///
/// Returns `None` only when no home directory can be found.
#[must_use]
pub fn resolve_db_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return Some(path.to_path_buf());
    }

    if is_test_mode() {
        return test_db_path();
    }

    if let Ok(db_path) = std::env::var("ESTORE_DB") {
        if !db_path.trim().is_empty() {
            return Some(PathBuf::from(db_path));
        }
    }

    global_estore_dir().map(|dir| dir.join("data").join("estore.db"))
}

/// SQLite busy timeout.
///
/// Reads `ESTORE_BUSY_TIMEOUT_MS`; falls back to [`DEFAULT_BUSY_TIMEOUT`].
#[must_use]
pub fn busy_timeout() -> Duration {
    parse_busy_timeout(std::env::var("ESTORE_BUSY_TIMEOUT_MS").ok().as_deref())
}

fn parse_busy_timeout(raw: Option<&str>) -> Duration {
    raw.and_then(|ms| ms.trim().parse::<u64>().ok())
        .map_or(DEFAULT_BUSY_TIMEOUT, Duration::from_millis)
}

/// Get the default actor name for audit transitions.
///
/// Priority:
/// 1. `ESTORE_ACTOR` environment variable
/// 2. System username
/// 3. "unknown"
#[must_use]
pub fn default_actor() -> String {
    for var in ["ESTORE_ACTOR", "USER"] {
        if let Ok(actor) = std::env::var(var) {
            if !actor.trim().is_empty() {
                return actor;
            }
        }
    }
    "unknown".to_string()
}
