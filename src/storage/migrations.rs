//! Checksummed schema migrations.
//!
//! The built-in catalog is sourced from `/migrations/` at the crate root and
//! embedded into the binary using `include_str!`. Each applied migration is
//! recorded in the `schema_migrations` ledger together with the SHA-256 of
//! its SQL; a ledger entry whose checksum no longer matches the catalog is a
//! fatal integrity error and is never reconciled automatically.

use crate::error::{Error, Result, StorageContext};
use rusqlite::{Connection, TransactionBehavior, params};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Name of the ledger table.
pub const LEDGER_TABLE: &str = "schema_migrations";

/// A single named migration with its content checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub id: String,
    pub name: String,
    pub sql: String,
    pub checksum: String,
}

impl Migration {
    /// Create a migration whose checksum is the SHA-256 of `sql`.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let checksum = compute_checksum(&sql);
        Self {
            id: id.into(),
            name: name.into(),
            sql,
            checksum,
        }
    }

    /// Create a migration with an explicitly supplied checksum.
    #[must_use]
    pub fn with_checksum(
        id: impl Into<String>,
        name: impl Into<String>,
        sql: impl Into<String>,
        checksum: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sql: sql.into(),
            checksum: checksum.into(),
        }
    }
}

/// Compute the lowercase hex SHA-256 of migration SQL.
#[must_use]
pub fn compute_checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct EmbeddedMigration {
    id: &'static str,
    name: &'static str,
    sql: &'static str,
}

/// Built-in migrations, embedded at compile time.
///
/// Ids match the SQL filenames (without .sql extension).
const MIGRATIONS: &[EmbeddedMigration] = &[
    EmbeddedMigration {
        id: "001_core_entities",
        name: "Create task, note and signal tables",
        sql: include_str!("../../migrations/001_core_entities.sql"),
    },
    EmbeddedMigration {
        id: "002_audit_transitions",
        name: "Create append-only audit log",
        sql: include_str!("../../migrations/002_audit_transitions.sql"),
    },
    EmbeddedMigration {
        id: "003_jobs",
        name: "Create jobs and job run history",
        sql: include_str!("../../migrations/003_jobs.sql"),
    },
    EmbeddedMigration {
        id: "004_checkpoints_and_views",
        name: "Create checkpoints and saved views",
        sql: include_str!("../../migrations/004_checkpoints_and_views.sql"),
    },
];

/// The built-in migration catalog.
#[must_use]
pub fn default_catalog() -> Vec<Migration> {
    MIGRATIONS
        .iter()
        .map(|m| Migration::new(m.id, m.name, m.sql))
        .collect()
}

/// One applied migration as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerRow {
    pub id: String,
    pub name: String,
    pub checksum: String,
    pub applied_at: String,
}

/// Outcome of a migration run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Ids applied by this run, in application order.
    pub applied: Vec<String>,
    /// Number of catalog entries already present in the ledger.
    pub skipped: usize,
}

/// Create the ledger table if it does not exist.
///
/// # Errors
///
/// Returns an error if the `CREATE TABLE` statement fails.
pub fn ensure_ledger(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            checksum TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .storage("ensure_ledger", LEDGER_TABLE)
}

/// Sort a catalog by id, rejecting duplicate ids.
///
/// # Errors
///
/// Returns [`Error::DuplicateMigrationId`] if two entries share an id.
pub fn sort_migrations(catalog: &[Migration]) -> Result<Vec<&Migration>> {
    let mut sorted: Vec<&Migration> = catalog.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    if let Some(pair) = sorted.windows(2).find(|pair| pair[0].id == pair[1].id) {
        return Err(Error::DuplicateMigrationId {
            id: pair[0].id.clone(),
        });
    }

    Ok(sorted)
}

/// Apply every catalog migration missing from the ledger.
///
/// The ledger must already exist. Checksums of applied migrations are all
/// verified before anything new is applied.
///
/// # Errors
///
/// Returns [`Error::DuplicateMigrationId`], [`Error::ChecksumMismatch`] or
/// [`Error::MigrationApplyFailed`]. None of them are retried.
pub fn apply_pending_migrations(
    conn: &mut Connection,
    catalog: &[Migration],
) -> Result<MigrationReport> {
    let sorted = sort_migrations(catalog)?;
    apply_sorted(conn, &sorted)
}

/// Bring the store up to the state implied by `catalog`.
///
/// Idempotent and safe to call on every open. Duplicate ids are rejected
/// before any SQL runs.
///
/// # Errors
///
/// See [`apply_pending_migrations`]; also fails if the ledger cannot be created.
pub fn run_migrations(conn: &mut Connection, catalog: &[Migration]) -> Result<MigrationReport> {
    let sorted = sort_migrations(catalog)?;
    ensure_ledger(conn)?;
    apply_sorted(conn, &sorted)
}

/// List ledger rows ordered by id.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<LedgerRow>> {
    let mut stmt = conn
        .prepare("SELECT id, name, checksum, applied_at FROM schema_migrations ORDER BY id")
        .storage("applied_migrations", LEDGER_TABLE)?;

    let rows = stmt
        .query_map([], |row| {
            Ok(LedgerRow {
                id: row.get(0)?,
                name: row.get(1)?,
                checksum: row.get(2)?,
                applied_at: row.get(3)?,
            })
        })
        .storage("applied_migrations", LEDGER_TABLE)?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .storage("applied_migrations", LEDGER_TABLE)
}

fn recorded_checksums(conn: &Connection) -> Result<HashMap<String, String>> {
    let mut stmt = conn
        .prepare("SELECT id, checksum FROM schema_migrations")
        .storage("read_ledger", LEDGER_TABLE)?;

    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .storage("read_ledger", LEDGER_TABLE)?;

    rows.collect::<rusqlite::Result<HashMap<_, _>>>()
        .storage("read_ledger", LEDGER_TABLE)
}

fn apply_sorted(conn: &mut Connection, sorted: &[&Migration]) -> Result<MigrationReport> {
    let recorded = recorded_checksums(conn)?;

    let known: HashSet<&str> = sorted.iter().map(|m| m.id.as_str()).collect();
    for id in recorded.keys().filter(|id| !known.contains(id.as_str())) {
        warn!(id = %id, "Ledger contains a migration unknown to this catalog");
    }

    for migration in sorted {
        if let Some(stored) = recorded.get(&migration.id) {
            if *stored != migration.checksum {
                return Err(Error::ChecksumMismatch {
                    id: migration.id.clone(),
                    stored: stored.clone(),
                    current: migration.checksum.clone(),
                });
            }
        }
    }

    let mut report = MigrationReport::default();
    for migration in sorted {
        if recorded.contains_key(&migration.id) {
            debug!(id = %migration.id, "Migration already applied");
            report.skipped += 1;
            continue;
        }

        apply_one(conn, migration)?;
        report.applied.push(migration.id.clone());
    }

    Ok(report)
}

fn apply_failed<'a>(
    id: &'a str,
    phase: &'static str,
) -> impl FnOnce(rusqlite::Error) -> Error + 'a {
    move |source| Error::MigrationApplyFailed {
        id: id.to_string(),
        phase,
        source,
    }
}

fn apply_one(conn: &mut Connection, migration: &Migration) -> Result<()> {
    info!(id = %migration.id, name = %migration.name, "Applying migration");

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(apply_failed(&migration.id, "begin"))?;

    let outcome = tx
        .execute_batch(&migration.sql)
        .map_err(apply_failed(&migration.id, "execute"))
        .and_then(|()| {
            tx.execute(
                "INSERT INTO schema_migrations (id, name, checksum, applied_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    migration.id,
                    migration.name,
                    migration.checksum,
                    chrono::Utc::now().to_rfc3339(),
                ],
            )
            .map_err(apply_failed(&migration.id, "record"))
        });

    match outcome {
        Ok(_) => {
            tx.commit().map_err(apply_failed(&migration.id, "commit"))?;
            info!(id = %migration.id, "Migration complete");
            Ok(())
        }
        Err(err) => match tx.rollback() {
            Ok(()) => Err(err),
            Err(rollback) => Err(Error::RollbackFailed {
                source: Box::new(err),
                rollback,
            }),
        },
    }
}
