//! Core repository.
//!
//! This module provides the storage facade used by higher-level services.
//! Opening a repository opens the SQLite file, runs migrations, and checks
//! the table registry against the migrated schema. After that every entity,
//! audit and transaction operation goes through the repository's
//! [`TransactionManager`].

use crate::config;
use crate::error::{Error, Result, StorageContext};
use crate::model::{AuditFilter, AuditTransition, Entity, JobRunHistoryQuery};
use crate::storage::migrations::{
    LedgerRow, Migration, MigrationReport, applied_migrations, default_catalog, run_migrations,
};
use crate::storage::registry::{REGISTRY, table_config, validate_registry};
use crate::storage::transaction::{Transaction, TransactionManager};
use crate::storage::{audit, entities};
use rusqlite::Connection;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Factory used to open the SQLite handle; replaceable in tests.
pub type OpenHandle = Box<dyn Fn(&Path) -> rusqlite::Result<Connection> + Send + Sync>;

/// Statement cache size; a few statements per registered table.
const STATEMENT_CACHE_CAPACITY: usize = 64;

/// Options for [`CoreRepository::open`].
pub struct RepositoryOptions {
    pub store_path: PathBuf,
    pub run_migrations_on_init: bool,
    pub migration_catalog: Option<Vec<Migration>>,
    pub open_handle: Option<OpenHandle>,
    pub busy_timeout: Duration,
    pub validate_schema: bool,
}

impl RepositoryOptions {
    /// Defaults: run the built-in migrations, validate the schema, 5s busy timeout.
    #[must_use]
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        Self {
            store_path: store_path.into(),
            run_migrations_on_init: true,
            migration_catalog: None,
            open_handle: None,
            busy_timeout: Duration::from_secs(5),
            validate_schema: true,
        }
    }

    /// Defaults with the busy timeout taken from the environment.
    #[must_use]
    pub fn from_env(store_path: impl Into<PathBuf>) -> Self {
        Self::new(store_path).busy_timeout(config::busy_timeout())
    }

    #[must_use]
    pub fn run_migrations_on_init(mut self, run: bool) -> Self {
        self.run_migrations_on_init = run;
        self
    }

    /// Replace the built-in catalog.
    #[must_use]
    pub fn migration_catalog(mut self, catalog: Vec<Migration>) -> Self {
        self.migration_catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn open_handle(
        mut self,
        open: impl Fn(&Path) -> rusqlite::Result<Connection> + Send + Sync + 'static,
    ) -> Self {
        self.open_handle = Some(Box::new(open));
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn validate_schema(mut self, validate: bool) -> Self {
        self.validate_schema = validate;
        self
    }
}

impl fmt::Debug for RepositoryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepositoryOptions")
            .field("store_path", &self.store_path)
            .field("run_migrations_on_init", &self.run_migrations_on_init)
            .field(
                "migration_catalog",
                &self.migration_catalog.as_ref().map(Vec::len),
            )
            .field("open_handle", &self.open_handle.is_some())
            .field("busy_timeout", &self.busy_timeout)
            .field("validate_schema", &self.validate_schema)
            .finish()
    }
}

/// SQLite-backed entity store with an append-only audit trail.
///
/// `Send + Sync`; share across threads with `Arc`.
#[derive(Debug)]
pub struct CoreRepository {
    path: PathBuf,
    transactions: TransactionManager,
    migrations: MigrationReport,
}

impl CoreRepository {
    /// Open a repository.
    ///
    /// If anything after opening the handle fails, the handle is closed
    /// before the original error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreOpenFailed`] if the handle cannot be opened, or
    /// the first configuration, migration or schema validation failure.
    pub fn open(options: RepositoryOptions) -> Result<Self> {
        let path = options.store_path.clone();
        let opened = match &options.open_handle {
            Some(open) => open(&path),
            None => Connection::open(&path),
        };
        let mut conn = opened.map_err(|source| Error::StoreOpenFailed {
            path: path.clone(),
            source,
        })?;

        match initialize(&mut conn, &options) {
            Ok(migrations) => {
                info!(
                    path = %path.display(),
                    applied = migrations.applied.len(),
                    "Repository opened"
                );
                Ok(Self {
                    path,
                    transactions: TransactionManager::new(conn),
                    migrations,
                })
            }
            Err(err) => {
                if let Err((_, close_err)) = conn.close() {
                    warn!(error = %close_err, "Failed to close store after init failure");
                }
                Err(err)
            }
        }
    }

    /// Open a private in-memory repository with the built-in schema.
    ///
    /// # Errors
    ///
    /// Returns an error if migrations fail.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(RepositoryOptions::new(":memory:"))
    }

    /// Release the store handle.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite refuses to close the connection.
    pub fn close(self) -> Result<()> {
        let target = self.path.display().to_string();
        self.transactions
            .into_connection()
            .close()
            .map_err(|(_, source)| Error::StorageOperationFailed {
                operation: "close",
                target,
                source,
            })?;
        info!(path = %self.path.display(), "Repository closed");
        Ok(())
    }

    /// Path the repository was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// What the migration runner did while opening.
    #[must_use]
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migrations
    }

    /// Run `work` in a transaction.
    ///
    /// Top-level calls serialize against each other. Nest by calling
    /// `with_transaction` on the scope handed to `work`.
    ///
    /// # Errors
    ///
    /// Returns whatever `work` returns, or a transaction control failure.
    pub fn with_transaction<R>(
        &self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<R>,
    ) -> Result<R> {
        self.transactions.with_transaction(work)
    }

    // ==================
    // Entity Operations
    // ==================

    /// Insert or fully replace an entity.
    ///
    /// Columns are taken from `value` in registry order; `id` always wins
    /// over any `id` field inside `value`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedEntityType`] before touching the store for
    /// unknown types, [`Error::InvalidEntityValue`] for values that do not
    /// match their column's kind, or a storage failure.
    pub fn save_entity(&self, entity_type: &str, id: &str, value: &Entity) -> Result<()> {
        table_config(entity_type)?;
        self.with_transaction(|tx| tx.save_entity(entity_type, id, value))
    }

    /// Fetch an entity; `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStoredJson`] for corrupt JSON columns.
    pub fn get_entity(&self, entity_type: &str, id: &str) -> Result<Option<Entity>> {
        let config = table_config(entity_type)?;
        self.transactions
            .with_connection(|conn| entities::get_entity(conn, config, id))
    }

    /// Every entity of a type, ascending by id.
    ///
    /// All pages are read from one snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown types, corrupt rows or storage failures.
    pub fn list_entities(&self, entity_type: &str) -> Result<Vec<Entity>> {
        let config = table_config(entity_type)?;
        self.transactions
            .with_snapshot(|conn| entities::list_entities(conn, config))
    }

    /// Delete an entity. Deleting a missing id is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown types or storage failures.
    pub fn delete_entity(&self, entity_type: &str, id: &str) -> Result<bool> {
        table_config(entity_type)?;
        self.with_transaction(|tx| tx.delete_entity(entity_type, id))
    }

    /// Runs of a job, most recent first.
    ///
    /// # Errors
    ///
    /// Returns an error for corrupt rows or storage failures.
    pub fn list_job_run_history(&self, query: &JobRunHistoryQuery) -> Result<Vec<Entity>> {
        self.transactions
            .with_connection(|conn| entities::list_job_run_history(conn, query))
    }

    /// Row counts per registered entity type, in registry order.
    ///
    /// # Errors
    ///
    /// Returns an error if any count query fails.
    pub fn entity_counts(&self) -> Result<Vec<(&'static str, u64)>> {
        self.transactions.with_connection(|conn| {
            REGISTRY
                .iter()
                .map(|config| Ok((config.entity_type, entities::count_entities(conn, config)?)))
                .collect()
        })
    }

    // ==================
    // Audit Operations
    // ==================

    /// Append one transition to the audit trail.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn append_audit_transition(&self, transition: &AuditTransition) -> Result<()> {
        self.with_transaction(|tx| tx.append_audit_transition(transition))
    }

    /// Transitions matching `filter`, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error for corrupt rows or storage failures.
    pub fn list_audit_trail(&self, filter: &AuditFilter) -> Result<Vec<AuditTransition>> {
        self.transactions
            .with_connection(|conn| audit::list_audit_trail(conn, filter))
    }

    // ==================
    // Schema
    // ==================

    /// Applied migrations as recorded in the ledger.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub fn ledger(&self) -> Result<Vec<LedgerRow>> {
        self.transactions.with_connection(applied_migrations)
    }
}

fn initialize(conn: &mut Connection, options: &RepositoryOptions) -> Result<MigrationReport> {
    let target = options.store_path.display().to_string();

    conn.busy_timeout(options.busy_timeout)
        .storage("configure", target.as_str())?;
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
    conn.pragma_update(None, "foreign_keys", "ON")
        .storage("configure", target.as_str())?;
    // In-memory stores report "memory" and ignore the request
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .storage("configure", target.as_str())?;

    let report = if options.run_migrations_on_init {
        match &options.migration_catalog {
            Some(catalog) => run_migrations(conn, catalog)?,
            None => run_migrations(conn, &default_catalog())?,
        }
    } else {
        MigrationReport::default()
    };

    if options.validate_schema {
        validate_registry(conn)?;
    }

    Ok(report)
}
