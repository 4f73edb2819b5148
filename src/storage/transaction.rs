//! Transaction manager with savepoint nesting.
//!
//! One repository owns one `TransactionManager`. The manager's gate (a mutex
//! around the connection) admits a single top-level transaction at a time.
//! Work running inside a transaction receives a [`Transaction`] scope; the
//! scope is the caller's context token, and nesting goes through it:
//!
//! ```ignore
//! repo.with_transaction(|tx| {
//!     tx.save_entity("task", "t1", &task)?;
//!     tx.with_transaction(|inner| inner.append_audit_transition(&transition))
//! })?;
//! ```
//!
//! A nested call opens a `SAVEPOINT`; its failure rolls back only that
//! savepoint. A thread that already owns the gate and calls the top-level
//! entry point again gets [`Error::TransactionReentered`] instead of
//! deadlocking on itself.

use crate::error::{Error, Result, StorageContext};
use crate::model::{AuditFilter, AuditTransition, Entity, JobRunHistoryQuery};
use crate::storage::registry::table_config;
use crate::storage::{audit, entities};
use rusqlite::Connection;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use tracing::{debug, warn};

/// Identity of one top-level transaction and every scope nested in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(u64);

#[derive(Debug, Clone, Copy)]
struct Owner {
    token: ContextToken,
    thread: ThreadId,
}

/// Serializes top-level transactions over a single connection.
#[derive(Debug)]
pub struct TransactionManager {
    gate: Mutex<Connection>,
    owner: Mutex<Option<Owner>>,
    depth: AtomicUsize,
    next_savepoint: AtomicU64,
    next_token: AtomicU64,
}

impl TransactionManager {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            gate: Mutex::new(conn),
            owner: Mutex::new(None),
            depth: AtomicUsize::new(0),
            next_savepoint: AtomicU64::new(0),
            next_token: AtomicU64::new(0),
        }
    }

    /// Give back the connection.
    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.gate.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current nesting depth: 0 when idle, 1 inside a top-level transaction.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Token of the transaction holding the gate, if any.
    #[must_use]
    pub fn active_token(&self) -> Option<ContextToken> {
        self.owner_record().map(|o| o.token)
    }

    fn owner_record(&self) -> Option<Owner> {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_owner(&self, owner: Option<Owner>) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = owner;
    }

    fn acquire(&self) -> Result<MutexGuard<'_, Connection>> {
        if self
            .owner_record()
            .is_some_and(|o| o.thread == thread::current().id())
        {
            return Err(Error::TransactionReentered);
        }

        // A poisoned gate means a work closure panicked; its drop guard has
        // already rolled the transaction back.
        Ok(self.gate.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Run read-only work against the connection outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionReentered`] when called from the thread
    /// that owns the active transaction, or whatever `work` returns.
    pub fn with_connection<R>(&self, work: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.acquire()?;
        work(&conn)
    }

    /// Run read-only work inside a deferred transaction.
    ///
    /// Every query in `work` sees the same snapshot, even if another process
    /// writes to the store in between.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransactionReentered`] when called from the thread
    /// that owns the active transaction, or whatever `work` returns.
    pub fn with_snapshot<R>(&self, work: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let conn = self.acquire()?;
        // Dropping an uncommitted snapshot rolls it back
        let snapshot =
            rusqlite::Transaction::new_unchecked(&conn, rusqlite::TransactionBehavior::Deferred)
                .storage("begin_snapshot", "read")?;
        let value = work(&snapshot)?;
        snapshot.commit().storage("end_snapshot", "read")?;
        Ok(value)
    }

    /// Run `work` inside a new top-level transaction.
    ///
    /// Blocks until the gate is free, then `BEGIN IMMEDIATE`. Commits when
    /// `work` succeeds and rolls back when it fails; either way ownership is
    /// cleared and the gate released before returning.
    ///
    /// # Errors
    ///
    /// Returns the error from `work` unchanged unless rollback also failed,
    /// in which case both are merged into [`Error::RollbackFailed`].
    pub fn with_transaction<R>(
        &self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<R>,
    ) -> Result<R> {
        let conn = self.acquire()?;
        conn.execute_batch("BEGIN IMMEDIATE")
            .storage("begin_transaction", "top-level")?;

        let token = ContextToken(self.next_token.fetch_add(1, Ordering::SeqCst) + 1);
        self.set_owner(Some(Owner {
            token,
            thread: thread::current().id(),
        }));
        self.depth.store(1, Ordering::SeqCst);
        debug!(token = token.0, "Transaction started");

        let mut guard = TopLevelGuard {
            manager: self,
            conn: &conn,
            open: true,
        };

        let mut scope = Transaction {
            conn: &conn,
            manager: self,
            token,
            depth: 1,
        };

        let outcome = match work(&mut scope) {
            Ok(value) => match conn.execute_batch("COMMIT") {
                Ok(()) => {
                    debug!(token = token.0, "Transaction committed");
                    Ok(value)
                }
                Err(source) => Err(rollback_after(
                    &conn,
                    "ROLLBACK",
                    Error::StorageOperationFailed {
                        operation: "commit_transaction",
                        target: "top-level".to_string(),
                        source,
                    },
                )),
            },
            Err(err) => {
                debug!(token = token.0, error = %err, "Transaction rolled back");
                Err(rollback_after(&conn, "ROLLBACK", err))
            }
        };

        guard.open = false;
        drop(guard);
        outcome
    }
}

fn rollback_after(conn: &Connection, sql: &str, err: Error) -> Error {
    match conn.execute_batch(sql) {
        Ok(()) => err,
        Err(rollback) => Error::RollbackFailed {
            source: Box::new(err),
            rollback,
        },
    }
}

/// Clears ownership on every exit path; rolls back if the work panicked.
struct TopLevelGuard<'a> {
    manager: &'a TransactionManager,
    conn: &'a Connection,
    open: bool,
}

impl Drop for TopLevelGuard<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "Rollback after panic failed");
            }
        }
        self.manager.depth.store(0, Ordering::SeqCst);
        self.manager.set_owner(None);
    }
}

/// An open transaction scope.
///
/// Handed to the closure passed to `with_transaction`. Every repository
/// operation is available on it and runs inside the transaction.
pub struct Transaction<'c> {
    conn: &'c Connection,
    manager: &'c TransactionManager,
    token: ContextToken,
    depth: usize,
}

impl Transaction<'_> {
    /// The token shared by this scope and every scope nested in it.
    #[must_use]
    pub fn token(&self) -> ContextToken {
        self.token
    }

    /// 1 for the top-level scope, +1 per savepoint.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run `work` inside a savepoint nested in this transaction.
    ///
    /// On success the savepoint is released. On failure it is rolled back to
    /// and released, and the error from `work` is returned unchanged; earlier
    /// work in the enclosing scope is kept.
    ///
    /// # Errors
    ///
    /// Returns the error from `work`, a savepoint statement failure, or
    /// [`Error::RollbackFailed`] if rolling back the savepoint failed too.
    pub fn with_transaction<R>(
        &mut self,
        work: impl FnOnce(&mut Transaction<'_>) -> Result<R>,
    ) -> Result<R> {
        debug_assert_eq!(self.manager.active_token(), Some(self.token));

        let name = format!(
            "sp_{}",
            self.manager.next_savepoint.fetch_add(1, Ordering::SeqCst) + 1
        );
        self.conn
            .execute_batch(&format!("SAVEPOINT {name}"))
            .storage("savepoint", name.as_str())?;

        let depth = self.depth + 1;
        self.manager.depth.store(depth, Ordering::SeqCst);
        debug!(savepoint = %name, depth, "Savepoint opened");

        let mut nested = Transaction {
            conn: self.conn,
            manager: self.manager,
            token: self.token,
            depth,
        };

        let outcome = match work(&mut nested) {
            Ok(value) => self
                .conn
                .execute_batch(&format!("RELEASE {name}"))
                .storage("release_savepoint", name.as_str())
                .map(|()| value),
            Err(err) => {
                debug!(savepoint = %name, error = %err, "Savepoint rolled back");
                Err(rollback_after(
                    self.conn,
                    &format!("ROLLBACK TO {name}; RELEASE {name}"),
                    err,
                ))
            }
        };

        self.manager.depth.store(self.depth, Ordering::SeqCst);
        outcome
    }

    /// See [`CoreRepository::save_entity`](crate::storage::CoreRepository::save_entity).
    ///
    /// # Errors
    ///
    /// Returns an error for unsupported types, invalid values or storage failures.
    pub fn save_entity(&self, entity_type: &str, id: &str, value: &Entity) -> Result<()> {
        entities::save_entity(self.conn, table_config(entity_type)?, id, value)
    }

    /// # Errors
    ///
    /// Returns an error for unsupported types, corrupt rows or storage failures.
    pub fn get_entity(&self, entity_type: &str, id: &str) -> Result<Option<Entity>> {
        entities::get_entity(self.conn, table_config(entity_type)?, id)
    }

    /// # Errors
    ///
    /// Returns an error for unsupported types, corrupt rows or storage failures.
    pub fn list_entities(&self, entity_type: &str) -> Result<Vec<Entity>> {
        entities::list_entities(self.conn, table_config(entity_type)?)
    }

    /// # Errors
    ///
    /// Returns an error for unsupported types or storage failures.
    pub fn delete_entity(&self, entity_type: &str, id: &str) -> Result<bool> {
        entities::delete_entity(self.conn, table_config(entity_type)?, id)
    }

    /// # Errors
    ///
    /// Returns an error for corrupt rows or storage failures.
    pub fn list_job_run_history(&self, query: &JobRunHistoryQuery) -> Result<Vec<Entity>> {
        entities::list_job_run_history(self.conn, query)
    }

    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn append_audit_transition(&self, transition: &AuditTransition) -> Result<()> {
        audit::append_audit_transition(self.conn, transition)
    }

    /// # Errors
    ///
    /// Returns an error for corrupt rows or storage failures.
    pub fn list_audit_trail(&self, filter: &AuditFilter) -> Result<Vec<AuditTransition>> {
        audit::list_audit_trail(self.conn, filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn manager() -> TransactionManager {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t(v INTEGER)").unwrap();
        TransactionManager::new(conn)
    }

    fn values(manager: &TransactionManager) -> Vec<i64> {
        manager
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT v FROM t ORDER BY rowid").unwrap();
                let rows = stmt.query_map([], |row| row.get(0)).unwrap();
                Ok(rows.collect::<rusqlite::Result<Vec<i64>>>().unwrap())
            })
            .unwrap()
    }

    #[test]
    fn test_snapshot_ignores_concurrent_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("snapshot.db");
        let conn = Connection::open(&path).unwrap();
        conn.pragma_update(None, "journal_mode", "WAL").unwrap();
        conn.execute_batch("CREATE TABLE t(v INTEGER); INSERT INTO t(v) VALUES (1);")
            .unwrap();
        let m = TransactionManager::new(conn);
        let other = Connection::open(&path).unwrap();

        let counts = m
            .with_snapshot(|conn| {
                let count = || -> Result<i64> {
                    conn.query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
                        .storage("count", "t")
                };
                let before = count()?;
                other.execute("INSERT INTO t(v) VALUES (2)", []).unwrap();
                Ok((before, count()?))
            })
            .unwrap();

        assert_eq!(counts, (1, 1));
        assert_eq!(values(&m), vec![1, 2]);
    }

    #[test]
    fn test_snapshot_inside_transaction_fails_fast() {
        let m = manager();
        let err = m
            .with_transaction(|_tx| m.with_snapshot(|_| Ok(())))
            .unwrap_err();
        assert!(matches!(err, Error::TransactionReentered));
    }

    fn insert(tx: &Transaction<'_>, v: i64) -> Result<()> {
        tx.conn
            .execute("INSERT INTO t(v) VALUES (?1)", [v])
            .storage("insert", "t")?;
        Ok(())
    }

    #[test]
    fn test_commit_and_rollback() {
        let m = manager();
        m.with_transaction(|tx| insert(tx, 1)).unwrap();

        let err = m
            .with_transaction(|tx| {
                insert(tx, 2)?;
                Err::<(), _>(Error::InvalidArgument("stop".into()))
            })
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArgument(ref m) if m == "stop"));
        assert_eq!(values(&m), vec![1]);
        assert_eq!(m.depth(), 0);
        assert_eq!(m.active_token(), None);
    }

    #[test]
    fn test_nested_failure_keeps_sibling_work() {
        let m = manager();
        m.with_transaction(|tx| {
            insert(tx, 1)?;
            tx.with_transaction(|inner| insert(inner, 2))?;
            let nested = tx.with_transaction(|inner| {
                assert_eq!(inner.depth(), 2);
                insert(inner, 3)?;
                Err::<(), _>(Error::InvalidArgument("nested".into()))
            });
            assert!(matches!(nested, Err(Error::InvalidArgument(_))));
            insert(tx, 4)
        })
        .unwrap();

        assert_eq!(values(&m), vec![1, 2, 4]);
    }

    #[test]
    fn test_outer_rollback_discards_released_savepoints() {
        let m = manager();
        let _ = m.with_transaction(|tx| {
            tx.with_transaction(|inner| insert(inner, 1))?;
            Err::<(), _>(Error::InvalidArgument("outer".into()))
        });
        assert!(values(&m).is_empty());
    }

    #[test]
    fn test_deep_nesting_shares_token() {
        let m = manager();
        m.with_transaction(|tx| {
            let token = tx.token();
            tx.with_transaction(|a| {
                a.with_transaction(|b| {
                    assert_eq!(b.token(), token);
                    assert_eq!(b.depth(), 3);
                    insert(b, 7)
                })
            })
        })
        .unwrap();
        assert_eq!(values(&m), vec![7]);
    }

    #[test]
    fn test_reentry_from_owner_thread_fails_fast() {
        let m = manager();
        let result = m.with_transaction(|_tx| m.with_transaction(|_| Ok(())));
        assert!(matches!(result, Err(Error::TransactionReentered)));

        let read = m.with_transaction(|_tx| m.with_connection(|_| Ok(())));
        assert!(matches!(read, Err(Error::TransactionReentered)));

        // Gate was released after the failed work
        m.with_transaction(|tx| insert(tx, 1)).unwrap();
    }

    #[test]
    fn test_panic_in_work_rolls_back_and_releases_gate() {
        let m = Arc::new(manager());
        let worker = Arc::clone(&m);
        let joined = std::thread::spawn(move || {
            worker
                .with_transaction(|tx| -> Result<()> {
                    insert(tx, 1)?;
                    panic!("work panicked");
                })
                .ok();
        })
        .join();

        assert!(joined.is_err());
        assert!(values(&m).is_empty());
        assert_eq!(m.active_token(), None);
        m.with_transaction(|tx| insert(tx, 2)).unwrap();
        assert_eq!(values(&m), vec![2]);
    }

    #[test]
    fn test_concurrent_top_level_transactions_serialize() {
        let m = Arc::new(manager());
        m.with_transaction(|tx| insert(tx, 0)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        m.with_transaction(|tx| {
                            // read-modify-write; lost updates would show up in the total
                            let current: i64 = tx
                                .conn
                                .query_row("SELECT v FROM t", [], |row| row.get(0))
                                .storage("read", "t")?;
                            tx.with_transaction(|inner| {
                                inner
                                    .conn
                                    .execute("UPDATE t SET v = ?1", [current + 1])
                                    .storage("update", "t")
                                    .map(|_| ())
                            })
                        })
                        .unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(values(&m), vec![200]);
    }
}
