//! SQLite storage layer.
//!
//! - [`migrations`] - Versioned schema changes and the migration ledger
//! - [`registry`] - Entity type to table mapping, checked against the live schema
//! - [`codec`] - Entity values to and from SQLite columns
//! - [`entities`] - Generic entity CRUD and job run history
//! - [`audit`] - Append-only audit trail
//! - [`transaction`] - Serialized transactions with savepoint nesting
//! - [`repository`] - The [`CoreRepository`] facade

pub mod audit;
pub mod codec;
pub mod entities;
pub mod migrations;
pub mod registry;
pub mod repository;
pub mod transaction;

pub use migrations::{LedgerRow, Migration, MigrationReport};
pub use registry::{TableConfig, table_config};
pub use repository::{CoreRepository, OpenHandle, RepositoryOptions};
pub use transaction::{ContextToken, Transaction, TransactionManager};
