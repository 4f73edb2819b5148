//! Error types for the entity store.
//!
//! Provides structured error handling with:
//! - Machine-readable error codes (`ErrorCode`)
//! - Category-based exit codes (2=store, 3=migration, 4=not_found, etc.)
//! - Context on every storage failure (operation name and target)
//! - Structured JSON output for piped / non-TTY consumers

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for entity store operations.
pub type Result<T> = std::result::Result<T, Error>;

// ── Error Code ────────────────────────────────────────────────

/// Machine-readable error codes grouped by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Store (exit 2)
    StoreOpenFailed,
    StorageOperationFailed,
    TransactionReentered,
    RollbackFailed,

    // Migration (exit 3)
    DuplicateMigrationId,
    MigrationApplyFailed,
    ChecksumMismatch,
    SchemaDrift,

    // Not Found (exit 4)
    NotFound,

    // Validation (exit 5)
    UnsupportedEntityType,
    InvalidEntityValue,
    InvalidArgument,

    // Corrupt data (exit 6)
    InvalidStoredJson,
    InvalidStoredTimestamp,

    // Config (exit 7)
    ConfigError,

    // I/O (exit 8)
    IoError,
    JsonError,
}

impl ErrorCode {
    /// Machine-readable SCREAMING_SNAKE code string.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        match self {
            Self::StoreOpenFailed => "STORE_OPEN_FAILED",
            Self::StorageOperationFailed => "STORAGE_OPERATION_FAILED",
            Self::TransactionReentered => "TRANSACTION_REENTERED",
            Self::RollbackFailed => "ROLLBACK_FAILED",
            Self::DuplicateMigrationId => "DUPLICATE_MIGRATION_ID",
            Self::MigrationApplyFailed => "MIGRATION_APPLY_FAILED",
            Self::ChecksumMismatch => "CHECKSUM_MISMATCH",
            Self::SchemaDrift => "SCHEMA_DRIFT",
            Self::NotFound => "NOT_FOUND",
            Self::UnsupportedEntityType => "UNSUPPORTED_ENTITY_TYPE",
            Self::InvalidEntityValue => "INVALID_ENTITY_VALUE",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::InvalidStoredJson => "INVALID_STORED_JSON",
            Self::InvalidStoredTimestamp => "INVALID_STORED_TIMESTAMP",
            Self::ConfigError => "CONFIG_ERROR",
            Self::IoError => "IO_ERROR",
            Self::JsonError => "JSON_ERROR",
        }
    }

    /// Category-based exit code (2-8).
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::StoreOpenFailed
            | Self::StorageOperationFailed
            | Self::TransactionReentered
            | Self::RollbackFailed => 2,
            Self::DuplicateMigrationId
            | Self::MigrationApplyFailed
            | Self::ChecksumMismatch
            | Self::SchemaDrift => 3,
            Self::NotFound => 4,
            Self::UnsupportedEntityType | Self::InvalidEntityValue | Self::InvalidArgument => 5,
            Self::InvalidStoredJson | Self::InvalidStoredTimestamp => 6,
            Self::ConfigError => 7,
            Self::IoError | Self::JsonError => 8,
        }
    }

    /// Whether a caller could reasonably retry with corrected input.
    ///
    /// Migration integrity failures are never retryable: they indicate a
    /// versioning bug, not a transient condition.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedEntityType
                | Self::InvalidEntityValue
                | Self::InvalidArgument
                | Self::StorageOperationFailed
        )
    }
}

// ── Error Enum ────────────────────────────────────────────────

/// Errors that can occur in entity store operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot open store at {}: {source}", path.display())]
    StoreOpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Duplicate migration id: {id}")]
    DuplicateMigrationId { id: String },

    #[error("Migration {id} failed during {phase}: {source}")]
    MigrationApplyFailed {
        id: String,
        phase: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Checksum mismatch for migration {id}: ledger has {stored}, catalog has {current}")]
    ChecksumMismatch {
        id: String,
        stored: String,
        current: String,
    },

    #[error("Schema drift on table {table}: expected columns [{}], found [{}]", expected.join(", "), actual.join(", "))]
    SchemaDrift {
        table: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("Unsupported entity type: {entity_type}")]
    UnsupportedEntityType { entity_type: String },

    #[error("Invalid value for {entity_type}.{field}: {reason}")]
    InvalidEntityValue {
        entity_type: String,
        field: String,
        reason: String,
    },

    #[error("Invalid stored JSON in {entity_type} {entity_id} column {column}: {source}")]
    InvalidStoredJson {
        entity_type: String,
        entity_id: String,
        column: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid stored timestamp in {entity_type} {entity_id}: {value}")]
    InvalidStoredTimestamp {
        entity_type: String,
        entity_id: String,
        value: String,
    },

    #[error("Storage operation {operation} failed on {target}: {source}")]
    StorageOperationFailed {
        operation: &'static str,
        target: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Transaction re-entered from its owning thread outside the transaction scope")]
    TransactionReentered,

    #[error("{source} (rollback also failed: {rollback})")]
    RollbackFailed {
        #[source]
        source: Box<Error>,
        rollback: rusqlite::Error,
    },

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Map this error to its structured `ErrorCode`.
    #[must_use]
    pub const fn error_code(&self) -> ErrorCode {
        match self {
            Self::StoreOpenFailed { .. } => ErrorCode::StoreOpenFailed,
            Self::DuplicateMigrationId { .. } => ErrorCode::DuplicateMigrationId,
            Self::MigrationApplyFailed { .. } => ErrorCode::MigrationApplyFailed,
            Self::ChecksumMismatch { .. } => ErrorCode::ChecksumMismatch,
            Self::SchemaDrift { .. } => ErrorCode::SchemaDrift,
            Self::UnsupportedEntityType { .. } => ErrorCode::UnsupportedEntityType,
            Self::InvalidEntityValue { .. } => ErrorCode::InvalidEntityValue,
            Self::InvalidStoredJson { .. } => ErrorCode::InvalidStoredJson,
            Self::InvalidStoredTimestamp { .. } => ErrorCode::InvalidStoredTimestamp,
            Self::StorageOperationFailed { .. } => ErrorCode::StorageOperationFailed,
            Self::TransactionReentered => ErrorCode::TransactionReentered,
            Self::RollbackFailed { .. } => ErrorCode::RollbackFailed,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::Config(_) => ErrorCode::ConfigError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::JsonError,
        }
    }

    /// Category-based exit code, delegating to the `ErrorCode`.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.error_code().exit_code()
    }

    /// Context-aware recovery hint.
    ///
    /// Returns `None` if no actionable suggestion exists.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::StoreOpenFailed { path, .. } => Some(format!(
                "Check that {} is writable, or pass `--db <path>`.",
                path.display()
            )),
            Self::ChecksumMismatch { id, .. } => Some(format!(
                "Migration {id} was edited after it was applied. \
                 Restore its original SQL and add a new migration instead."
            )),
            Self::DuplicateMigrationId { id } => {
                Some(format!("Give one of the migrations named {id} a new id."))
            }
            Self::SchemaDrift { table, .. } => Some(format!(
                "The registry and the migrated schema disagree on `{table}`. \
                 Add a migration or update the table registry."
            )),
            Self::UnsupportedEntityType { .. } => Some(format!(
                "Supported types: {}",
                crate::storage::registry::entity_type_names().join(", ")
            )),
            Self::TransactionReentered => Some(
                "Use the `Transaction` scope passed to the closure for nested work.".to_string(),
            ),
            Self::NotFound { entity_type, .. } => Some(format!(
                "Use `estore list {entity_type}` to see stored ids."
            )),
            Self::StorageOperationFailed { .. }
            | Self::MigrationApplyFailed { .. }
            | Self::InvalidEntityValue { .. }
            | Self::InvalidStoredJson { .. }
            | Self::InvalidStoredTimestamp { .. }
            | Self::RollbackFailed { .. }
            | Self::InvalidArgument(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Json(_) => None,
        }
    }

    /// Structured JSON representation for machine consumption.
    #[must_use]
    pub fn to_structured_json(&self) -> serde_json::Value {
        let code = self.error_code();
        let mut obj = serde_json::json!({
            "error": {
                "code": code.as_str(),
                "message": self.to_string(),
                "retryable": code.is_retryable(),
                "exit_code": code.exit_code(),
            }
        });

        if let Some(hint) = self.hint() {
            obj["error"]["hint"] = serde_json::Value::String(hint);
        }

        obj
    }
}

/// Attach an operation name and target to a raw `rusqlite` failure.
pub trait StorageContext<T> {
    /// Wrap the error as [`Error::StorageOperationFailed`].
    ///
    /// # Errors
    ///
    /// Returns the wrapped error if `self` is `Err`.
    fn storage(self, operation: &'static str, target: impl Into<String>) -> Result<T>;
}

impl<T> StorageContext<T> for rusqlite::Result<T> {
    fn storage(self, operation: &'static str, target: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::StorageOperationFailed {
            operation,
            target: target.into(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_errors_are_not_retryable() {
        let err = Error::ChecksumMismatch {
            id: "001".into(),
            stored: "a".into(),
            current: "b".into(),
        };
        assert_eq!(err.error_code(), ErrorCode::ChecksumMismatch);
        assert!(!err.error_code().is_retryable());
        assert_eq!(err.exit_code(), 3);
        assert!(err.hint().unwrap().contains("001"));
    }

    #[test]
    fn test_storage_context_keeps_operation_and_target() {
        let raw: rusqlite::Result<()> = Err(rusqlite::Error::QueryReturnedNoRows);
        let err = raw.storage("get_entity", "task t1").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("get_entity"));
        assert!(message.contains("task t1"));
    }

    #[test]
    fn test_rollback_failure_merges_both_messages() {
        let original = Error::InvalidArgument("boom".into());
        let err = Error::RollbackFailed {
            source: Box::new(original),
            rollback: rusqlite::Error::InvalidQuery,
        };
        let message = err.to_string();
        assert!(message.contains("boom"));
        assert!(message.contains("rollback also failed"));
    }

    #[test]
    fn test_structured_json_shape() {
        let err = Error::UnsupportedEntityType {
            entity_type: "widget".into(),
        };
        let json = err.to_structured_json();
        assert_eq!(json["error"]["code"], "UNSUPPORTED_ENTITY_TYPE");
        assert_eq!(json["error"]["exit_code"], 5);
        assert!(json["error"]["hint"].as_str().unwrap().contains("task"));
    }
}
