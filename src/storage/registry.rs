//! Static table registry.
//!
//! Maps each entity type tag to its physical table, its ordered columns and
//! which of them hold JSON. The set is closed: adding an entity type means
//! adding a migration and an entry here, and [`validate_registry`] checks the
//! two agree when a repository opens.

use crate::error::{Error, Result, StorageContext};
use crate::storage::codec::{camel_to_snake, snake_to_camel};
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::debug;

/// Declared type of a column's value.
///
/// Encoding only accepts JSON values of the matching kind, so every saved
/// value reads back unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// JSON string, stored as TEXT.
    Text,
    /// JSON integer, stored as INTEGER.
    Integer,
    /// JSON boolean, stored as INTEGER 0/1.
    Bool,
    /// Any JSON value, stored as JSON text.
    Json,
}

impl ColumnKind {
    /// SQLite type the migration must declare for this kind.
    #[must_use]
    pub const fn sql_type(&self) -> &'static str {
        match self {
            Self::Text | Self::Json => "TEXT",
            Self::Integer | Self::Bool => "INTEGER",
        }
    }
}

/// One physical column and the entity field it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub field: &'static str,
    pub kind: ColumnKind,
}

impl Column {
    const fn new(name: &'static str, field: &'static str, kind: ColumnKind) -> Self {
        Self { name, field, kind }
    }

    const fn text(name: &'static str, field: &'static str) -> Self {
        Self::new(name, field, ColumnKind::Text)
    }

    const fn integer(name: &'static str, field: &'static str) -> Self {
        Self::new(name, field, ColumnKind::Integer)
    }

    const fn boolean(name: &'static str, field: &'static str) -> Self {
        Self::new(name, field, ColumnKind::Bool)
    }

    const fn json(name: &'static str, field: &'static str) -> Self {
        Self::new(name, field, ColumnKind::Json)
    }

    /// Whether the column holds JSON text.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.kind, ColumnKind::Json)
    }
}

/// Storage layout for one entity type. `columns[0]` is always `id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableConfig {
    pub entity_type: &'static str,
    pub table_name: &'static str,
    pub columns: &'static [Column],
}

impl TableConfig {
    /// Physical column names in storage order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Names of the columns holding JSON text.
    pub fn json_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().filter(|c| c.is_json()).map(|c| c.name)
    }

    /// Comma-separated column list for `SELECT`/`INSERT`.
    #[must_use]
    pub fn column_list(&self) -> String {
        self.column_names().collect::<Vec<_>>().join(", ")
    }
}

const ID: Column = Column::text("id", "id");

/// Every supported entity type.
pub const REGISTRY: &[TableConfig] = &[
    TableConfig {
        entity_type: "task",
        table_name: "tasks",
        columns: &[
            ID,
            Column::text("title", "title"),
            Column::text("status", "status"),
            Column::integer("priority", "priority"),
            Column::text("due_at", "dueAt"),
            Column::json("tags", "tags"),
            Column::json("metadata", "metadata"),
            Column::text("created_at", "createdAt"),
            Column::text("updated_at", "updatedAt"),
        ],
    },
    TableConfig {
        entity_type: "note",
        table_name: "notes",
        columns: &[
            ID,
            Column::text("title", "title"),
            Column::text("body", "body"),
            Column::json("tags", "tags"),
            Column::text("created_at", "createdAt"),
            Column::text("updated_at", "updatedAt"),
        ],
    },
    TableConfig {
        entity_type: "signal",
        table_name: "signals",
        columns: &[
            ID,
            Column::text("source", "source"),
            Column::text("kind", "kind"),
            Column::json("payload", "payload"),
            Column::text("received_at", "receivedAt"),
        ],
    },
    TableConfig {
        entity_type: "job",
        table_name: "jobs",
        columns: &[
            ID,
            Column::text("name", "name"),
            Column::text("schedule", "schedule"),
            Column::boolean("enabled", "enabled"),
            Column::json("config", "config"),
            Column::text("created_at", "createdAt"),
            Column::text("updated_at", "updatedAt"),
        ],
    },
    TableConfig {
        entity_type: "job_run",
        table_name: "job_runs",
        columns: &[
            ID,
            Column::text("job_id", "jobId"),
            Column::text("status", "status"),
            Column::text("at", "at"),
            Column::integer("duration_ms", "durationMs"),
            Column::text("error", "error"),
            Column::json("output", "output"),
        ],
    },
    TableConfig {
        entity_type: "checkpoint",
        table_name: "checkpoints",
        columns: &[
            ID,
            Column::text("label", "label"),
            Column::json("snapshot", "snapshot"),
            Column::text("created_at", "createdAt"),
        ],
    },
    TableConfig {
        entity_type: "view",
        table_name: "views",
        columns: &[
            ID,
            Column::text("name", "name"),
            Column::text("entity_type", "entityType"),
            Column::json("filters", "filters"),
            Column::json("layout", "layout"),
            Column::text("updated_at", "updatedAt"),
        ],
    },
];

/// Look up the table config for an entity type tag.
///
/// # Errors
///
/// Returns [`Error::UnsupportedEntityType`] for tags not in [`REGISTRY`].
pub fn table_config(entity_type: &str) -> Result<&'static TableConfig> {
    REGISTRY
        .iter()
        .find(|c| c.entity_type == entity_type)
        .ok_or_else(|| Error::UnsupportedEntityType {
            entity_type: entity_type.to_string(),
        })
}

/// All supported entity type tags, in registry order.
#[must_use]
pub fn entity_type_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|c| c.entity_type).collect()
}

fn check_config(config: &TableConfig) -> std::result::Result<(), String> {
    match config.columns.first() {
        Some(first) if first.name == "id" => {}
        _ => return Err("first column must be `id`".to_string()),
    }

    let mut seen = BTreeSet::new();
    for column in config.columns {
        if !seen.insert(column.name) {
            return Err(format!("column `{}` listed twice", column.name));
        }
        if column.field != snake_to_camel(column.name)
            || camel_to_snake(column.field) != column.name
        {
            return Err(format!(
                "column `{}` maps to field `{}`",
                column.name, column.field
            ));
        }
    }

    Ok(())
}

fn live_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare("SELECT name, type FROM pragma_table_info(?1) ORDER BY cid")
        .storage("validate_registry", table)?;
    let rows = stmt
        .query_map([table], |row| {
            let name: String = row.get(0)?;
            let declared: String = row.get(1)?;
            Ok(format!("{name} {}", declared.to_ascii_uppercase()))
        })
        .storage("validate_registry", table)?;
    rows.collect::<rusqlite::Result<Vec<String>>>()
        .storage("validate_registry", table)
}

/// Check every registry entry against itself and the live schema.
///
/// Each column must exist with the SQLite type its kind declares. Column
/// order may differ from the table definition; the sets must match.
///
/// # Errors
///
/// Returns [`Error::SchemaDrift`] for the first table that disagrees.
pub fn validate_registry(conn: &Connection) -> Result<()> {
    for config in REGISTRY {
        let expected: Vec<String> = config
            .columns
            .iter()
            .map(|c| format!("{} {}", c.name, c.kind.sql_type()))
            .collect();

        if let Err(reason) = check_config(config) {
            return Err(Error::SchemaDrift {
                table: format!("{} ({reason})", config.table_name),
                expected,
                actual: Vec::new(),
            });
        }

        let actual = live_columns(conn, config.table_name)?;
        let expected_set: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
        let actual_set: BTreeSet<&str> = actual.iter().map(String::as_str).collect();

        if expected_set != actual_set {
            return Err(Error::SchemaDrift {
                table: config.table_name.to_string(),
                expected,
                actual,
            });
        }

        debug!(table = config.table_name, "Registry entry matches schema");
    }

    Ok(())
}
