//! Generic entity persistence over the table registry.
//!
//! Functions take the `TableConfig` the caller already resolved, so an
//! unsupported entity type fails before any SQL runs.

use crate::error::{Result, StorageContext};
use crate::model::{Entity, JobRunHistoryQuery};
use crate::storage::codec::{decode_row, encode_entity};
use crate::storage::registry::{TableConfig, table_config};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

/// Rows fetched per page by [`list_entities`].
pub const LIST_PAGE_SIZE: u32 = 200;

fn target(config: &TableConfig, id: &str) -> String {
    format!("{} {id}", config.entity_type)
}

fn raw_values(config: &TableConfig, row: &Row<'_>) -> rusqlite::Result<Vec<SqlValue>> {
    (0..config.columns.len()).map(|i| row.get(i)).collect()
}

fn upsert_sql(config: &TableConfig) -> String {
    let placeholders = (1..=config.columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let updates = config
        .column_names()
        .skip(1)
        .map(|c| format!("{c} = excluded.{c}"))
        .collect::<Vec<_>>();

    let conflict = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };

    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) ON CONFLICT(id) {conflict}",
        config.table_name,
        config.column_list(),
    )
}

/// Insert or fully replace an entity.
///
/// # Errors
///
/// Returns an error if encoding or the upsert fails.
pub fn save_entity(conn: &Connection, config: &TableConfig, id: &str, value: &Entity) -> Result<()> {
    let values = encode_entity(config, id, value)?;
    let mut stmt = conn
        .prepare_cached(&upsert_sql(config))
        .storage("save_entity", target(config, id))?;
    stmt.execute(params_from_iter(values.iter()))
        .storage("save_entity", target(config, id))?;
    Ok(())
}

/// Fetch one entity by id.
///
/// # Errors
///
/// Returns an error if the query fails or stored JSON is corrupt.
pub fn get_entity(conn: &Connection, config: &TableConfig, id: &str) -> Result<Option<Entity>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        config.column_list(),
        config.table_name
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .storage("get_entity", target(config, id))?;

    let raw = stmt
        .query_row([id], |row| raw_values(config, row))
        .optional()
        .storage("get_entity", target(config, id))?;

    raw.map(|values| decode_row(config, values)).transpose()
}

/// Every entity of a type, ascending by id.
///
/// Reads in pages of [`LIST_PAGE_SIZE`], keyed on the last id seen.
///
/// # Errors
///
/// Returns an error if a page query fails or stored JSON is corrupt.
pub fn list_entities(conn: &Connection, config: &TableConfig) -> Result<Vec<Entity>> {
    let sql = format!(
        "SELECT {} FROM {} WHERE ?1 IS NULL OR id > ?1 ORDER BY id LIMIT ?2",
        config.column_list(),
        config.table_name
    );
    let mut stmt = conn
        .prepare_cached(&sql)
        .storage("list_entities", config.table_name)?;

    let mut entities = Vec::new();
    let mut last_id: Option<String> = None;

    loop {
        let page = stmt
            .query_map(params![last_id, LIST_PAGE_SIZE], |row| raw_values(config, row))
            .storage("list_entities", config.table_name)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .storage("list_entities", config.table_name)?;

        let page_len = page.len();
        for values in page {
            let entity = decode_row(config, values)?;
            last_id = entity
                .get("id")
                .and_then(serde_json::Value::as_str)
                .map(ToString::to_string);
            entities.push(entity);
        }

        if page_len < LIST_PAGE_SIZE as usize || last_id.is_none() {
            break;
        }
    }

    Ok(entities)
}

/// Delete one entity by id. Returns whether a row was removed.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub fn delete_entity(conn: &Connection, config: &TableConfig, id: &str) -> Result<bool> {
    let sql = format!("DELETE FROM {} WHERE id = ?1", config.table_name);
    let removed = conn
        .prepare_cached(&sql)
        .and_then(|mut stmt| stmt.execute([id]))
        .storage("delete_entity", target(config, id))?;
    Ok(removed > 0)
}

/// Number of stored entities of a type.
///
/// # Errors
///
/// Returns an error if the count query fails.
pub fn count_entities(conn: &Connection, config: &TableConfig) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", config.table_name);
    let count: i64 = conn
        .query_row(&sql, [], |row| row.get(0))
        .storage("count_entities", config.table_name)?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Runs of one job, most recent first.
///
/// Ordered by `at` descending, then insertion order descending, so runs
/// sharing a timestamp still come back in a stable order.
///
/// # Errors
///
/// Returns an error if the query fails or stored JSON is corrupt.
pub fn list_job_run_history(conn: &Connection, query: &JobRunHistoryQuery) -> Result<Vec<Entity>> {
    let config = table_config("job_run")?;
    let sql = format!(
        "SELECT {} FROM {}
         WHERE job_id = ?1 AND (?2 IS NULL OR at < ?2)
         ORDER BY at DESC, rowid DESC
         LIMIT ?3",
        config.column_list(),
        config.table_name
    );
    let limit = query.limit.map_or(-1, i64::from);
    let target = format!("job {}", query.job_id);

    let mut stmt = conn
        .prepare_cached(&sql)
        .storage("list_job_run_history", target.as_str())?;
    let rows = stmt
        .query_map(params![query.job_id, query.before_at, limit], |row| {
            raw_values(config, row)
        })
        .storage("list_job_run_history", target.as_str())?
        .collect::<rusqlite::Result<Vec<_>>>()
        .storage("list_job_run_history", target.as_str())?;

    rows.into_iter()
        .map(|values| decode_row(config, values))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{default_catalog, run_migrations};
    use serde_json::{Value, json};

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &default_catalog()).unwrap();
        conn
    }

    fn object(value: Value) -> Entity {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_upsert_replaces_every_column() {
        let conn = setup();
        let task = table_config("task").unwrap();

        save_entity(
            &conn,
            task,
            "t1",
            &object(json!({ "title": "A", "status": "open", "priority": 2 })),
        )
        .unwrap();
        save_entity(
            &conn,
            task,
            "t1",
            &object(json!({ "title": "B", "status": "done" })),
        )
        .unwrap();

        let stored = get_entity(&conn, task, "t1").unwrap().unwrap();
        // priority was not in the second payload, so the full replace cleared it
        assert_eq!(
            Value::Object(stored),
            json!({ "id": "t1", "title": "B", "status": "done" })
        );
        assert_eq!(list_entities(&conn, task).unwrap().len(), 1);
    }

    #[test]
    fn test_list_spans_multiple_pages_in_id_order() {
        let conn = setup();
        let note = table_config("note").unwrap();
        let total = LIST_PAGE_SIZE as usize * 2 + 7;

        for i in (0..total).rev() {
            save_entity(
                &conn,
                note,
                &format!("n{i:04}"),
                &object(json!({ "body": format!("note {i}") })),
            )
            .unwrap();
        }

        let listed = list_entities(&conn, note).unwrap();
        assert_eq!(listed.len(), total);
        let ids: Vec<&str> = listed.iter().map(|e| e["id"].as_str().unwrap()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let conn = setup();
        let view = table_config("view").unwrap();
        assert!(!delete_entity(&conn, view, "nope").unwrap());
        assert_eq!(count_entities(&conn, view).unwrap(), 0);
    }

    #[test]
    fn test_job_run_history_ordering_and_filters() {
        let conn = setup();
        let run = table_config("job_run").unwrap();
        let runs = [
            ("r1", "2024-01-01T00:00:00Z"),
            ("r2", "2024-01-02T00:00:00Z"),
            ("r3", "2024-01-02T00:00:00Z"),
            ("r4", "2024-01-03T00:00:00Z"),
        ];
        for (id, at) in runs {
            save_entity(
                &conn,
                run,
                id,
                &object(json!({ "jobId": "backup", "status": "ok", "at": at })),
            )
            .unwrap();
        }
        save_entity(
            &conn,
            run,
            "other",
            &object(json!({
                "jobId": "sync",
                "status": "ok",
                "at": "2024-01-05T00:00:00Z"
            })),
        )
        .unwrap();

        let all = list_job_run_history(&conn, &JobRunHistoryQuery::new("backup")).unwrap();
        let ids: Vec<&str> = all.iter().map(|e| e["id"].as_str().unwrap()).collect();
        // r3 was inserted after r2 with the same timestamp
        assert_eq!(ids, vec!["r4", "r3", "r2", "r1"]);

        let query = JobRunHistoryQuery::new("backup")
            .before("2024-01-03T00:00:00Z")
            .limit(2);
        let page = list_job_run_history(&conn, &query).unwrap();
        let ids: Vec<&str> = page.iter().map(|e| e["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["r3", "r2"]);
    }
}
