//! Append-only audit trail storage.
//!
//! Transitions are only ever inserted. Reads return them in insertion order
//! (`rowid`), which stays correct even when `at` timestamps are skewed.

use crate::error::{Error, Result, StorageContext};
use crate::model::{Actor, ActorKind, AuditFilter, AuditTransition};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, params};

const AUDIT_TABLE: &str = "audit_transitions";

/// Row shape before timestamps and metadata are parsed.
struct StoredTransition {
    id: String,
    entity_type: String,
    entity_id: String,
    from_state: Option<String>,
    to_state: String,
    actor_id: String,
    actor_kind: String,
    reason: Option<String>,
    at: String,
    metadata: Option<String>,
}

impl StoredTransition {
    fn into_transition(self) -> Result<AuditTransition> {
        let at = DateTime::parse_from_rfc3339(&self.at)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|_| Error::InvalidStoredTimestamp {
                entity_type: self.entity_type.clone(),
                entity_id: self.entity_id.clone(),
                value: self.at.clone(),
            })?;

        let kind = self
            .actor_kind
            .parse::<ActorKind>()
            .map_err(|reason| Error::InvalidEntityValue {
                entity_type: "audit_transition".to_string(),
                field: "actor.kind".to_string(),
                reason,
            })?;

        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()
            .map_err(|source| Error::InvalidStoredJson {
                entity_type: self.entity_type.clone(),
                entity_id: self.entity_id.clone(),
                column: "metadata".to_string(),
                source,
            })?;

        Ok(AuditTransition {
            id: self.id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            from_state: self.from_state,
            to_state: self.to_state,
            actor: Actor {
                id: self.actor_id,
                kind,
            },
            reason: self.reason,
            at,
            metadata,
        })
    }
}

/// Insert one transition.
///
/// # Errors
///
/// Returns an error if metadata cannot be serialized or the insert fails
/// (including a reused transition id).
pub fn append_audit_transition(conn: &Connection, transition: &AuditTransition) -> Result<()> {
    let metadata = transition
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    conn.execute(
        "INSERT INTO audit_transitions
            (id, entity_type, entity_id, from_state, to_state, actor_id, actor_kind, reason, at, metadata)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            transition.id,
            transition.entity_type,
            transition.entity_id,
            transition.from_state,
            transition.to_state,
            transition.actor.id,
            transition.actor.kind.as_str(),
            transition.reason,
            transition.at.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            metadata,
        ],
    )
    .storage(
        "append_audit_transition",
        format!("{} {}", transition.entity_type, transition.entity_id),
    )?;

    Ok(())
}

/// Transitions matching `filter`, oldest first.
///
/// # Errors
///
/// Returns an error if the query fails or a stored row is corrupt.
pub fn list_audit_trail(conn: &Connection, filter: &AuditFilter) -> Result<Vec<AuditTransition>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, entity_type, entity_id, from_state, to_state, actor_id, actor_kind, reason, at, metadata
             FROM audit_transitions
             WHERE (?1 IS NULL OR entity_type = ?1) AND (?2 IS NULL OR entity_id = ?2)
             ORDER BY rowid ASC",
        )
        .storage("list_audit_trail", AUDIT_TABLE)?;

    let rows = stmt
        .query_map(params![filter.entity_type, filter.entity_id], |row| {
            Ok(StoredTransition {
                id: row.get(0)?,
                entity_type: row.get(1)?,
                entity_id: row.get(2)?,
                from_state: row.get(3)?,
                to_state: row.get(4)?,
                actor_id: row.get(5)?,
                actor_kind: row.get(6)?,
                reason: row.get(7)?,
                at: row.get(8)?,
                metadata: row.get(9)?,
            })
        })
        .storage("list_audit_trail", AUDIT_TABLE)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .storage("list_audit_trail", AUDIT_TABLE)?;

    rows.into_iter()
        .map(StoredTransition::into_transition)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::migrations::{default_catalog, run_migrations};
    use chrono::TimeZone;
    use serde_json::json;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn, &default_catalog()).unwrap();
        conn
    }

    #[test]
    fn test_append_and_list_round_trips_metadata() {
        let conn = setup();
        let transition = AuditTransition::new("task", "t1", None, "open", Actor::user("alice"))
            .with_reason("created")
            .with_metadata(json!({ "source": "quick-add", "tags": ["inbox"] }));

        append_audit_transition(&conn, &transition).unwrap();

        let trail = list_audit_trail(&conn, &AuditFilter::default()).unwrap();
        assert_eq!(trail, vec![transition]);
    }

    #[test]
    fn test_insertion_order_wins_over_timestamps() {
        let conn = setup();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let earlier = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap();

        let first = AuditTransition::new("task", "t1", None, "open", Actor::system("sync")).at(later);
        let second =
            AuditTransition::new("task", "t1", Some("open"), "done", Actor::ai("agent")).at(earlier);
        append_audit_transition(&conn, &first).unwrap();
        append_audit_transition(&conn, &second).unwrap();

        let trail = list_audit_trail(&conn, &AuditFilter::entity("task", "t1")).unwrap();
        let states: Vec<&str> = trail.iter().map(|t| t.to_state.as_str()).collect();
        assert_eq!(states, vec!["open", "done"]);
    }

    #[test]
    fn test_filters_by_type_and_id() {
        let conn = setup();
        for (entity_type, entity_id) in [("task", "t1"), ("task", "t2"), ("note", "n1")] {
            let t = AuditTransition::new(entity_type, entity_id, None, "created", Actor::user("bob"));
            append_audit_transition(&conn, &t).unwrap();
        }

        assert_eq!(list_audit_trail(&conn, &AuditFilter::entity_type("task")).unwrap().len(), 2);
        assert_eq!(list_audit_trail(&conn, &AuditFilter::entity("task", "t2")).unwrap().len(), 1);
        assert_eq!(list_audit_trail(&conn, &AuditFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn test_rows_cannot_be_updated_or_deleted() {
        let conn = setup();
        let t = AuditTransition::new("task", "t1", None, "open", Actor::user("alice"));
        append_audit_transition(&conn, &t).unwrap();

        assert!(conn.execute("UPDATE audit_transitions SET to_state = 'x'", []).is_err());
        assert!(conn.execute("DELETE FROM audit_transitions", []).is_err());
    }

    #[test]
    fn test_corrupt_metadata_is_reported() {
        let conn = setup();
        conn.execute(
            "INSERT INTO audit_transitions
                (id, entity_type, entity_id, to_state, actor_id, actor_kind, at, metadata)
             VALUES ('a1', 'task', 't9', 'open', 'u', 'user', '2024-01-01T00:00:00Z', '{oops')",
            [],
        )
        .unwrap();

        let err = list_audit_trail(&conn, &AuditFilter::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidStoredJson { ref entity_id, .. } if entity_id == "t9"));
    }
}
