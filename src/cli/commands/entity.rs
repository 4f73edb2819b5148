//! Entity command implementations (put, get, list, delete).

use crate::cli::PutArgs;
use crate::cli::commands::open_repository;
use crate::config::default_actor;
use crate::error::{Error, Result};
use crate::model::{Actor, ActorKind, AuditTransition, Entity};
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PutOutput<'a> {
    entity_type: &'a str,
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    transition_id: Option<String>,
}

#[derive(Serialize)]
struct ListOutput {
    items: Vec<Entity>,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteOutput<'a> {
    entity_type: &'a str,
    id: &'a str,
    deleted: bool,
}

fn parse_entity(raw: &str) -> Result<Entity> {
    match serde_json::from_str::<serde_json::Value>(raw)? {
        serde_json::Value::Object(map) => Ok(map),
        other => Err(Error::InvalidArgument(format!(
            "Entity value must be a JSON object, got: {other}"
        ))),
    }
}

/// Save an entity, recording an audit transition in the same transaction
/// when `--to-state` is given.
///
/// # Errors
///
/// Returns an error if the value is not a JSON object, the entity type is
/// unknown, or either write fails. On failure neither write is kept.
pub fn put(
    args: &PutArgs,
    db_path: Option<&PathBuf>,
    actor: Option<&str>,
    json: bool,
) -> Result<()> {
    let value = parse_entity(&args.value)?;

    let transition = match &args.to_state {
        Some(to_state) => {
            let kind = args
                .actor_kind
                .parse::<ActorKind>()
                .map_err(Error::InvalidArgument)?;
            let actor = Actor {
                id: actor.map_or_else(default_actor, ToString::to_string),
                kind,
            };
            let mut transition = AuditTransition::new(
                &args.entity_type,
                &args.id,
                args.from_state.as_deref(),
                to_state,
                actor,
            );
            if let Some(reason) = &args.reason {
                transition = transition.with_reason(reason);
            }
            Some(transition)
        }
        None => None,
    };

    let repo = open_repository(db_path)?;
    repo.with_transaction(|tx| {
        tx.save_entity(&args.entity_type, &args.id, &value)?;
        if let Some(transition) = &transition {
            tx.append_audit_transition(transition)?;
        }
        Ok(())
    })?;

    if json {
        let output = PutOutput {
            entity_type: &args.entity_type,
            id: &args.id,
            transition_id: transition.map(|t| t.id),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Saved {} {}", args.entity_type, args.id.bold());
        if let Some(t) = &transition {
            println!(
                "  {} {} -> {}",
                "Transition".dimmed(),
                t.from_state.as_deref().unwrap_or("-"),
                t.to_state
            );
        }
    }

    repo.close()
}

/// Show one entity.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if no entity has that id.
pub fn get(entity_type: &str, id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let repo = open_repository(db_path)?;
    let entity = repo
        .get_entity(entity_type, id)?
        .ok_or_else(|| Error::NotFound {
            entity_type: entity_type.to_string(),
            id: id.to_string(),
        })?;

    if json {
        println!("{}", serde_json::to_string(&entity)?);
    } else {
        println!("{}", serde_json::to_string_pretty(&entity)?);
    }

    repo.close()
}

/// List every entity of a type.
///
/// # Errors
///
/// Returns an error if the type is unknown or a stored row is corrupt.
pub fn list(entity_type: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let repo = open_repository(db_path)?;
    let items = repo.list_entities(entity_type)?;

    if json {
        let output = ListOutput {
            count: items.len(),
            items,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if items.is_empty() {
        println!("No {entity_type} entities.");
    } else {
        for item in &items {
            let id = item
                .get("id")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            let mut rest = item.clone();
            rest.remove("id");
            println!("{} {}", id.bold(), serde_json::Value::Object(rest));
        }
        println!("{} {entity_type} entities", items.len());
    }

    repo.close()
}

/// Delete an entity. Deleting a missing entity succeeds with `deleted: false`.
///
/// # Errors
///
/// Returns an error if the type is unknown or the delete fails.
pub fn delete(entity_type: &str, id: &str, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let repo = open_repository(db_path)?;
    let deleted = repo.delete_entity(entity_type, id)?;

    if json {
        let output = DeleteOutput {
            entity_type,
            id,
            deleted,
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if deleted {
        println!("Deleted {entity_type} {id}");
    } else {
        println!("No {entity_type} {id} to delete");
    }

    repo.close()
}
