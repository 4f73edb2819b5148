//! Data models for the entity store.
//!
//! This module contains the types that cross the repository boundary:
//! - Entity (opaque JSON object)
//! - AuditTransition, Actor, ActorKind
//! - AuditFilter, JobRunHistoryQuery

pub mod audit;
pub mod query;

pub use audit::{Actor, ActorKind, AuditTransition};
pub use query::{AuditFilter, JobRunHistoryQuery};

/// An entity as seen by callers: camelCase field names to JSON values.
pub type Entity = serde_json::Map<String, serde_json::Value>;
