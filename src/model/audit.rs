//! Audit transition types.
//!
//! A transition records one state change of one entity, attributed to an
//! actor. Transitions are append-only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Who performed a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    User,
    System,
    Ai,
}

impl ActorKind {
    /// Get the string representation for storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::Ai => "ai",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "system" => Ok(Self::System),
            "ai" => Ok(Self::Ai),
            other => Err(format!("unknown actor kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub kind: ActorKind,
}

impl Actor {
    #[must_use]
    pub fn user(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ActorKind::User,
        }
    }

    #[must_use]
    pub fn system(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ActorKind::System,
        }
    }

    #[must_use]
    pub fn ai(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: ActorKind::Ai,
        }
    }
}

/// One immutable state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTransition {
    pub id: String,
    pub entity_type: String,
    pub entity_id: String,
    pub from_state: Option<String>,
    pub to_state: String,
    pub actor: Actor,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl AuditTransition {
    /// Create a transition stamped now, with a fresh id.
    #[must_use]
    pub fn new(
        entity_type: &str,
        entity_id: &str,
        from_state: Option<&str>,
        to_state: &str,
        actor: Actor,
    ) -> Self {
        Self {
            id: format!("aud_{}", uuid::Uuid::new_v4().simple()),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            from_state: from_state.map(ToString::to_string),
            to_state: to_state.to_string(),
            actor,
            reason: None,
            at: Utc::now(),
            metadata: None,
        }
    }

    /// Attach a human-readable reason.
    #[must_use]
    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }
}
