//! Filters for audit-trail and job-run-history queries.

use serde::{Deserialize, Serialize};

/// Restricts [`list_audit_trail`](crate::storage::CoreRepository::list_audit_trail).
///
/// An empty filter matches every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
}

impl AuditFilter {
    /// Match every transition of one entity.
    #[must_use]
    pub fn entity(entity_type: &str, entity_id: &str) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: Some(entity_id.to_string()),
        }
    }

    /// Match every transition of one entity type.
    #[must_use]
    pub fn entity_type(entity_type: &str) -> Self {
        Self {
            entity_type: Some(entity_type.to_string()),
            entity_id: None,
        }
    }
}

/// Query for [`list_job_run_history`](crate::storage::CoreRepository::list_job_run_history).
///
/// `before_at` is compared against the stored `at` text, so callers should
/// use one timestamp format (RFC 3339, UTC) throughout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunHistoryQuery {
    pub job_id: String,
    pub before_at: Option<String>,
    pub limit: Option<u32>,
}

impl JobRunHistoryQuery {
    /// All runs of a job, most recent first.
    #[must_use]
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            before_at: None,
            limit: None,
        }
    }

    /// Only runs strictly before `at`.
    #[must_use]
    pub fn before(mut self, at: &str) -> Self {
        self.before_at = Some(at.to_string());
        self
    }

    /// At most `limit` runs.
    #[must_use]
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
