//! Append-only audit trail for users, patients and instructions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Caller;

string_enum! {
    /// Which trail an entry belongs to.
    pub enum AuditEntity {
        User => "user",
        Patient => "patient",
        Instruction => "instruction",
    }
}

string_enum! {
    pub enum HistoryAction {
        Created => "created",
        Updated => "updated",
        Deleted => "deleted",
        Acknowledged => "acknowledged",
        RoleChanged => "role-changed",
        ProvidersAssigned => "providers-assigned",
    }
}

/// One mutation with before/after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub entity: AuditEntity,
    pub entity_id: String,
    pub action: HistoryAction,
    pub actor_id: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    /// Record a mutation performed by `caller`.
    #[must_use]
    pub fn record(
        caller: &Caller,
        entity: AuditEntity,
        entity_id: impl Into<String>,
        action: HistoryAction,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: super::new_id(),
            entity,
            entity_id: entity_id.into(),
            action,
            actor_id: caller.user_id.clone(),
            old_value,
            new_value,
            ip_address: caller.ip_address.clone(),
            user_agent: caller.user_agent.clone(),
            created_at: Utc::now(),
        }
    }
}

/// Audit-log query. Every `Some` field narrows the result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditFilter {
    pub entity: Option<AuditEntity>,
    pub entity_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: Option<HistoryAction>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub offset: usize,
    pub limit: usize,
}

impl Default for AuditFilter {
    fn default() -> Self {
        Self {
            entity: None,
            entity_id: None,
            actor_id: None,
            action: None,
            from: None,
            to: None,
            offset: 0,
            limit: 50,
        }
    }
}

impl AuditFilter {
    /// Upper bound on page size.
    pub const MAX_LIMIT: usize = 500;

    /// Entries for one entity.
    #[must_use]
    pub fn for_entity(entity: AuditEntity, entity_id: impl Into<String>) -> Self {
        Self {
            entity: Some(entity),
            entity_id: Some(entity_id.into()),
            limit: Self::MAX_LIMIT,
            ..Self::default()
        }
    }

    /// # Errors
    /// Returns every violated rule.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        if self.limit == 0 || self.limit > Self::MAX_LIMIT {
            errors.push(format!("Limit {} out of range [1, {}]", self.limit, Self::MAX_LIMIT));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                errors.push("Start of window is after its end".to_string());
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
