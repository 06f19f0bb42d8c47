//! Audit trail recording
//!
//! Handlers build an [`AuditEvent`] describing what changed and pass it to
//! [`record`] on the same connection or transaction that made the change, so
//! the trail entry commits or rolls back together with it.

use qms_common::auth::Caller;
use qms_common::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Executor, Sqlite};
use tracing::debug;

use crate::db::audit_logs::{self, NewAuditLogEntry};

/// One auditable action
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: String,
    pub entity_type: &'static str,
    pub entity_id: Option<i64>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
    pub details: Option<String>,
}

// Model structs only contain string-keyed maps and plain values
fn snapshot<T: Serialize>(record: &T) -> Option<Value> {
    serde_json::to_value(record).ok()
}

impl AuditEvent {
    /// Bare action without before/after values
    pub fn action(action: impl Into<String>, entity_type: &'static str, entity_id: Option<i64>) -> Self {
        Self {
            action: action.into(),
            entity_type,
            entity_id,
            old_values: None,
            new_values: None,
            details: None,
        }
    }

    pub fn created<T: Serialize>(entity_type: &'static str, id: i64, record: &T) -> Self {
        Self {
            new_values: snapshot(record),
            ..Self::action("create", entity_type, Some(id))
        }
    }

    pub fn updated<T: Serialize>(entity_type: &'static str, id: i64, before: &T, after: &T) -> Self {
        Self::changed("update", entity_type, id, before, after)
    }

    pub fn deleted<T: Serialize>(entity_type: &'static str, id: i64, before: &T) -> Self {
        Self {
            old_values: snapshot(before),
            ..Self::action("delete", entity_type, Some(id))
        }
    }

    /// Status transition or other state change named by `action`
    pub fn changed<T: Serialize>(
        action: impl Into<String>,
        entity_type: &'static str,
        id: i64,
        before: &T,
        after: &T,
    ) -> Self {
        Self {
            old_values: snapshot(before),
            new_values: snapshot(after),
            ..Self::action(action, entity_type, Some(id))
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Write `event` to the audit trail on behalf of `caller`
pub async fn record<'e, E>(executor: E, caller: &Caller, event: AuditEvent) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    debug!(
        user = %caller.username,
        action = %event.action,
        entity = event.entity_type,
        id = ?event.entity_id,
        "Audit event"
    );

    let entry = NewAuditLogEntry {
        user_id: Some(caller.user_id),
        action: event.action,
        entity_type: event.entity_type.to_string(),
        entity_id: event.entity_id,
        old_values: event.old_values,
        new_values: event.new_values,
        details: event.details,
    };
    audit_logs::insert(executor, &entry).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Thing {
        status: &'static str,
    }

    #[test]
    fn test_changed_captures_both_sides() {
        let event = AuditEvent::changed(
            "approve",
            "improvement_idea",
            4,
            &Thing { status: "submitted" },
            &Thing { status: "approved" },
        );
        assert_eq!(event.action, "approve");
        assert_eq!(event.entity_id, Some(4));
        assert_eq!(event.old_values, Some(json!({"status": "submitted"})));
        assert_eq!(event.new_values, Some(json!({"status": "approved"})));
    }

    #[test]
    fn test_deleted_has_no_new_values() {
        let event = AuditEvent::deleted("ncr", 1, &Thing { status: "open" });
        assert_eq!(event.action, "delete");
        assert!(event.new_values.is_none());
        assert!(event.old_values.is_some());
    }
}
