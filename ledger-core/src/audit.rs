//! Audit trail collaborator
//!
//! Every mutating operation in the workspace emits exactly one [`AuditEvent`]
//! after its write commits. Viewing and retention belong to the consumer.

use crate::types::{Actor, ActorRole};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

/// Reference to the entity a mutation touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    /// Entity kind (`account`, `recharge_code`, `settlement`, `daily_report`)
    pub kind: String,
    /// Entity identifier
    pub id: String,
}

impl EntityRef {
    /// Create new reference
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// One audited mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event type, e.g. `ledger.deposit`, `settlement.paid`
    pub event_type: String,
    /// Who did it
    pub actor: Actor,
    /// What it touched
    pub entity: EntityRef,
    /// State before (null when created)
    pub before: Value,
    /// State after
    pub after: Value,
    /// When it committed
    pub occurred_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event from serializable before/after snapshots
    pub fn new<B: Serialize, A: Serialize>(
        event_type: impl Into<String>,
        actor: &Actor,
        entity: EntityRef,
        before: Option<&B>,
        after: &A,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            actor: actor.clone(),
            entity,
            before: before
                .map(|b| serde_json::to_value(b).unwrap_or(Value::Null))
                .unwrap_or(Value::Null),
            after: serde_json::to_value(after).unwrap_or(Value::Null),
            occurred_at: Utc::now(),
        }
    }
}

/// Receives one event per committed mutation
pub trait AuditTrail: Send + Sync {
    /// Record an event. Must not block on slow consumers.
    fn emit(&self, event: AuditEvent);
}

/// Writes audit events as structured JSON on the `audit_log` tracing target
#[derive(Debug, Default, Clone)]
pub struct TracingAuditTrail {
    service: String,
}

impl TracingAuditTrail {
    /// Create new tracing-backed trail
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl AuditTrail for TracingAuditTrail {
    fn emit(&self, event: AuditEvent) {
        let role = match event.actor.role {
            ActorRole::Admin => "admin",
            ActorRole::Agent => "agent",
            ActorRole::Rider => "rider",
            ActorRole::Restaurant => "restaurant",
            ActorRole::System => "system",
        };

        tracing::info!(
            target: "audit_log",
            "{}",
            json!({
                "timestamp": event.occurred_at.to_rfc3339(),
                "event_type": event.event_type,
                "actor_id": event.actor.id,
                "actor_role": role,
                "entity": event.entity.to_string(),
                "before": event.before,
                "after": event.after,
                "service": self.service,
            })
        );
    }
}

/// Keeps events in memory; used by tests and local tooling
#[derive(Debug, Default)]
pub struct MemoryAuditTrail {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditTrail {
    /// Create empty trail
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Events of one type
    pub fn of_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Number of recorded events
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }
}

impl AuditTrail for MemoryAuditTrail {
    fn emit(&self, event: AuditEvent) {
        self.events.write().push(event);
    }
}
