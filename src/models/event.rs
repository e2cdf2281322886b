use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event types the engine itself reacts to. Rules may reference any type a
/// collaborator emits; these are the ones with built-in semantics.
pub mod event_types {
    /// Transport-layer unsubscribe callback. Stops every active enrollment
    /// touching the opted-out channel for the subject.
    pub const UNSUBSCRIBE: &str = "unsubscribe";
}

/// An immutable behavioral observation about a subject (lead or property).
///
/// Created by collaborators: UI actions, scrapers, transport delivery
/// callbacks. Retained for a bounded window, then purged by maintenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehavioralEvent {
    pub id: Uuid,
    pub subject_id: String,
    pub event_type: String,
    pub attributes: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub recorded_at: DateTime<Utc>,
}

impl BehavioralEvent {
    /// Fetch a string attribute, if present.
    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(|v| v.as_str())
    }
}

/// Ingestion payload. The id is optional: collaborators that can retry
/// supply a stable id so replays deduplicate.
#[derive(Debug, Clone, Deserialize)]
pub struct NewEvent {
    pub id: Option<Uuid>,
    pub subject_id: String,
    pub event_type: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub occurred_at: Option<DateTime<Utc>>,
}

impl NewEvent {
    pub fn new(subject_id: &str, event_type: &str, attributes: serde_json::Value) -> Self {
        Self {
            id: None,
            subject_id: subject_id.to_string(),
            event_type: event_type.to_string(),
            attributes,
            occurred_at: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = Some(at);
        self
    }

    /// Materialize into a storable event, filling in defaults.
    pub fn into_event(self, now: DateTime<Utc>) -> BehavioralEvent {
        BehavioralEvent {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            subject_id: self.subject_id,
            event_type: self.event_type,
            attributes: if self.attributes.is_null() {
                serde_json::json!({})
            } else {
                self.attributes
            },
            occurred_at: self.occurred_at.unwrap_or(now),
            recorded_at: now,
        }
    }
}

/// Outcome of `record`: replayed event ids deduplicate at ingestion and do
/// not re-enter rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "event_id")]
pub enum RecordOutcome {
    Recorded(Uuid),
    Duplicate(Uuid),
}

impl RecordOutcome {
    pub fn event_id(&self) -> Uuid {
        match self {
            RecordOutcome::Recorded(id) | RecordOutcome::Duplicate(id) => *id,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RecordOutcome::Duplicate(_))
    }
}
