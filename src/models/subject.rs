use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The minimal engine-owned projection of a lead: contact endpoints for the
/// dispatcher, the running behavioral score, and tags. Contact fields are
/// learned from event attributes at ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectProfile {
    pub subject_id: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub score: i64,
    pub tags: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl SubjectProfile {
    pub fn empty(subject_id: &str) -> Self {
        Self {
            subject_id: subject_id.to_string(),
            email: None,
            phone: None,
            score: 0,
            tags: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

/// A follow-up item produced by a `CreateTask` rule action, surfaced to the
/// operator's task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpTask {
    pub id: Uuid,
    pub subject_id: String,
    pub description: String,
    pub done: bool,
    pub created_at: DateTime<Utc>,
}

impl FollowUpTask {
    pub fn new(subject_id: &str, description: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            description: description.to_string(),
            done: false,
            created_at: Utc::now(),
        }
    }
}

/// The non-silent record raised when a message fails permanently. Operators
/// review and acknowledge these; nothing is dropped quietly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub id: Uuid,
    pub subject_id: String,
    pub message_id: Option<Uuid>,
    pub reason: String,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn new(subject_id: &str, message_id: Option<Uuid>, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            message_id,
            reason: reason.to_string(),
            acknowledged: false,
            created_at: Utc::now(),
        }
    }
}
