use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Delivery channel for an outbound message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(Channel::Email),
            "sms" => Ok(Channel::Sms),
            other => Err(format!("unknown channel '{}'", other)),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification priority. Drives channel fan-out at dispatch time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// High and urgent notifications go out on email *and* SMS.
    pub fn fans_out(&self) -> bool {
        matches!(self, Priority::High | Priority::Urgent)
    }
}

/// Who the rendered message is addressed to. Campaign steps reach the
/// subject's own contacts; rule-raised notifications reach the operator
/// recipients configured on the dispatcher.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    Subject,
    Operator,
}

/// ScheduledMessage lifecycle. `Claimed` is the transient state set by the
/// store's atomic claim so concurrent scheduler ticks cannot double-send.
/// `Sent` and `Cancelled` are terminal; `Failed` is terminal once the retry
/// ceiling is reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Claimed,
    Sent,
    Failed,
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Claimed => "claimed",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
            MessageStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MessageStatus::Pending),
            "claimed" => Ok(MessageStatus::Claimed),
            "sent" => Ok(MessageStatus::Sent),
            "failed" => Ok(MessageStatus::Failed),
            "cancelled" => Ok(MessageStatus::Cancelled),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// What to send when a scheduled message comes due. `context` feeds template
/// placeholder substitution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub template_id: Uuid,
    pub priority: Priority,
    pub audience: Audience,
    #[serde(default)]
    pub context: serde_json::Value,
}

/// The durable unit of work the scheduler polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessage {
    pub id: Uuid,
    pub enrollment_id: Option<Uuid>,
    pub subject_id: String,
    pub due_at: DateTime<Utc>,
    pub channel: Channel,
    pub payload: MessagePayload,
    pub status: MessageStatus,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledMessage {
    pub fn new(
        subject_id: &str,
        enrollment_id: Option<Uuid>,
        due_at: DateTime<Utc>,
        channel: Channel,
        payload: MessagePayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            enrollment_id,
            subject_id: subject_id.to_string(),
            due_at,
            channel,
            payload,
            status: MessageStatus::Pending,
            attempt_count: 0,
            last_error: None,
            claimed_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Content template for outbound messages. `{{placeholder}}` markers are
/// substituted from the message context; `personalize` templates are
/// additionally rewritten by the text-generation capability when available.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub name: String,
    pub subject_line: String,
    pub body: String,
    pub personalize: bool,
}

/// Ephemeral value the dispatcher hands to the transports.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationRequest {
    pub subject_id: String,
    pub priority: Priority,
    pub channels: Vec<Channel>,
    pub subject_line: String,
    pub body: String,
}
