use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::message::Channel;

/// A single step in a drip sequence: wait `offset_secs`, then send
/// `template_id` on `channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    pub offset_secs: i64,
    pub channel: Channel,
    pub template_id: Uuid,
}

impl CampaignStep {
    pub fn offset(&self) -> Duration {
        Duration::seconds(self.offset_secs)
    }
}

/// An immutable campaign definition. Editing a campaign stores a new
/// version; in-flight enrollments keep the version they started on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub version: i32,
    pub name: String,
    pub trigger_type: String,
    pub steps: Vec<CampaignStep>,
}

impl Campaign {
    pub fn step(&self, index: i32) -> Option<&CampaignStep> {
        usize::try_from(index).ok().and_then(|i| self.steps.get(i))
    }

    /// Whether any step of this campaign delivers on the given channel.
    pub fn touches_channel(&self, channel: Channel) -> bool {
        self.steps.iter().any(|s| s.channel == channel)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Unsubscribed,
}

impl EnrollmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::Active => "active",
            EnrollmentStatus::Paused => "paused",
            EnrollmentStatus::Completed => "completed",
            EnrollmentStatus::Unsubscribed => "unsubscribed",
        }
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(EnrollmentStatus::Active),
            "paused" => Ok(EnrollmentStatus::Paused),
            "completed" => Ok(EnrollmentStatus::Completed),
            "unsubscribed" => Ok(EnrollmentStatus::Unsubscribed),
            other => Err(format!("unknown enrollment status '{}'", other)),
        }
    }
}

/// A subject's traversal through a campaign's steps. At most one active
/// enrollment exists per (subject, campaign).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub subject_id: String,
    pub campaign_id: Uuid,
    pub campaign_version: i32,
    pub current_step: i32,
    pub status: EnrollmentStatus,
    pub enrolled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Enrollment {
    pub fn new(subject_id: &str, campaign: &Campaign, enrolled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.to_string(),
            campaign_id: campaign.id,
            campaign_version: campaign.version,
            current_step: 0,
            status: EnrollmentStatus::Active,
            enrolled_at,
            completed_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == EnrollmentStatus::Active
    }
}
