// Rule actions. Pure data: execution side effects live in the campaign
// engine and dispatcher.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Priority;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    StartCampaign { campaign_id: Uuid },
    StopCampaign { campaign_id: Uuid },
    AdjustScore { delta: i64 },
    SendNotification { template_id: Uuid, priority: Priority },
    CreateTask { description: String },
    AddTag { tag: String },
    RemoveTag { tag: String },
}

impl Action {
    pub fn start_campaign(campaign_id: Uuid) -> Self {
        Action::StartCampaign { campaign_id }
    }

    pub fn stop_campaign(campaign_id: Uuid) -> Self {
        Action::StopCampaign { campaign_id }
    }

    pub fn adjust_score(delta: i64) -> Self {
        Action::AdjustScore { delta }
    }

    pub fn send_notification(template_id: Uuid, priority: Priority) -> Self {
        Action::SendNotification {
            template_id,
            priority,
        }
    }

    pub fn create_task(description: &str) -> Self {
        Action::CreateTask {
            description: description.to_string(),
        }
    }

    pub fn add_tag(tag: &str) -> Self {
        Action::AddTag {
            tag: tag.to_string(),
        }
    }

    pub fn remove_tag(tag: &str) -> Self {
        Action::RemoveTag {
            tag: tag.to_string(),
        }
    }
}

/// Order a batch of actions collected from every rule that fired on one
/// event. Input order is rule-priority order; the one adjustment is that a
/// `StopCampaign` is hoisted ahead of a `StartCampaign` for the same
/// campaign so a stop-then-restart batch never leaves a stale enrollment.
pub fn order_actions(actions: Vec<Action>) -> Vec<Action> {
    let mut ordered: Vec<Action> = Vec::with_capacity(actions.len());
    let mut hoisted: Vec<usize> = Vec::new();

    for (i, action) in actions.iter().enumerate() {
        if hoisted.contains(&i) {
            continue;
        }
        if let Action::StartCampaign { campaign_id } = action {
            for (j, later) in actions.iter().enumerate().skip(i + 1) {
                if hoisted.contains(&j) {
                    continue;
                }
                if matches!(later, Action::StopCampaign { campaign_id: c } if c == campaign_id) {
                    ordered.push(later.clone());
                    hoisted.push(j);
                }
            }
        }
        ordered.push(action.clone());
    }

    ordered
}
