// Rule engine: evaluates enabled trigger rules against each new event and
// the subject's recent history, emitting the actions of every rule that
// fires.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::actions::{order_actions, Action};
use super::conditions::Condition;
use crate::error::{EngineError, EngineResult};
use crate::models::BehavioralEvent;
use crate::store::EngineStore;

/// A trigger rule definition. Mutated only by the administrator-facing
/// surface; the engine consumes these read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRule {
    pub id: Uuid,
    pub name: String,
    /// Event types this rule reacts to.
    pub event_types: Vec<String>,
    /// All top-level conditions must hold for the rule to fire.
    pub conditions: Vec<Condition>,
    pub actions: Vec<Action>,
    pub enabled: bool,
    /// Higher priority rules apply their actions first; ties break on id.
    pub priority: i32,
    /// Minimum interval before this rule may re-fire for the same subject.
    /// Falls back to the engine-wide default when unset.
    pub cooldown_secs: Option<i64>,
}

impl TriggerRule {
    pub fn new(name: &str, event_types: Vec<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            event_types: event_types.into_iter().map(String::from).collect(),
            conditions: Vec::new(),
            actions: Vec::new(),
            enabled: true,
            priority: 0,
            cooldown_secs: None,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown_secs = Some(cooldown.num_seconds());
        self
    }

    fn lookback_secs(&self) -> i64 {
        self.conditions
            .iter()
            .map(Condition::lookback_secs)
            .max()
            .unwrap_or(0)
    }
}

pub struct RuleEngine {
    store: Arc<dyn EngineStore>,
    default_cooldown: Duration,
}

impl RuleEngine {
    pub fn new(store: Arc<dyn EngineStore>, default_cooldown: Duration) -> Self {
        Self {
            store,
            default_cooldown,
        }
    }

    /// Evaluate every enabled rule matching the event's type. Returns the
    /// ordered action batch from all rules that fired.
    ///
    /// A single rule's evaluation error is logged and isolated; the other
    /// rules still run.
    pub async fn evaluate(&self, event: &BehavioralEvent) -> EngineResult<Vec<Action>> {
        let rules = self.store.rules_for_event_type(&event.event_type).await?;
        if rules.is_empty() {
            return Ok(Vec::new());
        }

        // One history fetch wide enough for every candidate rule's windows.
        let lookback = rules.iter().map(TriggerRule::lookback_secs).max().unwrap_or(0);
        let since = event.occurred_at - Duration::seconds(lookback);
        let history = self
            .store
            .events_for_subject(&event.subject_id, None, since)
            .await?;

        let now = Utc::now();
        let mut fired: Vec<&TriggerRule> = Vec::new();

        for rule in &rules {
            match self.check_rule(rule, event, &history, now).await {
                Ok(true) => fired.push(rule),
                Ok(false) => {}
                Err(e) => {
                    // Bulkhead: one bad rule must not starve the rest.
                    let err = EngineError::RuleEvaluation {
                        rule: rule.name.clone(),
                        message: e.to_string(),
                    };
                    warn!(error = %err, "rule evaluation failed, skipping");
                }
            }
        }

        if fired.is_empty() {
            return Ok(Vec::new());
        }

        fired.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut actions = Vec::new();
        for rule in &fired {
            self.store
                .record_rule_firing(rule.id, &event.subject_id, now)
                .await?;
            debug!(rule = %rule.name, subject = %event.subject_id, "rule fired");
            actions.extend(rule.actions.iter().cloned());
        }

        Ok(order_actions(actions))
    }

    async fn check_rule(
        &self,
        rule: &TriggerRule,
        event: &BehavioralEvent,
        history: &[BehavioralEvent],
        now: DateTime<Utc>,
    ) -> EngineResult<bool> {
        if !rule.enabled {
            return Ok(false);
        }

        if !rule.conditions.iter().all(|c| c.evaluate(event, history)) {
            return Ok(false);
        }

        // Cooldown gate: suppress re-firing for the same subject inside
        // the configured interval, so a burst of qualifying events cannot
        // trigger an action storm.
        let cooldown = rule
            .cooldown_secs
            .map(Duration::seconds)
            .unwrap_or(self.default_cooldown);
        if cooldown > Duration::zero() {
            if let Some(last) = self
                .store
                .last_rule_firing(rule.id, &event.subject_id)
                .await
                .map_err(EngineError::from)?
            {
                if now - last < cooldown {
                    debug!(rule = %rule.name, subject = %event.subject_id, "rule in cooldown");
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }
}
