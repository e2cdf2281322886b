// In-memory store backend.
//
// Used for local development (`STORE_BACKEND=memory`) and by the test
// suite. All state sits behind a single async mutex, which gives every
// trait method the same atomicity the Postgres backend gets from
// conditional updates; the claim loop in particular is exactly-once under
// concurrent ticks because the whole select-and-mark runs under the lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{EngineStore, StoreResult};
use crate::error::StorageError;
use crate::models::{
    Audience, BehavioralEvent, Campaign, Channel, Enrollment, EnrollmentStatus, FollowUpTask,
    MessageStatus, MessageTemplate, OperatorAlert, RecordOutcome, ScheduledMessage,
    SubjectProfile,
};
use crate::rules::TriggerRule;

#[derive(Default)]
struct Inner {
    events: Vec<BehavioralEvent>,
    event_ids: HashMap<Uuid, ()>,
    rules: Vec<TriggerRule>,
    rule_firings: HashMap<(Uuid, String), DateTime<Utc>>,
    campaigns: HashMap<Uuid, Vec<Campaign>>,
    templates: HashMap<Uuid, MessageTemplate>,
    enrollments: HashMap<Uuid, Enrollment>,
    messages: HashMap<Uuid, ScheduledMessage>,
    profiles: HashMap<String, SubjectProfile>,
    tasks: Vec<FollowUpTask>,
    alerts: Vec<OperatorAlert>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EngineStore for MemoryStore {
    async fn record_event(&self, event: BehavioralEvent) -> StoreResult<RecordOutcome> {
        let mut inner = self.inner.lock().await;
        if inner.event_ids.contains_key(&event.id) {
            return Ok(RecordOutcome::Duplicate(event.id));
        }
        let id = event.id;
        inner.event_ids.insert(id, ());
        inner.events.push(event);
        Ok(RecordOutcome::Recorded(id))
    }

    async fn events_for_subject(
        &self,
        subject_id: &str,
        event_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<BehavioralEvent>> {
        let inner = self.inner.lock().await;
        let mut events: Vec<BehavioralEvent> = inner
            .events
            .iter()
            .filter(|e| {
                e.subject_id == subject_id
                    && e.occurred_at >= since
                    && event_type.map(|t| e.event_type == t).unwrap_or(true)
            })
            .cloned()
            .collect();
        events.sort_by_key(|e| e.occurred_at);
        Ok(events)
    }

    async fn purge_events_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.events.len();
        let purged_ids: Vec<Uuid> = inner
            .events
            .iter()
            .filter(|e| e.occurred_at < cutoff)
            .map(|e| e.id)
            .collect();
        for id in &purged_ids {
            inner.event_ids.remove(id);
        }
        inner.events.retain(|e| e.occurred_at >= cutoff);
        Ok((before - inner.events.len()) as u64)
    }

    async fn insert_rule(&self, rule: TriggerRule) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.rules.retain(|r| r.id != rule.id);
        inner.rules.push(rule);
        Ok(())
    }

    async fn rules_for_event_type(&self, event_type: &str) -> StoreResult<Vec<TriggerRule>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rules
            .iter()
            .filter(|r| r.enabled && r.event_types.iter().any(|t| t == event_type))
            .cloned()
            .collect())
    }

    async fn last_rule_firing(
        &self,
        rule_id: Uuid,
        subject_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rule_firings
            .get(&(rule_id, subject_id.to_string()))
            .copied())
    }

    async fn record_rule_firing(
        &self,
        rule_id: Uuid,
        subject_id: &str,
        fired_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .rule_firings
            .insert((rule_id, subject_id.to_string()), fired_at);
        Ok(())
    }

    async fn insert_campaign(&self, mut campaign: Campaign) -> StoreResult<i32> {
        let mut inner = self.inner.lock().await;
        let versions = inner.campaigns.entry(campaign.id).or_default();
        let next = versions.iter().map(|c| c.version).max().unwrap_or(0) + 1;
        campaign.version = next;
        versions.push(campaign);
        Ok(next)
    }

    async fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .campaigns
            .get(&id)
            .and_then(|versions| versions.iter().max_by_key(|c| c.version))
            .cloned())
    }

    async fn campaign_version(&self, id: Uuid, version: i32) -> StoreResult<Option<Campaign>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .campaigns
            .get(&id)
            .and_then(|versions| versions.iter().find(|c| c.version == version))
            .cloned())
    }

    async fn insert_template(&self, template: MessageTemplate) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.templates.insert(template.id, template);
        Ok(())
    }

    async fn template(&self, id: Uuid) -> StoreResult<Option<MessageTemplate>> {
        let inner = self.inner.lock().await;
        Ok(inner.templates.get(&id).cloned())
    }

    async fn insert_enrollment(&self, enrollment: Enrollment) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let duplicate = inner.enrollments.values().any(|e| {
            e.subject_id == enrollment.subject_id
                && e.campaign_id == enrollment.campaign_id
                && e.status == EnrollmentStatus::Active
        });
        if duplicate && enrollment.status == EnrollmentStatus::Active {
            return Err(StorageError::Conflict(format!(
                "active enrollment already exists for subject '{}' in campaign {}",
                enrollment.subject_id, enrollment.campaign_id
            )));
        }
        inner.enrollments.insert(enrollment.id, enrollment);
        Ok(())
    }

    async fn enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>> {
        let inner = self.inner.lock().await;
        Ok(inner.enrollments.get(&id).cloned())
    }

    async fn active_enrollment(
        &self,
        subject_id: &str,
        campaign_id: Uuid,
    ) -> StoreResult<Option<Enrollment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .enrollments
            .values()
            .find(|e| {
                e.subject_id == subject_id
                    && e.campaign_id == campaign_id
                    && e.status == EnrollmentStatus::Active
            })
            .cloned())
    }

    async fn active_enrollments_for_subject(
        &self,
        subject_id: &str,
    ) -> StoreResult<Vec<Enrollment>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .enrollments
            .values()
            .filter(|e| e.subject_id == subject_id && e.status == EnrollmentStatus::Active)
            .cloned()
            .collect())
    }

    async fn enrollments_for_subject(&self, subject_id: &str) -> StoreResult<Vec<Enrollment>> {
        let inner = self.inner.lock().await;
        let mut enrollments: Vec<Enrollment> = inner
            .enrollments
            .values()
            .filter(|e| e.subject_id == subject_id)
            .cloned()
            .collect();
        enrollments.sort_by_key(|e| e.enrolled_at);
        Ok(enrollments)
    }

    async fn set_enrollment_step(&self, id: Uuid, step: i32) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(enrollment) = inner.enrollments.get_mut(&id) {
            enrollment.current_step = step;
        }
        Ok(())
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(enrollment) = inner.enrollments.get_mut(&id) {
            enrollment.status = status;
            enrollment.completed_at = completed_at;
        }
        Ok(())
    }

    async fn insert_message(&self, message: ScheduledMessage) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.messages.insert(message.id, message);
        Ok(())
    }

    async fn message(&self, id: Uuid) -> StoreResult<Option<ScheduledMessage>> {
        let inner = self.inner.lock().await;
        Ok(inner.messages.get(&id).cloned())
    }

    async fn messages_with_status(
        &self,
        status: MessageStatus,
    ) -> StoreResult<Vec<ScheduledMessage>> {
        let inner = self.inner.lock().await;
        let mut messages: Vec<ScheduledMessage> = inner
            .messages
            .values()
            .filter(|m| m.status == status)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.due_at);
        Ok(messages)
    }

    async fn claim_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledMessage>> {
        let mut inner = self.inner.lock().await;
        let mut due: Vec<Uuid> = inner
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Pending && m.due_at <= now)
            .map(|m| m.id)
            .collect();
        due.sort_by_key(|id| inner.messages[id].due_at);
        due.truncate(limit.max(0) as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for id in due {
            if let Some(message) = inner.messages.get_mut(&id) {
                message.status = MessageStatus::Claimed;
                message.claimed_at = Some(now);
                claimed.push(message.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_message_sent(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            message.status = MessageStatus::Sent;
            message.last_error = None;
        }
        Ok(())
    }

    async fn mark_message_cancelled(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            message.status = MessageStatus::Cancelled;
        }
        Ok(())
    }

    async fn mark_message_failed(
        &self,
        id: Uuid,
        attempt_count: i32,
        error: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            message.status = MessageStatus::Failed;
            message.attempt_count = attempt_count;
            message.last_error = Some(error.to_string());
        }
        Ok(())
    }

    async fn requeue_message(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        attempt_count: i32,
        error: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(message) = inner.messages.get_mut(&id) {
            message.status = MessageStatus::Pending;
            message.due_at = due_at;
            message.attempt_count = attempt_count;
            message.last_error = Some(error.to_string());
            message.claimed_at = None;
        }
        Ok(())
    }

    async fn cancel_pending_for_enrollment(&self, enrollment_id: Uuid) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut cancelled = 0;
        for message in inner.messages.values_mut() {
            if message.enrollment_id == Some(enrollment_id)
                && message.status == MessageStatus::Pending
            {
                message.status = MessageStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn cancel_pending_for_subject_channel(
        &self,
        subject_id: &str,
        channel: Channel,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut cancelled = 0;
        for message in inner.messages.values_mut() {
            if message.subject_id == subject_id
                && message.channel == channel
                && message.payload.audience == Audience::Subject
                && message.status == MessageStatus::Pending
            {
                message.status = MessageStatus::Cancelled;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn requeue_stale_claims(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut inner = self.inner.lock().await;
        let mut requeued = 0;
        for message in inner.messages.values_mut() {
            if message.status == MessageStatus::Claimed
                && message.claimed_at.map(|at| at < older_than).unwrap_or(true)
            {
                message.status = MessageStatus::Pending;
                message.claimed_at = None;
                requeued += 1;
            }
        }
        Ok(requeued)
    }

    async fn upsert_contact(
        &self,
        subject_id: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let profile = inner
            .profiles
            .entry(subject_id.to_string())
            .or_insert_with(|| SubjectProfile::empty(subject_id));
        if let Some(email) = email {
            profile.email = Some(email.to_string());
        }
        if let Some(phone) = phone {
            profile.phone = Some(phone.to_string());
        }
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn subject_profile(&self, subject_id: &str) -> StoreResult<Option<SubjectProfile>> {
        let inner = self.inner.lock().await;
        Ok(inner.profiles.get(subject_id).cloned())
    }

    async fn adjust_score(&self, subject_id: &str, delta: i64) -> StoreResult<i64> {
        let mut inner = self.inner.lock().await;
        let profile = inner
            .profiles
            .entry(subject_id.to_string())
            .or_insert_with(|| SubjectProfile::empty(subject_id));
        profile.score += delta;
        profile.updated_at = Utc::now();
        Ok(profile.score)
    }

    async fn add_tag(&self, subject_id: &str, tag: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        let profile = inner
            .profiles
            .entry(subject_id.to_string())
            .or_insert_with(|| SubjectProfile::empty(subject_id));
        if !profile.tags.iter().any(|t| t == tag) {
            profile.tags.push(tag.to_string());
        }
        profile.updated_at = Utc::now();
        Ok(())
    }

    async fn remove_tag(&self, subject_id: &str, tag: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(profile) = inner.profiles.get_mut(subject_id) {
            profile.tags.retain(|t| t != tag);
            profile.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn insert_task(&self, task: FollowUpTask) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.tasks.push(task);
        Ok(())
    }

    async fn tasks_for_subject(&self, subject_id: &str) -> StoreResult<Vec<FollowUpTask>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tasks
            .iter()
            .filter(|t| t.subject_id == subject_id)
            .cloned()
            .collect())
    }

    async fn insert_alert(&self, alert: OperatorAlert) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        inner.alerts.push(alert);
        Ok(())
    }

    async fn open_alerts(&self) -> StoreResult<Vec<OperatorAlert>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .alerts
            .iter()
            .filter(|a| !a.acknowledged)
            .cloned()
            .collect())
    }
}
