// Durable state behind one seam.
//
// Every piece of coordination in the engine (claiming, dedup, enrollment
// idempotency, cooldown bookkeeping) is an atomic operation on this trait.
// Two backends: PostgreSQL for deployments, in-memory for development and
// the test suite.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::models::{
    BehavioralEvent, Campaign, Channel, Enrollment, EnrollmentStatus, FollowUpTask,
    MessageStatus, MessageTemplate, OperatorAlert, RecordOutcome, ScheduledMessage,
    SubjectProfile,
};
use crate::rules::TriggerRule;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type StoreResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait EngineStore: Send + Sync {
    // ─── Event store ────────────────────────────────────────────────

    /// Append-only, deduplicated on event id. A replayed id reports
    /// `Duplicate` and stores nothing.
    async fn record_event(&self, event: BehavioralEvent) -> StoreResult<RecordOutcome>;

    /// Time-ordered history for a subject since `since`, optionally
    /// filtered by event type.
    async fn events_for_subject(
        &self,
        subject_id: &str,
        event_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<BehavioralEvent>>;

    /// Retention purge; returns the number of events removed.
    async fn purge_events_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    // ─── Rules ──────────────────────────────────────────────────────

    async fn insert_rule(&self, rule: TriggerRule) -> StoreResult<()>;

    /// Enabled rules whose `event_types` include the given type.
    async fn rules_for_event_type(&self, event_type: &str) -> StoreResult<Vec<TriggerRule>>;

    async fn last_rule_firing(
        &self,
        rule_id: Uuid,
        subject_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    async fn record_rule_firing(
        &self,
        rule_id: Uuid,
        subject_id: &str,
        fired_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    // ─── Campaigns & templates ──────────────────────────────────────

    /// Store a campaign definition. Re-inserting an existing id creates
    /// the next version; returns the stored version.
    async fn insert_campaign(&self, campaign: Campaign) -> StoreResult<i32>;

    /// Latest version of a campaign.
    async fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>>;

    /// A specific pinned version.
    async fn campaign_version(&self, id: Uuid, version: i32) -> StoreResult<Option<Campaign>>;

    async fn insert_template(&self, template: MessageTemplate) -> StoreResult<()>;

    async fn template(&self, id: Uuid) -> StoreResult<Option<MessageTemplate>>;

    // ─── Enrollments ────────────────────────────────────────────────

    /// Insert a new enrollment. Fails with `Conflict` when an active
    /// enrollment already exists for the (subject, campaign) pair.
    async fn insert_enrollment(&self, enrollment: Enrollment) -> StoreResult<()>;

    async fn enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>>;

    async fn active_enrollment(
        &self,
        subject_id: &str,
        campaign_id: Uuid,
    ) -> StoreResult<Option<Enrollment>>;

    async fn active_enrollments_for_subject(
        &self,
        subject_id: &str,
    ) -> StoreResult<Vec<Enrollment>>;

    async fn enrollments_for_subject(&self, subject_id: &str) -> StoreResult<Vec<Enrollment>>;

    async fn set_enrollment_step(&self, id: Uuid, step: i32) -> StoreResult<()>;

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    // ─── Scheduled messages ─────────────────────────────────────────

    async fn insert_message(&self, message: ScheduledMessage) -> StoreResult<()>;

    async fn message(&self, id: Uuid) -> StoreResult<Option<ScheduledMessage>>;

    async fn messages_with_status(
        &self,
        status: MessageStatus,
    ) -> StoreResult<Vec<ScheduledMessage>>;

    /// Atomically claim up to `limit` due pending messages: each returned
    /// row transitioned `pending → claimed` exactly once, no matter how
    /// many ticks run concurrently.
    async fn claim_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledMessage>>;

    async fn mark_message_sent(&self, id: Uuid) -> StoreResult<()>;

    async fn mark_message_cancelled(&self, id: Uuid) -> StoreResult<()>;

    async fn mark_message_failed(
        &self,
        id: Uuid,
        attempt_count: i32,
        error: &str,
    ) -> StoreResult<()>;

    /// Put a claimed message back in the queue for a retry attempt.
    async fn requeue_message(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        attempt_count: i32,
        error: &str,
    ) -> StoreResult<()>;

    /// Cancel every pending message belonging to an enrollment.
    async fn cancel_pending_for_enrollment(&self, enrollment_id: Uuid) -> StoreResult<u64>;

    /// Cancel every pending subject-audience message for a subject on a
    /// channel (channel-wide unsubscribe).
    async fn cancel_pending_for_subject_channel(
        &self,
        subject_id: &str,
        channel: Channel,
    ) -> StoreResult<u64>;

    /// Requeue claims abandoned by a crashed worker.
    async fn requeue_stale_claims(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;

    // ─── Subjects, tasks, alerts ────────────────────────────────────

    /// Merge newly-learned contact endpoints into the subject profile.
    async fn upsert_contact(
        &self,
        subject_id: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> StoreResult<()>;

    async fn subject_profile(&self, subject_id: &str) -> StoreResult<Option<SubjectProfile>>;

    /// Apply a score delta; returns the new score.
    async fn adjust_score(&self, subject_id: &str, delta: i64) -> StoreResult<i64>;

    async fn add_tag(&self, subject_id: &str, tag: &str) -> StoreResult<()>;

    async fn remove_tag(&self, subject_id: &str, tag: &str) -> StoreResult<()>;

    async fn insert_task(&self, task: FollowUpTask) -> StoreResult<()>;

    async fn tasks_for_subject(&self, subject_id: &str) -> StoreResult<Vec<FollowUpTask>>;

    async fn insert_alert(&self, alert: OperatorAlert) -> StoreResult<()>;

    async fn open_alerts(&self) -> StoreResult<Vec<OperatorAlert>>;
}
