// PostgreSQL store backend.
//
// Claiming uses a conditional update over `FOR UPDATE SKIP LOCKED` so any
// number of scheduler ticks (or process instances) can poll concurrently
// without double-processing a row. Rule conditions, actions, and campaign
// steps are stored as JSONB.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::{EngineStore, StoreResult};
use crate::error::StorageError;
use crate::models::{
    BehavioralEvent, Campaign, Channel, Enrollment, EnrollmentStatus, FollowUpTask,
    MessageStatus, MessageTemplate, OperatorAlert, RecordOutcome, ScheduledMessage,
    SubjectProfile,
};
use crate::rules::TriggerRule;

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn conflict_or_database(context: &str, e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Database(ref db)
            if matches!(db.kind(), sqlx::error::ErrorKind::UniqueViolation) =>
        {
            StorageError::Conflict(context.to_string())
        }
        other => StorageError::Database(other),
    }
}

fn corrupt(e: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt(e.to_string())
}

fn event_from_row(row: &PgRow) -> StoreResult<BehavioralEvent> {
    Ok(BehavioralEvent {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        event_type: row.try_get("event_type")?,
        attributes: row.try_get("attributes")?,
        occurred_at: row.try_get("occurred_at")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn rule_from_row(row: &PgRow) -> StoreResult<TriggerRule> {
    Ok(TriggerRule {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        event_types: serde_json::from_value(row.try_get("event_types")?).map_err(corrupt)?,
        conditions: serde_json::from_value(row.try_get("conditions")?).map_err(corrupt)?,
        actions: serde_json::from_value(row.try_get("actions")?).map_err(corrupt)?,
        enabled: row.try_get("enabled")?,
        priority: row.try_get("priority")?,
        cooldown_secs: row.try_get("cooldown_secs")?,
    })
}

fn campaign_from_row(row: &PgRow) -> StoreResult<Campaign> {
    Ok(Campaign {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        name: row.try_get("name")?,
        trigger_type: row.try_get("trigger_type")?,
        steps: serde_json::from_value(row.try_get("steps")?).map_err(corrupt)?,
    })
}

fn enrollment_from_row(row: &PgRow) -> StoreResult<Enrollment> {
    let status: String = row.try_get("status")?;
    Ok(Enrollment {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        campaign_id: row.try_get("campaign_id")?,
        campaign_version: row.try_get("campaign_version")?,
        current_step: row.try_get("current_step")?,
        status: status.parse().map_err(corrupt)?,
        enrolled_at: row.try_get("enrolled_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn message_from_row(row: &PgRow) -> StoreResult<ScheduledMessage> {
    let status: String = row.try_get("status")?;
    let channel: String = row.try_get("channel")?;
    Ok(ScheduledMessage {
        id: row.try_get("id")?,
        enrollment_id: row.try_get("enrollment_id")?,
        subject_id: row.try_get("subject_id")?,
        due_at: row.try_get("due_at")?,
        channel: channel.parse().map_err(corrupt)?,
        payload: serde_json::from_value(row.try_get("payload")?).map_err(corrupt)?,
        status: status.parse().map_err(corrupt)?,
        attempt_count: row.try_get("attempt_count")?,
        last_error: row.try_get("last_error")?,
        claimed_at: row.try_get("claimed_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> StoreResult<SubjectProfile> {
    Ok(SubjectProfile {
        subject_id: row.try_get("subject_id")?,
        email: row.try_get("email")?,
        phone: row.try_get("phone")?,
        score: row.try_get("score")?,
        tags: serde_json::from_value(row.try_get("tags")?).map_err(corrupt)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn task_from_row(row: &PgRow) -> StoreResult<FollowUpTask> {
    Ok(FollowUpTask {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        description: row.try_get("description")?,
        done: row.try_get("done")?,
        created_at: row.try_get("created_at")?,
    })
}

fn alert_from_row(row: &PgRow) -> StoreResult<OperatorAlert> {
    Ok(OperatorAlert {
        id: row.try_get("id")?,
        subject_id: row.try_get("subject_id")?,
        message_id: row.try_get("message_id")?,
        reason: row.try_get("reason")?,
        acknowledged: row.try_get("acknowledged")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl EngineStore for PgStore {
    async fn record_event(&self, event: BehavioralEvent) -> StoreResult<RecordOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO behavioral_events (id, subject_id, event_type, attributes, occurred_at, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.subject_id)
        .bind(&event.event_type)
        .bind(&event.attributes)
        .bind(event.occurred_at)
        .bind(event.recorded_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(RecordOutcome::Duplicate(event.id))
        } else {
            Ok(RecordOutcome::Recorded(event.id))
        }
    }

    async fn events_for_subject(
        &self,
        subject_id: &str,
        event_type: Option<&str>,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<BehavioralEvent>> {
        let rows = match event_type {
            Some(event_type) => {
                sqlx::query(
                    r#"
                    SELECT * FROM behavioral_events
                    WHERE subject_id = $1 AND event_type = $2 AND occurred_at >= $3
                    ORDER BY occurred_at ASC
                    "#,
                )
                .bind(subject_id)
                .bind(event_type)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM behavioral_events
                    WHERE subject_id = $1 AND occurred_at >= $2
                    ORDER BY occurred_at ASC
                    "#,
                )
                .bind(subject_id)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(event_from_row).collect()
    }

    async fn purge_events_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM behavioral_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_rule(&self, rule: TriggerRule) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO trigger_rules (id, name, event_types, conditions, actions, enabled, priority, cooldown_secs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                event_types = EXCLUDED.event_types,
                conditions = EXCLUDED.conditions,
                actions = EXCLUDED.actions,
                enabled = EXCLUDED.enabled,
                priority = EXCLUDED.priority,
                cooldown_secs = EXCLUDED.cooldown_secs
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(serde_json::to_value(&rule.event_types).map_err(corrupt)?)
        .bind(serde_json::to_value(&rule.conditions).map_err(corrupt)?)
        .bind(serde_json::to_value(&rule.actions).map_err(corrupt)?)
        .bind(rule.enabled)
        .bind(rule.priority)
        .bind(rule.cooldown_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn rules_for_event_type(&self, event_type: &str) -> StoreResult<Vec<TriggerRule>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trigger_rules
            WHERE enabled = TRUE AND event_types @> $1
            ORDER BY priority DESC, id ASC
            "#,
        )
        .bind(serde_json::json!([event_type]))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }

    async fn last_rule_firing(
        &self,
        rule_id: Uuid,
        subject_id: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let fired_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            "SELECT fired_at FROM rule_firings WHERE rule_id = $1 AND subject_id = $2",
        )
        .bind(rule_id)
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fired_at)
    }

    async fn record_rule_firing(
        &self,
        rule_id: Uuid,
        subject_id: &str,
        fired_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rule_firings (rule_id, subject_id, fired_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (rule_id, subject_id) DO UPDATE SET fired_at = EXCLUDED.fired_at
            "#,
        )
        .bind(rule_id)
        .bind(subject_id)
        .bind(fired_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_campaign(&self, campaign: Campaign) -> StoreResult<i32> {
        let mut tx = self.pool.begin().await?;

        let next: i32 = sqlx::query_scalar::<_, i32>(
            "SELECT COALESCE(MAX(version), 0) + 1 FROM campaigns WHERE id = $1",
        )
        .bind(campaign.id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (id, version, name, trigger_type, steps)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(campaign.id)
        .bind(next)
        .bind(&campaign.name)
        .bind(&campaign.trigger_type)
        .bind(serde_json::to_value(&campaign.steps).map_err(corrupt)?)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(next)
    }

    async fn campaign(&self, id: Uuid) -> StoreResult<Option<Campaign>> {
        let row = sqlx::query(
            "SELECT * FROM campaigns WHERE id = $1 ORDER BY version DESC LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn campaign_version(&self, id: Uuid, version: i32) -> StoreResult<Option<Campaign>> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = $1 AND version = $2")
            .bind(id)
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(campaign_from_row).transpose()
    }

    async fn insert_template(&self, template: MessageTemplate) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO message_templates (id, name, subject_line, body, personalize)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                subject_line = EXCLUDED.subject_line,
                body = EXCLUDED.body,
                personalize = EXCLUDED.personalize
            "#,
        )
        .bind(template.id)
        .bind(&template.name)
        .bind(&template.subject_line)
        .bind(&template.body)
        .bind(template.personalize)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn template(&self, id: Uuid) -> StoreResult<Option<MessageTemplate>> {
        let row = sqlx::query("SELECT * FROM message_templates WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| {
            Ok(MessageTemplate {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                subject_line: row.try_get("subject_line")?,
                body: row.try_get("body")?,
                personalize: row.try_get("personalize")?,
            })
        })
        .transpose()
    }

    async fn insert_enrollment(&self, enrollment: Enrollment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrollments
                (id, subject_id, campaign_id, campaign_version, current_step, status, enrolled_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(enrollment.id)
        .bind(&enrollment.subject_id)
        .bind(enrollment.campaign_id)
        .bind(enrollment.campaign_version)
        .bind(enrollment.current_step)
        .bind(enrollment.status.as_str())
        .bind(enrollment.enrolled_at)
        .bind(enrollment.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_or_database("active enrollment already exists", e))?;
        Ok(())
    }

    async fn enrollment(&self, id: Uuid) -> StoreResult<Option<Enrollment>> {
        let row = sqlx::query("SELECT * FROM enrollments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn active_enrollment(
        &self,
        subject_id: &str,
        campaign_id: Uuid,
    ) -> StoreResult<Option<Enrollment>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM enrollments
            WHERE subject_id = $1 AND campaign_id = $2 AND status = 'active'
            "#,
        )
        .bind(subject_id)
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(enrollment_from_row).transpose()
    }

    async fn active_enrollments_for_subject(
        &self,
        subject_id: &str,
    ) -> StoreResult<Vec<Enrollment>> {
        let rows = sqlx::query(
            "SELECT * FROM enrollments WHERE subject_id = $1 AND status = 'active'",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(enrollment_from_row).collect()
    }

    async fn enrollments_for_subject(&self, subject_id: &str) -> StoreResult<Vec<Enrollment>> {
        let rows = sqlx::query(
            "SELECT * FROM enrollments WHERE subject_id = $1 ORDER BY enrolled_at ASC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(enrollment_from_row).collect()
    }

    async fn set_enrollment_step(&self, id: Uuid, step: i32) -> StoreResult<()> {
        sqlx::query("UPDATE enrollments SET current_step = $2 WHERE id = $1")
            .bind(id)
            .bind(step)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_enrollment_status(
        &self,
        id: Uuid,
        status: EnrollmentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE enrollments SET status = $2, completed_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(completed_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_message(&self, message: ScheduledMessage) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_messages
                (id, enrollment_id, subject_id, due_at, channel, payload, status,
                 attempt_count, last_error, claimed_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(message.id)
        .bind(message.enrollment_id)
        .bind(&message.subject_id)
        .bind(message.due_at)
        .bind(message.channel.as_str())
        .bind(serde_json::to_value(&message.payload).map_err(corrupt)?)
        .bind(message.status.as_str())
        .bind(message.attempt_count)
        .bind(&message.last_error)
        .bind(message.claimed_at)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn message(&self, id: Uuid) -> StoreResult<Option<ScheduledMessage>> {
        let row = sqlx::query("SELECT * FROM scheduled_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn messages_with_status(
        &self,
        status: MessageStatus,
    ) -> StoreResult<Vec<ScheduledMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM scheduled_messages WHERE status = $1 ORDER BY due_at ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(message_from_row).collect()
    }

    async fn claim_due_messages(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<ScheduledMessage>> {
        let rows = sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = 'claimed', claimed_at = $1
            WHERE id IN (
                SELECT id FROM scheduled_messages
                WHERE status = 'pending' AND due_at <= $1
                ORDER BY due_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(message_from_row).collect()
    }

    async fn mark_message_sent(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE scheduled_messages SET status = 'sent', last_error = NULL WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_message_cancelled(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE scheduled_messages SET status = 'cancelled' WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_message_failed(
        &self,
        id: Uuid,
        attempt_count: i32,
        error: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = 'failed', attempt_count = $2, last_error = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempt_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn requeue_message(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        attempt_count: i32,
        error: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = 'pending', due_at = $2, attempt_count = $3,
                last_error = $4, claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(due_at)
        .bind(attempt_count)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_pending_for_enrollment(&self, enrollment_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = 'cancelled'
            WHERE enrollment_id = $1 AND status = 'pending'
            "#,
        )
        .bind(enrollment_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn cancel_pending_for_subject_channel(
        &self,
        subject_id: &str,
        channel: Channel,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = 'cancelled'
            WHERE subject_id = $1 AND channel = $2 AND status = 'pending'
              AND payload->>'audience' = 'subject'
            "#,
        )
        .bind(subject_id)
        .bind(channel.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn requeue_stale_claims(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_messages
            SET status = 'pending', claimed_at = NULL
            WHERE status = 'claimed' AND (claimed_at IS NULL OR claimed_at < $1)
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn upsert_contact(
        &self,
        subject_id: &str,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subject_profiles (subject_id, email, phone, score, tags, updated_at)
            VALUES ($1, $2, $3, 0, '[]'::jsonb, NOW())
            ON CONFLICT (subject_id) DO UPDATE SET
                email = COALESCE(EXCLUDED.email, subject_profiles.email),
                phone = COALESCE(EXCLUDED.phone, subject_profiles.phone),
                updated_at = NOW()
            "#,
        )
        .bind(subject_id)
        .bind(email)
        .bind(phone)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn subject_profile(&self, subject_id: &str) -> StoreResult<Option<SubjectProfile>> {
        let row = sqlx::query("SELECT * FROM subject_profiles WHERE subject_id = $1")
            .bind(subject_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(profile_from_row).transpose()
    }

    async fn adjust_score(&self, subject_id: &str, delta: i64) -> StoreResult<i64> {
        let score = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO subject_profiles (subject_id, score, tags, updated_at)
            VALUES ($1, $2, '[]'::jsonb, NOW())
            ON CONFLICT (subject_id) DO UPDATE SET
                score = subject_profiles.score + $2,
                updated_at = NOW()
            RETURNING score
            "#,
        )
        .bind(subject_id)
        .bind(delta)
        .fetch_one(&self.pool)
        .await?;
        Ok(score)
    }

    async fn add_tag(&self, subject_id: &str, tag: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subject_profiles (subject_id, score, tags, updated_at)
            VALUES ($1, 0, jsonb_build_array($2::text), NOW())
            ON CONFLICT (subject_id) DO UPDATE SET
                tags = CASE
                    WHEN subject_profiles.tags @> jsonb_build_array($2::text)
                    THEN subject_profiles.tags
                    ELSE subject_profiles.tags || jsonb_build_array($2::text)
                END,
                updated_at = NOW()
            "#,
        )
        .bind(subject_id)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_tag(&self, subject_id: &str, tag: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE subject_profiles
            SET tags = tags - $2, updated_at = NOW()
            WHERE subject_id = $1
            "#,
        )
        .bind(subject_id)
        .bind(tag)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_task(&self, task: FollowUpTask) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO follow_up_tasks (id, subject_id, description, done, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(task.id)
        .bind(&task.subject_id)
        .bind(&task.description)
        .bind(task.done)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn tasks_for_subject(&self, subject_id: &str) -> StoreResult<Vec<FollowUpTask>> {
        let rows = sqlx::query(
            "SELECT * FROM follow_up_tasks WHERE subject_id = $1 ORDER BY created_at ASC",
        )
        .bind(subject_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn insert_alert(&self, alert: OperatorAlert) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO operator_alerts (id, subject_id, message_id, reason, acknowledged, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.subject_id)
        .bind(alert.message_id)
        .bind(&alert.reason)
        .bind(alert.acknowledged)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn open_alerts(&self) -> StoreResult<Vec<OperatorAlert>> {
        let rows = sqlx::query(
            "SELECT * FROM operator_alerts WHERE acknowledged = FALSE ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(alert_from_row).collect()
    }
}
