// Campaign engine: owns enrollments and advances them through campaign
// steps by scheduling the next message.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, StorageError};
use crate::models::{
    Audience, Campaign, CampaignStep, Enrollment, EnrollmentStatus, Channel, MessagePayload,
    Priority, ScheduledMessage,
};
use crate::store::EngineStore;

/// Result of an enroll call. Re-enrolling while active is a no-op and
/// reports the existing enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled(Uuid),
    AlreadyActive(Uuid),
}

impl EnrollOutcome {
    pub fn enrollment_id(&self) -> Uuid {
        match self {
            EnrollOutcome::Enrolled(id) | EnrollOutcome::AlreadyActive(id) => *id,
        }
    }
}

/// Why an enrollment is being stopped. Paused enrollments can be resumed;
/// unsubscribed ones cannot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Paused,
    Unsubscribed,
}

impl StopReason {
    fn status(&self) -> EnrollmentStatus {
        match self {
            StopReason::Paused => EnrollmentStatus::Paused,
            StopReason::Unsubscribed => EnrollmentStatus::Unsubscribed,
        }
    }
}

pub struct CampaignEngine {
    store: Arc<dyn EngineStore>,
}

impl CampaignEngine {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Idempotently enroll a subject into the latest version of a campaign
    /// and schedule its first step.
    pub async fn enroll(&self, subject_id: &str, campaign_id: Uuid) -> EngineResult<EnrollOutcome> {
        if let Some(existing) = self.store.active_enrollment(subject_id, campaign_id).await? {
            return Ok(EnrollOutcome::AlreadyActive(existing.id));
        }

        let campaign = self
            .store
            .campaign(campaign_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("campaign {}", campaign_id)))?;

        let enrolled_at = Utc::now();
        let mut enrollment = Enrollment::new(subject_id, &campaign, enrolled_at);
        if campaign.steps.is_empty() {
            enrollment.status = EnrollmentStatus::Completed;
            enrollment.completed_at = Some(enrolled_at);
        }
        let enrollment_id = enrollment.id;

        match self.store.insert_enrollment(enrollment).await {
            Ok(()) => {}
            // Lost a race against a concurrent enroll for the same pair;
            // the idempotency invariant holds either way.
            Err(StorageError::Conflict(_)) => {
                if let Some(existing) =
                    self.store.active_enrollment(subject_id, campaign_id).await?
                {
                    return Ok(EnrollOutcome::AlreadyActive(existing.id));
                }
                return Err(EngineError::Internal(format!(
                    "enrollment conflict without a surviving active row for subject '{}'",
                    subject_id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(step) = campaign.step(0) {
            let message = self
                .step_message(subject_id, enrollment_id, &campaign, step, enrolled_at + step.offset())
                .await?;
            self.store.insert_message(message).await?;
        }

        info!(subject = subject_id, campaign = %campaign.name, "subject enrolled");
        Ok(EnrollOutcome::Enrolled(enrollment_id))
    }

    /// Advance an enrollment after a step was delivered: schedule the next
    /// step or complete the traversal. Non-active enrollments are left
    /// untouched.
    pub async fn advance(&self, enrollment_id: Uuid) -> EngineResult<()> {
        let enrollment = self
            .store
            .enrollment(enrollment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("enrollment {}", enrollment_id)))?;

        if !enrollment.is_active() {
            return Ok(());
        }

        let campaign = self.pinned_campaign(&enrollment).await?;
        let next_step = enrollment.current_step + 1;

        match campaign.step(next_step) {
            Some(step) => {
                let message = self
                    .step_message(
                        &enrollment.subject_id,
                        enrollment.id,
                        &campaign,
                        step,
                        Utc::now() + step.offset(),
                    )
                    .await?;
                self.store.insert_message(message).await?;
                self.store.set_enrollment_step(enrollment.id, next_step).await?;
            }
            None => {
                self.store
                    .set_enrollment_status(
                        enrollment.id,
                        EnrollmentStatus::Completed,
                        Some(Utc::now()),
                    )
                    .await?;
                info!(
                    subject = %enrollment.subject_id,
                    campaign = %campaign.name,
                    "enrollment completed"
                );
            }
        }

        Ok(())
    }

    /// Stop one enrollment, cancelling its pending messages.
    pub async fn stop(&self, enrollment_id: Uuid, reason: StopReason) -> EngineResult<()> {
        let enrollment = self
            .store
            .enrollment(enrollment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("enrollment {}", enrollment_id)))?;

        if !enrollment.is_active() {
            return Ok(());
        }

        let cancelled = self.store.cancel_pending_for_enrollment(enrollment_id).await?;
        self.store
            .set_enrollment_status(enrollment_id, reason.status(), None)
            .await?;

        info!(
            subject = %enrollment.subject_id,
            campaign = %enrollment.campaign_id,
            cancelled,
            ?reason,
            "enrollment stopped"
        );
        Ok(())
    }

    /// Resume a paused enrollment, re-scheduling its current step.
    pub async fn resume(&self, enrollment_id: Uuid) -> EngineResult<()> {
        let enrollment = self
            .store
            .enrollment(enrollment_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("enrollment {}", enrollment_id)))?;

        if enrollment.status != EnrollmentStatus::Paused {
            return Ok(());
        }

        self.store
            .set_enrollment_status(enrollment_id, EnrollmentStatus::Active, None)
            .await?;

        let campaign = self.pinned_campaign(&enrollment).await?;
        if let Some(step) = campaign.step(enrollment.current_step) {
            let message = self
                .step_message(
                    &enrollment.subject_id,
                    enrollment.id,
                    &campaign,
                    step,
                    Utc::now() + step.offset(),
                )
                .await?;
            self.store.insert_message(message).await?;
        }

        Ok(())
    }

    /// Pause the subject's active enrollment in one campaign, if any.
    pub async fn stop_campaign(&self, subject_id: &str, campaign_id: Uuid) -> EngineResult<()> {
        if let Some(enrollment) = self.store.active_enrollment(subject_id, campaign_id).await? {
            self.stop(enrollment.id, StopReason::Paused).await?;
        }
        Ok(())
    }

    /// Channel-wide unsubscribe from the transport layer: stop every
    /// active enrollment for the subject whose campaign touches the
    /// channel, and cancel all pending subject-audience messages on it.
    /// This always succeeds from the subject's perspective; sends already
    /// irrevocably dispatched are out of reach.
    pub async fn unsubscribe(&self, subject_id: &str, channel: Channel) -> EngineResult<()> {
        let enrollments = self.store.active_enrollments_for_subject(subject_id).await?;
        for enrollment in enrollments {
            let touches = match self.pinned_campaign(&enrollment).await {
                Ok(campaign) => campaign.touches_channel(channel),
                Err(e) => {
                    // A missing definition must not block the opt-out.
                    warn!(
                        enrollment = %enrollment.id,
                        error = %e,
                        "campaign lookup failed during unsubscribe, stopping anyway"
                    );
                    true
                }
            };
            if touches {
                self.stop(enrollment.id, StopReason::Unsubscribed).await?;
            }
        }

        let cancelled = self
            .store
            .cancel_pending_for_subject_channel(subject_id, channel)
            .await?;
        info!(subject = subject_id, %channel, cancelled, "subject unsubscribed");
        Ok(())
    }

    /// The campaign version an enrollment was pinned to at enroll time.
    async fn pinned_campaign(&self, enrollment: &Enrollment) -> EngineResult<Campaign> {
        self.store
            .campaign_version(enrollment.campaign_id, enrollment.campaign_version)
            .await?
            .ok_or_else(|| {
                EngineError::NotFound(format!(
                    "campaign {} v{}",
                    enrollment.campaign_id, enrollment.campaign_version
                ))
            })
    }

    async fn step_message(
        &self,
        subject_id: &str,
        enrollment_id: Uuid,
        campaign: &Campaign,
        step: &CampaignStep,
        due_at: chrono::DateTime<Utc>,
    ) -> EngineResult<ScheduledMessage> {
        let profile = self.store.subject_profile(subject_id).await?;
        let mut context = serde_json::json!({
            "subject_id": subject_id,
            "campaign_name": campaign.name,
        });
        if let Some(email) = profile.as_ref().and_then(|p| p.email.as_deref()) {
            context["email"] = serde_json::json!(email);
        }

        Ok(ScheduledMessage::new(
            subject_id,
            Some(enrollment_id),
            due_at,
            step.channel,
            MessagePayload {
                template_id: step.template_id,
                priority: Priority::Normal,
                audience: Audience::Subject,
                context,
            },
        ))
    }
}
