// Dispatcher: turns a claimed ScheduledMessage into transport sends,
// recording the outcome back onto the message and advancing its
// enrollment on success.

use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::render::render_str;
use crate::campaigns::CampaignEngine;
use crate::error::{EngineResult, TransportError};
use crate::models::{
    Audience, Channel, MessageTemplate, NotificationRequest, OperatorAlert, Priority,
    ScheduledMessage, SubjectProfile,
};
use crate::services::{ContentGenerator, EmailTransport, SmsTransport};
use crate::store::EngineStore;

/// Construction-time dispatcher settings. Operator recipients and retry
/// behavior are explicit configuration, not ambient globals.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub operator_email: Option<String>,
    pub operator_phone: Option<String>,
    /// Total send attempts before a message becomes terminally failed.
    pub max_send_attempts: i32,
    /// First retry delay; doubles each attempt, plus jitter.
    pub retry_backoff_secs: i64,
    pub generation_timeout: std::time::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            operator_email: None,
            operator_phone: None,
            max_send_attempts: 3,
            retry_backoff_secs: 60,
            generation_timeout: std::time::Duration::from_secs(10),
        }
    }
}

/// What happened to a claimed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Cancelled,
    Retried,
    Failed,
}

pub struct Dispatcher {
    store: Arc<dyn EngineStore>,
    campaigns: Arc<CampaignEngine>,
    email: Arc<dyn EmailTransport>,
    sms: Option<Arc<dyn SmsTransport>>,
    generator: Option<Arc<dyn ContentGenerator>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn EngineStore>,
        campaigns: Arc<CampaignEngine>,
        email: Arc<dyn EmailTransport>,
        sms: Option<Arc<dyn SmsTransport>>,
        generator: Option<Arc<dyn ContentGenerator>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            campaigns,
            email,
            sms,
            generator,
            config,
        }
    }

    /// Deliver one claimed message. Transport calls are the only blocking
    /// I/O and happen without holding any store state.
    pub async fn dispatch(&self, message: &ScheduledMessage) -> EngineResult<DispatchOutcome> {
        // Enrollment status is checked at send time, not only at schedule
        // time: a stop that landed after this message was claimed still
        // wins.
        if let Some(enrollment_id) = message.enrollment_id {
            let active = self
                .store
                .enrollment(enrollment_id)
                .await?
                .map(|e| e.is_active())
                .unwrap_or(false);
            if !active {
                self.store.mark_message_cancelled(message.id).await?;
                info!(message = %message.id, "enrollment no longer active, message cancelled");
                return Ok(DispatchOutcome::Cancelled);
            }
        }

        let template = match self.store.template(message.payload.template_id).await? {
            Some(template) => template,
            None => {
                return self
                    .fail_terminal(
                        message,
                        message.attempt_count + 1,
                        &format!("template {} missing", message.payload.template_id),
                    )
                    .await;
            }
        };

        let profile = self.store.subject_profile(&message.subject_id).await?;
        let (to_email, to_phone) = self.recipients(message, profile.as_ref());

        let request = self.build_request(message, &template, profile.as_ref()).await;
        let channels = select_channels(message.payload.priority, message.channel);

        let (email_result, sms_result) = tokio::join!(
            self.send_on_email(channels.contains(&Channel::Email), to_email.as_deref(), &request),
            self.send_on_sms(channels.contains(&Channel::Sms), to_phone.as_deref(), &request),
        );

        let mut attempted: Vec<(Channel, Result<(), TransportError>)> = Vec::new();
        if let Some(result) = email_result {
            attempted.push((Channel::Email, result));
        }
        if let Some(result) = sms_result {
            attempted.push((Channel::Sms, result));
        }

        let delivered = attempted.iter().any(|(_, r)| r.is_ok());
        if delivered {
            for (channel, result) in &attempted {
                if let Err(e) = result {
                    warn!(message = %message.id, %channel, error = %e, "channel delivery failed");
                }
            }
            self.store.mark_message_sent(message.id).await?;
            if let Some(enrollment_id) = message.enrollment_id {
                if let Err(e) = self.campaigns.advance(enrollment_id).await {
                    warn!(enrollment = %enrollment_id, error = %e, "advance after send failed");
                }
            }
            return Ok(DispatchOutcome::Sent);
        }

        let reason = attempted
            .iter()
            .map(|(channel, r)| match r {
                Err(e) => format!("{}: {}", channel, e),
                Ok(()) => String::new(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        let attempts = message.attempt_count + 1;
        let all_permanent = !attempted.is_empty()
            && attempted
                .iter()
                .all(|(_, r)| matches!(r, Err(e) if e.is_permanent()));

        if all_permanent || attempts >= self.config.max_send_attempts {
            return self.fail_terminal(message, attempts, &reason).await;
        }

        let delay = self.backoff(attempts);
        self.store
            .requeue_message(message.id, Utc::now() + delay, attempts, &reason)
            .await?;
        warn!(
            message = %message.id,
            attempts,
            delay_secs = delay.num_seconds(),
            "send failed, retrying"
        );
        Ok(DispatchOutcome::Retried)
    }

    fn recipients(
        &self,
        message: &ScheduledMessage,
        profile: Option<&SubjectProfile>,
    ) -> (Option<String>, Option<String>) {
        match message.payload.audience {
            Audience::Subject => (
                profile.and_then(|p| p.email.clone()),
                profile.and_then(|p| p.phone.clone()),
            ),
            Audience::Operator => (
                self.config.operator_email.clone(),
                self.config.operator_phone.clone(),
            ),
        }
    }

    async fn build_request(
        &self,
        message: &ScheduledMessage,
        template: &MessageTemplate,
        profile: Option<&SubjectProfile>,
    ) -> NotificationRequest {
        let mut context = message.payload.context.clone();
        if !context.is_object() {
            context = serde_json::json!({});
        }
        if let (serde_json::Value::Object(map), Some(profile)) = (&mut context, profile) {
            map.insert("subject_id".into(), serde_json::json!(profile.subject_id));
            map.insert("score".into(), serde_json::json!(profile.score));
            if let Some(email) = &profile.email {
                map.entry("email".to_string())
                    .or_insert_with(|| serde_json::json!(email));
            }
        }

        let subject_line = render_str(&template.subject_line, &context);
        let mut body = render_str(&template.body, &context);

        if template.personalize {
            if let Some(generator) = &self.generator {
                let prompt = format!(
                    "Rewrite this real estate outreach message so it reads personally \
                     written for the recipient. Keep every factual detail and stay under \
                     120 words.\n\nRecipient context: {}\n\nMessage:\n{}",
                    context, body
                );
                match tokio::time::timeout(
                    self.config.generation_timeout,
                    generator.generate(&prompt),
                )
                .await
                {
                    Ok(Ok(text)) => body = text,
                    Ok(Err(e)) => {
                        warn!(message = %message.id, error = %e, "generation failed, using static template");
                    }
                    Err(_) => {
                        warn!(message = %message.id, "generation timed out, using static template");
                    }
                }
            }
        }

        NotificationRequest {
            subject_id: message.subject_id.clone(),
            priority: message.payload.priority,
            channels: select_channels(message.payload.priority, message.channel),
            subject_line,
            body,
        }
    }

    async fn send_on_email(
        &self,
        selected: bool,
        to: Option<&str>,
        request: &NotificationRequest,
    ) -> Option<Result<(), TransportError>> {
        if !selected {
            return None;
        }
        let Some(to) = to else {
            return Some(Err(TransportError::InvalidRecipient(
                "no email address on file".into(),
            )));
        };
        Some(
            self.email
                .send_email(to, &request.subject_line, &request.body)
                .await,
        )
    }

    async fn send_on_sms(
        &self,
        selected: bool,
        to: Option<&str>,
        request: &NotificationRequest,
    ) -> Option<Result<(), TransportError>> {
        if !selected {
            return None;
        }
        let Some(sms) = &self.sms else {
            return Some(Err(TransportError::Transport(
                "no sms transport configured".into(),
            )));
        };
        let Some(to) = to else {
            return Some(Err(TransportError::InvalidRecipient(
                "no phone number on file".into(),
            )));
        };
        Some(sms.send_sms(to, &request.body).await)
    }

    async fn fail_terminal(
        &self,
        message: &ScheduledMessage,
        attempts: i32,
        reason: &str,
    ) -> EngineResult<DispatchOutcome> {
        self.store
            .mark_message_failed(message.id, attempts, reason)
            .await?;
        self.store
            .insert_alert(OperatorAlert::new(
                &message.subject_id,
                Some(message.id),
                &format!("message delivery failed permanently: {}", reason),
            ))
            .await?;
        error!(
            message = %message.id,
            subject = %message.subject_id,
            attempts,
            reason,
            "message failed permanently"
        );
        Ok(DispatchOutcome::Failed)
    }

    fn backoff(&self, attempt: i32) -> Duration {
        backoff_delay(self.config.retry_backoff_secs, attempt)
    }
}

/// Exponential backoff: `base * 2^(attempt-1)` plus jitter up to half the
/// base, so retry herds from one failing provider spread out.
fn backoff_delay(base_secs: i64, attempt: i32) -> Duration {
    let base = base_secs.max(1);
    let shift = (attempt - 1).clamp(0, 16) as u32;
    let delay = base.saturating_mul(1_i64 << shift);
    let jitter = rand::thread_rng().gen_range(0..=base / 2);
    Duration::seconds(delay + jitter)
}

/// Priority-driven channel fan-out: high and urgent notifications go out on
/// email and SMS together; everything else stays on the message's own
/// channel.
fn select_channels(priority: Priority, base: Channel) -> Vec<Channel> {
    if priority.fans_out() {
        vec![Channel::Email, Channel::Sms]
    } else {
        vec![base]
    }
}
