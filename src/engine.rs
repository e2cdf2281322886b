// The automation engine front door.
//
// `ingest` durably records an event (deduplicated by id), then publishes it
// onto a sharded evaluation queue. Events for the same subject always land
// on the same shard, so rule evaluation for one subject is serialized while
// different subjects evaluate in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::campaigns::{CampaignEngine, EnrollOutcome};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    event_types, Audience, BehavioralEvent, Channel, FollowUpTask, MessagePayload, NewEvent,
    RecordOutcome, ScheduledMessage,
};
use crate::rules::{Action, RuleEngine};
use crate::store::EngineStore;

enum WorkerMsg {
    Event(BehavioralEvent),
    Flush(oneshot::Sender<()>),
}

/// Shared evaluation pipeline: everything a queue worker needs to turn an
/// event into applied actions.
struct EventProcessor {
    store: Arc<dyn EngineStore>,
    rules: RuleEngine,
    campaigns: Arc<CampaignEngine>,
}

impl EventProcessor {
    async fn process(&self, event: BehavioralEvent) {
        // Transport-layer opt-outs are handled ahead of rule evaluation:
        // an unsubscribe must take effect even if no rule references it.
        if event.event_type == event_types::UNSUBSCRIBE {
            let channel = event
                .attribute_str("channel")
                .and_then(|c| c.parse::<Channel>().ok())
                .unwrap_or(Channel::Email);
            if let Err(e) = self.campaigns.unsubscribe(&event.subject_id, channel).await {
                error!(subject = %event.subject_id, error = %e, "unsubscribe handling failed");
            }
        }

        let actions = match self.rules.evaluate(&event).await {
            Ok(actions) => actions,
            Err(e) => {
                error!(subject = %event.subject_id, error = %e, "rule evaluation aborted");
                return;
            }
        };

        for action in actions {
            if let Err(e) = self.apply(&event, &action).await {
                // Bulkhead: one failed action must not block the rest of
                // the batch.
                warn!(subject = %event.subject_id, ?action, error = %e, "action failed");
            }
        }
    }

    async fn apply(&self, event: &BehavioralEvent, action: &Action) -> EngineResult<()> {
        match action {
            Action::StartCampaign { campaign_id } => {
                match self.campaigns.enroll(&event.subject_id, *campaign_id).await? {
                    EnrollOutcome::Enrolled(_) => {}
                    EnrollOutcome::AlreadyActive(id) => {
                        debug!(subject = %event.subject_id, enrollment = %id, "already enrolled");
                    }
                }
            }
            Action::StopCampaign { campaign_id } => {
                self.campaigns
                    .stop_campaign(&event.subject_id, *campaign_id)
                    .await?;
            }
            Action::AdjustScore { delta } => {
                let score = self.store.adjust_score(&event.subject_id, *delta).await?;
                info!(subject = %event.subject_id, delta, score, "score adjusted");
            }
            Action::SendNotification {
                template_id,
                priority,
            } => {
                let message = ScheduledMessage::new(
                    &event.subject_id,
                    None,
                    chrono::Utc::now(),
                    Channel::Email,
                    MessagePayload {
                        template_id: *template_id,
                        priority: *priority,
                        audience: Audience::Operator,
                        context: serde_json::json!({
                            "subject_id": event.subject_id,
                            "event_type": event.event_type,
                            "attributes": event.attributes,
                        }),
                    },
                );
                self.store.insert_message(message).await?;
            }
            Action::CreateTask { description } => {
                self.store
                    .insert_task(FollowUpTask::new(&event.subject_id, description))
                    .await?;
            }
            Action::AddTag { tag } => {
                self.store.add_tag(&event.subject_id, tag).await?;
            }
            Action::RemoveTag { tag } => {
                self.store.remove_tag(&event.subject_id, tag).await?;
            }
        }
        Ok(())
    }
}

pub struct AutomationEngine {
    store: Arc<dyn EngineStore>,
    shards: Vec<mpsc::Sender<WorkerMsg>>,
}

impl AutomationEngine {
    /// Wire the pipeline and spawn the evaluation workers.
    pub fn start(
        store: Arc<dyn EngineStore>,
        rules: RuleEngine,
        campaigns: Arc<CampaignEngine>,
        shard_count: usize,
    ) -> Arc<Self> {
        let processor = Arc::new(EventProcessor {
            store: store.clone(),
            rules,
            campaigns,
        });

        let shard_count = shard_count.max(1);
        let mut shards = Vec::with_capacity(shard_count);
        for shard in 0..shard_count {
            let (tx, mut rx) = mpsc::channel::<WorkerMsg>(256);
            let processor = processor.clone();
            tokio::spawn(async move {
                debug!(shard, "evaluation worker started");
                while let Some(msg) = rx.recv().await {
                    match msg {
                        WorkerMsg::Event(event) => processor.process(event).await,
                        WorkerMsg::Flush(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
                debug!(shard, "evaluation worker stopped");
            });
            shards.push(tx);
        }

        Arc::new(Self { store, shards })
    }

    /// Record an event and queue it for evaluation. Storage failures
    /// propagate to the caller, which owns the retry; duplicate ids are
    /// reported without re-entering evaluation.
    pub async fn ingest(&self, new_event: NewEvent) -> EngineResult<RecordOutcome> {
        if new_event.subject_id.trim().is_empty() {
            return Err(EngineError::BadRequest("subject_id is required".into()));
        }
        if new_event.event_type.trim().is_empty() {
            return Err(EngineError::BadRequest("event_type is required".into()));
        }

        let event = new_event.into_event(chrono::Utc::now());

        // Contact endpoints ride along on events (contact forms, delivery
        // callbacks); fold them into the subject profile before anything
        // downstream needs a recipient.
        let email = event.attribute_str("email");
        let phone = event.attribute_str("phone");
        if email.is_some() || phone.is_some() {
            self.store
                .upsert_contact(&event.subject_id, email, phone)
                .await?;
        }

        let outcome = self.store.record_event(event.clone()).await?;
        if outcome.is_duplicate() {
            debug!(event = %event.id, "duplicate event id, skipping evaluation");
            return Ok(outcome);
        }

        let shard = self.shard_for(&event.subject_id);
        if self.shards[shard]
            .send(WorkerMsg::Event(event))
            .await
            .is_err()
        {
            // The event is durably recorded; losing the queue is an
            // engine-shutdown condition, not data loss.
            error!(shard, "evaluation queue closed, event not evaluated");
        }

        Ok(outcome)
    }

    /// Wait until every queued event has been evaluated. Used by tests and
    /// graceful shutdown.
    pub async fn flush(&self) {
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(WorkerMsg::Flush(tx)).await.is_ok() {
                let _ = rx.await;
            }
        }
    }

    fn shard_for(&self, subject_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        subject_id.hash(&mut hasher);
        (hasher.finish() as usize) % self.shards.len()
    }
}
