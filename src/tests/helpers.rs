// Shared test setup: a fully wired engine on the in-memory store with
// recording fake transports.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::campaigns::CampaignEngine;
use crate::dispatch::{Dispatcher, DispatcherConfig};
use crate::engine::AutomationEngine;
use crate::error::TransportError;
use crate::jobs::{DeliveryTick, TickSummary};
use crate::models::{Campaign, CampaignStep, Channel, MessageTemplate, NewEvent};
use crate::rules::{RuleEngine, TriggerRule};
use crate::services::{ContentGenerator, EmailTransport, SmsTransport};
use crate::store::{EngineStore, MemoryStore};

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Email transport that records sends and can be told to fail the next N
/// attempts.
#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<SentMessage>>,
    failures: AtomicI32,
    permanent_failures: AtomicI32,
}

impl RecordingEmail {
    pub fn fail_next(&self, n: i32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_next_permanently(&self, n: i32) {
        self.permanent_failures.store(n, Ordering::SeqCst);
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl EmailTransport for RecordingEmail {
    async fn send_email(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
    ) -> Result<(), TransportError> {
        let permanent = self.permanent_failures.load(Ordering::SeqCst);
        if permanent > 0 {
            self.permanent_failures.store(permanent - 1, Ordering::SeqCst);
            return Err(TransportError::InvalidRecipient(format!("{} rejected", to)));
        }
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Transport("simulated smtp outage".into()));
        }
        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}

/// SMS transport twin of `RecordingEmail`.
#[derive(Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<SentMessage>>,
    failures: AtomicI32,
}

impl RecordingSms {
    pub fn fail_next(&self, n: i32) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }
}

#[async_trait]
impl SmsTransport for RecordingSms {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), TransportError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::RateLimited);
        }
        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            subject: String::new(),
            body: body.to_string(),
        });
        Ok(())
    }
}

pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub engine: Arc<AutomationEngine>,
    pub campaigns: Arc<CampaignEngine>,
    pub dispatcher: Arc<Dispatcher>,
    pub email: Arc<RecordingEmail>,
    pub sms: Arc<RecordingSms>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(default_dispatcher_config(), None)
    }

    pub fn with_generator(generator: Arc<dyn ContentGenerator>) -> Self {
        Self::with_config(default_dispatcher_config(), Some(generator))
    }

    pub fn with_config(
        config: DispatcherConfig,
        generator: Option<Arc<dyn ContentGenerator>>,
    ) -> Self {
        let store = Arc::new(MemoryStore::new());
        let campaigns = Arc::new(CampaignEngine::new(store.clone()));
        // Cooldown defaults to zero here; tests that exercise cooldown set
        // it per rule.
        let rules = RuleEngine::new(store.clone(), Duration::zero());
        let engine = AutomationEngine::start(store.clone(), rules, campaigns.clone(), 4);

        let email = Arc::new(RecordingEmail::default());
        let sms = Arc::new(RecordingSms::default());
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            campaigns.clone(),
            email.clone(),
            Some(sms.clone()),
            generator,
            config,
        ));

        Self {
            store,
            engine,
            campaigns,
            dispatcher,
            email,
            sms,
        }
    }

    /// Run one delivery tick as of `now`.
    pub async fn run_due(&self, now: DateTime<Utc>) -> TickSummary {
        DeliveryTick::new(self.store.clone(), self.dispatcher.clone(), 10)
            .run(now)
            .await
    }

    pub fn tick(&self, batch_size: i64) -> DeliveryTick {
        DeliveryTick::new(self.store.clone(), self.dispatcher.clone(), batch_size)
    }

    /// Store a template; returns its id.
    pub async fn seed_template(&self, name: &str, body: &str, personalize: bool) -> Uuid {
        let id = Uuid::new_v4();
        self.store
            .insert_template(MessageTemplate {
                id,
                name: name.to_string(),
                subject_line: format!("{} update", name),
                body: body.to_string(),
                personalize,
            })
            .await
            .unwrap();
        id
    }

    /// Store a campaign whose steps use one fresh template per step.
    pub async fn seed_campaign(&self, name: &str, steps: &[(i64, Channel)]) -> Uuid {
        let mut campaign_steps = Vec::new();
        for (i, (offset_secs, channel)) in steps.iter().enumerate() {
            let template_id = self
                .seed_template(
                    &format!("{} step {}", name, i),
                    "Hi {{subject_id}}, checking in about your home search.",
                    false,
                )
                .await;
            campaign_steps.push(CampaignStep {
                offset_secs: *offset_secs,
                channel: *channel,
                template_id,
            });
        }

        let id = Uuid::new_v4();
        self.store
            .insert_campaign(Campaign {
                id,
                version: 0,
                name: name.to_string(),
                trigger_type: "behavioral".to_string(),
                steps: campaign_steps,
            })
            .await
            .unwrap();
        id
    }

    pub async fn seed_rule(&self, rule: TriggerRule) {
        self.store.insert_rule(rule).await.unwrap();
    }

    /// Give a subject contact endpoints so the dispatcher can reach it.
    pub async fn seed_contact(&self, subject_id: &str, email: Option<&str>, phone: Option<&str>) {
        self.store
            .upsert_contact(subject_id, email, phone)
            .await
            .unwrap();
    }

    /// Ingest an event and wait for its evaluation to finish.
    pub async fn ingest_and_settle(&self, subject_id: &str, event_type: &str) {
        self.engine
            .ingest(NewEvent::new(subject_id, event_type, serde_json::json!({})))
            .await
            .unwrap();
        self.engine.flush().await;
    }
}

pub fn default_dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        operator_email: Some("ops@example.test".to_string()),
        operator_phone: Some("+15550000000".to_string()),
        max_send_attempts: 3,
        retry_backoff_secs: 60,
        generation_timeout: std::time::Duration::from_secs(1),
    }
}
