// Scheduler claiming, retry/backoff, terminal failures, channel fan-out,
// and generation fallback.

use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::GenerationConfig;
use crate::dispatch::DispatchOutcome;
use crate::models::{
    Audience, Channel, MessagePayload, MessageStatus, Priority, ScheduledMessage,
};
use crate::services::HttpGenerator;
use crate::store::EngineStore;
use crate::tests::helpers::{default_dispatcher_config, TestHarness};

async fn queue_subject_email(
    harness: &TestHarness,
    subject: &str,
    template_id: Uuid,
    priority: Priority,
    due_at: chrono::DateTime<Utc>,
) -> Uuid {
    let message = ScheduledMessage::new(
        subject,
        None,
        due_at,
        Channel::Email,
        MessagePayload {
            template_id,
            priority,
            audience: Audience::Subject,
            context: serde_json::json!({}),
        },
    );
    let id = message.id;
    harness.store.insert_message(message).await.unwrap();
    id
}

#[tokio::test]
async fn test_concurrent_ticks_never_double_send() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello {{subject_id}}", false).await;
    let now = Utc::now();

    for i in 0..30 {
        let subject = format!("lead-{}", i);
        harness
            .seed_contact(&subject, Some(&format!("lead{}@example.test", i)), None)
            .await;
        queue_subject_email(&harness, &subject, template, Priority::Normal, now).await;
    }

    // Two scheduler ticks race over the same due set, small batches so
    // they interleave claim rounds.
    let tick_a = harness.tick(7);
    let tick_b = harness.tick(7);
    let (a, b) = tokio::join!(tick_a.run(now), tick_b.run(now));

    assert_eq!(a.claimed + b.claimed, 30);
    assert_eq!(a.sent + b.sent, 30);
    assert_eq!(harness.email.sent_count().await, 30);
    assert!(harness
        .store
        .messages_with_status(MessageStatus::Pending)
        .await
        .unwrap()
        .is_empty());
    assert!(harness
        .store
        .messages_with_status(MessageStatus::Claimed)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_transient_failure_retries_with_backoff_then_delivers() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello", false).await;
    harness.seed_contact("lead-1", Some("lead1@example.test"), None).await;
    let now = Utc::now();
    let id = queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    harness.email.fail_next(1);
    let summary = harness.run_due(now).await;
    assert_eq!(summary.retried, 1);

    let message = harness.store.message(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Pending);
    assert_eq!(message.attempt_count, 1);
    // Backoff pushed it at least one base interval out.
    assert!(message.due_at >= now + Duration::seconds(60));

    // At the retry horizon the send goes through.
    let summary = harness.run_due(message.due_at + Duration::seconds(1)).await;
    assert_eq!(summary.sent, 1);
    assert_eq!(harness.email.sent_count().await, 1);
}

#[tokio::test]
async fn test_retry_ceiling_flags_operator_alert() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello", false).await;
    harness.seed_contact("lead-1", Some("lead1@example.test"), None).await;
    let mut now = Utc::now();
    let id = queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    harness.email.fail_next(10);
    for _ in 0..3 {
        harness.run_due(now).await;
        if let Some(message) = harness.store.message(id).await.unwrap() {
            now = message.due_at + Duration::seconds(1);
        }
    }

    let message = harness.store.message(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.attempt_count, 3);
    assert!(message.last_error.is_some());

    // Not silent: the failure surfaces for operator review.
    let alerts = harness.store.open_alerts().await.unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message_id, Some(id));
    assert_eq!(harness.email.sent_count().await, 0);
}

#[tokio::test]
async fn test_invalid_recipient_fails_without_retry() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello", false).await;
    // No contact on file at all.
    let now = Utc::now();
    let id = queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    let summary = harness.run_due(now).await;
    assert_eq!(summary.failed, 1);

    let message = harness.store.message(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.attempt_count, 1);
    assert_eq!(harness.store.open_alerts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_provider_rejection_is_permanent() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello", false).await;
    harness.seed_contact("lead-1", Some("bounced@example.test"), None).await;
    let now = Utc::now();
    let id = queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    // The relay answers 5xx for this mailbox; no amount of retrying helps.
    harness.email.fail_next_permanently(1);
    let summary = harness.run_due(now).await;
    assert_eq!(summary.failed, 1);

    let message = harness.store.message(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.attempt_count, 1);
    assert_eq!(harness.store.open_alerts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_urgent_fans_out_normal_does_not() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello", false).await;
    harness
        .seed_contact("lead-1", Some("lead1@example.test"), Some("+15035550123"))
        .await;
    let now = Utc::now();

    queue_subject_email(&harness, "lead-1", template, Priority::Urgent, now).await;
    harness.run_due(now).await;
    assert_eq!(harness.email.sent_count().await, 1);
    assert_eq!(harness.sms.sent_count().await, 1);

    queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;
    harness.run_due(now).await;
    assert_eq!(harness.email.sent_count().await, 2);
    // Normal never produces an SMS attempt.
    assert_eq!(harness.sms.sent_count().await, 1);
}

#[tokio::test]
async fn test_urgent_partial_channel_failure_still_sends() {
    let harness = TestHarness::new();
    let template = harness.seed_template("ping", "hello", false).await;
    harness
        .seed_contact("lead-1", Some("lead1@example.test"), Some("+15035550123"))
        .await;
    let now = Utc::now();
    let id = queue_subject_email(&harness, "lead-1", template, Priority::Urgent, now).await;

    // SMS provider rate-limits; email goes through. Channel outcomes are
    // independent and one delivery marks the message sent.
    harness.sms.fail_next(1);
    let summary = harness.run_due(now).await;
    assert_eq!(summary.sent, 1);

    let message = harness.store.message(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Sent);
    assert_eq!(harness.email.sent_count().await, 1);
}

#[tokio::test]
async fn test_personalized_body_comes_from_generator() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "response": "Hey Jordan, three new craftsman listings just hit your area."
        })))
        .mount(&server)
        .await;

    let generator = HttpGenerator::new(&GenerationConfig {
        endpoint: format!("{}/api/generate", server.uri()),
        model: "test-model".to_string(),
        timeout_secs: 2,
    })
    .unwrap();

    let harness = TestHarness::with_generator(Arc::new(generator));
    let template = harness
        .seed_template("listing digest", "Generic digest for {{subject_id}}", true)
        .await;
    harness.seed_contact("lead-1", Some("lead1@example.test"), None).await;
    let now = Utc::now();
    queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    harness.run_due(now).await;

    let sent = harness.email.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert!(sent[0].body.contains("craftsman listings"));
    // Personalization rewrites the body only; the subject line stays.
    assert!(sent[0].subject.contains("listing digest"));
}

#[tokio::test]
async fn test_generation_failure_falls_back_to_static_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let generator = HttpGenerator::new(&GenerationConfig {
        endpoint: format!("{}/api/generate", server.uri()),
        model: "test-model".to_string(),
        timeout_secs: 2,
    })
    .unwrap();

    let harness = TestHarness::with_generator(Arc::new(generator));
    let template = harness
        .seed_template("listing digest", "Generic digest for {{subject_id}}", true)
        .await;
    harness.seed_contact("lead-1", Some("lead1@example.test"), None).await;
    let now = Utc::now();
    queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    let summary = harness.run_due(now).await;
    assert_eq!(summary.sent, 1);

    let sent = harness.email.sent.lock().await;
    assert_eq!(sent[0].body, "Generic digest for lead-1");
}

#[tokio::test]
async fn test_generation_timeout_falls_back_to_static_template() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "too late"}))
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let generator = HttpGenerator::new(&GenerationConfig {
        endpoint: format!("{}/api/generate", server.uri()),
        model: "test-model".to_string(),
        timeout_secs: 30,
    })
    .unwrap();

    // Dispatcher-level timeout is the binding constraint here.
    let mut config = default_dispatcher_config();
    config.generation_timeout = std::time::Duration::from_millis(200);

    let harness = TestHarness::with_config(config, Some(Arc::new(generator)));
    let template = harness
        .seed_template("listing digest", "Generic digest for {{subject_id}}", true)
        .await;
    harness.seed_contact("lead-1", Some("lead1@example.test"), None).await;
    let now = Utc::now();
    queue_subject_email(&harness, "lead-1", template, Priority::Normal, now).await;

    let summary = harness.run_due(now).await;
    assert_eq!(summary.sent, 1);

    let sent = harness.email.sent.lock().await;
    assert_eq!(sent[0].body, "Generic digest for lead-1");
}

#[tokio::test]
async fn test_missing_template_is_terminal() {
    let harness = TestHarness::new();
    harness.seed_contact("lead-1", Some("lead1@example.test"), None).await;
    let now = Utc::now();
    let id = queue_subject_email(&harness, "lead-1", Uuid::new_v4(), Priority::Normal, now).await;

    let claimed = harness.store.claim_due_messages(now, 10).await.unwrap();
    let outcome = harness.dispatcher.dispatch(&claimed[0]).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Failed);

    let message = harness.store.message(id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(harness.store.open_alerts().await.unwrap().len(), 1);
}
