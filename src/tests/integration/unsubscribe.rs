// Stop/unsubscribe semantics, including the race against already-claimed
// messages.

use chrono::{Duration, Utc};

use crate::campaigns::StopReason;
use crate::dispatch::DispatchOutcome;
use crate::models::{event_types, Channel, EnrollmentStatus, MessageStatus, NewEvent};
use crate::store::EngineStore;
use crate::tests::helpers::TestHarness;

#[tokio::test]
async fn test_unsubscribe_event_is_channel_wide() {
    let harness = TestHarness::new();
    let welcome = harness.seed_campaign("welcome", &[(3600, Channel::Email)]).await;
    let digest = harness.seed_campaign("digest", &[(60, Channel::Email)]).await;
    let sms_alerts = harness.seed_campaign("sms alerts", &[(60, Channel::Sms)]).await;

    harness.campaigns.enroll("S1", welcome).await.unwrap();
    harness.campaigns.enroll("S1", digest).await.unwrap();
    harness.campaigns.enroll("S1", sms_alerts).await.unwrap();

    // The transport layer reports an email opt-out.
    harness
        .engine
        .ingest(NewEvent::new(
            "S1",
            event_types::UNSUBSCRIBE,
            serde_json::json!({"channel": "email"}),
        ))
        .await
        .unwrap();
    harness.engine.flush().await;

    // Every enrollment touching email flips, not just one.
    let enrollments = harness.store.enrollments_for_subject("S1").await.unwrap();
    let unsubscribed: Vec<_> = enrollments
        .iter()
        .filter(|e| e.status == EnrollmentStatus::Unsubscribed)
        .collect();
    assert_eq!(unsubscribed.len(), 2);

    let active: Vec<_> = enrollments
        .iter()
        .filter(|e| e.status == EnrollmentStatus::Active)
        .collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].campaign_id, sms_alerts);

    // All pending email messages for the subject are gone; the SMS step
    // still delivers.
    let pending = harness
        .store
        .messages_with_status(MessageStatus::Pending)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].channel, Channel::Sms);
}

#[tokio::test]
async fn test_stop_wins_against_claimed_message() {
    let harness = TestHarness::new();
    let drip = harness.seed_campaign("drip", &[(0, Channel::Email)]).await;
    harness.seed_contact("S1", Some("s1@example.test"), None).await;

    let enrollment_id = harness
        .campaigns
        .enroll("S1", drip)
        .await
        .unwrap()
        .enrollment_id();

    // A tick claims the due message, then the stop lands before the
    // dispatcher reaches it.
    let now = Utc::now() + Duration::seconds(1);
    let claimed = harness.store.claim_due_messages(now, 10).await.unwrap();
    assert_eq!(claimed.len(), 1);

    harness
        .campaigns
        .stop(enrollment_id, StopReason::Unsubscribed)
        .await
        .unwrap();

    let outcome = harness.dispatcher.dispatch(&claimed[0]).await.unwrap();
    assert_eq!(outcome, DispatchOutcome::Cancelled);

    // Nothing was sent after the stop timestamp.
    assert_eq!(harness.email.sent_count().await, 0);
    let message = harness.store.message(claimed[0].id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Cancelled);
}

#[tokio::test]
async fn test_paused_enrollment_skips_send_but_can_resume() {
    let harness = TestHarness::new();
    let drip = harness.seed_campaign("drip", &[(0, Channel::Email)]).await;
    harness.seed_contact("S1", Some("s1@example.test"), None).await;

    let enrollment_id = harness
        .campaigns
        .enroll("S1", drip)
        .await
        .unwrap()
        .enrollment_id();

    harness.campaigns.stop(enrollment_id, StopReason::Paused).await.unwrap();

    let summary = harness.run_due(Utc::now() + Duration::seconds(1)).await;
    assert_eq!(summary.claimed, 0);
    assert_eq!(harness.email.sent_count().await, 0);

    harness.campaigns.resume(enrollment_id).await.unwrap();
    let summary = harness.run_due(Utc::now() + Duration::seconds(1)).await;
    assert_eq!(summary.sent, 1);
    assert_eq!(harness.email.sent_count().await, 1);

    let enrollment = harness.store.enrollment(enrollment_id).await.unwrap().unwrap();
    assert_eq!(enrollment.status, EnrollmentStatus::Completed);
}

#[tokio::test]
async fn test_unsubscribe_succeeds_with_nothing_in_flight() {
    let harness = TestHarness::new();

    // No enrollments, no messages: the opt-out still succeeds from the
    // subject's perspective.
    harness
        .engine
        .ingest(NewEvent::new(
            "S1",
            event_types::UNSUBSCRIBE,
            serde_json::json!({"channel": "email"}),
        ))
        .await
        .unwrap();
    harness.engine.flush().await;

    assert!(harness.store.enrollments_for_subject("S1").await.unwrap().is_empty());
}
