// Maintenance jobs: retention purge and abandoned-claim recovery.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::info;

use crate::error::StorageError;
use crate::store::EngineStore;

pub struct MaintenanceJobs;

impl MaintenanceJobs {
    /// Drop behavioral events past the retention window. Rule windows are
    /// far shorter than retention, so this never changes evaluation
    /// results.
    pub async fn purge_expired_events(
        store: &Arc<dyn EngineStore>,
        retention_days: i64,
    ) -> Result<u64, StorageError> {
        let cutoff = Utc::now() - Duration::days(retention_days.max(1));
        let purged = store.purge_events_before(cutoff).await?;
        if purged > 0 {
            info!(purged, retention_days, "expired events purged");
        }
        Ok(purged)
    }

    /// Requeue messages stuck in `claimed` longer than the cutoff. Claims
    /// only linger when a worker died between claim and outcome; putting
    /// them back in the queue restores at-least-once delivery after a
    /// crash.
    pub async fn requeue_stale_claims(
        store: &Arc<dyn EngineStore>,
        stale_claim_secs: i64,
    ) -> Result<u64, StorageError> {
        let older_than = Utc::now() - Duration::seconds(stale_claim_secs.max(1));
        let requeued = store.requeue_stale_claims(older_than).await?;
        if requeued > 0 {
            info!(requeued, "stale claims requeued");
        }
        Ok(requeued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Audience, Channel, MessagePayload, MessageStatus, NewEvent, Priority, ScheduledMessage};
    use crate::store::memory::MemoryStore;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_purge_leaves_recent_events() {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();

        store
            .record_event(
                NewEvent::new("lead-1", "property_view", serde_json::json!({}))
                    .with_occurred_at(now - Duration::days(120))
                    .into_event(now),
            )
            .await
            .unwrap();
        store
            .record_event(
                NewEvent::new("lead-1", "property_view", serde_json::json!({}))
                    .with_occurred_at(now - Duration::days(1))
                    .into_event(now),
            )
            .await
            .unwrap();

        let purged = MaintenanceJobs::purge_expired_events(&store, 90).await.unwrap();
        assert_eq!(purged, 1);

        let remaining = store
            .events_for_subject("lead-1", None, now - Duration::days(365))
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn test_stale_claims_return_to_queue() {
        let store: Arc<dyn EngineStore> = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let message = ScheduledMessage::new(
            "lead-1",
            None,
            now - Duration::minutes(30),
            Channel::Email,
            MessagePayload {
                template_id: Uuid::new_v4(),
                priority: Priority::Normal,
                audience: Audience::Subject,
                context: serde_json::json!({}),
            },
        );
        store.insert_message(message).await.unwrap();

        // Claimed half an hour ago, never resolved.
        let claimed = store.claim_due_messages(now - Duration::minutes(30), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);

        let requeued = MaintenanceJobs::requeue_stale_claims(&store, 600).await.unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(
            store.messages_with_status(MessageStatus::Pending).await.unwrap().len(),
            1
        );
    }
}
