// Background job scheduler.
//
// The delivery tick is the engine's clock: at a fixed granularity it claims
// every due pending message and hands each to the dispatcher. Correctness
// under concurrent ticks (or extra process instances) comes from the
// store's atomic claim, not from any single-threaded assumption.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::sync::Arc;
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info, warn};

use super::maintenance::MaintenanceJobs;
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::store::EngineStore;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("scheduler error: {0}")]
    Scheduler(#[from] JobSchedulerError),
}

pub type JobResult<T> = Result<T, JobError>;

#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Delivery tick granularity.
    pub tick_interval_secs: u64,
    /// Max messages claimed per claim round.
    pub claim_batch_size: i64,
    /// Events older than this are purged by daily maintenance.
    pub event_retention_days: i64,
    /// Claims older than this are presumed abandoned and requeued.
    pub stale_claim_secs: i64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60,
            claim_batch_size: 100,
            event_retention_days: 90,
            stale_claim_secs: 600,
        }
    }
}

/// Counters from one delivery tick, for the logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// One scheduler tick: claim due messages in batches, dispatch each batch
/// concurrently, repeat until the queue is drained.
pub struct DeliveryTick {
    store: Arc<dyn EngineStore>,
    dispatcher: Arc<Dispatcher>,
    batch_size: i64,
}

impl DeliveryTick {
    pub fn new(store: Arc<dyn EngineStore>, dispatcher: Arc<Dispatcher>, batch_size: i64) -> Self {
        Self {
            store,
            dispatcher,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self, now: DateTime<Utc>) -> TickSummary {
        let mut summary = TickSummary::default();

        loop {
            let batch = match self.store.claim_due_messages(now, self.batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(error = %e, "claim failed, ending tick");
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            summary.claimed += batch.len();

            let results = join_all(batch.iter().map(|message| async {
                match self.dispatcher.dispatch(message).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        // Bulkhead: this message stays claimed (the stale
                        // claim sweeper will requeue it) and the rest of
                        // the batch proceeds.
                        error!(message = %message.id, error = %e, "dispatch failed");
                        None
                    }
                }
            }))
            .await;

            for outcome in results.into_iter().flatten() {
                match outcome {
                    DispatchOutcome::Sent => summary.sent += 1,
                    DispatchOutcome::Retried => summary.retried += 1,
                    DispatchOutcome::Failed => summary.failed += 1,
                    DispatchOutcome::Cancelled => summary.cancelled += 1,
                }
            }
        }

        if summary.claimed > 0 {
            info!(
                claimed = summary.claimed,
                sent = summary.sent,
                retried = summary.retried,
                failed = summary.failed,
                cancelled = summary.cancelled,
                "delivery tick complete"
            );
        }
        summary
    }
}

/// Owns the cron runtime: schedules the delivery tick and the daily
/// maintenance job.
pub struct JobRunner {
    scheduler: TokioScheduler,
    store: Arc<dyn EngineStore>,
    dispatcher: Arc<Dispatcher>,
    config: JobConfig,
}

impl JobRunner {
    pub async fn new(
        store: Arc<dyn EngineStore>,
        dispatcher: Arc<Dispatcher>,
        config: JobConfig,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;
        Ok(Self {
            scheduler,
            store,
            dispatcher,
            config,
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("starting background jobs");
        self.schedule_delivery_tick().await?;
        self.schedule_maintenance().await?;
        self.scheduler.start().await?;
        info!(
            tick_secs = self.config.tick_interval_secs,
            "background jobs started"
        );
        Ok(())
    }

    pub async fn shutdown(&self) -> JobResult<()> {
        info!("shutting down background jobs");
        let mut scheduler = self.scheduler.clone();
        scheduler.shutdown().await?;
        Ok(())
    }

    async fn schedule_delivery_tick(&self) -> JobResult<()> {
        let tick = Arc::new(DeliveryTick::new(
            self.store.clone(),
            self.dispatcher.clone(),
            self.config.claim_batch_size,
        ));
        let interval = std::time::Duration::from_secs(self.config.tick_interval_secs.max(1));

        let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
            let tick = tick.clone();
            Box::pin(async move {
                tick.run(Utc::now()).await;
            })
        })?;

        self.scheduler.add(job).await?;
        Ok(())
    }

    async fn schedule_maintenance(&self) -> JobResult<()> {
        let store = self.store.clone();
        let retention_days = self.config.event_retention_days;
        let stale_claim_secs = self.config.stale_claim_secs;

        // Daily, at 03:00.
        let job = Job::new_async("0 0 3 * * *", move |_uuid, _lock| {
            let store = store.clone();
            Box::pin(async move {
                if let Err(e) = MaintenanceJobs::purge_expired_events(&store, retention_days).await
                {
                    warn!(error = %e, "event purge failed");
                }
                if let Err(e) =
                    MaintenanceJobs::requeue_stale_claims(&store, stale_claim_secs).await
                {
                    warn!(error = %e, "stale claim sweep failed");
                }
            })
        })?;

        self.scheduler.add(job).await?;
        Ok(())
    }
}
