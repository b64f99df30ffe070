// ABOUTME: Round-robin enrichment scheduler with a bounded parallel worker pool
// ABOUTME: One long-running task owns the lease cursor, wake channel, and graceful shutdown
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::config::environment::SchedulerConfig;
use crate::constants::enrichment;
use crate::database::Database;
use crate::enrichment::EnrichmentExecutor;
use crate::providers::errors::ProviderError;
use crate::quota::{seconds_until_midnight_utc, QuotaManager};
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Fair rotation over users with ready queue items.
///
/// One cycle walks the ready-user list starting after the last user served,
/// granting each user at most `items_per_user` items per pass and wrapping
/// around until the batch is full or the queue has nothing ready.
pub struct RoundRobinCursor {
    last_user_index: usize,
    items_per_user: usize,
}

impl RoundRobinCursor {
    /// Create a cursor granting `items_per_user` items per user per pass
    #[must_use]
    pub const fn new(items_per_user: usize) -> Self {
        Self {
            last_user_index: 0,
            items_per_user,
        }
    }

    /// Lease the next batch, rotating fairly across users.
    ///
    /// Returns `(activity_id, user_id)` pairs flipped to IN_PROGRESS.
    ///
    /// # Errors
    ///
    /// Returns an error if a queue query fails
    pub async fn next_batch(
        &mut self,
        database: &Database,
        batch_size: usize,
    ) -> Result<Vec<(Uuid, Uuid)>> {
        let now = Utc::now();
        let users = database.ready_user_ids(now).await?;
        if users.is_empty() {
            return Ok(Vec::new());
        }

        if self.last_user_index >= users.len() {
            self.last_user_index = 0;
        }
        let rotated: Vec<Uuid> = users[self.last_user_index..]
            .iter()
            .chain(users[..self.last_user_index].iter())
            .copied()
            .collect();

        let mut batch = Vec::with_capacity(batch_size);
        let mut users_served = 0usize;

        'fill: loop {
            let mut progress = false;
            for user_id in &rotated {
                if batch.len() >= batch_size {
                    break 'fill;
                }
                let take = self.items_per_user.min(batch_size - batch.len());
                let leased = database.lease_for_user(*user_id, take, now).await?;
                if !leased.is_empty() {
                    progress = true;
                    users_served += 1;
                    batch.extend(leased);
                }
            }
            if !progress {
                break;
            }
        }

        if !batch.is_empty() {
            self.last_user_index = (self.last_user_index + users_served) % users.len();
        }
        Ok(batch)
    }
}

/// Control handle shared with webhook and route handlers
pub struct SchedulerHandle {
    wake: Notify,
    shutdown: watch::Sender<bool>,
}

impl SchedulerHandle {
    /// Wake the scheduler early: new work arrived or was prioritized
    pub fn signal_work(&self) {
        self.wake.notify_one();
    }

    /// Request a graceful shutdown; in-flight workers finish their activity
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// The long-running scheduler task
pub struct EnrichmentScheduler {
    database: Database,
    executor: Arc<EnrichmentExecutor>,
    quota: Arc<QuotaManager>,
    config: SchedulerConfig,
    cursor: RoundRobinCursor,
    workers: Arc<Semaphore>,
    handle: Arc<SchedulerHandle>,
    shutdown_rx: watch::Receiver<bool>,
}

impl EnrichmentScheduler {
    /// Build a scheduler; `handle()` exposes the wake/shutdown surface
    #[must_use]
    pub fn new(
        database: Database,
        executor: Arc<EnrichmentExecutor>,
        quota: Arc<QuotaManager>,
        config: SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = Arc::new(SchedulerHandle {
            wake: Notify::new(),
            shutdown: shutdown_tx,
        });
        let cursor = RoundRobinCursor::new(config.items_per_user_per_cycle);
        let workers = Arc::new(Semaphore::new(config.worker_count));

        Self {
            database,
            executor,
            quota,
            config,
            cursor,
            workers,
            handle,
            shutdown_rx,
        }
    }

    /// Control handle for webhooks and HTTP routes
    #[must_use]
    pub fn handle(&self) -> Arc<SchedulerHandle> {
        Arc::clone(&self.handle)
    }

    /// Translate a worker outcome into the queue transition it deserves
    async fn settle_item(database: &Database, activity_id: Uuid, outcome: Result<(), ProviderError>) {
        let result = match outcome {
            Ok(()) => database.complete_enrichment(activity_id).await,
            Err(ProviderError::QuotaExhausted) => {
                // Nothing happened for this item; it keeps its attempts
                database.release_enrichment(activity_id).await
            }
            Err(ProviderError::Validation(message)) => {
                // Malformed data is not retried; the item is done
                warn!("activity {activity_id} skipped: {message}");
                database.complete_enrichment(activity_id).await
            }
            Err(e @ ProviderError::Unauthorized(_)) => {
                database
                    .fail_enrichment_terminal(activity_id, &e.short_message())
                    .await
            }
            Err(e) => database.fail_enrichment(activity_id, &e.short_message()).await,
        };
        if let Err(e) = result {
            error!("queue transition failed for activity {activity_id}: {e}");
        }
    }

    /// Lease one batch and run it to completion on the worker pool.
    ///
    /// Returns the number of items dispatched. Worker bodies never
    /// propagate errors; every outcome settles the queue item.
    ///
    /// # Errors
    ///
    /// Returns an error if leasing itself fails
    pub async fn run_cycle(&mut self) -> Result<usize> {
        let batch = self
            .cursor
            .next_batch(&self.database, self.config.batch_size)
            .await?;
        if batch.is_empty() {
            return Ok(0);
        }

        info!("dispatching {} enrichment items", batch.len());
        let mut tasks = JoinSet::new();
        for (activity_id, user_id) in batch.iter().copied() {
            let executor = Arc::clone(&self.executor);
            let database = self.database.clone();
            let workers = Arc::clone(&self.workers);
            tasks.spawn(async move {
                let Ok(_permit) = workers.acquire().await else {
                    return;
                };
                let outcome = executor.enrich_activity(activity_id, user_id).await;
                Self::settle_item(&database, activity_id, outcome).await;
                tokio::time::sleep(Duration::from_millis(enrichment::INTER_ACTIVITY_DELAY_MS))
                    .await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("enrichment worker panicked: {e}");
            }
        }

        Ok(batch.len())
    }

    /// Run until shutdown: reap stale leases, then lease/dispatch/sleep.
    ///
    /// The loop wakes early on `signal_work`, parks entirely when the queue
    /// is empty, and sleeps out the day when the daily quota is exhausted.
    pub async fn run(mut self) {
        if let Err(e) = self
            .database
            .reap_stale_in_progress(chrono::Duration::seconds(
                enrichment::REAPER_THRESHOLD_SECS,
            ))
            .await
        {
            error!("startup reaper failed: {e}");
        }

        info!(
            "enrichment scheduler started (batch={}, workers={}, sleep={}s)",
            self.config.batch_size, self.config.worker_count, self.config.sleep_secs
        );

        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            if !self.quota.may_proceed().await {
                let until_reset = seconds_until_midnight_utc(Utc::now());
                info!("daily quota exhausted, scheduler sleeping {until_reset}s");
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(until_reset)) => {}
                    () = self.handle.wake.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
                continue;
            }

            if let Err(e) = self.run_cycle().await {
                error!("scheduler cycle failed: {e}");
                tokio::time::sleep(Duration::from_secs(60)).await;
                continue;
            }

            let pending = self.database.pending_enrichment_count().await.unwrap_or(0);
            let in_progress = self
                .database
                .in_progress_enrichment_count()
                .await
                .unwrap_or(0);

            if pending == 0 && in_progress == 0 {
                info!("enrichment queue drained, scheduler idle");
                tokio::select! {
                    () = self.handle.wake.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
            } else {
                tokio::select! {
                    () = tokio::time::sleep(Duration::from_secs(self.config.sleep_secs)) => {}
                    () = self.handle.wake.notified() => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }

        info!("enrichment scheduler stopped");
    }
}
