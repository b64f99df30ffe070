// ABOUTME: Persistent enrichment queue - status machine, leasing, retries with backoff
// ABOUTME: The partial unique index keeps at most one live item per activity across processes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::Database;
use crate::constants::enrichment;
use crate::models::{EnrichmentItem, EnrichmentStatus};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{info, warn};
use uuid::Uuid;

/// Aggregate queue counters for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub queue_size: i64,
    pub processing_count: i64,
    pub users_in_queue: i64,
}

/// Per-user queue introspection for the position endpoint
#[derive(Debug, Clone, Serialize)]
pub struct UserQueueStatus {
    pub user_pending: i64,
    pub user_in_progress: i64,
    pub user_completed: i64,
    pub user_failed: i64,
    pub ahead_in_queue: i64,
    pub estimated_position: i64,
}

fn item_from_row(row: &SqliteRow) -> Result<EnrichmentItem> {
    let status_raw: String = row.get("status");
    Ok(EnrichmentItem {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        activity_id: Uuid::parse_str(row.get::<String, _>("activity_id").as_str())?,
        user_id: Uuid::parse_str(row.get::<String, _>("user_id").as_str())?,
        priority: row.get("priority"),
        status: EnrichmentStatus::from_db(&status_raw)
            .ok_or_else(|| anyhow::anyhow!("unknown queue status: {status_raw}"))?,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        last_error: row.get("last_error"),
        next_retry_at: row.get("next_retry_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl Database {
    /// Add an activity to the enrichment queue.
    ///
    /// Returns `false` when a PENDING or IN_PROGRESS item already exists for
    /// the activity; the partial unique index catches the race two producers
    /// can run into between check and insert.
    ///
    /// # Errors
    ///
    /// Returns an error on IO failure
    pub async fn enqueue_enrichment(
        &self,
        activity_id: Uuid,
        user_id: Uuid,
        priority: i64,
    ) -> Result<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            r"
            INSERT INTO enrichment_queue
                (id, activity_id, user_id, priority, status, attempts, max_attempts,
                 last_error, next_retry_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, 'pending', 0, ?, NULL, NULL, ?, ?)
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(activity_id.to_string())
        .bind(user_id.to_string())
        .bind(priority)
        .bind(enrichment::MAX_ATTEMPTS)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => {
                info!("activity {activity_id} queued for enrichment (user={user_id}, priority={priority})");
                Ok(true)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Distinct user ids with ready PENDING items, ordered by each user's
    /// best priority then oldest item. The scheduler rotates this list.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn ready_user_ids(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r"
            SELECT user_id
            FROM enrichment_queue
            WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?)
            GROUP BY user_id
            ORDER BY MIN(priority), MIN(created_at)
            ",
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|r| Ok(Uuid::parse_str(r.get::<String, _>("user_id").as_str())?))
            .collect()
    }

    /// Lease up to `take` ready items for one user, flipping them to
    /// IN_PROGRESS in the same transaction. Returns `(activity_id, user_id)`
    /// pairs.
    ///
    /// # Errors
    ///
    /// Returns an error and rolls back on IO failure
    pub async fn lease_for_user(
        &self,
        user_id: Uuid,
        take: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Uuid, Uuid)>> {
        let mut tx = self.pool().begin().await?;

        let rows = sqlx::query(
            r"
            SELECT id, activity_id
            FROM enrichment_queue
            WHERE user_id = ? AND status = 'pending'
              AND (next_retry_at IS NULL OR next_retry_at <= ?)
            ORDER BY priority, created_at
            LIMIT ?
            ",
        )
        .bind(user_id.to_string())
        .bind(now)
        .bind(take as i64)
        .fetch_all(&mut *tx)
        .await?;

        let mut leased = Vec::with_capacity(rows.len());
        for row in &rows {
            let item_id: String = row.get("id");
            let activity_id = Uuid::parse_str(row.get::<String, _>("activity_id").as_str())?;
            sqlx::query(
                "UPDATE enrichment_queue SET status = 'in_progress', updated_at = ? WHERE id = ? AND status = 'pending'",
            )
            .bind(now)
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
            leased.push((activity_id, user_id));
        }

        tx.commit().await?;
        Ok(leased)
    }

    /// Mark an in-progress item as completed
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn complete_enrichment(&self, activity_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE enrichment_queue SET status = 'completed', updated_at = ? WHERE activity_id = ? AND status = 'in_progress'",
        )
        .bind(Utc::now())
        .bind(activity_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Return an in-progress item to PENDING without consuming an attempt.
    ///
    /// Used when the daily quota blocks the work before anything happened.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn release_enrichment(&self, activity_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE enrichment_queue SET status = 'pending', updated_at = ? WHERE activity_id = ? AND status = 'in_progress'",
        )
        .bind(Utc::now())
        .bind(activity_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Record a failed attempt.
    ///
    /// Below `max_attempts` the item goes back to PENDING with an
    /// exponential backoff (30s, 60s, 120s, ...); otherwise it is failed
    /// terminally.
    ///
    /// # Errors
    ///
    /// Returns an error and rolls back on IO failure
    pub async fn fail_enrichment(&self, activity_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query(
            "SELECT id, attempts, max_attempts FROM enrichment_queue WHERE activity_id = ? AND status = 'in_progress'",
        )
        .bind(activity_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(());
        };

        let item_id: String = row.get("id");
        let attempts: i64 = row.get::<i64, _>("attempts") + 1;
        let max_attempts: i64 = row.get("max_attempts");
        let now = Utc::now();

        if attempts < max_attempts {
            let delay_seconds = enrichment::BACKOFF_BASE_SECS * (1 << (attempts - 1));
            let next_retry_at = now + Duration::seconds(delay_seconds);
            sqlx::query(
                r"
                UPDATE enrichment_queue
                SET status = 'pending', attempts = ?, last_error = ?, next_retry_at = ?, updated_at = ?
                WHERE id = ?
                ",
            )
            .bind(attempts)
            .bind(error)
            .bind(next_retry_at)
            .bind(now)
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
            info!(
                "activity {activity_id} enrichment failed (attempt {attempts}/{max_attempts}), retry in {delay_seconds}s"
            );
        } else {
            sqlx::query(
                r"
                UPDATE enrichment_queue
                SET status = 'failed', attempts = ?, last_error = ?, next_retry_at = NULL, updated_at = ?
                WHERE id = ?
                ",
            )
            .bind(attempts)
            .bind(error)
            .bind(now)
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
            warn!("activity {activity_id} enrichment failed terminally after {attempts} attempts: {error}");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fail an in-progress item terminally, regardless of remaining attempts.
    ///
    /// Used for unrecoverable conditions such as a dead refresh token.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn fail_enrichment_terminal(&self, activity_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE enrichment_queue
            SET status = 'failed', attempts = max_attempts, last_error = ?, next_retry_at = NULL, updated_at = ?
            WHERE activity_id = ? AND status = 'in_progress'
            ",
        )
        .bind(error)
        .bind(Utc::now())
        .bind(activity_id.to_string())
        .execute(self.pool())
        .await?;
        warn!("activity {activity_id} enrichment failed terminally: {error}");
        Ok(())
    }

    /// PENDING items ready right now (backoffs excluded)
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn pending_enrichment_count(&self) -> Result<i64> {
        let row = sqlx::query(
            r"
            SELECT COUNT(*) AS n FROM enrichment_queue
            WHERE status = 'pending' AND (next_retry_at IS NULL OR next_retry_at <= ?)
            ",
        )
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("n"))
    }

    /// All IN_PROGRESS items
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn in_progress_enrichment_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM enrichment_queue WHERE status = 'in_progress'")
            .fetch_one(self.pool())
            .await?;
        Ok(row.get("n"))
    }

    /// Aggregate queue counters
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails
    pub async fn queue_status(&self) -> Result<QueueStatus> {
        let pending = sqlx::query("SELECT COUNT(*) AS n FROM enrichment_queue WHERE status = 'pending'")
            .fetch_one(self.pool())
            .await?
            .get("n");
        let processing = self.in_progress_enrichment_count().await?;
        let users = sqlx::query(
            "SELECT COUNT(DISTINCT user_id) AS n FROM enrichment_queue WHERE status = 'pending'",
        )
        .fetch_one(self.pool())
        .await?
        .get("n");

        Ok(QueueStatus {
            queue_size: pending,
            processing_count: processing,
            users_in_queue: users,
        })
    }

    /// Per-user queue introspection with an estimated position
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails
    pub async fn user_queue_status(&self, user_id: Uuid) -> Result<UserQueueStatus> {
        let count_for = |status: &'static str| {
            let user = user_id.to_string();
            async move {
                let row =
                    sqlx::query("SELECT COUNT(*) AS n FROM enrichment_queue WHERE user_id = ? AND status = ?")
                        .bind(user)
                        .bind(status)
                        .fetch_one(self.pool())
                        .await?;
                Ok::<i64, anyhow::Error>(row.get("n"))
            }
        };

        let user_pending = count_for("pending").await?;
        let user_in_progress = count_for("in_progress").await?;
        let user_completed = count_for("completed").await?;
        let user_failed = count_for("failed").await?;

        let mut ahead_in_queue = 0i64;
        if user_pending > 0 {
            let min_priority: Option<i64> = sqlx::query(
                "SELECT MIN(priority) AS p FROM enrichment_queue WHERE user_id = ? AND status = 'pending'",
            )
            .bind(user_id.to_string())
            .fetch_one(self.pool())
            .await?
            .get("p");

            if let Some(min_priority) = min_priority {
                ahead_in_queue = sqlx::query(
                    r"
                    SELECT COUNT(*) AS n FROM enrichment_queue
                    WHERE user_id != ? AND status = 'pending' AND priority <= ?
                    ",
                )
                .bind(user_id.to_string())
                .bind(min_priority)
                .fetch_one(self.pool())
                .await?
                .get("n");
            }
        }

        Ok(UserQueueStatus {
            user_pending,
            user_in_progress,
            user_completed,
            user_failed,
            ahead_in_queue,
            estimated_position: if user_pending > 0 { ahead_in_queue + 1 } else { 0 },
        })
    }

    /// Latest queue item for an activity, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn queue_item_for_activity(&self, activity_id: Uuid) -> Result<Option<EnrichmentItem>> {
        let row = sqlx::query(
            r"
            SELECT id, activity_id, user_id, priority, status, attempts, max_attempts,
                   last_error, next_retry_at, created_at, updated_at
            FROM enrichment_queue
            WHERE activity_id = ?
            ORDER BY updated_at DESC, created_at DESC
            LIMIT 1
            ",
        )
        .bind(activity_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    /// Revert IN_PROGRESS items abandoned by a dead worker.
    ///
    /// Items older than `threshold` collect a failed attempt and either
    /// return to PENDING with backoff or fail terminally. Returns the number
    /// of reaped items.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails
    pub async fn reap_stale_in_progress(&self, threshold: Duration) -> Result<u64> {
        let cutoff = Utc::now() - threshold;
        let rows = sqlx::query(
            "SELECT activity_id FROM enrichment_queue WHERE status = 'in_progress' AND updated_at < ?",
        )
        .bind(cutoff)
        .fetch_all(self.pool())
        .await?;

        let mut reaped = 0u64;
        for row in &rows {
            let activity_id = Uuid::parse_str(row.get::<String, _>("activity_id").as_str())?;
            self.fail_enrichment(activity_id, "reaped: worker did not report back")
                .await?;
            reaped += 1;
        }
        if reaped > 0 {
            warn!("reaped {reaped} stale in-progress enrichment items");
        }
        Ok(reaped)
    }
}
