// ABOUTME: Enrichment executor - fetch streams/laps/efforts/detail for one activity and persist
// ABOUTME: Segmentation and weather run opportunistically after the payload commit, never gating it
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::constants::{enrichment, strava};
use crate::database::Database;
use crate::providers::errors::{ProviderError, ProviderResult};
use crate::providers::strava::polylines_from_detail;
use crate::providers::StravaClient;
use crate::quota::{QuotaManager, QuotaStatus};
use crate::weather::WeatherService;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Report for the bounded synchronous batch endpoint
#[derive(Debug, Serialize)]
pub struct BatchEnrichReport {
    pub enriched: u64,
    pub failed: u64,
    pub quota: QuotaStatus,
}

/// Report for an activity sync run
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub fetched: u64,
    pub created: u64,
    pub skipped: u64,
    pub queued: u64,
}

/// Executes the per-activity enrichment protocol end-to-end
pub struct EnrichmentExecutor {
    database: Database,
    client: Arc<StravaClient>,
    quota: Arc<QuotaManager>,
    weather: Arc<WeatherService>,
}

impl EnrichmentExecutor {
    /// Compose an executor from its collaborators
    #[must_use]
    pub fn new(
        database: Database,
        client: Arc<StravaClient>,
        quota: Arc<QuotaManager>,
        weather: Arc<WeatherService>,
    ) -> Self {
        Self {
            database,
            client,
            quota,
            weather,
        }
    }

    /// Enrich one activity: streams, laps, segment efforts, then detail.
    ///
    /// Any 404 from the upstream is accepted as "nothing to merge". The
    /// database write is a single transaction; segmentation and weather run
    /// afterwards and their failures only log.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`] for the worker to translate
    /// into a queue transition
    pub async fn enrich_activity(&self, activity_id: Uuid, user_id: Uuid) -> ProviderResult<()> {
        let activity = self
            .database
            .get_activity(activity_id)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        let Some(activity) = activity else {
            warn!("activity {activity_id} vanished before enrichment, nothing to do");
            return Ok(());
        };
        let Some(upstream_id) = activity.strava_id else {
            return Err(ProviderError::Validation(format!(
                "activity {activity_id} has no upstream id"
            )));
        };

        if activity.streams.is_some() && activity.laps.is_some() {
            info!("activity {activity_id} already enriched");
            return Ok(());
        }

        let streams = self.client.activity_streams(user_id, upstream_id).await?;
        let laps = self.client.activity_laps(user_id, upstream_id).await?;
        let efforts = self
            .client
            .activity_segment_efforts(user_id, upstream_id)
            .await?;
        let detail = self.client.activity_summary(user_id, upstream_id).await?;

        // Merge segment efforts into the streams blob under the reserved key
        let merged_streams = match (streams, efforts) {
            (Some(Value::Object(mut map)), Some(efforts)) => {
                map.insert(strava::SEGMENT_EFFORTS_KEY.to_owned(), efforts);
                Some(Value::Object(map))
            }
            (Some(streams), None) => Some(streams),
            (None, Some(efforts)) => {
                let mut map = Map::new();
                map.insert(strava::SEGMENT_EFFORTS_KEY.to_owned(), efforts);
                Some(Value::Object(map))
            }
            (streams, _) => streams,
        };

        let (polyline, summary_polyline) = detail
            .as_ref()
            .map(polylines_from_detail)
            .unwrap_or((None, None));

        self.database
            .store_enrichment_payload(
                activity_id,
                merged_streams.as_ref(),
                laps.as_ref(),
                polyline.as_deref(),
                summary_polyline.as_deref(),
            )
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        info!("activity {activity_id} enriched");
        self.run_post_enrichment(activity_id).await;
        Ok(())
    }

    /// Opportunistic follow-ups: segmentation then weather. Failures log
    /// and never affect the enrichment outcome.
    async fn run_post_enrichment(&self, activity_id: Uuid) {
        let activity = match self.database.get_activity(activity_id).await {
            Ok(Some(activity)) => activity,
            Ok(None) => return,
            Err(e) => {
                warn!("post-enrichment reload failed for activity {activity_id}: {e}");
                return;
            }
        };

        if let Err(e) = crate::segmentation::segment_activity(&self.database, &activity).await {
            warn!("post-enrichment segmentation failed for activity {activity_id}: {e}");
        }
        if let Err(e) = self.weather.fetch_for_activity(&activity).await {
            warn!("post-enrichment weather failed for activity {activity_id}: {e}");
        }
    }

    /// Bounded synchronous batch over a user's unenriched activities.
    ///
    /// Stops early when the daily quota runs out; the report carries the
    /// final quota snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Storage`] if the activity listing fails
    pub async fn batch_enrich(
        &self,
        user_id: Uuid,
        max_activities: usize,
    ) -> ProviderResult<BatchEnrichReport> {
        let activities = self
            .database
            .unenriched_activities(user_id)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        let mut enriched = 0u64;
        let mut failed = 0u64;

        for activity in activities.iter().take(max_activities) {
            let status = self.quota.status().await;
            if status.daily_used >= status.daily_limit {
                warn!("daily Strava quota reached, stopping batch enrichment");
                break;
            }

            match self.enrich_activity(activity.id, user_id).await {
                Ok(()) => enriched += 1,
                Err(ProviderError::QuotaExhausted) => {
                    warn!("quota exhausted mid-batch, stopping");
                    break;
                }
                Err(e) => {
                    warn!("batch enrichment failed for activity {}: {e}", activity.id);
                    failed += 1;
                }
            }

            tokio::time::sleep(Duration::from_millis(enrichment::INTER_ACTIVITY_DELAY_MS)).await;
        }

        Ok(BatchEnrichReport {
            enriched,
            failed,
            quota: self.quota.status().await,
        })
    }

    /// Pull the user's recent activities from Strava and queue the new ones
    /// for enrichment.
    ///
    /// Already-known upstream ids are skipped; summaries without a usable id
    /// are dropped with a log line.
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`] when the listing fails
    pub async fn sync_activities(
        &self,
        user_id: Uuid,
        days_back: i64,
    ) -> ProviderResult<SyncReport> {
        let after = chrono::Utc::now() - chrono::Duration::days(days_back);
        let summaries = self.client.athlete_activities(user_id, after).await?;

        let mut report = SyncReport {
            fetched: summaries.len() as u64,
            ..SyncReport::default()
        };

        for summary in &summaries {
            let activity = match crate::providers::strava::summary_to_activity(user_id, summary) {
                Ok(activity) => activity,
                Err(e) => {
                    warn!("sync: dropping malformed summary: {e}");
                    report.skipped += 1;
                    continue;
                }
            };
            let Some(upstream_id) = activity.strava_id else {
                report.skipped += 1;
                continue;
            };

            let exists = self
                .database
                .get_activity_by_strava_id(upstream_id)
                .await
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
            if exists.is_some() {
                report.skipped += 1;
                continue;
            }

            self.database
                .insert_activity(&activity)
                .await
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
            report.created += 1;

            let queued = self
                .database
                .enqueue_enrichment(activity.id, user_id, 0)
                .await
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
            if queued {
                report.queued += 1;
            }
        }

        info!(
            "sync for user {user_id}: {} fetched, {} created, {} queued",
            report.fetched, report.created, report.queued
        );
        Ok(report)
    }

    /// Queue every unenriched activity of a user. Returns how many items
    /// were actually inserted (duplicates are skipped by the queue).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Storage`] if a query fails
    pub async fn enqueue_all_unenriched(
        &self,
        user_id: Uuid,
        priority: i64,
    ) -> ProviderResult<usize> {
        let activities = self
            .database
            .unenriched_activities(user_id)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        let mut added = 0usize;
        for activity in &activities {
            let inserted = self
                .database
                .enqueue_enrichment(activity.id, user_id, priority)
                .await
                .map_err(|e| ProviderError::Storage(e.to_string()))?;
            if inserted {
                added += 1;
            }
        }

        info!("{added} activities queued for enrichment (user={user_id})");
        Ok(added)
    }
}
