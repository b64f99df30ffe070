// ABOUTME: Quota-gated Strava client - the only path to the upstream API
// ABOUTME: Applies may_proceed/record_use uniformly and converts summaries to domain activities
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::errors::{ProviderError, ProviderResult};
use super::transport::StravaTransport;
use crate::constants::strava;
use crate::credentials::TokenManager;
use crate::models::{Activity, ActivityType};
use crate::quota::QuotaManager;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Client for the endpoints the enrichment core consumes.
///
/// Every request runs the same protocol: quota check, token acquisition,
/// transport call, then `record_use` on any answered request. HTTP 429 pins
/// the daily counter so the whole fleet stops until the next UTC midnight.
pub struct StravaClient {
    transport: Arc<dyn StravaTransport>,
    quota: Arc<QuotaManager>,
    tokens: Arc<TokenManager>,
}

impl StravaClient {
    /// Compose a client from its collaborators
    #[must_use]
    pub fn new(
        transport: Arc<dyn StravaTransport>,
        quota: Arc<QuotaManager>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            transport,
            quota,
            tokens,
        }
    }

    /// Quota gate shared by every request
    async fn checkpoint(&self) -> ProviderResult<()> {
        if self.quota.may_proceed().await {
            Ok(())
        } else {
            Err(ProviderError::QuotaExhausted)
        }
    }

    /// Post-flight accounting: count answered requests, propagate 429 to the
    /// fleet.
    async fn settle<T>(&self, result: ProviderResult<T>) -> ProviderResult<T> {
        match result {
            Ok(value) => {
                self.quota.record_use().await;
                Ok(value)
            }
            Err(ProviderError::RateLimited) => {
                self.quota.force_daily_exhausted().await;
                Err(ProviderError::RateLimited)
            }
            Err(e) => Err(e),
        }
    }

    /// Fetch an activity summary (includes the polyline map)
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`]; `Ok(None)` on upstream 404
    pub async fn activity_summary(
        &self,
        user_id: Uuid,
        upstream_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let token = self.tokens.access_token(user_id).await?;
        self.checkpoint().await?;
        let result = self.transport.activity_summary(&token, upstream_id).await;
        self.settle(result).await
    }

    /// Fetch the per-sample streams dictionary
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`]; `Ok(None)` on upstream 404
    pub async fn activity_streams(
        &self,
        user_id: Uuid,
        upstream_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let token = self.tokens.access_token(user_id).await?;
        self.checkpoint().await?;
        let result = self
            .transport
            .activity_streams(&token, upstream_id, strava::STREAM_KEYS)
            .await;
        self.settle(result).await
    }

    /// Fetch lap summaries
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`]; `Ok(None)` on upstream 404
    pub async fn activity_laps(
        &self,
        user_id: Uuid,
        upstream_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let token = self.tokens.access_token(user_id).await?;
        self.checkpoint().await?;
        let result = self.transport.activity_laps(&token, upstream_id).await;
        self.settle(result).await
    }

    /// Fetch segment efforts
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`]; `Ok(None)` on upstream 404
    pub async fn activity_segment_efforts(
        &self,
        user_id: Uuid,
        upstream_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let token = self.tokens.access_token(user_id).await?;
        self.checkpoint().await?;
        let result = self
            .transport
            .activity_segment_efforts(&token, upstream_id)
            .await;
        self.settle(result).await
    }

    /// Fetch all athlete activities after a timestamp, paginated at 200/page
    ///
    /// # Errors
    ///
    /// Returns a classified [`ProviderError`]
    pub async fn athlete_activities(
        &self,
        user_id: Uuid,
        after: DateTime<Utc>,
    ) -> ProviderResult<Vec<Value>> {
        let mut all = Vec::new();
        let mut page = 1u32;

        loop {
            let token = self.tokens.access_token(user_id).await?;
            self.checkpoint().await?;
            let result = self
                .transport
                .athlete_activities(
                    &token,
                    after.timestamp(),
                    page,
                    strava::ACTIVITIES_PER_PAGE,
                )
                .await;
            let batch = self.settle(result).await?;

            let batch_len = batch.len();
            all.extend(batch);
            if batch_len < strava::ACTIVITIES_PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        info!("fetched {} activities from Strava for user {user_id}", all.len());
        Ok(all)
    }
}

fn value_f64(value: &Value, key: &str) -> Option<f64> {
    value.get(key).and_then(Value::as_f64)
}

fn value_i64(value: &Value, key: &str) -> Option<i64> {
    value.get(key).and_then(Value::as_i64)
}

fn value_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

fn parse_date(value: &Value, key: &str) -> Option<DateTime<Utc>> {
    value_str(value, key)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a Strava activity summary into a fresh domain [`Activity`].
///
/// # Errors
///
/// Returns [`ProviderError::Validation`] when the id or start date is
/// missing or malformed
pub fn summary_to_activity(user_id: Uuid, summary: &Value) -> ProviderResult<Activity> {
    let strava_id = value_i64(summary, "id")
        .ok_or_else(|| ProviderError::Validation("activity summary without id".into()))?;
    let start_date = parse_date(summary, "start_date")
        .ok_or_else(|| ProviderError::Validation("activity summary without start_date".into()))?;

    let sport = value_str(summary, "sport_type")
        .or_else(|| value_str(summary, "type"))
        .unwrap_or("Run");

    let now = Utc::now();
    Ok(Activity {
        id: Uuid::new_v4(),
        user_id,
        strava_id: Some(strava_id),
        device_activity_id: None,
        name: value_str(summary, "name").unwrap_or("Unnamed activity").to_owned(),
        activity_type: ActivityType::from_provider_string(sport),
        start_date,
        start_date_local: parse_date(summary, "start_date_local"),
        distance: value_f64(summary, "distance").unwrap_or(0.0),
        moving_time: value_i64(summary, "moving_time").unwrap_or(0),
        elapsed_time: value_i64(summary, "elapsed_time").unwrap_or(0),
        total_elevation_gain: value_f64(summary, "total_elevation_gain").unwrap_or(0.0),
        average_speed: value_f64(summary, "average_speed"),
        max_speed: value_f64(summary, "max_speed"),
        average_heartrate: value_f64(summary, "average_heartrate"),
        max_heartrate: value_f64(summary, "max_heartrate"),
        average_cadence: value_f64(summary, "average_cadence"),
        average_watts: value_f64(summary, "average_watts"),
        max_watts: value_f64(summary, "max_watts"),
        summary_polyline: summary
            .get("map")
            .and_then(|m| m.get("summary_polyline"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        polyline: summary
            .get("map")
            .and_then(|m| m.get("polyline"))
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        streams: None,
        laps: None,
        created_at: now,
        updated_at: now,
    })
}

/// Polyline fields from a detail response's map object
#[must_use]
pub fn polylines_from_detail(detail: &Value) -> (Option<String>, Option<String>) {
    let map = detail.get("map");
    let polyline = map
        .and_then(|m| m.get("polyline"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let summary = map
        .and_then(|m| m.get("summary_polyline"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    (polyline, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn summary_conversion_extracts_core_fields() {
        let user_id = Uuid::new_v4();
        let summary = json!({
            "id": 42,
            "name": "Morning Run",
            "sport_type": "TrailRun",
            "start_date": "2025-05-01T06:30:00Z",
            "distance": 10234.5,
            "moving_time": 3600,
            "elapsed_time": 3720,
            "total_elevation_gain": 420.0,
            "average_heartrate": 152.0,
            "map": {"summary_polyline": "abc"}
        });

        let activity = summary_to_activity(user_id, &summary).unwrap();
        assert_eq!(activity.strava_id, Some(42));
        assert_eq!(activity.activity_type, ActivityType::TrailRun);
        assert_eq!(activity.moving_time, 3600);
        assert!(activity.moving_time <= activity.elapsed_time);
        assert_eq!(activity.summary_polyline.as_deref(), Some("abc"));
    }

    #[test]
    fn summary_without_id_is_rejected() {
        let summary = json!({"name": "broken", "start_date": "2025-05-01T06:30:00Z"});
        assert!(matches!(
            summary_to_activity(Uuid::new_v4(), &summary),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn detail_polylines_are_both_read() {
        let detail = json!({"map": {"polyline": "full", "summary_polyline": "short"}});
        let (full, short) = polylines_from_detail(&detail);
        assert_eq!(full.as_deref(), Some("full"));
        assert_eq!(short.as_deref(), Some("short"));
    }
}
