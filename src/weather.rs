// ABOUTME: Weather enrichment via Open-Meteo - one hourly observation per GPS activity
// ABOUTME: Endpoint chosen by activity age; throttled with its own plain delay, never the Strava quota
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::constants::weather;
use crate::database::Database;
use crate::models::{streams, Activity, WeatherRecord};
use crate::segmentation::BatchSummary;
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Weather fetcher with its own request throttle
pub struct WeatherService {
    client: Client,
    database: Database,
    forecast_base: String,
    historical_base: String,
}

/// Which Open-Meteo endpoint serves a given activity age
#[must_use]
pub fn uses_historical_endpoint(now: DateTime<Utc>, start_date: DateTime<Utc>) -> bool {
    (now - start_date).num_days() > weather::HISTORICAL_THRESHOLD_DAYS
}

/// Index of the hourly timestamp closest to the activity start
#[must_use]
pub fn closest_hour_index(hours: &[Value], target: DateTime<Utc>) -> usize {
    let target_naive = target.naive_utc();
    let mut best_idx = 0;
    let mut best_diff = i64::MAX;
    for (i, hour) in hours.iter().enumerate() {
        let Some(raw) = hour.as_str() else { continue };
        let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M") else {
            continue;
        };
        let diff = (parsed - target_naive).num_seconds().abs();
        if diff < best_diff {
            best_diff = diff;
            best_idx = i;
        }
    }
    best_idx
}

/// Build a weather record from an Open-Meteo hourly response
#[must_use]
pub fn record_from_response(
    activity_id: Uuid,
    start_date: DateTime<Utc>,
    response: &Value,
) -> Option<WeatherRecord> {
    let hourly = response.get("hourly")?;
    let hours = hourly.get("time")?.as_array()?;
    if hours.is_empty() {
        return None;
    }

    let idx = closest_hour_index(hours, start_date);
    let pick = |key: &str| -> Option<f64> {
        hourly.get(key)?.as_array()?.get(idx)?.as_f64()
    };

    Some(WeatherRecord {
        id: Uuid::new_v4(),
        activity_id,
        temperature_c: pick("temperature_2m"),
        humidity_pct: pick("relative_humidity_2m"),
        wind_speed_kmh: pick("wind_speed_10m"),
        wind_direction_deg: pick("wind_direction_10m"),
        pressure_hpa: pick("surface_pressure"),
        precipitation_mm: pick("precipitation"),
        cloud_cover_pct: pick("cloud_cover"),
        weather_code: pick("weather_code").map(|c| c as i64),
        created_at: Utc::now(),
    })
}

impl WeatherService {
    /// Build the service with the stock Open-Meteo endpoints
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self::with_endpoints(
            database,
            weather::FORECAST_BASE_URL,
            weather::HISTORICAL_BASE_URL,
        )
    }

    /// Build the service against custom endpoints (tests)
    #[must_use]
    pub fn with_endpoints(
        database: Database,
        forecast_base: impl Into<String>,
        historical_base: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(weather::REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            database,
            forecast_base: forecast_base.into(),
            historical_base: historical_base.into(),
        }
    }

    async fn call_open_meteo(
        &self,
        lat: f64,
        lon: f64,
        start_date: DateTime<Utc>,
    ) -> Option<Value> {
        let date_str = start_date.format("%Y-%m-%d").to_string();
        let base = if uses_historical_endpoint(Utc::now(), start_date) {
            &self.historical_base
        } else {
            &self.forecast_base
        };

        let result = self
            .client
            .get(base)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("start_date", date_str.clone()),
                ("end_date", date_str),
                ("hourly", weather::HOURLY_PARAMS.to_string()),
                ("timezone", "UTC".to_string()),
            ])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => response.json::<Value>().await.ok(),
            Ok(response) => {
                warn!("Open-Meteo HTTP {} for ({lat},{lon})", response.status());
                None
            }
            Err(e) => {
                warn!("Open-Meteo network error for ({lat},{lon}): {e}");
                None
            }
        }
    }

    /// Fetch and persist weather for one activity.
    ///
    /// Returns `true` when a record exists afterwards (fetched now or
    /// earlier); `false` when the activity has no GPS or the service gave
    /// no usable answer.
    ///
    /// # Errors
    ///
    /// Returns an error if persistence fails
    pub async fn fetch_for_activity(&self, activity: &Activity) -> Result<bool> {
        if self.database.has_weather(activity.id).await? {
            return Ok(true);
        }

        let Some(streams_map) = activity.streams_object() else {
            info!("activity {}: no streams, skipping weather", activity.id);
            return Ok(false);
        };
        let Some((lat, lon)) = streams::first_gps_point(&streams_map) else {
            info!("activity {}: no GPS in streams, skipping weather", activity.id);
            return Ok(false);
        };

        let Some(response) = self.call_open_meteo(lat, lon, activity.start_date).await else {
            return Ok(false);
        };
        let Some(record) = record_from_response(activity.id, activity.start_date, &response)
        else {
            warn!("activity {}: empty or invalid Open-Meteo response", activity.id);
            return Ok(false);
        };

        self.database.insert_weather(&record).await?;
        info!(
            "activity {}: weather stored ({:?} °C)",
            activity.id, record.temperature_c
        );
        Ok(true)
    }

    /// Enrich every GPS activity that lacks a weather record, one request
    /// per 100 ms.
    ///
    /// # Errors
    ///
    /// Returns an error if the activity listing fails; per-activity
    /// failures are counted, not propagated
    pub async fn enrich_all(&self, user_id: Option<Uuid>) -> Result<BatchSummary> {
        let activities = self.database.activities_with_streams(user_id).await?;

        let mut summary = BatchSummary::default();
        for activity in &activities {
            if self.database.has_weather(activity.id).await? {
                summary.skipped += 1;
                continue;
            }
            match self.fetch_for_activity(activity).await {
                Ok(true) => summary.processed += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!("weather enrichment failed for activity {}: {e}", activity.id);
                    summary.errors += 1;
                }
            }
            tokio::time::sleep(Duration::from_millis(weather::REQUEST_DELAY_MS)).await;
        }
        Ok(summary)
    }
}
