// ABOUTME: Core domain models for activities, enrichment queue items, segments, and training load
// ABOUTME: Includes the tolerant streams decoder that absorbs the legacy "null" sentinel
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Supported activity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    Run,
    TrailRun,
    Ride,
    Swim,
    Walk,
}

impl ActivityType {
    /// Map a Strava sport/type string onto the supported set.
    ///
    /// Unknown types fall back to `Run`, the dominant type in this dataset.
    #[must_use]
    pub fn from_provider_string(s: &str) -> Self {
        match s {
            "TrailRun" | "trail_run" => Self::TrailRun,
            "Ride" | "VirtualRide" | "GravelRide" | "MountainBikeRide" => Self::Ride,
            "Swim" => Self::Swim,
            "Walk" | "Hike" => Self::Walk,
            _ => Self::Run,
        }
    }

    /// Database TEXT form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Run => "Run",
            Self::TrailRun => "TrailRun",
            Self::Ride => "Ride",
            Self::Swim => "Swim",
            Self::Walk => "Walk",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ActivityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_provider_string(s))
    }
}

/// A recorded workout synced from the upstream provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    pub user_id: Uuid,
    /// Upstream identifier; unique when present
    pub strava_id: Option<i64>,
    /// Device-native identifier, for activities also known to a watch sync
    pub device_activity_id: Option<i64>,
    pub name: String,
    pub activity_type: ActivityType,
    pub start_date: DateTime<Utc>,
    pub start_date_local: Option<DateTime<Utc>>,
    /// Meters
    pub distance: f64,
    /// Seconds; never exceeds `elapsed_time`
    pub moving_time: i64,
    /// Seconds
    pub elapsed_time: i64,
    /// Meters
    pub total_elevation_gain: f64,
    pub average_speed: Option<f64>,
    pub max_speed: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub average_cadence: Option<f64>,
    pub average_watts: Option<f64>,
    pub max_watts: Option<f64>,
    pub summary_polyline: Option<String>,
    pub polyline: Option<String>,
    /// Dense per-sample stream dictionary keyed by stream type
    pub streams: Option<Value>,
    /// Ordered lap summaries
    pub laps: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Activity {
    /// Decode the streams blob into an object map, tolerating legacy junk.
    ///
    /// Returns `None` for SQL NULL, JSON null, the literal string `"null"`
    /// (a sentinel older rows carry), undecodable strings, and any
    /// non-object value.
    #[must_use]
    pub fn streams_object(&self) -> Option<Map<String, Value>> {
        streams::parse_streams(self.streams.as_ref())
    }
}

/// Queue item status machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl EnrichmentStatus {
    /// Database TEXT form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse the database TEXT form
    #[must_use]
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for EnrichmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A durable enrichment work ticket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentItem {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub user_id: Uuid,
    /// Lower sorts earlier
    pub priority: i64,
    pub status: EnrichmentStatus,
    pub attempts: i64,
    pub max_attempts: i64,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A ~100 m slice of an activity derived from its streams
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivitySegment {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub user_id: Uuid,
    /// 0-based, contiguous per activity
    pub segment_index: i64,
    pub distance_m: f64,
    pub elapsed_time_s: f64,
    pub avg_grade_percent: Option<f64>,
    pub elevation_gain_m: Option<f64>,
    pub elevation_loss_m: Option<f64>,
    pub altitude_m: Option<f64>,
    pub avg_hr: Option<f64>,
    pub avg_cadence: Option<f64>,
    /// Midpoint GPS position
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub pace_min_per_km: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Cumulative and derived measurements attached 1:1 to a segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentFeatures {
    pub id: Uuid,
    pub segment_id: Uuid,
    pub activity_id: Uuid,
    pub cumulative_distance_km: f64,
    pub elapsed_time_min: f64,
    pub cumulative_elev_gain_m: Option<f64>,
    pub cumulative_elev_loss_m: Option<f64>,
    pub race_completion_pct: Option<f64>,
    pub intensity_proxy: Option<f64>,
    // Advanced fields, populated by the derived-features pass
    pub minetti_cost: Option<f64>,
    pub cardiac_drift: Option<f64>,
    pub cadence_decay: Option<f64>,
    pub grade_variability: Option<f64>,
    pub efficiency_factor: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// One weather observation per GPS activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub id: Uuid,
    pub activity_id: Uuid,
    pub temperature_c: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
    pub wind_direction_deg: Option<f64>,
    pub pressure_hpa: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub weather_code: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Daily Banister/Edwards training-load metrics, unique per (user, date)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLoadDay {
    pub user_id: Uuid,
    pub date: NaiveDate,
    /// Chronic load driven by the intensity proxy
    pub ctl_42d: Option<f64>,
    pub atl_7d: Option<f64>,
    pub tsb: Option<f64>,
    pub edwards_trimp_daily: Option<f64>,
    pub ctl_42d_edwards: Option<f64>,
    pub atl_7d_edwards: Option<f64>,
    pub tsb_edwards: Option<f64>,
    /// 7-day resting-heart-rate delta when device data is available
    pub rhr_delta_7d: Option<f64>,
}

/// Minimal user record consumed by the enrichment core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    /// Configured maximum heart rate, preferred by the Edwards TRIMP
    pub max_heart_rate: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Decrypted Strava OAuth credentials for one user
#[derive(Debug, Clone)]
pub struct StravaConnection {
    pub user_id: Uuid,
    /// Strava athlete id, the webhook `owner_id`
    pub athlete_id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: Option<String>,
}

impl StravaConnection {
    /// Whether the access token is inside the refresh margin
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::seconds(crate::constants::strava::TOKEN_EXPIRY_MARGIN_SECS);
        self.expires_at - now <= margin
    }
}

/// Tolerant accessors for the streams blob
pub mod streams {
    use super::{Map, Value};

    /// Decode a raw streams value into an object map.
    ///
    /// Older rows stored the literal string `"null"` instead of SQL NULL;
    /// both decode to `None`, as do non-object values.
    #[must_use]
    pub fn parse_streams(raw: Option<&Value>) -> Option<Map<String, Value>> {
        let value = raw?;
        match value {
            Value::Object(map) => Some(map.clone()),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.eq_ignore_ascii_case("null") {
                    return None;
                }
                match serde_json::from_str::<Value>(trimmed) {
                    Ok(Value::Object(map)) => Some(map),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Extract `streams[key]["data"]`, accepting a bare list as well
    #[must_use]
    pub fn series<'a>(streams: &'a Map<String, Value>, key: &str) -> Option<&'a Vec<Value>> {
        match streams.get(key)? {
            Value::Object(entry) => entry.get("data")?.as_array(),
            Value::Array(list) => Some(list),
            _ => None,
        }
    }

    /// A numeric series where individual samples may be null
    #[must_use]
    pub fn numeric_series(streams: &Map<String, Value>, key: &str) -> Option<Vec<Option<f64>>> {
        let raw = series(streams, key)?;
        Some(raw.iter().map(Value::as_f64).collect())
    }

    /// A fully numeric series; any non-numeric sample invalidates the whole series
    #[must_use]
    pub fn required_numeric_series(streams: &Map<String, Value>, key: &str) -> Option<Vec<f64>> {
        let raw = series(streams, key)?;
        raw.iter().map(Value::as_f64).collect()
    }

    /// First valid (lat, lon) pair in the `latlng` stream
    #[must_use]
    pub fn first_gps_point(streams: &Map<String, Value>) -> Option<(f64, f64)> {
        let points = series(streams, "latlng")?;
        for point in points {
            if let Value::Array(pair) = point {
                if pair.len() == 2 {
                    if let (Some(lat), Some(lon)) = (pair[0].as_f64(), pair[1].as_f64()) {
                        return Some((lat, lon));
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn activity_type_maps_provider_strings() {
        assert_eq!(ActivityType::from_provider_string("TrailRun"), ActivityType::TrailRun);
        assert_eq!(ActivityType::from_provider_string("Hike"), ActivityType::Walk);
        assert_eq!(ActivityType::from_provider_string("VirtualRide"), ActivityType::Ride);
        assert_eq!(ActivityType::from_provider_string("Workout"), ActivityType::Run);
    }

    #[test]
    fn enrichment_status_round_trips_db_form() {
        for status in [
            EnrichmentStatus::Pending,
            EnrichmentStatus::InProgress,
            EnrichmentStatus::Completed,
            EnrichmentStatus::Failed,
        ] {
            assert_eq!(EnrichmentStatus::from_db(status.as_str()), Some(status));
        }
        assert_eq!(EnrichmentStatus::from_db("bogus"), None);
    }

    #[test]
    fn parse_streams_rejects_null_sentinel() {
        assert!(streams::parse_streams(Some(&json!("null"))).is_none());
        assert!(streams::parse_streams(Some(&json!("NULL "))).is_none());
        assert!(streams::parse_streams(Some(&Value::Null)).is_none());
        assert!(streams::parse_streams(None).is_none());
        assert!(streams::parse_streams(Some(&json!([1, 2, 3]))).is_none());
    }

    #[test]
    fn parse_streams_accepts_object_and_encoded_string() {
        let object = json!({"time": {"data": [0, 1]}});
        assert!(streams::parse_streams(Some(&object)).is_some());

        let encoded = json!("{\"time\": {\"data\": [0, 1]}}");
        let map = streams::parse_streams(Some(&encoded)).unwrap();
        assert!(map.contains_key("time"));
    }

    #[test]
    fn series_accepts_keyed_and_bare_forms() {
        let map = streams::parse_streams(Some(&json!({
            "distance": {"data": [0.0, 50.0]},
            "heartrate": [120, 130]
        })))
        .unwrap();

        assert_eq!(streams::required_numeric_series(&map, "distance").unwrap().len(), 2);
        assert_eq!(streams::numeric_series(&map, "heartrate").unwrap().len(), 2);
        assert!(streams::series(&map, "watts").is_none());
    }

    #[test]
    fn first_gps_point_skips_invalid_entries() {
        let map = streams::parse_streams(Some(&json!({
            "latlng": {"data": [null, [null, null], [45.5, 6.5]]}
        })))
        .unwrap();
        assert_eq!(streams::first_gps_point(&map), Some((45.5, 6.5)));
    }
}
