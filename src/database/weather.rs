// ABOUTME: Weather record persistence - one observation per GPS activity
// ABOUTME: Insert-once semantics backed by the unique activity_id constraint
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::Database;
use crate::models::WeatherRecord;
use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Aggregate weather counters for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct WeatherStatus {
    pub enriched_activities: i64,
    pub with_weather: i64,
    pub pending: i64,
}

fn weather_from_row(row: &SqliteRow) -> Result<WeatherRecord> {
    Ok(WeatherRecord {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        activity_id: Uuid::parse_str(row.get::<String, _>("activity_id").as_str())?,
        temperature_c: row.get("temperature_c"),
        humidity_pct: row.get("humidity_pct"),
        wind_speed_kmh: row.get("wind_speed_kmh"),
        wind_direction_deg: row.get("wind_direction_deg"),
        pressure_hpa: row.get("pressure_hpa"),
        precipitation_mm: row.get("precipitation_mm"),
        cloud_cover_pct: row.get("cloud_cover_pct"),
        weather_code: row.get("weather_code"),
        created_at: row.get("created_at"),
    })
}

impl Database {
    /// Insert a weather record; returns `false` when one already exists
    ///
    /// # Errors
    ///
    /// Returns an error on IO failure
    pub async fn insert_weather(&self, record: &WeatherRecord) -> Result<bool> {
        let result = sqlx::query(
            r"
            INSERT INTO activity_weather (
                id, activity_id, temperature_c, humidity_pct, wind_speed_kmh,
                wind_direction_deg, pressure_hpa, precipitation_mm, cloud_cover_pct,
                weather_code, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(record.id.to_string())
        .bind(record.activity_id.to_string())
        .bind(record.temperature_c)
        .bind(record.humidity_pct)
        .bind(record.wind_speed_kmh)
        .bind(record.wind_direction_deg)
        .bind(record.pressure_hpa)
        .bind(record.precipitation_mm)
        .bind(record.cloud_cover_pct)
        .bind(record.weather_code)
        .bind(record.created_at)
        .execute(self.pool())
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Weather record for one activity
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn weather_for_activity(&self, activity_id: Uuid) -> Result<Option<WeatherRecord>> {
        let row = sqlx::query("SELECT * FROM activity_weather WHERE activity_id = ?")
            .bind(activity_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(weather_from_row).transpose()
    }

    /// Whether weather has already been fetched for an activity
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn has_weather(&self, activity_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM activity_weather WHERE activity_id = ? LIMIT 1")
            .bind(activity_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Aggregate weather counters
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails
    pub async fn weather_status(&self) -> Result<WeatherStatus> {
        let enriched: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM activities WHERE streams IS NOT NULL")
                .fetch_one(self.pool())
                .await?
                .get("n");
        let with_weather: i64 = sqlx::query("SELECT COUNT(*) AS n FROM activity_weather")
            .fetch_one(self.pool())
            .await?
            .get("n");

        Ok(WeatherStatus {
            enriched_activities: enriched,
            with_weather,
            pending: (enriched - with_weather).max(0),
        })
    }
}
