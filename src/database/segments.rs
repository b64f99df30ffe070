// ABOUTME: Segment and segment-features persistence with atomic replace per activity
// ABOUTME: Re-segmentation deletes prior rows and inserts the new set in one transaction
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::Database;
use crate::models::{ActivitySegment, SegmentFeatures};
use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Aggregate segmentation counters for the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SegmentationStatus {
    pub enriched_activities: i64,
    pub segmented_activities: i64,
    pub total_segments: i64,
}

fn segment_from_row(row: &SqliteRow) -> Result<ActivitySegment> {
    Ok(ActivitySegment {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        activity_id: Uuid::parse_str(row.get::<String, _>("activity_id").as_str())?,
        user_id: Uuid::parse_str(row.get::<String, _>("user_id").as_str())?,
        segment_index: row.get("segment_index"),
        distance_m: row.get("distance_m"),
        elapsed_time_s: row.get("elapsed_time_s"),
        avg_grade_percent: row.get("avg_grade_percent"),
        elevation_gain_m: row.get("elevation_gain_m"),
        elevation_loss_m: row.get("elevation_loss_m"),
        altitude_m: row.get("altitude_m"),
        avg_hr: row.get("avg_hr"),
        avg_cadence: row.get("avg_cadence"),
        lat: row.get("lat"),
        lon: row.get("lon"),
        pace_min_per_km: row.get("pace_min_per_km"),
        created_at: row.get("created_at"),
    })
}

fn features_from_row(row: &SqliteRow) -> Result<SegmentFeatures> {
    Ok(SegmentFeatures {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        segment_id: Uuid::parse_str(row.get::<String, _>("segment_id").as_str())?,
        activity_id: Uuid::parse_str(row.get::<String, _>("activity_id").as_str())?,
        cumulative_distance_km: row.get("cumulative_distance_km"),
        elapsed_time_min: row.get("elapsed_time_min"),
        cumulative_elev_gain_m: row.get("cumulative_elev_gain_m"),
        cumulative_elev_loss_m: row.get("cumulative_elev_loss_m"),
        race_completion_pct: row.get("race_completion_pct"),
        intensity_proxy: row.get("intensity_proxy"),
        minetti_cost: row.get("minetti_cost"),
        cardiac_drift: row.get("cardiac_drift"),
        cadence_decay: row.get("cadence_decay"),
        grade_variability: row.get("grade_variability"),
        efficiency_factor: row.get("efficiency_factor"),
        created_at: row.get("created_at"),
    })
}

impl Database {
    /// Atomically replace all segments and features of an activity.
    ///
    /// # Errors
    ///
    /// Returns an error and rolls back if any statement fails
    pub async fn replace_segments(
        &self,
        activity_id: Uuid,
        segments: &[ActivitySegment],
        features: &[SegmentFeatures],
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("DELETE FROM segment_features WHERE activity_id = ?")
            .bind(activity_id.to_string())
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM activity_segments WHERE activity_id = ?")
            .bind(activity_id.to_string())
            .execute(&mut *tx)
            .await?;

        for segment in segments {
            sqlx::query(
                r"
                INSERT INTO activity_segments (
                    id, activity_id, user_id, segment_index, distance_m, elapsed_time_s,
                    avg_grade_percent, elevation_gain_m, elevation_loss_m, altitude_m,
                    avg_hr, avg_cadence, lat, lon, pace_min_per_km, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(segment.id.to_string())
            .bind(segment.activity_id.to_string())
            .bind(segment.user_id.to_string())
            .bind(segment.segment_index)
            .bind(segment.distance_m)
            .bind(segment.elapsed_time_s)
            .bind(segment.avg_grade_percent)
            .bind(segment.elevation_gain_m)
            .bind(segment.elevation_loss_m)
            .bind(segment.altitude_m)
            .bind(segment.avg_hr)
            .bind(segment.avg_cadence)
            .bind(segment.lat)
            .bind(segment.lon)
            .bind(segment.pace_min_per_km)
            .bind(segment.created_at)
            .execute(&mut *tx)
            .await?;
        }

        for feature in features {
            sqlx::query(
                r"
                INSERT INTO segment_features (
                    id, segment_id, activity_id, cumulative_distance_km, elapsed_time_min,
                    cumulative_elev_gain_m, cumulative_elev_loss_m, race_completion_pct,
                    intensity_proxy, minetti_cost, cardiac_drift, cadence_decay,
                    grade_variability, efficiency_factor, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ",
            )
            .bind(feature.id.to_string())
            .bind(feature.segment_id.to_string())
            .bind(feature.activity_id.to_string())
            .bind(feature.cumulative_distance_km)
            .bind(feature.elapsed_time_min)
            .bind(feature.cumulative_elev_gain_m)
            .bind(feature.cumulative_elev_loss_m)
            .bind(feature.race_completion_pct)
            .bind(feature.intensity_proxy)
            .bind(feature.minetti_cost)
            .bind(feature.cardiac_drift)
            .bind(feature.cadence_decay)
            .bind(feature.grade_variability)
            .bind(feature.efficiency_factor)
            .bind(feature.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Segments of an activity ordered by index
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn segments_for_activity(&self, activity_id: Uuid) -> Result<Vec<ActivitySegment>> {
        let rows = sqlx::query(
            "SELECT * FROM activity_segments WHERE activity_id = ? ORDER BY segment_index",
        )
        .bind(activity_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(segment_from_row).collect()
    }

    /// Features of an activity ordered by the owning segment index
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn features_for_activity(&self, activity_id: Uuid) -> Result<Vec<SegmentFeatures>> {
        let rows = sqlx::query(
            r"
            SELECT f.* FROM segment_features f
            JOIN activity_segments s ON s.id = f.segment_id
            WHERE f.activity_id = ?
            ORDER BY s.segment_index
            ",
        )
        .bind(activity_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(features_from_row).collect()
    }

    /// Whether an activity already has segments
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn is_activity_segmented(&self, activity_id: Uuid) -> Result<bool> {
        let row = sqlx::query("SELECT 1 AS one FROM activity_segments WHERE activity_id = ? LIMIT 1")
            .bind(activity_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Aggregate segmentation counters
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails
    pub async fn segmentation_status(&self) -> Result<SegmentationStatus> {
        let enriched: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM activities WHERE streams IS NOT NULL")
                .fetch_one(self.pool())
                .await?
                .get("n");
        let segmented: i64 =
            sqlx::query("SELECT COUNT(DISTINCT activity_id) AS n FROM activity_segments")
                .fetch_one(self.pool())
                .await?
                .get("n");
        let total: i64 = sqlx::query("SELECT COUNT(*) AS n FROM activity_segments")
            .fetch_one(self.pool())
            .await?
            .get("n");

        Ok(SegmentationStatus {
            enriched_activities: enriched,
            segmented_activities: segmented,
            total_segments: total,
        })
    }

    /// Write the advanced derived fields onto a feature row
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn update_advanced_features(
        &self,
        segment_id: Uuid,
        minetti_cost: Option<f64>,
        cardiac_drift: Option<f64>,
        cadence_decay: Option<f64>,
        grade_variability: Option<f64>,
        efficiency_factor: Option<f64>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE segment_features
            SET minetti_cost = ?, cardiac_drift = ?, cadence_decay = ?,
                grade_variability = ?, efficiency_factor = ?
            WHERE segment_id = ?
            ",
        )
        .bind(minetti_cost)
        .bind(cardiac_drift)
        .bind(cadence_decay)
        .bind(grade_variability)
        .bind(efficiency_factor)
        .bind(segment_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Sum of segment `avg_hr * distance_km` for one activity; the per-day
    /// intensity proxy aggregates this over all activities of the day.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn activity_intensity_proxy(&self, activity_id: Uuid) -> Result<Option<f64>> {
        let row = sqlx::query(
            r"
            SELECT SUM(avg_hr * distance_m / 1000.0) AS proxy
            FROM activity_segments
            WHERE activity_id = ? AND avg_hr IS NOT NULL
            ",
        )
        .bind(activity_id.to_string())
        .fetch_one(self.pool())
        .await?;
        Ok(row.get("proxy"))
    }
}
