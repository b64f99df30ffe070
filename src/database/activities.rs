// ABOUTME: Activity persistence - upserts from provider summaries, enrichment payload writes
// ABOUTME: Merge-updates keep existing values wherever the incoming summary carries null
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::Database;
use crate::models::{Activity, ActivityType};
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

/// Map a database row onto an [`Activity`]
fn activity_from_row(row: &SqliteRow) -> Result<Activity> {
    let streams = row
        .get::<Option<String>, _>("streams")
        .map(|raw| serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)))
        .filter(|v| !v.is_null());
    let laps = row
        .get::<Option<String>, _>("laps")
        .map(|raw| serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw)))
        .filter(|v| !v.is_null());

    Ok(Activity {
        id: Uuid::parse_str(row.get::<String, _>("id").as_str())?,
        user_id: Uuid::parse_str(row.get::<String, _>("user_id").as_str())?,
        strava_id: row.get("strava_id"),
        device_activity_id: row.get("device_activity_id"),
        name: row.get("name"),
        activity_type: ActivityType::from_provider_string(row.get::<String, _>("activity_type").as_str()),
        start_date: row.get("start_date"),
        start_date_local: row.get("start_date_local"),
        distance: row.get("distance"),
        moving_time: row.get("moving_time"),
        elapsed_time: row.get("elapsed_time"),
        total_elevation_gain: row.get("total_elevation_gain"),
        average_speed: row.get("average_speed"),
        max_speed: row.get("max_speed"),
        average_heartrate: row.get("average_heartrate"),
        max_heartrate: row.get("max_heartrate"),
        average_cadence: row.get("average_cadence"),
        average_watts: row.get("average_watts"),
        max_watts: row.get("max_watts"),
        summary_polyline: row.get("summary_polyline"),
        polyline: row.get("polyline"),
        streams,
        laps,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

const ACTIVITY_COLUMNS: &str = "id, user_id, strava_id, device_activity_id, name, activity_type, start_date, \
     start_date_local, distance, moving_time, elapsed_time, total_elevation_gain, \
     average_speed, max_speed, average_heartrate, max_heartrate, average_cadence, \
     average_watts, max_watts, summary_polyline, polyline, streams, laps, created_at, updated_at";

impl Database {
    /// Insert a new activity row
    ///
    /// # Errors
    ///
    /// Returns an error on constraint violation (duplicate `strava_id`) or IO failure
    pub async fn insert_activity(&self, activity: &Activity) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO activities (
                id, user_id, strava_id, device_activity_id, name, activity_type, start_date, start_date_local,
                distance, moving_time, elapsed_time, total_elevation_gain,
                average_speed, max_speed, average_heartrate, max_heartrate, average_cadence,
                average_watts, max_watts, summary_polyline, polyline, streams, laps,
                created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(activity.id.to_string())
        .bind(activity.user_id.to_string())
        .bind(activity.strava_id)
        .bind(activity.device_activity_id)
        .bind(&activity.name)
        .bind(activity.activity_type.as_str())
        .bind(activity.start_date)
        .bind(activity.start_date_local)
        .bind(activity.distance)
        .bind(activity.moving_time)
        .bind(activity.elapsed_time)
        .bind(activity.total_elevation_gain)
        .bind(activity.average_speed)
        .bind(activity.max_speed)
        .bind(activity.average_heartrate)
        .bind(activity.max_heartrate)
        .bind(activity.average_cadence)
        .bind(activity.average_watts)
        .bind(activity.max_watts)
        .bind(&activity.summary_polyline)
        .bind(&activity.polyline)
        .bind(activity.streams.as_ref().map(ToString::to_string))
        .bind(activity.laps.as_ref().map(ToString::to_string))
        .bind(activity.created_at)
        .bind(activity.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch an activity by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_activity(&self, activity_id: Uuid) -> Result<Option<Activity>> {
        let row = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE id = ?"
        ))
        .bind(activity_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(activity_from_row).transpose()
    }

    /// Fetch an activity by its upstream identifier
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_activity_by_strava_id(&self, strava_id: i64) -> Result<Option<Activity>> {
        let row = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE strava_id = ?"
        ))
        .bind(strava_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(activity_from_row).transpose()
    }

    /// Merge a fresh provider summary into an existing row.
    ///
    /// Only non-null incoming fields overwrite stored values.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails
    pub async fn merge_activity_summary(&self, activity_id: Uuid, update: &Activity) -> Result<()> {
        sqlx::query(
            r"
            UPDATE activities SET
                name = COALESCE(?, name),
                activity_type = COALESCE(?, activity_type),
                start_date = COALESCE(?, start_date),
                start_date_local = COALESCE(?, start_date_local),
                distance = COALESCE(?, distance),
                moving_time = COALESCE(?, moving_time),
                elapsed_time = COALESCE(?, elapsed_time),
                total_elevation_gain = COALESCE(?, total_elevation_gain),
                average_speed = COALESCE(?, average_speed),
                max_speed = COALESCE(?, max_speed),
                average_heartrate = COALESCE(?, average_heartrate),
                max_heartrate = COALESCE(?, max_heartrate),
                average_cadence = COALESCE(?, average_cadence),
                average_watts = COALESCE(?, average_watts),
                max_watts = COALESCE(?, max_watts),
                summary_polyline = COALESCE(?, summary_polyline),
                updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(Some(&update.name))
        .bind(Some(update.activity_type.as_str()))
        .bind(Some(update.start_date))
        .bind(update.start_date_local)
        .bind(Some(update.distance))
        .bind(Some(update.moving_time))
        .bind(Some(update.elapsed_time))
        .bind(Some(update.total_elevation_gain))
        .bind(update.average_speed)
        .bind(update.max_speed)
        .bind(update.average_heartrate)
        .bind(update.max_heartrate)
        .bind(update.average_cadence)
        .bind(update.average_watts)
        .bind(update.max_watts)
        .bind(update.summary_polyline.as_deref())
        .bind(Utc::now())
        .bind(activity_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Persist the enrichment payload (streams, laps, polylines) atomically.
    ///
    /// Null inputs leave the stored columns untouched, so a 404 on one
    /// endpoint never erases data fetched earlier.
    ///
    /// # Errors
    ///
    /// Returns an error and rolls back if any statement fails
    pub async fn store_enrichment_payload(
        &self,
        activity_id: Uuid,
        streams: Option<&Value>,
        laps: Option<&Value>,
        polyline: Option<&str>,
        summary_polyline: Option<&str>,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query(
            r"
            UPDATE activities SET
                streams = COALESCE(?, streams),
                laps = COALESCE(?, laps),
                polyline = COALESCE(?, polyline),
                summary_polyline = COALESCE(?, summary_polyline),
                updated_at = ?
            WHERE id = ?
            ",
        )
        .bind(streams.map(ToString::to_string))
        .bind(laps.map(ToString::to_string))
        .bind(polyline)
        .bind(summary_polyline)
        .bind(Utc::now())
        .bind(activity_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete an activity by upstream id; cascades remove queue items,
    /// segments, features, and weather. Returns whether a row was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails
    pub async fn delete_activity_by_strava_id(&self, strava_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM activities WHERE strava_id = ?")
            .bind(strava_id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Activities of a user that still lack streams, newest first
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn unenriched_activities(&self, user_id: Uuid) -> Result<Vec<Activity>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE user_id = ? AND strava_id IS NOT NULL AND streams IS NULL
             ORDER BY start_date DESC"
        ))
        .bind(user_id.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(activity_from_row).collect()
    }

    /// All enriched activities, optionally restricted to one user
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn activities_with_streams(&self, user_id: Option<Uuid>) -> Result<Vec<Activity>> {
        let rows = match user_id {
            Some(user_id) => {
                sqlx::query(&format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activities
                     WHERE streams IS NOT NULL AND user_id = ? ORDER BY start_date"
                ))
                .bind(user_id.to_string())
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM activities
                     WHERE streams IS NOT NULL ORDER BY start_date"
                ))
                .fetch_all(self.pool())
                .await?
            }
        };
        rows.iter().map(activity_from_row).collect()
    }

    /// Activities of a user whose start date falls inside `[from, to)`
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn activities_for_user_between(
        &self,
        user_id: Uuid,
        from: chrono::DateTime<Utc>,
        to: chrono::DateTime<Utc>,
    ) -> Result<Vec<Activity>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE user_id = ? AND start_date >= ? AND start_date < ?
             ORDER BY start_date"
        ))
        .bind(user_id.to_string())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(activity_from_row).collect()
    }
}
