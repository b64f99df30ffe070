// ABOUTME: Training-load day persistence and device daily metrics reads
// ABOUTME: Upserts exactly one row per (user, date); recomputation overwrites in place
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::Database;
use crate::models::TrainingLoadDay;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

fn day_from_row(row: &SqliteRow) -> Result<TrainingLoadDay> {
    Ok(TrainingLoadDay {
        user_id: Uuid::parse_str(row.get::<String, _>("user_id").as_str())?,
        date: row.get("date"),
        ctl_42d: row.get("ctl_42d"),
        atl_7d: row.get("atl_7d"),
        tsb: row.get("tsb"),
        edwards_trimp_daily: row.get("edwards_trimp_daily"),
        ctl_42d_edwards: row.get("ctl_42d_edwards"),
        atl_7d_edwards: row.get("atl_7d_edwards"),
        tsb_edwards: row.get("tsb_edwards"),
        rhr_delta_7d: row.get("rhr_delta_7d"),
    })
}

impl Database {
    /// Upsert one training-load day
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails
    pub async fn upsert_training_load_day(&self, day: &TrainingLoadDay) -> Result<()> {
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO training_load_days (
                user_id, date, ctl_42d, atl_7d, tsb,
                edwards_trimp_daily, ctl_42d_edwards, atl_7d_edwards, tsb_edwards,
                rhr_delta_7d, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, date) DO UPDATE SET
                ctl_42d = excluded.ctl_42d,
                atl_7d = excluded.atl_7d,
                tsb = excluded.tsb,
                edwards_trimp_daily = excluded.edwards_trimp_daily,
                ctl_42d_edwards = excluded.ctl_42d_edwards,
                atl_7d_edwards = excluded.atl_7d_edwards,
                tsb_edwards = excluded.tsb_edwards,
                rhr_delta_7d = excluded.rhr_delta_7d,
                updated_at = excluded.updated_at
            ",
        )
        .bind(day.user_id.to_string())
        .bind(day.date)
        .bind(day.ctl_42d)
        .bind(day.atl_7d)
        .bind(day.tsb)
        .bind(day.edwards_trimp_daily)
        .bind(day.ctl_42d_edwards)
        .bind(day.atl_7d_edwards)
        .bind(day.tsb_edwards)
        .bind(day.rhr_delta_7d)
        .bind(now)
        .bind(now)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Training-load days for a user inside `[from, to]`, ordered by date
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn training_load_days(
        &self,
        user_id: Uuid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<TrainingLoadDay>> {
        let rows = sqlx::query(
            r"
            SELECT user_id, date, ctl_42d, atl_7d, tsb,
                   edwards_trimp_daily, ctl_42d_edwards, atl_7d_edwards, tsb_edwards,
                   rhr_delta_7d
            FROM training_load_days
            WHERE user_id = ? AND date >= ? AND date <= ?
            ORDER BY date
            ",
        )
        .bind(user_id.to_string())
        .bind(from)
        .bind(to)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(day_from_row).collect()
    }

    /// Resting heart rate recorded by a device for one day, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn resting_heart_rate(&self, user_id: Uuid, date: NaiveDate) -> Result<Option<f64>> {
        let row = sqlx::query(
            "SELECT resting_heart_rate FROM device_daily_metrics WHERE user_id = ? AND date = ?",
        )
        .bind(user_id.to_string())
        .bind(date)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.and_then(|r| r.get("resting_heart_rate")))
    }

    /// Record a device daily metric (seeding and future device sync)
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails
    pub async fn upsert_resting_heart_rate(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        resting_heart_rate: f64,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO device_daily_metrics (user_id, date, resting_heart_rate, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, date) DO UPDATE SET resting_heart_rate = excluded.resting_heart_rate
            ",
        )
        .bind(user_id.to_string())
        .bind(date)
        .bind(resting_heart_rate)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
