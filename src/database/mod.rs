// ABOUTME: SQLite persistence layer for activities, the enrichment queue, and derived data
// ABOUTME: Owns the connection pool, in-code schema migration, and the token cipher
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

pub mod activities;
pub mod encryption;
pub mod queue;
pub mod segments;
pub mod tokens;
pub mod training_load;
pub mod weather;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;

/// Database connection with token encryption key
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    encryption_key: Vec<u8>,
}

impl Database {
    /// Open (creating if missing) the SQLite database and run migrations
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be created or migration fails
    pub async fn new(database_url: &str, encryption_key: Vec<u8>) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database URL: {database_url}"))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| "failed to open SQLite database")?;

        let db = Self {
            pool,
            encryption_key,
        };
        db.migrate().await?;
        Ok(db)
    }

    /// Connection pool handle
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn encryption_key(&self) -> &[u8] {
        &self.encryption_key
    }

    /// Create the schema. Every statement is idempotent so this runs on each
    /// startup.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                display_name TEXT,
                max_heart_rate REAL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS strava_connections (
                user_id TEXT PRIMARY KEY,
                athlete_id INTEGER UNIQUE NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                scope TEXT,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activities (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                strava_id INTEGER UNIQUE,
                device_activity_id INTEGER UNIQUE,
                name TEXT NOT NULL,
                activity_type TEXT NOT NULL,
                start_date TEXT NOT NULL,
                start_date_local TEXT,
                distance REAL NOT NULL DEFAULT 0,
                moving_time INTEGER NOT NULL DEFAULT 0,
                elapsed_time INTEGER NOT NULL DEFAULT 0,
                total_elevation_gain REAL NOT NULL DEFAULT 0,
                average_speed REAL,
                max_speed REAL,
                average_heartrate REAL,
                max_heartrate REAL,
                average_cadence REAL,
                average_watts REAL,
                max_watts REAL,
                summary_polyline TEXT,
                polyline TEXT,
                streams TEXT, -- JSON
                laps TEXT, -- JSON
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_user ON activities(user_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_activities_strava ON activities(strava_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS enrichment_queue (
                id TEXT PRIMARY KEY,
                activity_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'in_progress', 'completed', 'failed')),
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                last_error TEXT,
                next_retry_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (activity_id) REFERENCES activities (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // At most one live item per activity, enforced by the engine itself
        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_active_activity
            ON enrichment_queue(activity_id)
            WHERE status IN ('pending', 'in_progress')
            ",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_status ON enrichment_queue(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_user ON enrichment_queue(user_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activity_segments (
                id TEXT PRIMARY KEY,
                activity_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                segment_index INTEGER NOT NULL,
                distance_m REAL NOT NULL,
                elapsed_time_s REAL NOT NULL,
                avg_grade_percent REAL,
                elevation_gain_m REAL,
                elevation_loss_m REAL,
                altitude_m REAL,
                avg_hr REAL,
                avg_cadence REAL,
                lat REAL,
                lon REAL,
                pace_min_per_km REAL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (activity_id) REFERENCES activities (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_segments_activity ON activity_segments(activity_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS segment_features (
                id TEXT PRIMARY KEY,
                segment_id TEXT NOT NULL UNIQUE,
                activity_id TEXT NOT NULL,
                cumulative_distance_km REAL NOT NULL,
                elapsed_time_min REAL NOT NULL,
                cumulative_elev_gain_m REAL,
                cumulative_elev_loss_m REAL,
                race_completion_pct REAL,
                intensity_proxy REAL,
                minetti_cost REAL,
                cardiac_drift REAL,
                cadence_decay REAL,
                grade_variability REAL,
                efficiency_factor REAL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (segment_id) REFERENCES activity_segments (id) ON DELETE CASCADE,
                FOREIGN KEY (activity_id) REFERENCES activities (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activity_weather (
                id TEXT PRIMARY KEY,
                activity_id TEXT NOT NULL UNIQUE,
                temperature_c REAL,
                humidity_pct REAL,
                wind_speed_kmh REAL,
                wind_direction_deg REAL,
                pressure_hpa REAL,
                precipitation_mm REAL,
                cloud_cover_pct REAL,
                weather_code INTEGER,
                created_at TEXT NOT NULL,
                FOREIGN KEY (activity_id) REFERENCES activities (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS training_load_days (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                ctl_42d REAL,
                atl_7d REAL,
                tsb REAL,
                edwards_trimp_daily REAL,
                ctl_42d_edwards REAL,
                atl_7d_edwards REAL,
                tsb_edwards REAL,
                rhr_delta_7d REAL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, date),
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Device-sourced daily metrics (resting HR); feeds the 7-day RHR delta
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS device_daily_metrics (
                user_id TEXT NOT NULL,
                date TEXT NOT NULL,
                resting_heart_rate REAL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, date),
                FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        info!("database schema up to date");
        Ok(())
    }

    /// Create a user row (tests and seeding)
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails
    pub async fn create_user(&self, user: &crate::models::User) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO users (id, email, display_name, max_heart_rate, created_at)
            VALUES (?, ?, ?, ?, ?)
            ",
        )
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(&user.display_name)
        .bind(user.max_heart_rate)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a user by id
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails
    pub async fn get_user(&self, user_id: uuid::Uuid) -> Result<Option<crate::models::User>> {
        use sqlx::Row;

        let row = sqlx::query(
            "SELECT id, email, display_name, max_heart_rate, created_at FROM users WHERE id = ?",
        )
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(crate::models::User {
                id: uuid::Uuid::parse_str(r.get::<String, _>("id").as_str())?,
                email: r.get("email"),
                display_name: r.get("display_name"),
                max_heart_rate: r.get("max_heart_rate"),
                created_at: r.get("created_at"),
            })
        })
        .transpose()
    }
}
