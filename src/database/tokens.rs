// ABOUTME: Strava OAuth connection persistence with tokens encrypted at rest
// ABOUTME: Lookups by user id and by athlete id (the webhook owner_id)
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::encryption::{decrypt_token, encrypt_token};
use super::Database;
use crate::models::StravaConnection;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    fn connection_from_row(&self, row: &SqliteRow) -> Result<StravaConnection> {
        Ok(StravaConnection {
            user_id: Uuid::parse_str(row.get::<String, _>("user_id").as_str())?,
            athlete_id: row.get("athlete_id"),
            access_token: decrypt_token(self.encryption_key(), row.get::<String, _>("access_token").as_str())?,
            refresh_token: decrypt_token(
                self.encryption_key(),
                row.get::<String, _>("refresh_token").as_str(),
            )?,
            expires_at: row.get("expires_at"),
            scope: row.get("scope"),
        })
    }

    /// Create or replace a user's Strava connection
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the statement fails
    pub async fn upsert_strava_connection(&self, connection: &StravaConnection) -> Result<()> {
        let access = encrypt_token(self.encryption_key(), &connection.access_token)?;
        let refresh = encrypt_token(self.encryption_key(), &connection.refresh_token)?;

        sqlx::query(
            r"
            INSERT INTO strava_connections
                (user_id, athlete_id, access_token, refresh_token, expires_at, scope, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET
                athlete_id = excluded.athlete_id,
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                scope = excluded.scope,
                updated_at = excluded.updated_at
            ",
        )
        .bind(connection.user_id.to_string())
        .bind(connection.athlete_id)
        .bind(access)
        .bind(refresh)
        .bind(connection.expires_at)
        .bind(&connection.scope)
        .bind(Utc::now())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Fetch a user's decrypted connection
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decryption fails
    pub async fn strava_connection(&self, user_id: Uuid) -> Result<Option<StravaConnection>> {
        let row = sqlx::query("SELECT * FROM strava_connections WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(|r| self.connection_from_row(r)).transpose()
    }

    /// Resolve a Strava athlete id (the webhook `owner_id`) to a connection
    ///
    /// # Errors
    ///
    /// Returns an error if the query or decryption fails
    pub async fn strava_connection_by_athlete(
        &self,
        athlete_id: i64,
    ) -> Result<Option<StravaConnection>> {
        let row = sqlx::query("SELECT * FROM strava_connections WHERE athlete_id = ?")
            .bind(athlete_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(|r| self.connection_from_row(r)).transpose()
    }

    /// Persist rotated tokens after a refresh
    ///
    /// # Errors
    ///
    /// Returns an error if encryption or the statement fails
    pub async fn rotate_strava_tokens(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let access = encrypt_token(self.encryption_key(), access_token)?;
        let refresh = encrypt_token(self.encryption_key(), refresh_token)?;

        sqlx::query(
            r"
            UPDATE strava_connections
            SET access_token = ?, refresh_token = ?, expires_at = ?, updated_at = ?
            WHERE user_id = ?
            ",
        )
        .bind(access)
        .bind(refresh)
        .bind(expires_at)
        .bind(Utc::now())
        .bind(user_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(())
    }
}
