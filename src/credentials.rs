// ABOUTME: Credential collaborator - access-token acquisition with margin-based refresh
// ABOUTME: Concurrent refreshes for the same user are single-flighted behind a per-user mutex
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::config::environment::StravaApiConfig;
use crate::database::Database;
use crate::providers::errors::{ProviderError, ProviderResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Token payload returned by the OAuth refresh endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix epoch seconds
    pub expires_at: i64,
}

impl RefreshedTokens {
    /// Expiry as a UTC instant
    #[must_use]
    pub fn expires_at_utc(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.expires_at, 0).single().unwrap_or_else(Utc::now)
    }
}

/// OAuth refresh exchange behind a trait so tests can stub it
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange a refresh token for a rotated token pair
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<RefreshedTokens>;
}

/// reqwest-backed refresher against the configured token endpoint
pub struct HttpTokenRefresher {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl HttpTokenRefresher {
    /// Build a refresher from the Strava OAuth configuration
    #[must_use]
    pub fn new(config: &StravaApiConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(crate::constants::http_client::TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> ProviderResult<RefreshedTokens> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Unauthorized(format!(
                "token refresh rejected (HTTP {status}): {body}"
            )));
        }
        if !status.is_success() {
            return Err(ProviderError::Transient(format!(
                "token refresh failed (HTTP {status})"
            )));
        }

        let tokens = response.json::<RefreshedTokens>().await.map_err(|e| {
            ProviderError::Unauthorized(format!("token refresh response malformed: {e}"))
        })?;
        info!("Strava token refreshed");
        Ok(tokens)
    }
}

/// Access-token capability for the upstream client.
///
/// Tokens inside the 5-minute expiry margin are refreshed and the rotated
/// refresh token is persisted before the caller proceeds. Refreshes for the
/// same user are serialized; the second flight re-reads the rotated row and
/// skips the network round-trip.
pub struct TokenManager {
    database: Database,
    refresher: Arc<dyn TokenRefresher>,
    refresh_locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl TokenManager {
    /// Compose a manager from its collaborators
    #[must_use]
    pub fn new(database: Database, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            database,
            refresher,
            refresh_locks: DashMap::new(),
        }
    }

    /// Resolve a webhook `owner_id` to a local user id
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Storage`] if the lookup fails
    pub async fn user_for_athlete(&self, athlete_id: i64) -> ProviderResult<Option<Uuid>> {
        let connection = self
            .database
            .strava_connection_by_athlete(athlete_id)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;
        Ok(connection.map(|c| c.user_id))
    }

    /// A valid access token for the user, refreshing when necessary
    ///
    /// # Errors
    ///
    /// [`ProviderError::Unauthorized`] when the user has no connection or
    /// the refresh is rejected; [`ProviderError::Transient`] on network
    /// failure during refresh
    pub async fn access_token(&self, user_id: Uuid) -> ProviderResult<String> {
        let connection = self
            .database
            .strava_connection(user_id)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?
            .ok_or_else(|| {
                ProviderError::Unauthorized(format!("user {user_id} has no Strava connection"))
            })?;

        if !connection.needs_refresh(Utc::now()) {
            return Ok(connection.access_token);
        }

        let lock = self
            .refresh_locks
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Another flight may have rotated the tokens while we waited
        let connection = self
            .database
            .strava_connection(user_id)
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?
            .ok_or_else(|| {
                ProviderError::Unauthorized(format!("user {user_id} has no Strava connection"))
            })?;
        if !connection.needs_refresh(Utc::now()) {
            return Ok(connection.access_token);
        }

        let refreshed = match self.refresher.refresh(&connection.refresh_token).await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!("token refresh failed for user {user_id}: {e}");
                return Err(e);
            }
        };

        self.database
            .rotate_strava_tokens(
                user_id,
                &refreshed.access_token,
                &refreshed.refresh_token,
                refreshed.expires_at_utc(),
            )
            .await
            .map_err(|e| ProviderError::Storage(e.to_string()))?;

        Ok(refreshed.access_token)
    }
}
