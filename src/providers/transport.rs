// ABOUTME: Raw HTTP transport to the Strava API behind an async trait for test stubs
// ABOUTME: Maps response statuses onto the provider error taxonomy; 404 decodes to None
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::errors::{ProviderError, ProviderResult};
use crate::constants::{http_client, strava};
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// One method per consumed Strava endpoint.
///
/// `Ok(None)` means HTTP 404: the resource is gone upstream, which is not an
/// error for enrichment.
#[async_trait]
pub trait StravaTransport: Send + Sync {
    /// `GET /activities/{id}` including the full polyline map
    async fn activity_summary(&self, access_token: &str, activity_id: i64)
        -> ProviderResult<Option<Value>>;

    /// `GET /activities/{id}/streams?keys=...&key_by_type=true`
    async fn activity_streams(
        &self,
        access_token: &str,
        activity_id: i64,
        keys: &[&str],
    ) -> ProviderResult<Option<Value>>;

    /// `GET /activities/{id}/laps`
    async fn activity_laps(&self, access_token: &str, activity_id: i64)
        -> ProviderResult<Option<Value>>;

    /// `GET /activities/{id}/segment_efforts`
    async fn activity_segment_efforts(
        &self,
        access_token: &str,
        activity_id: i64,
    ) -> ProviderResult<Option<Value>>;

    /// `GET /athlete/activities?after=...&per_page=...&page=...`
    async fn athlete_activities(
        &self,
        access_token: &str,
        after_epoch: i64,
        page: u32,
        per_page: u32,
    ) -> ProviderResult<Vec<Value>>;
}

/// reqwest-backed transport with pooled connections and fixed timeouts
pub struct HttpTransport {
    client: Client,
    api_base: String,
}

impl HttpTransport {
    /// Build a transport against the given API base
    #[must_use]
    pub fn new(api_base: impl Into<String>) -> Self {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(http_client::TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(http_client::CONNECT_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_base: api_base.into(),
        }
    }

    /// Decode a response, mapping statuses onto the error taxonomy
    async fn decode(response: Response) -> ProviderResult<Option<Value>> {
        let status = response.status();
        match status {
            StatusCode::NOT_FOUND => {
                debug!("upstream returned 404");
                Ok(None)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimited),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::Unauthorized(
                format!("upstream rejected token (HTTP {status})"),
            )),
            s if s.is_success() => {
                let body = response.json::<Value>().await?;
                Ok(Some(body))
            }
            s => Err(ProviderError::Transient(format!("HTTP {s} from upstream"))),
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(strava::API_BASE)
    }
}

#[async_trait]
impl StravaTransport for HttpTransport {
    async fn activity_summary(
        &self,
        access_token: &str,
        activity_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/activities/{activity_id}", self.api_base))
            .query(&[("include_all_efforts", "true")])
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn activity_streams(
        &self,
        access_token: &str,
        activity_id: i64,
        keys: &[&str],
    ) -> ProviderResult<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/activities/{activity_id}/streams", self.api_base))
            .query(&[("keys", keys.join(",").as_str()), ("key_by_type", "true")])
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn activity_laps(
        &self,
        access_token: &str,
        activity_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let response = self
            .client
            .get(format!("{}/activities/{activity_id}/laps", self.api_base))
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn activity_segment_efforts(
        &self,
        access_token: &str,
        activity_id: i64,
    ) -> ProviderResult<Option<Value>> {
        let response = self
            .client
            .get(format!(
                "{}/activities/{activity_id}/segment_efforts",
                self.api_base
            ))
            .bearer_auth(access_token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn athlete_activities(
        &self,
        access_token: &str,
        after_epoch: i64,
        page: u32,
        per_page: u32,
    ) -> ProviderResult<Vec<Value>> {
        let response = self
            .client
            .get(format!("{}/athlete/activities", self.api_base))
            .query(&[
                ("after", after_epoch.to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ])
            .bearer_auth(access_token)
            .send()
            .await?;

        match Self::decode(response).await? {
            Some(Value::Array(list)) => Ok(list),
            Some(other) => Err(ProviderError::Validation(format!(
                "expected an activity array, got {other}"
            ))),
            None => Ok(Vec::new()),
        }
    }
}
