// ABOUTME: Shared test utilities - temp databases, stub transports, seeded users
// ABOUTME: Provides common setup functions to reduce duplication across integration tests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stride_sync::config::environment::{
    Environment, LogLevel, SchedulerConfig, ServerConfig, StravaApiConfig, WebhookConfig,
};
use stride_sync::credentials::{RefreshedTokens, TokenManager, TokenRefresher};
use stride_sync::database::Database;
use stride_sync::models::{Activity, ActivityType, StravaConnection, User};
use stride_sync::providers::errors::{ProviderError, ProviderResult};
use stride_sync::providers::transport::StravaTransport;
use tempfile::TempDir;
use uuid::Uuid;

/// Fixed 32-byte key so connections can be decrypted across helpers
pub const TEST_ENCRYPTION_KEY: [u8; 32] = [7u8; 32];

/// A scratch SQLite database inside a temp directory
pub async fn test_database() -> Result<(Database, TempDir)> {
    let dir = TempDir::new()?;
    let path = dir.path().join("test.db");
    let url = format!("sqlite:{}", path.display());
    let database = Database::new(&url, TEST_ENCRYPTION_KEY.to_vec()).await?;
    Ok((database, dir))
}

/// Seed a user with an optional configured max heart rate
pub async fn seed_user(database: &Database, max_heart_rate: Option<f64>) -> Result<Uuid> {
    let user = User {
        id: Uuid::new_v4(),
        email: format!("{}@example.com", Uuid::new_v4()),
        display_name: Some("Test Runner".into()),
        max_heart_rate,
        created_at: Utc::now(),
    };
    database.create_user(&user).await?;
    Ok(user.id)
}

/// Seed a Strava connection with a far-future expiry (no refresh needed)
pub async fn seed_connection(database: &Database, user_id: Uuid, athlete_id: i64) -> Result<()> {
    let connection = StravaConnection {
        user_id,
        athlete_id,
        access_token: format!("access-{athlete_id}"),
        refresh_token: format!("refresh-{athlete_id}"),
        expires_at: Utc::now() + Duration::hours(6),
        scope: Some("read,activity:read_all".into()),
    };
    database.upsert_strava_connection(&connection).await
}

/// Build a bare activity row; `streams` controls the enrichment state
pub fn make_activity(
    user_id: Uuid,
    strava_id: i64,
    start_date: DateTime<Utc>,
    streams: Option<Value>,
) -> Activity {
    let now = Utc::now();
    Activity {
        id: Uuid::new_v4(),
        user_id,
        strava_id: Some(strava_id),
        device_activity_id: None,
        name: format!("Run {strava_id}"),
        activity_type: ActivityType::Run,
        start_date,
        start_date_local: None,
        distance: 10_000.0,
        moving_time: 3_000,
        elapsed_time: 3_600,
        total_elevation_gain: 120.0,
        average_speed: Some(3.3),
        max_speed: Some(5.0),
        average_heartrate: Some(150.0),
        max_heartrate: Some(185.0),
        average_cadence: Some(170.0),
        average_watts: None,
        max_watts: None,
        summary_polyline: None,
        polyline: None,
        streams,
        laps: None,
        created_at: now,
        updated_at: now,
    }
}

/// Streams fixture with distance/time and heart rate but no GPS, so tests
/// never reach out to the weather service
pub fn enrichable_streams() -> Value {
    json!({
        "time": {"data": [0, 30, 60, 90, 120]},
        "distance": {"data": [0.0, 110.0, 220.0, 330.0, 440.0]},
        "heartrate": {"data": [140, 150, 155, 160, 165]}
    })
}

/// What the stub transport should answer for one endpoint family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubBehavior {
    /// Return a canned successful payload
    Ok,
    /// HTTP 404
    NotFound,
    /// HTTP 429
    RateLimited,
    /// Network failure / 5xx
    Transient,
    /// Token rejected upstream
    Unauthorized,
}

impl StubBehavior {
    fn apply(self, payload: Value) -> ProviderResult<Option<Value>> {
        match self {
            Self::Ok => Ok(Some(payload)),
            Self::NotFound => Ok(None),
            Self::RateLimited => Err(ProviderError::RateLimited),
            Self::Transient => Err(ProviderError::Transient("stubbed 503".into())),
            Self::Unauthorized => Err(ProviderError::Unauthorized("stubbed 401".into())),
        }
    }
}

/// Configurable in-memory transport standing in for the Strava API
pub struct StubTransport {
    pub streams: StubBehavior,
    pub laps: StubBehavior,
    pub efforts: StubBehavior,
    pub summary: StubBehavior,
    pub calls: AtomicU64,
    pub summary_name: String,
    pub athlete_page: Vec<Value>,
}

impl Default for StubTransport {
    fn default() -> Self {
        Self {
            streams: StubBehavior::Ok,
            laps: StubBehavior::Ok,
            efforts: StubBehavior::Ok,
            summary: StubBehavior::Ok,
            calls: AtomicU64::new(0),
            summary_name: "Stubbed Activity".into(),
            athlete_page: Vec::new(),
        }
    }
}

impl StubTransport {
    pub fn with_streams(mut self, behavior: StubBehavior) -> Self {
        self.streams = behavior;
        self
    }

    pub fn with_all(behavior: StubBehavior) -> Self {
        Self {
            streams: behavior,
            laps: behavior,
            efforts: behavior,
            summary: behavior,
            ..Self::default()
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.summary_name = name.into();
        self
    }

    pub fn with_athlete_page(mut self, page: Vec<Value>) -> Self {
        self.athlete_page = page;
        self
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn summary_payload(&self, activity_id: i64) -> Value {
        json!({
            "id": activity_id,
            "name": self.summary_name,
            "sport_type": "Run",
            "start_date": "2025-05-01T06:30:00Z",
            "distance": 10000.0,
            "moving_time": 3000,
            "elapsed_time": 3600,
            "total_elevation_gain": 120.0,
            "map": {"polyline": "full-polyline", "summary_polyline": "short-polyline"}
        })
    }
}

#[async_trait]
impl StravaTransport for StubTransport {
    async fn activity_summary(
        &self,
        _access_token: &str,
        activity_id: i64,
    ) -> ProviderResult<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.summary.apply(self.summary_payload(activity_id))
    }

    async fn activity_streams(
        &self,
        _access_token: &str,
        _activity_id: i64,
        _keys: &[&str],
    ) -> ProviderResult<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.streams.apply(enrichable_streams())
    }

    async fn activity_laps(
        &self,
        _access_token: &str,
        _activity_id: i64,
    ) -> ProviderResult<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.laps.apply(json!([{"lap_index": 1, "distance": 1000.0}]))
    }

    async fn activity_segment_efforts(
        &self,
        _access_token: &str,
        _activity_id: i64,
    ) -> ProviderResult<Option<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.efforts.apply(json!([{"id": 9001, "name": "Local climb"}]))
    }

    async fn athlete_activities(
        &self,
        _access_token: &str,
        _after_epoch: i64,
        page: u32,
        _per_page: u32,
    ) -> ProviderResult<Vec<Value>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if page == 1 {
            Ok(self.athlete_page.clone())
        } else {
            Ok(Vec::new())
        }
    }
}

/// Refresher that must never be called (tokens are seeded unexpired)
pub struct PanicRefresher;

#[async_trait]
impl TokenRefresher for PanicRefresher {
    async fn refresh(&self, _refresh_token: &str) -> ProviderResult<RefreshedTokens> {
        Err(ProviderError::Unauthorized("refresh not expected in this test".into()))
    }
}

/// Counting refresher returning fixed rotated tokens
pub struct CountingRefresher {
    pub calls: AtomicU64,
}

impl CountingRefresher {
    pub fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl TokenRefresher for CountingRefresher {
    async fn refresh(&self, _refresh_token: &str) -> ProviderResult<RefreshedTokens> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RefreshedTokens {
            access_token: "rotated-access".into(),
            refresh_token: "rotated-refresh".into(),
            expires_at: (Utc::now() + Duration::hours(6)).timestamp(),
        })
    }
}

/// Token manager over seeded, unexpired connections
pub fn token_manager(database: &Database) -> Arc<TokenManager> {
    Arc::new(TokenManager::new(database.clone(), Arc::new(PanicRefresher)))
}

/// A full server configuration without touching the environment
pub fn test_config() -> ServerConfig {
    ServerConfig {
        http_port: 0,
        environment: Environment::Testing,
        database_url: "sqlite::memory:".into(),
        redis_url: None,
        encryption_key: TEST_ENCRYPTION_KEY.to_vec(),
        log_level: LogLevel::Warn,
        strava: StravaApiConfig {
            client_id: "test-client".into(),
            client_secret: "test-secret".into(),
            redirect_uri: String::new(),
            api_base: "http://localhost:0".into(),
            token_url: "http://localhost:0/oauth/token".into(),
        },
        webhook: WebhookConfig {
            verify_token: "verify-me".into(),
            expected_subscription_id: Some(777),
        },
        scheduler: SchedulerConfig {
            batch_size: 5,
            worker_count: 1,
            sleep_secs: 300,
            items_per_user_per_cycle: 2,
        },
    }
}
