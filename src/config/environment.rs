// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Handles environment variables, deployment modes, and runtime configuration parsing
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

//! Environment-based configuration management for production deployment

use crate::constants::enrichment;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;

/// Strongly typed log level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Convert to `tracing::Level`
    #[must_use]
    pub const fn to_tracing_level(&self) -> tracing::Level {
        match self {
            Self::Error => tracing::Level::ERROR,
            Self::Warn => tracing::Level::WARN,
            Self::Info => tracing::Level::INFO,
            Self::Debug => tracing::Level::DEBUG,
            Self::Trace => tracing::Level::TRACE,
        }
    }

    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "error" => Self::Error,
            "warn" => Self::Warn,
            "debug" => Self::Debug,
            "trace" => Self::Trace,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Trace => write!(f, "trace"),
        }
    }
}

/// Environment type for deployment-specific behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Testing,
}

impl Environment {
    /// Parse from string with fallback
    #[must_use]
    pub fn from_str_or_default(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "testing" | "test" => Self::Testing,
            _ => Self::Development,
        }
    }

    /// Check if this is a production environment
    #[must_use]
    pub const fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Testing => write!(f, "testing"),
        }
    }
}

/// Strava OAuth application credentials
#[derive(Debug, Clone)]
pub struct StravaApiConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// OAuth redirect URI
    pub redirect_uri: String,
    /// API base URL (overridable for tests)
    pub api_base: String,
    /// Token endpoint URL
    pub token_url: String,
}

/// Webhook subscription settings
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Token echoed back during the subscription challenge
    pub verify_token: String,
    /// When set, events carrying a different subscription id are dropped
    pub expected_subscription_id: Option<i64>,
}

/// Enrichment scheduler tuning
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Items leased per scheduling cycle
    pub batch_size: usize,
    /// Parallel enrichment workers
    pub worker_count: usize,
    /// Sleep between cycles, seconds
    pub sleep_secs: u64,
    /// Items granted to each user per round-robin cycle
    pub items_per_user_per_cycle: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: enrichment::DEFAULT_BATCH_SIZE,
            worker_count: enrichment::DEFAULT_WORKER_COUNT,
            sleep_secs: enrichment::DEFAULT_SLEEP_SECS,
            items_per_user_per_cycle: enrichment::DEFAULT_ITEMS_PER_USER_PER_CYCLE,
        }
    }
}

/// Complete server configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP listen port
    pub http_port: u16,
    /// Deployment environment
    pub environment: Environment,
    /// Database connection string (SQLite path or URL)
    pub database_url: String,
    /// Redis connection string; in-memory cache when absent
    pub redis_url: Option<String>,
    /// 32-byte AES-256-GCM key for token encryption at rest
    pub encryption_key: Vec<u8>,
    /// Log level for the tracing subscriber
    pub log_level: LogLevel,
    /// Strava OAuth application settings
    pub strava: StravaApiConfig,
    /// Webhook subscription settings
    pub webhook: WebhookConfig,
    /// Enrichment scheduler tuning
    pub scheduler: SchedulerConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or malformed
    pub fn from_env() -> Result<Self> {
        let http_port = env_parse("HTTP_PORT", 8081)?;
        let environment = Environment::from_str_or_default(
            &env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        );

        let database_url = env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/stride.db".into());
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());

        let encryption_key = decode_encryption_key(
            &env::var("ENCRYPTION_KEY").context("ENCRYPTION_KEY environment variable required")?,
        )?;

        let log_level = LogLevel::from_str_or_default(
            &env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into()),
        );

        let strava = StravaApiConfig {
            client_id: env::var("STRAVA_CLIENT_ID")
                .context("STRAVA_CLIENT_ID environment variable required")?,
            client_secret: env::var("STRAVA_CLIENT_SECRET")
                .context("STRAVA_CLIENT_SECRET environment variable required")?,
            redirect_uri: env::var("STRAVA_REDIRECT_URI").unwrap_or_default(),
            api_base: env::var("STRAVA_API_BASE")
                .unwrap_or_else(|_| crate::constants::strava::API_BASE.into()),
            token_url: env::var("STRAVA_TOKEN_URL")
                .unwrap_or_else(|_| crate::constants::strava::TOKEN_URL.into()),
        };

        let webhook = WebhookConfig {
            verify_token: env::var("STRAVA_WEBHOOK_VERIFY_TOKEN").unwrap_or_default(),
            expected_subscription_id: env::var("STRAVA_WEBHOOK_SUBSCRIPTION_ID")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<i64>())
                .transpose()
                .context("STRAVA_WEBHOOK_SUBSCRIPTION_ID must be an integer")?,
        };

        let scheduler = SchedulerConfig {
            batch_size: env_parse("WORKER_BATCH_SIZE", enrichment::DEFAULT_BATCH_SIZE)?,
            worker_count: env_parse("WORKER_COUNT", enrichment::DEFAULT_WORKER_COUNT)?,
            sleep_secs: env_parse("ENRICHMENT_SLEEP_SECS", enrichment::DEFAULT_SLEEP_SECS)?,
            items_per_user_per_cycle: env_parse(
                "ITEMS_PER_USER_PER_CYCLE",
                enrichment::DEFAULT_ITEMS_PER_USER_PER_CYCLE,
            )?,
        };

        let config = Self {
            http_port,
            environment,
            database_url,
            redis_url,
            encryption_key,
            log_level,
            strava,
            webhook,
            scheduler,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the parsed configuration
    ///
    /// # Errors
    ///
    /// Returns an error on empty credentials or zero-sized worker settings
    pub fn validate(&self) -> Result<()> {
        if self.strava.client_id.is_empty() {
            anyhow::bail!("STRAVA_CLIENT_ID must not be empty");
        }
        if self.encryption_key.len() != 32 {
            anyhow::bail!(
                "ENCRYPTION_KEY must decode to 32 bytes, got {}",
                self.encryption_key.len()
            );
        }
        if self.scheduler.worker_count == 0 {
            anyhow::bail!("WORKER_COUNT must be at least 1");
        }
        if self.scheduler.batch_size == 0 {
            anyhow::bail!("WORKER_BATCH_SIZE must be at least 1");
        }
        Ok(())
    }

    /// Human-readable startup summary (secrets elided)
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "env={} port={} db={} cache={} workers={} batch={} sleep={}s items/user={}",
            self.environment,
            self.http_port,
            self.database_url,
            self.redis_url.as_deref().map_or("memory", |_| "redis"),
            self.scheduler.worker_count,
            self.scheduler.batch_size,
            self.scheduler.sleep_secs,
            self.scheduler.items_per_user_per_cycle,
        )
    }
}

/// Parse an env var with a typed default
fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .with_context(|| format!("{name} has an invalid value: {raw}")),
        _ => Ok(default),
    }
}

/// Decode the hex (or base64) encryption key into raw bytes.
///
/// A 64-char hex key is also valid base64, so the hex form is checked
/// first to keep its byte interpretation.
fn decode_encryption_key(raw: &str) -> Result<Vec<u8>> {
    use base64::Engine;

    let trimmed = raw.trim();
    if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        let mut bytes = Vec::with_capacity(32);
        for i in (0..trimmed.len()).step_by(2) {
            bytes.push(u8::from_str_radix(&trimmed[i..i + 2], 16)?);
        }
        return Ok(bytes);
    }
    if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(trimmed) {
        return Ok(bytes);
    }
    anyhow::bail!("ENCRYPTION_KEY must be base64 or hex encoded")
}
