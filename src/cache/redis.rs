// ABOUTME: Redis counter cache for cross-process quota accounting
// ABOUTME: Uses ConnectionManager pooling; INCR/EXPIRE with orphan-TTL repair on read and write
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::{CacheConfig, CacheProvider};
use anyhow::{anyhow, Context, Result};
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{info, warn};

/// Redis cache implementation with connection pooling.
///
/// `ConnectionManager` reconnects automatically; every command clones the
/// manager handle, which multiplexes over one connection.
#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis with the configured timeouts
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is missing or the connection fails
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        let redis_url = config
            .redis_url
            .as_ref()
            .ok_or_else(|| anyhow!("Redis URL is required for the Redis cache backend"))?;

        info!(
            "Connecting to Redis at {} (timeout={}s, response_timeout={}s)",
            redis_url, config.connection_timeout_secs, config.response_timeout_secs
        );

        let client = redis::Client::open(redis_url.as_str())
            .with_context(|| "failed to create Redis client")?;

        let manager_config = ConnectionManagerConfig::new()
            .set_connection_timeout(Duration::from_secs(config.connection_timeout_secs))
            .set_response_timeout(Duration::from_secs(config.response_timeout_secs));

        let manager = ConnectionManager::new_with_config(client, manager_config)
            .await
            .with_context(|| "failed to establish Redis connection")?;

        info!("Successfully connected to Redis");
        Ok(Self { manager })
    }
}

#[async_trait::async_trait]
impl CacheProvider for RedisCache {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.manager.clone();

        let new_val: u64 = conn
            .incr(key, 1u64)
            .await
            .with_context(|| format!("Redis INCR failed for {key}"))?;

        if new_val == 1 {
            let _: () = conn
                .expire(key, ttl.as_secs() as i64)
                .await
                .with_context(|| format!("Redis EXPIRE failed for {key}"))?;
        } else {
            // Repair an orphan left by a crash between INCR and EXPIRE
            let current_ttl: i64 = conn
                .ttl(key)
                .await
                .with_context(|| format!("Redis TTL failed for {key}"))?;
            if current_ttl == -1 {
                warn!("counter {key} found without TTL, re-applying {}s", ttl.as_secs());
                let _: () = conn
                    .expire(key, ttl.as_secs() as i64)
                    .await
                    .with_context(|| format!("Redis EXPIRE failed for {key}"))?;
            }
        }

        Ok(new_val)
    }

    async fn counter(&self, key: &str, repair_ttl: Duration) -> Result<u64> {
        let mut conn = self.manager.clone();

        let value: Option<u64> = conn
            .get(key)
            .await
            .with_context(|| format!("Redis GET failed for {key}"))?;
        let Some(value) = value else {
            return Ok(0);
        };

        let current_ttl: i64 = conn
            .ttl(key)
            .await
            .with_context(|| format!("Redis TTL failed for {key}"))?;
        if current_ttl == -1 {
            warn!(
                "counter {key} found without TTL on read, re-applying {}s",
                repair_ttl.as_secs()
            );
            let _: () = conn
                .expire(key, repair_ttl.as_secs() as i64)
                .await
                .with_context(|| format!("Redis EXPIRE failed for {key}"))?;
        }

        Ok(value)
    }

    async fn set_counter(&self, key: &str, value: u64, fallback_ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();

        let current_ttl: i64 = conn
            .ttl(key)
            .await
            .with_context(|| format!("Redis TTL failed for {key}"))?;

        let _: () = conn
            .set(key, value)
            .await
            .with_context(|| format!("Redis SET failed for {key}"))?;

        // SET clears any expiry; restore the remaining window or the fallback
        let ttl_secs = if current_ttl > 0 {
            current_ttl
        } else {
            fallback_ttl.as_secs() as i64
        };
        let _: () = conn
            .expire(key, ttl_secs)
            .await
            .with_context(|| format!("Redis EXPIRE failed for {key}"))?;

        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut conn = self.manager.clone();

        let ttl_secs: i64 = conn
            .ttl(key)
            .await
            .with_context(|| format!("Redis TTL failed for {key}"))?;

        // -2: key missing, -1: key without expiry
        match ttl_secs {
            secs if secs > 0 => Ok(Some(Duration::from_secs(secs as u64))),
            _ => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.manager.clone();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .with_context(|| "Redis PING failed")?;

        if response == "PONG" {
            Ok(())
        } else {
            Err(anyhow!("unexpected PING response '{response}'"))
        }
    }
}
