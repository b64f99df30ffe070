// ABOUTME: Cache factory for environment-based backend selection
// ABOUTME: Dispatches to the Redis or in-memory backend behind one concrete type
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::{memory::MemoryCache, redis::RedisCache, CacheConfig, CacheProvider};
use anyhow::Result;
use std::time::Duration;

/// Unified cache front over the configured backend
#[derive(Clone)]
pub enum Cache {
    Memory(MemoryCache),
    Redis(RedisCache),
}

impl Cache {
    /// Create a cache instance based on configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend fails to connect
    pub async fn new(config: CacheConfig) -> Result<Self> {
        if config.redis_url.is_some() {
            let backend = RedisCache::new(&config).await?;
            Ok(Self::Redis(backend))
        } else {
            tracing::info!("REDIS_URL not set, using in-memory cache (single-node quota scope)");
            Ok(Self::Memory(MemoryCache::new()))
        }
    }

    /// Create a cache from the `REDIS_URL` environment variable
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis backend fails to connect
    pub async fn from_env() -> Result<Self> {
        let config = std::env::var("REDIS_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .map_or_else(CacheConfig::in_memory, CacheConfig::redis);
        Self::new(config).await
    }

    /// In-memory cache for tests
    #[must_use]
    pub fn in_memory() -> Self {
        Self::Memory(MemoryCache::new())
    }
}

#[async_trait::async_trait]
impl CacheProvider for Cache {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        match self {
            Self::Memory(c) => c.incr(key, ttl).await,
            Self::Redis(c) => c.incr(key, ttl).await,
        }
    }

    async fn counter(&self, key: &str, repair_ttl: Duration) -> Result<u64> {
        match self {
            Self::Memory(c) => c.counter(key, repair_ttl).await,
            Self::Redis(c) => c.counter(key, repair_ttl).await,
        }
    }

    async fn set_counter(&self, key: &str, value: u64, fallback_ttl: Duration) -> Result<()> {
        match self {
            Self::Memory(c) => c.set_counter(key, value, fallback_ttl).await,
            Self::Redis(c) => c.set_counter(key, value, fallback_ttl).await,
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        match self {
            Self::Memory(c) => c.ttl(key).await,
            Self::Redis(c) => c.ttl(key).await,
        }
    }

    async fn health_check(&self) -> Result<()> {
        match self {
            Self::Memory(c) => c.health_check().await,
            Self::Redis(c) => c.health_check().await,
        }
    }
}
