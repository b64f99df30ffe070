// ABOUTME: Shared-cache abstraction for cross-process quota counters with TTLs
// ABOUTME: Pluggable backend support (in-memory, Redis) selected by the factory
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

pub mod factory;
pub mod memory;
pub mod redis;

use anyhow::Result;
use std::time::Duration;

/// Cache provider trait for pluggable counter backends.
///
/// The quota manager is the primary tenant: counters are unsigned integers
/// with a TTL that must never be lost. Every operation that observes a key
/// without a TTL repairs it, so an orphaned counter cannot outlive its
/// window.
#[async_trait::async_trait]
pub trait CacheProvider: Send + Sync + Clone {
    /// Atomically increment a counter, creating it with `ttl` when absent.
    ///
    /// A key found without a TTL gets `ttl` re-applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Read a counter; missing keys read as 0.
    ///
    /// A key found without a TTL gets `repair_ttl` applied.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable
    async fn counter(&self, key: &str, repair_ttl: Duration) -> Result<u64>;

    /// Overwrite a counter, preserving the remaining TTL when one exists and
    /// applying `fallback_ttl` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable
    async fn set_counter(&self, key: &str, value: u64, fallback_ttl: Duration) -> Result<()>;

    /// Remaining TTL for a key, `None` when absent or persistent
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Verify the backend is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the backend is unreachable
    async fn health_check(&self) -> Result<()>;
}

/// Cache configuration
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// Redis connection URL; in-memory backend when absent
    pub redis_url: Option<String>,
    /// Connection timeout for the Redis backend, seconds
    pub connection_timeout_secs: u64,
    /// Per-command response timeout for the Redis backend, seconds
    pub response_timeout_secs: u64,
}

impl CacheConfig {
    /// In-memory configuration for tests and single-node deployments
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Redis-backed configuration
    #[must_use]
    pub fn redis(url: impl Into<String>) -> Self {
        Self {
            redis_url: Some(url.into()),
            connection_timeout_secs: 5,
            response_timeout_secs: 2,
        }
    }
}
