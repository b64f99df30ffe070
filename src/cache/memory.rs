// ABOUTME: In-memory counter cache for tests and single-node deployments
// ABOUTME: Mirrors the Redis backend semantics including TTL expiry and repair
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use super::CacheProvider;
use anyhow::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CounterEntry {
    value: u64,
    /// `None` models a key that lost its TTL (the orphan case)
    expires_at: Option<Instant>,
}

/// In-memory cache implementation with the same counter semantics as Redis
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<Mutex<HashMap<String, CounterEntry>>>,
}

impl MemoryCache {
    /// Create an empty in-memory cache
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Strip a key whose TTL has elapsed
    fn evict_if_expired(entries: &mut HashMap<String, CounterEntry>, key: &str) {
        let expired = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|deadline| deadline <= Instant::now());
        if expired {
            entries.remove(key);
        }
    }

    /// Drop a key's TTL, leaving the value in place. Test hook for the
    /// orphan-repair path.
    pub async fn strip_ttl(&self, key: &str) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = None;
        }
    }
}

#[async_trait::async_trait]
impl CacheProvider for MemoryCache {
    async fn incr(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key);

        let entry = entries.entry(key.to_owned()).or_insert(CounterEntry {
            value: 0,
            expires_at: None,
        });
        entry.value += 1;
        if entry.value == 1 || entry.expires_at.is_none() {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(entry.value)
    }

    async fn counter(&self, key: &str, repair_ttl: Duration) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key);

        match entries.get_mut(key) {
            Some(entry) => {
                if entry.expires_at.is_none() {
                    tracing::warn!("counter {key} found without TTL, repairing");
                    entry.expires_at = Some(Instant::now() + repair_ttl);
                }
                Ok(entry.value)
            }
            None => Ok(0),
        }
    }

    async fn set_counter(&self, key: &str, value: u64, fallback_ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key);

        let expires_at = entries
            .get(key)
            .and_then(|e| e.expires_at)
            .unwrap_or_else(|| Instant::now() + fallback_ttl);
        entries.insert(key.to_owned(), CounterEntry { value, expires_at: Some(expires_at) });
        Ok(())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let mut entries = self.entries.lock().await;
        Self::evict_if_expired(&mut entries, key);

        Ok(entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|deadline| deadline.saturating_duration_since(Instant::now())))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
