// ABOUTME: Classified error taxonomy for upstream provider operations
// ABOUTME: Every enrichment failure is routed through exactly one of these variants
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use thiserror::Error;

/// Errors raised by the upstream client and consumed by the worker pool.
///
/// The variant decides the queue transition: `QuotaExhausted` releases the
/// item back to PENDING untouched, `Unauthorized` fails it terminally,
/// `Validation` is a silent skip, and everything else retries with backoff.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The internal daily call budget is spent; no request was issued.
    #[error("daily upstream quota exhausted")]
    QuotaExhausted,

    /// The provider answered HTTP 429; the fleet stops until next UTC midnight.
    #[error("upstream rate limit hit (HTTP 429)")]
    RateLimited,

    /// Timeout, connection failure, or 5xx. Retryable.
    #[error("transient upstream error: {0}")]
    Transient(String),

    /// The access token could not be used or refreshed.
    #[error("upstream authorization failed: {0}")]
    Unauthorized(String),

    /// Malformed input data (streams, GPS, payloads). Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A database write failed mid-protocol; the transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(String),
}

impl ProviderError {
    /// Short message persisted on the queue item for UI visibility
    #[must_use]
    pub fn short_message(&self) -> String {
        match self {
            Self::QuotaExhausted => "quota exhausted".into(),
            Self::RateLimited => "rate limited (429)".into(),
            Self::Transient(m) => format!("transient: {m}"),
            Self::Unauthorized(m) => format!("unauthorized: {m}"),
            Self::Validation(m) => format!("invalid data: {m}"),
            Self::Storage(m) => format!("storage: {m}"),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() || error.is_connect() {
            Self::Transient(format!("network error: {error}"))
        } else {
            Self::Transient(error.to_string())
        }
    }
}

impl From<sqlx::Error> for ProviderError {
    fn from(error: sqlx::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(error: serde_json::Error) -> Self {
        Self::Validation(format!("JSON decode error: {error}"))
    }
}

/// Result type alias for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;
