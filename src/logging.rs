// ABOUTME: Logging configuration and structured logging setup for observability
// ABOUTME: Configures level and output format for the tracing subscriber, once per process
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::config::environment::LogLevel;
use anyhow::Result;
use std::env;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON format for production logging
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact format for space-constrained environments
    Compact,
}

impl LogFormat {
    /// Read `LOG_FORMAT` with a pretty fallback
    #[must_use]
    pub fn from_env() -> Self {
        match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => Self::Json,
            Ok("compact") => Self::Compact,
            _ => Self::Pretty,
        }
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed
pub fn init(level: &LogLevel, format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let builder = fmt::Subscriber::builder().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to initialize logging: {e}"))
}
