// ABOUTME: Library root for the Stride Sync fitness enrichment server
// ABOUTME: Exposes every subsystem as a public module for the binary and the integration tests
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

//! # Stride Sync
//!
//! Fitness activity ingestion and enrichment server. Activities sync from
//! Strava, a persistent queue coordinates quota-aware enrichment across
//! users, and derived analytics (segments, training load, weather) build on
//! the enriched streams.

/// Shared-cache abstraction hosting the cross-process quota counters
pub mod cache;
/// Environment-driven server configuration
pub mod config;
/// System-wide constants grouped by subsystem
pub mod constants;
/// Credential collaborator: token refresh with per-user single-flight
pub mod credentials;
/// SQLite persistence layer
pub mod database;
/// Per-activity enrichment protocol
pub mod enrichment;
/// HTTP-facing error types
pub mod errors;
/// Derived analytics: training load and advanced segment features
pub mod intelligence;
/// Tracing subscriber setup
pub mod logging;
/// Core domain models
pub mod models;
/// Upstream provider client and transport
pub mod providers;
/// Strava API quota manager
pub mod quota;
/// HTTP route modules
pub mod routes;
/// Round-robin scheduler and worker pool
pub mod scheduler;
/// Streams-to-segments engine
pub mod segmentation;
/// Server resources and app assembly
pub mod server;
/// Open-Meteo weather enrichment
pub mod weather;
/// Strava webhook endpoints and dispatcher
pub mod webhooks;
