// ABOUTME: HTTP route modules - thin validation and delegation, no business logic
// ABOUTME: Caller identity arrives as an X-User-Id header; authentication lives outside this core
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

pub mod enrichment;
pub mod health;
pub mod quota;
pub mod segments;
pub mod training_load;
pub mod weather;

use crate::errors::{AppError, AppResult};
use crate::server::ServerResources;
use axum::http::HeaderMap;
use axum::Router;
use std::sync::Arc;
use uuid::Uuid;

/// Extract the calling user's id from the `X-User-Id` header
///
/// # Errors
///
/// Returns an authentication error when the header is absent or malformed
pub fn user_id_from_headers(headers: &HeaderMap) -> AppResult<Uuid> {
    let raw = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(AppError::auth_required)?;
    Uuid::parse_str(raw).map_err(|_| AppError::auth_invalid("X-User-Id is not a valid UUID"))
}

/// Assemble every route module into the API surface
#[must_use]
pub fn api_router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(health::HealthRoutes::routes())
        .merge(quota::QuotaRoutes::routes(Arc::clone(&resources)))
        .merge(enrichment::EnrichmentRoutes::routes(Arc::clone(&resources)))
        .merge(segments::SegmentRoutes::routes(Arc::clone(&resources)))
        .merge(training_load::TrainingLoadRoutes::routes(Arc::clone(&resources)))
        .merge(weather::WeatherRoutes::routes(Arc::clone(&resources)))
        .merge(crate::webhooks::WebhookRoutes::routes(resources))
}
