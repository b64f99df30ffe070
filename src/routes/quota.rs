// ABOUTME: Quota route handler - reports both rolling windows from the quota manager
// ABOUTME: Read-only surface for UI and operations dashboards
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::errors::AppError;
use crate::server::ServerResources;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;

/// Quota routes
pub struct QuotaRoutes;

impl QuotaRoutes {
    /// Create the quota status route
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/strava/quota", get(Self::handle_status))
            .with_state(resources)
    }

    /// Current usage of both quota windows
    async fn handle_status(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let status = resources.quota.status().await;
        Ok((StatusCode::OK, Json(status)).into_response())
    }
}
