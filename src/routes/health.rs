// ABOUTME: Health check route for service monitoring and load balancers
// ABOUTME: Stateless liveness endpoint; no database or cache round-trips
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

/// Health routes
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create the health check route
    #[must_use]
    pub fn routes() -> Router {
        Router::new().route("/health", get(Self::handle_health))
    }

    async fn handle_health() -> Response {
        (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339(),
            })),
        )
            .into_response()
    }
}
