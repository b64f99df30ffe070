// ABOUTME: Weather route handlers - batch enrichment, per-activity reads, status
// ABOUTME: Thin delegation to the weather service and its persistence
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::errors::AppError;
use crate::server::ServerResources;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use uuid::Uuid;

use super::user_id_from_headers;

/// Weather routes
pub struct WeatherRoutes;

impl WeatherRoutes {
    /// Create the weather routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/weather/enrich", post(Self::handle_enrich))
            .route("/weather/status", get(Self::handle_status))
            .route("/weather/:activity_id", get(Self::handle_get))
            .with_state(resources)
    }

    /// Fetch weather for every GPS activity of the caller that lacks it
    async fn handle_enrich(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let summary = resources
            .weather
            .enrich_all(Some(user_id))
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(summary)).into_response())
    }

    /// The stored observation for one activity
    async fn handle_get(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(activity_id): Path<Uuid>,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;

        let activity = resources
            .database
            .get_activity(activity_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("activity {activity_id}")))?;
        if activity.user_id != user_id {
            return Err(AppError::not_found(format!("activity {activity_id}")));
        }

        let record = resources
            .database
            .weather_for_activity(activity_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("weather for activity {activity_id}")))?;
        Ok((StatusCode::OK, Json(record)).into_response())
    }

    /// Aggregate weather counters
    async fn handle_status(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let status = resources.database.weather_status().await?;
        Ok((StatusCode::OK, Json(status)).into_response())
    }
}
