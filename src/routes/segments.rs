// ABOUTME: Segment route handlers - batch and per-activity segmentation, reads, status
// ABOUTME: Delegates to the segmentation engine; feature computation has its own endpoints here too
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::errors::AppError;
use crate::intelligence::features;
use crate::segmentation;
use crate::server::ServerResources;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::user_id_from_headers;

/// Segment routes
pub struct SegmentRoutes;

impl SegmentRoutes {
    /// Create all segment and feature routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/segments/process", post(Self::handle_process_all))
            .route("/segments/process/:activity_id", post(Self::handle_process_one))
            .route("/segments/:activity_id", get(Self::handle_get_segments))
            .route("/segments/status", get(Self::handle_status))
            .route("/features/compute", post(Self::handle_features_all))
            .route("/features/compute/:activity_id", post(Self::handle_features_one))
            .with_state(resources)
    }

    /// Segment every enriched activity of the caller
    async fn handle_process_all(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let summary = segmentation::segment_all_enriched(&resources.database, Some(user_id))
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(summary)).into_response())
    }

    /// Segment one activity (re-segmentation replaces prior rows)
    async fn handle_process_one(
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

        let count = segmentation::segment_activity(&resources.database, &activity)
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(json!({ "segments_created": count }))).into_response())
    }

    /// Segments of one activity with their features
    async fn handle_get_segments(
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

        let segments = resources.database.segments_for_activity(activity_id).await?;
        let segment_features = resources.database.features_for_activity(activity_id).await?;
        Ok((
            StatusCode::OK,
            Json(json!({ "segments": segments, "features": segment_features })),
        )
            .into_response())
    }

    /// Aggregate segmentation counters
    async fn handle_status(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let status = resources.database.segmentation_status().await?;
        Ok((StatusCode::OK, Json(status)).into_response())
    }

    /// Derived-features pass over every segmented activity of the caller
    async fn handle_features_all(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let summary = features::compute_all_features(&resources.database, Some(user_id))
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(summary)).into_response())
    }

    /// Derived-features pass over one activity
    async fn handle_features_one(
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

        let count = features::compute_activity_features(&resources.database, activity_id)
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(json!({ "segments_updated": count }))).into_response())
    }
}
