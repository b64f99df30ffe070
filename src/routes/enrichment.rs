// ABOUTME: Enrichment route handlers - one-shot, batch, prioritization, and queue introspection
// ABOUTME: Handlers enqueue and signal the scheduler; only the explicit one-shots run synchronously
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::errors::AppError;
use crate::server::ServerResources;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::user_id_from_headers;

#[derive(Debug, Deserialize)]
pub struct BatchQuery {
    #[serde(default = "default_batch_max")]
    pub max: usize,
}

const fn default_batch_max() -> usize {
    10
}

#[derive(Debug, Deserialize)]
pub struct SyncQuery {
    #[serde(default = "default_days_back")]
    pub days_back: i64,
}

const fn default_days_back() -> i64 {
    30
}

/// Enrichment routes
pub struct EnrichmentRoutes;

impl EnrichmentRoutes {
    /// Create all enrichment routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/sync/strava", post(Self::handle_sync))
            .route("/activities/:id/enrich", post(Self::handle_enrich_one))
            .route("/activities/enrich-batch", post(Self::handle_enrich_batch))
            .route("/activities/:id/prioritize", post(Self::handle_prioritize))
            .route("/activities/auto-enrich/start", post(Self::handle_auto_enrich))
            .route("/enrichment/queue-status", get(Self::handle_queue_status))
            .route("/enrichment/queue-position", get(Self::handle_queue_position))
            .with_state(resources)
    }

    /// Pull recent activities from Strava and queue the new ones
    async fn handle_sync(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<SyncQuery>,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        if !(1..=99_999).contains(&query.days_back) {
            return Err(AppError::invalid_input("days_back must be between 1 and 99999"));
        }

        let report = resources
            .executor
            .sync_activities(user_id, query.days_back)
            .await?;
        if report.queued > 0 {
            resources.scheduler.signal_work();
        }
        Ok((StatusCode::OK, Json(report)).into_response())
    }

    /// Synchronous one-off enrichment of a single activity
    async fn handle_enrich_one(
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

        resources.executor.enrich_activity(activity_id, user_id).await?;
        Ok((StatusCode::OK, Json(json!({ "status": "enriched" }))).into_response())
    }

    /// Bounded synchronous batch enrichment
    async fn handle_enrich_batch(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<BatchQuery>,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let report = resources.executor.batch_enrich(user_id, query.max).await?;
        Ok((StatusCode::OK, Json(report)).into_response())
    }

    /// Queue an activity at top priority and wake the scheduler
    async fn handle_prioritize(
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

        let inserted = resources
            .database
            .enqueue_enrichment(activity_id, user_id, 0)
            .await?;
        if inserted {
            resources.scheduler.signal_work();
        }
        Ok((
            StatusCode::OK,
            Json(json!({ "queued": inserted, "priority": 0 })),
        )
            .into_response())
    }

    /// Queue every unenriched activity of the caller
    async fn handle_auto_enrich(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let added = resources.executor.enqueue_all_unenriched(user_id, 5).await?;
        if added > 0 {
            resources.scheduler.signal_work();
        }
        Ok((StatusCode::OK, Json(json!({ "queued": added }))).into_response())
    }

    /// Aggregate queue counters
    async fn handle_queue_status(
        State(resources): State<Arc<ServerResources>>,
    ) -> Result<Response, AppError> {
        let status = resources.database.queue_status().await?;
        Ok((StatusCode::OK, Json(status)).into_response())
    }

    /// The caller's position in the queue
    async fn handle_queue_position(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let status = resources.database.user_queue_status(user_id).await?;
        Ok((StatusCode::OK, Json(status)).into_response())
    }
}
