// ABOUTME: Training-load route handlers - range reads and window recomputation
// ABOUTME: Date windows default to the last 90 days when the query omits them
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::errors::AppError;
use crate::intelligence::training_load;
use crate::server::ServerResources;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use std::sync::Arc;

use super::user_id_from_headers;

const DEFAULT_WINDOW_DAYS: i64 = 90;

#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl WindowQuery {
    fn resolve(&self) -> (NaiveDate, NaiveDate) {
        let to = self.to.unwrap_or_else(|| Utc::now().date_naive());
        let from = self
            .from
            .unwrap_or_else(|| to - chrono::Duration::days(DEFAULT_WINDOW_DAYS));
        (from, to)
    }
}

/// Training-load routes
pub struct TrainingLoadRoutes;

impl TrainingLoadRoutes {
    /// Create the training-load routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route("/training-load", get(Self::handle_get))
            .route("/training-load/compute", post(Self::handle_compute))
            .with_state(resources)
    }

    /// Stored training-load days for the requested window
    async fn handle_get(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<WindowQuery>,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let (from, to) = query.resolve();
        if from > to {
            return Err(AppError::invalid_input("from must not be after to"));
        }

        let days = resources.database.training_load_days(user_id, from, to).await?;
        Ok((StatusCode::OK, Json(days)).into_response())
    }

    /// Recompute the window from scratch and return the fresh rows
    async fn handle_compute(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<WindowQuery>,
    ) -> Result<Response, AppError> {
        let user_id = user_id_from_headers(&headers)?;
        let (from, to) = query.resolve();
        if from > to {
            return Err(AppError::invalid_input("from must not be after to"));
        }

        let days = training_load::compute_training_load(&resources.database, user_id, from, to)
            .await
            .map_err(AppError::from)?;
        Ok((StatusCode::OK, Json(days)).into_response())
    }
}
