// ABOUTME: Strava webhook endpoints - challenge handshake and asynchronous event dispatch
// ABOUTME: Events answer 200 immediately; processing errors never reach the HTTP response
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::providers::strava::summary_to_activity;
use crate::server::ServerResources;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Challenge handshake parameters sent by Strava on subscription
#[derive(Debug, Deserialize)]
pub struct ChallengeQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
}

/// Push notification payload; all fields are required by the schema
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub object_type: String,
    pub object_id: i64,
    pub aspect_type: String,
    pub owner_id: i64,
    pub subscription_id: i64,
}

/// Webhook routes
pub struct WebhookRoutes;

impl WebhookRoutes {
    /// Create the webhook endpoints
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(
                "/webhooks/strava",
                get(Self::handle_challenge).post(Self::handle_event),
            )
            .with_state(resources)
    }

    /// Subscription challenge: echo the challenge when the verify token
    /// matches, 403 otherwise.
    async fn handle_challenge(
        State(resources): State<Arc<ServerResources>>,
        Query(query): Query<ChallengeQuery>,
    ) -> Response {
        let expected = &resources.config.webhook.verify_token;
        let supplied = query.verify_token.as_deref().unwrap_or_default();

        if !expected.is_empty() && supplied == expected {
            info!("webhook challenge verified (mode={:?})", query.mode);
            let challenge = query.challenge.unwrap_or_default();
            (StatusCode::OK, Json(json!({ "hub.challenge": challenge }))).into_response()
        } else {
            warn!("webhook challenge rejected: verify token mismatch");
            (StatusCode::FORBIDDEN, Json(json!({ "error": "verify token mismatch" })))
                .into_response()
        }
    }

    /// Event ingestion: validate, answer 200, process in the background
    async fn handle_event(
        State(resources): State<Arc<ServerResources>>,
        Json(event): Json<WebhookEvent>,
    ) -> Response {
        if let Some(expected) = resources.config.webhook.expected_subscription_id {
            if event.subscription_id != expected {
                warn!(
                    "webhook event dropped: subscription id {} does not match configured {expected}",
                    event.subscription_id
                );
                return (StatusCode::OK, Json(json!({ "status": "ignored" }))).into_response();
            }
        }

        tokio::spawn(async move {
            process_event(&resources, &event).await;
        });

        (StatusCode::OK, Json(json!({ "status": "accepted" }))).into_response()
    }
}

/// Dispatch one event to its handler. Never returns an error: every failure
/// is logged and dropped so later events keep flowing.
pub async fn process_event(resources: &ServerResources, event: &WebhookEvent) {
    if event.object_type != "activity" {
        info!("webhook: ignoring object_type={}", event.object_type);
        return;
    }

    match event.aspect_type.as_str() {
        "create" => handle_activity_create(resources, event.owner_id, event.object_id).await,
        "update" => handle_activity_update(resources, event.owner_id, event.object_id).await,
        "delete" => handle_activity_delete(resources, event.object_id).await,
        other => warn!("webhook: unknown aspect_type={other} for activity"),
    }
}

/// `create`: fetch the summary, persist it, and queue enrichment at top
/// priority.
async fn handle_activity_create(resources: &ServerResources, owner_id: i64, strava_id: i64) {
    let user_id = match resources.tokens.user_for_athlete(owner_id).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            warn!("webhook create: owner_id={owner_id} has no local user");
            return;
        }
        Err(e) => {
            error!("webhook create: owner lookup failed for {owner_id}: {e}");
            return;
        }
    };

    match resources.database.get_activity_by_strava_id(strava_id).await {
        Ok(Some(_)) => {
            info!("webhook create: activity strava_id={strava_id} already stored");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            error!("webhook create: lookup failed for strava_id={strava_id}: {e}");
            return;
        }
    }

    let summary = match resources.strava.activity_summary(user_id, strava_id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            warn!("webhook create: activity {strava_id} not found upstream");
            return;
        }
        Err(e) => {
            error!("webhook create: summary fetch failed for {strava_id}: {e}");
            return;
        }
    };

    let activity = match summary_to_activity(user_id, &summary) {
        Ok(activity) => activity,
        Err(e) => {
            error!("webhook create: summary for {strava_id} unusable: {e}");
            return;
        }
    };

    if let Err(e) = resources.database.insert_activity(&activity).await {
        error!("webhook create: insert failed for strava_id={strava_id}: {e}");
        return;
    }
    info!("webhook create: activity strava_id={strava_id} stored (id={})", activity.id);

    match resources
        .database
        .enqueue_enrichment(activity.id, user_id, 0)
        .await
    {
        Ok(true) => {
            resources.scheduler.signal_work();
            info!("webhook create: activity {} queued for enrichment", activity.id);
        }
        Ok(false) => {}
        Err(e) => error!("webhook create: enqueue failed for activity {}: {e}", activity.id),
    }
}

/// `update`: re-fetch the summary and merge non-null fields; falls back to
/// `create` when the activity is unknown locally.
async fn handle_activity_update(resources: &ServerResources, owner_id: i64, strava_id: i64) {
    let user_id = match resources.tokens.user_for_athlete(owner_id).await {
        Ok(Some(user_id)) => user_id,
        Ok(None) => {
            warn!("webhook update: owner_id={owner_id} has no local user");
            return;
        }
        Err(e) => {
            error!("webhook update: owner lookup failed for {owner_id}: {e}");
            return;
        }
    };

    let existing = match resources.database.get_activity_by_strava_id(strava_id).await {
        Ok(Some(activity)) => activity,
        Ok(None) => {
            info!("webhook update: strava_id={strava_id} unknown locally, treating as create");
            handle_activity_create(resources, owner_id, strava_id).await;
            return;
        }
        Err(e) => {
            error!("webhook update: lookup failed for strava_id={strava_id}: {e}");
            return;
        }
    };

    let summary = match resources.strava.activity_summary(user_id, strava_id).await {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            warn!("webhook update: activity {strava_id} not found upstream");
            return;
        }
        Err(e) => {
            error!("webhook update: summary fetch failed for {strava_id}: {e}");
            return;
        }
    };

    let update = match summary_to_activity(user_id, &summary) {
        Ok(update) => update,
        Err(e) => {
            error!("webhook update: summary for {strava_id} unusable: {e}");
            return;
        }
    };

    if let Err(e) = resources
        .database
        .merge_activity_summary(existing.id, &update)
        .await
    {
        error!("webhook update: merge failed for strava_id={strava_id}: {e}");
        return;
    }
    info!("webhook update: activity strava_id={strava_id} updated");
}

/// `delete`: remove the activity; cascades clean up everything attached.
async fn handle_activity_delete(resources: &ServerResources, strava_id: i64) {
    match resources.database.delete_activity_by_strava_id(strava_id).await {
        Ok(true) => info!("webhook delete: activity strava_id={strava_id} removed"),
        Ok(false) => info!("webhook delete: strava_id={strava_id} already gone"),
        Err(e) => error!("webhook delete: removal failed for strava_id={strava_id}: {e}"),
    }
}
