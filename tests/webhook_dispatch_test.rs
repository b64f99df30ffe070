// ABOUTME: Integration tests for webhook event dispatch - create, update, delete flows
// ABOUTME: Drives the dispatcher directly with stubbed upstream responses
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

mod common;

use common::{
    seed_connection, seed_user, test_config, test_database, token_manager, StubBehavior,
    StubTransport,
};
use std::sync::Arc;
use stride_sync::cache::factory::Cache;
use stride_sync::database::Database;
use stride_sync::enrichment::EnrichmentExecutor;
use stride_sync::models::EnrichmentStatus;
use stride_sync::providers::StravaClient;
use stride_sync::quota::QuotaManager;
use stride_sync::scheduler::EnrichmentScheduler;
use stride_sync::server::ServerResources;
use stride_sync::weather::WeatherService;
use stride_sync::webhooks::{process_event, WebhookEvent};
use tempfile::TempDir;

async fn resources_with(transport: StubTransport) -> (Arc<ServerResources>, Database, TempDir) {
    let (db, dir) = test_database().await.unwrap();
    let transport = Arc::new(transport);
    let quota = Arc::new(QuotaManager::with_limits(Cache::in_memory(), 1000, 100));
    let tokens = token_manager(&db);
    let strava = Arc::new(StravaClient::new(
        transport as Arc<dyn stride_sync::providers::transport::StravaTransport>,
        Arc::clone(&quota),
        Arc::clone(&tokens),
    ));
    let weather = Arc::new(WeatherService::new(db.clone()));
    let executor = Arc::new(EnrichmentExecutor::new(
        db.clone(),
        Arc::clone(&strava),
        Arc::clone(&quota),
        Arc::clone(&weather),
    ));
    let config = test_config();
    let scheduler = EnrichmentScheduler::new(
        db.clone(),
        Arc::clone(&executor),
        Arc::clone(&quota),
        config.scheduler.clone(),
    );

    let resources = Arc::new(ServerResources {
        database: db.clone(),
        quota,
        tokens,
        strava,
        executor,
        weather,
        scheduler: scheduler.handle(),
        config: Arc::new(config),
    });
    (resources, db, dir)
}

fn event(aspect: &str, object_id: i64, owner_id: i64) -> WebhookEvent {
    WebhookEvent {
        object_type: "activity".into(),
        object_id,
        aspect_type: aspect.into(),
        owner_id,
        subscription_id: 777,
    }
}

#[tokio::test]
async fn create_event_stores_activity_and_queues_enrichment() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 71).await.unwrap();

    process_event(&resources, &event("create", 42, 71)).await;

    let activity = db.get_activity_by_strava_id(42).await.unwrap().unwrap();
    assert_eq!(activity.user_id, user_id);
    assert_eq!(activity.name, "Stubbed Activity");

    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
    assert_eq!(item.priority, 0);
}

#[tokio::test]
async fn duplicate_create_is_dropped() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 72).await.unwrap();

    process_event(&resources, &event("create", 43, 72)).await;
    process_event(&resources, &event("create", 43, 72)).await;

    let activity = db.get_activity_by_strava_id(43).await.unwrap().unwrap();
    let status = db.user_queue_status(user_id).await.unwrap();
    assert_eq!(status.user_pending, 1);
    assert!(db.queue_item_for_activity(activity.id).await.unwrap().is_some());
}

#[tokio::test]
async fn update_event_merges_without_requeuing() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 73).await.unwrap();

    process_event(&resources, &event("create", 44, 73)).await;

    // Same upstream activity, renamed on the Strava side
    let transport = Arc::new(StubTransport::default().named("Renamed Activity"));
    let strava = Arc::new(StravaClient::new(
        transport as Arc<dyn stride_sync::providers::transport::StravaTransport>,
        Arc::clone(&resources.quota),
        Arc::clone(&resources.tokens),
    ));
    let renamed_resources = Arc::new(ServerResources {
        database: db.clone(),
        quota: Arc::clone(&resources.quota),
        tokens: Arc::clone(&resources.tokens),
        strava,
        executor: Arc::clone(&resources.executor),
        weather: Arc::clone(&resources.weather),
        scheduler: Arc::clone(&resources.scheduler),
        config: Arc::clone(&resources.config),
    });

    process_event(&renamed_resources, &event("update", 44, 73)).await;

    let activity = db.get_activity_by_strava_id(44).await.unwrap().unwrap();
    assert_eq!(activity.name, "Renamed Activity");

    let status = db.user_queue_status(user_id).await.unwrap();
    assert_eq!(status.user_pending, 1);
}

#[tokio::test]
async fn update_for_unknown_activity_behaves_like_create() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 74).await.unwrap();

    process_event(&resources, &event("update", 45, 74)).await;

    let activity = db.get_activity_by_strava_id(45).await.unwrap().unwrap();
    assert!(db.queue_item_for_activity(activity.id).await.unwrap().is_some());
}

#[tokio::test]
async fn delete_then_create_round_trips() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 75).await.unwrap();

    process_event(&resources, &event("create", 46, 75)).await;
    let first = db.get_activity_by_strava_id(46).await.unwrap().unwrap();

    process_event(&resources, &event("delete", 46, 75)).await;
    assert!(db.get_activity_by_strava_id(46).await.unwrap().is_none());
    assert!(db.queue_item_for_activity(first.id).await.unwrap().is_none());

    process_event(&resources, &event("create", 46, 75)).await;
    let second = db.get_activity_by_strava_id(46).await.unwrap().unwrap();
    assert_ne!(first.id, second.id);
    let item = db.queue_item_for_activity(second.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
}

#[tokio::test]
async fn unknown_owner_is_logged_and_dropped() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;

    process_event(&resources, &event("create", 47, 9999)).await;
    assert!(db.get_activity_by_strava_id(47).await.unwrap().is_none());
}

#[tokio::test]
async fn non_activity_objects_are_ignored() {
    let (resources, db, _dir) = resources_with(StubTransport::default()).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 76).await.unwrap();

    let mut athlete_event = event("create", 48, 76);
    athlete_event.object_type = "athlete".into();
    process_event(&resources, &athlete_event).await;

    assert!(db.get_activity_by_strava_id(48).await.unwrap().is_none());
}

#[tokio::test]
async fn upstream_404_on_create_is_dropped() {
    let (resources, db, _dir) = resources_with(StubTransport::with_all(StubBehavior::NotFound)).await;
    let user_id = seed_user(&db, None).await.unwrap();
    seed_connection(&db, user_id, 77).await.unwrap();

    process_event(&resources, &event("create", 49, 77)).await;
    assert!(db.get_activity_by_strava_id(49).await.unwrap().is_none());
}
