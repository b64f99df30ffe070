// ABOUTME: End-to-end scenarios for the enrichment protocol under quota pressure
// ABOUTME: Quota blocking mid-batch, a 429 stopping the fleet, 404 tolerance, and payload merging
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

mod common;

use chrono::Utc;
use common::{
    make_activity, seed_connection, seed_user, test_config, test_database, token_manager,
    StubBehavior, StubTransport,
};
use std::sync::Arc;
use stride_sync::cache::factory::Cache;
use stride_sync::database::Database;
use stride_sync::enrichment::EnrichmentExecutor;
use stride_sync::models::EnrichmentStatus;
use stride_sync::providers::StravaClient;
use stride_sync::quota::QuotaManager;
use stride_sync::scheduler::EnrichmentScheduler;
use stride_sync::weather::WeatherService;
use uuid::Uuid;

struct Harness {
    db: Database,
    _dir: tempfile::TempDir,
    transport: Arc<StubTransport>,
    quota: Arc<QuotaManager>,
    executor: Arc<EnrichmentExecutor>,
    scheduler: EnrichmentScheduler,
}

/// Wire a scheduler with one serial worker over a stub transport
async fn harness(transport: StubTransport, daily_limit: u64) -> Harness {
    let (db, dir) = test_database().await.unwrap();
    let transport = Arc::new(transport);
    let quota = Arc::new(QuotaManager::with_limits(
        Cache::in_memory(),
        daily_limit,
        100,
    ));
    let tokens = token_manager(&db);
    let client = Arc::new(StravaClient::new(
        Arc::clone(&transport) as Arc<dyn stride_sync::providers::transport::StravaTransport>,
        Arc::clone(&quota),
        tokens,
    ));
    let weather = Arc::new(WeatherService::new(db.clone()));
    let executor = Arc::new(EnrichmentExecutor::new(
        db.clone(),
        client,
        Arc::clone(&quota),
        weather,
    ));
    let scheduler = EnrichmentScheduler::new(
        db.clone(),
        Arc::clone(&executor),
        Arc::clone(&quota),
        test_config().scheduler,
    );

    Harness {
        db,
        _dir: dir,
        transport,
        quota,
        executor,
        scheduler,
    }
}

async fn seed_queued_activities(db: &Database, user_id: Uuid, count: usize) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for i in 0..count {
        let activity = make_activity(user_id, 9000 + i as i64, Utc::now(), None);
        db.insert_activity(&activity).await.unwrap();
        db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();
        ids.push(activity.id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    ids
}

#[tokio::test]
async fn quota_blocks_a_batch_mid_way() {
    // Three activities' worth of calls (4 upstream calls each), then the
    // daily window is spent.
    let mut h = harness(StubTransport::default(), 12).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 1).await.unwrap();
    let ids = seed_queued_activities(&h.db, user_id, 5).await;

    let dispatched = h.scheduler.run_cycle().await.unwrap();
    assert_eq!(dispatched, 5);

    let mut completed = 0;
    let mut pending = 0;
    for id in &ids {
        let item = h.db.queue_item_for_activity(*id).await.unwrap().unwrap();
        match item.status {
            EnrichmentStatus::Completed => completed += 1,
            EnrichmentStatus::Pending => {
                // Blocked by quota: no attempt consumed, no error recorded
                assert_eq!(item.attempts, 0);
                assert!(item.last_error.is_none());
                pending += 1;
            }
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(completed, 3);
    assert_eq!(pending, 2);

    let status = h.quota.status().await;
    assert_eq!(status.daily_used, status.daily_limit);
    assert!(!h.quota.may_proceed().await);
}

#[tokio::test]
async fn a_429_stops_the_fleet_for_the_day() {
    let transport = StubTransport::default().with_streams(StubBehavior::RateLimited);
    let mut h = harness(transport, 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 2).await.unwrap();

    // 10 calls already used today
    for _ in 0..10 {
        h.quota.record_use().await;
    }

    let ids = seed_queued_activities(&h.db, user_id, 1).await;
    h.scheduler.run_cycle().await.unwrap();

    // The 429 was not counted as a use: the counter was pinned to the limit
    let status = h.quota.status().await;
    assert_eq!(status.daily_used, 1000);
    assert!(!h.quota.may_proceed().await);

    let item = h.db.queue_item_for_activity(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
    assert_eq!(item.attempts, 1);
    assert!(item.last_error.unwrap().contains("429"));
    let retry_in = (item.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((25..=31).contains(&retry_in));

    // Only the streams call went out before the abort
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn successful_enrichment_merges_the_payload() {
    let mut h = harness(StubTransport::default(), 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 3).await.unwrap();
    let ids = seed_queued_activities(&h.db, user_id, 1).await;

    h.scheduler.run_cycle().await.unwrap();

    let item = h.db.queue_item_for_activity(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Completed);

    let activity = h.db.get_activity(ids[0]).await.unwrap().unwrap();
    let streams = activity.streams_object().unwrap();
    assert!(streams.contains_key("time"));
    assert!(streams.contains_key("segment_efforts"));
    assert!(activity.laps.is_some());
    assert_eq!(activity.polyline.as_deref(), Some("full-polyline"));
    assert_eq!(activity.summary_polyline.as_deref(), Some("short-polyline"));

    // Streams/laps/efforts/detail: four quota'd calls
    assert_eq!(h.quota.status().await.daily_used, 4);

    // Segmentation ran opportunistically on the stored streams
    let segments = h.db.segments_for_activity(ids[0]).await.unwrap();
    assert!(!segments.is_empty());
    let indices: Vec<i64> = segments.iter().map(|s| s.segment_index).collect();
    let expected: Vec<i64> = (0..segments.len() as i64).collect();
    assert_eq!(indices, expected);
}

#[tokio::test]
async fn upstream_404s_complete_without_fabricating_data() {
    let mut h = harness(StubTransport::with_all(StubBehavior::NotFound), 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 4).await.unwrap();
    let ids = seed_queued_activities(&h.db, user_id, 1).await;

    h.scheduler.run_cycle().await.unwrap();

    let item = h.db.queue_item_for_activity(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Completed);

    let activity = h.db.get_activity(ids[0]).await.unwrap().unwrap();
    assert!(activity.streams.is_none());
    assert!(activity.laps.is_none());

    // Answered requests still count against the quota
    assert_eq!(h.quota.status().await.daily_used, 4);
}

#[tokio::test]
async fn transient_failures_retry_with_backoff() {
    let transport = StubTransport::default().with_streams(StubBehavior::Transient);
    let mut h = harness(transport, 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 5).await.unwrap();
    let ids = seed_queued_activities(&h.db, user_id, 1).await;

    h.scheduler.run_cycle().await.unwrap();

    let item = h.db.queue_item_for_activity(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
    assert_eq!(item.attempts, 1);
    assert!(item.last_error.unwrap().starts_with("transient"));
}

#[tokio::test]
async fn dead_token_fails_the_item_terminally() {
    let transport = StubTransport::default().with_streams(StubBehavior::Unauthorized);
    let mut h = harness(transport, 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 6).await.unwrap();
    let ids = seed_queued_activities(&h.db, user_id, 1).await;

    h.scheduler.run_cycle().await.unwrap();

    let item = h.db.queue_item_for_activity(ids[0]).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Failed);
    assert_eq!(item.attempts, item.max_attempts);
    assert!(item.last_error.unwrap().starts_with("unauthorized"));
}

#[tokio::test]
async fn sync_creates_and_queues_only_new_activities() {
    let page = vec![
        serde_json::json!({
            "id": 501,
            "name": "Sunday Long Run",
            "sport_type": "Run",
            "start_date": "2025-05-04T08:00:00Z",
            "distance": 21000.0,
            "moving_time": 7000,
            "elapsed_time": 7200
        }),
        serde_json::json!({
            "id": 502,
            "name": "Recovery Spin",
            "sport_type": "Ride",
            "start_date": "2025-05-05T18:00:00Z",
            "distance": 15000.0,
            "moving_time": 2400,
            "elapsed_time": 2500
        }),
    ];
    let h = harness(StubTransport::default().with_athlete_page(page), 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 8).await.unwrap();

    let report = h.executor.sync_activities(user_id, 30).await.unwrap();
    assert_eq!(report.fetched, 2);
    assert_eq!(report.created, 2);
    assert_eq!(report.queued, 2);

    assert!(h.db.get_activity_by_strava_id(501).await.unwrap().is_some());
    assert!(h.db.get_activity_by_strava_id(502).await.unwrap().is_some());
    assert_eq!(h.db.queue_status().await.unwrap().queue_size, 2);

    // Second sync finds nothing new
    let second = h.executor.sync_activities(user_id, 30).await.unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(h.db.queue_status().await.unwrap().queue_size, 2);
}

#[tokio::test]
async fn missing_upstream_id_is_skipped_not_retried() {
    let mut h = harness(StubTransport::default(), 1000).await;
    let user_id = seed_user(&h.db, None).await.unwrap();
    seed_connection(&h.db, user_id, 7).await.unwrap();

    let mut activity = make_activity(user_id, 0, Utc::now(), None);
    activity.strava_id = None;
    h.db.insert_activity(&activity).await.unwrap();
    h.db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();

    h.scheduler.run_cycle().await.unwrap();

    // Validation problems consume the item without burning attempts on retries
    let item = h.db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Completed);
    assert_eq!(item.attempts, 0);
    assert_eq!(h.transport.call_count(), 0);
}
