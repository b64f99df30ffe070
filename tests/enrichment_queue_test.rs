// ABOUTME: Integration tests for the persistent enrichment queue status machine
// ABOUTME: Covers unique-in-flight, lease/complete/fail transitions, backoff, and the reaper
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

mod common;

use chrono::{Duration, Utc};
use common::{make_activity, seed_user, test_database};
use stride_sync::models::EnrichmentStatus;

#[tokio::test]
async fn enqueue_is_unique_per_live_activity() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    let activity = make_activity(user_id, 1, Utc::now(), None);
    db.insert_activity(&activity).await.unwrap();

    assert!(db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap());
    assert!(!db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap());

    // Still unique while IN_PROGRESS
    let leased = db.lease_for_user(user_id, 5, Utc::now()).await.unwrap();
    assert_eq!(leased.len(), 1);
    assert!(!db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap());

    // A terminal state frees the slot
    db.complete_enrichment(activity.id).await.unwrap();
    assert!(db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap());
}

#[tokio::test]
async fn lease_flips_items_to_in_progress() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    for i in 0..3 {
        let activity = make_activity(user_id, i, Utc::now(), None);
        db.insert_activity(&activity).await.unwrap();
        db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();
    }

    let leased = db.lease_for_user(user_id, 2, Utc::now()).await.unwrap();
    assert_eq!(leased.len(), 2);
    assert_eq!(db.in_progress_enrichment_count().await.unwrap(), 2);
    assert_eq!(db.pending_enrichment_count().await.unwrap(), 1);
}

#[tokio::test]
async fn failure_backs_off_then_fails_terminally() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    let activity = make_activity(user_id, 10, Utc::now(), None);
    db.insert_activity(&activity).await.unwrap();
    db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();

    // Attempt 1: pending with ~30 s backoff
    db.lease_for_user(user_id, 1, Utc::now()).await.unwrap();
    db.fail_enrichment(activity.id, "transient: stubbed 503").await.unwrap();

    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
    assert_eq!(item.attempts, 1);
    assert_eq!(item.last_error.as_deref(), Some("transient: stubbed 503"));
    let retry_in = (item.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((25..=31).contains(&retry_in), "unexpected backoff: {retry_in}s");

    // The backoff hides the item from a lease at `now`
    assert!(db.lease_for_user(user_id, 1, Utc::now()).await.unwrap().is_empty());

    // Attempt 2: doubled backoff
    let future = Utc::now() + Duration::seconds(120);
    assert_eq!(db.lease_for_user(user_id, 1, future).await.unwrap().len(), 1);
    db.fail_enrichment(activity.id, "transient: stubbed 503").await.unwrap();
    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.attempts, 2);
    let retry_in = (item.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((55..=61).contains(&retry_in), "unexpected backoff: {retry_in}s");

    // Attempt 3 reaches max_attempts: FAILED, terminally
    let future = Utc::now() + Duration::seconds(600);
    assert_eq!(db.lease_for_user(user_id, 1, future).await.unwrap().len(), 1);
    db.fail_enrichment(activity.id, "transient: stubbed 503").await.unwrap();
    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Failed);
    assert_eq!(item.attempts, item.max_attempts);
    assert!(item.next_retry_at.is_none());
}

#[tokio::test]
async fn release_keeps_attempts_untouched() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    let activity = make_activity(user_id, 20, Utc::now(), None);
    db.insert_activity(&activity).await.unwrap();
    db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();

    db.lease_for_user(user_id, 1, Utc::now()).await.unwrap();
    db.release_enrichment(activity.id).await.unwrap();

    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
    assert_eq!(item.attempts, 0);
    assert!(item.next_retry_at.is_none());
    assert!(item.last_error.is_none());
}

#[tokio::test]
async fn terminal_failure_skips_remaining_attempts() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    let activity = make_activity(user_id, 30, Utc::now(), None);
    db.insert_activity(&activity).await.unwrap();
    db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();

    db.lease_for_user(user_id, 1, Utc::now()).await.unwrap();
    db.fail_enrichment_terminal(activity.id, "unauthorized: stubbed 401")
        .await
        .unwrap();

    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Failed);
    assert_eq!(item.attempts, item.max_attempts);
}

#[tokio::test]
async fn reaper_reverts_stale_leases() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    let activity = make_activity(user_id, 40, Utc::now(), None);
    db.insert_activity(&activity).await.unwrap();
    db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();

    db.lease_for_user(user_id, 1, Utc::now()).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let reaped = db
        .reap_stale_in_progress(Duration::milliseconds(5))
        .await
        .unwrap();
    assert_eq!(reaped, 1);

    let item = db.queue_item_for_activity(activity.id).await.unwrap().unwrap();
    assert_eq!(item.status, EnrichmentStatus::Pending);
    assert_eq!(item.attempts, 1);
}

#[tokio::test]
async fn queue_and_user_status_report_counts() {
    let (db, _dir) = test_database().await.unwrap();
    let user_a = seed_user(&db, None).await.unwrap();
    let user_b = seed_user(&db, None).await.unwrap();

    for i in 0..2 {
        let activity = make_activity(user_a, 100 + i, Utc::now(), None);
        db.insert_activity(&activity).await.unwrap();
        db.enqueue_enrichment(activity.id, user_a, 0).await.unwrap();
    }
    let activity_b = make_activity(user_b, 200, Utc::now(), None);
    db.insert_activity(&activity_b).await.unwrap();
    db.enqueue_enrichment(activity_b.id, user_b, 0).await.unwrap();

    let status = db.queue_status().await.unwrap();
    assert_eq!(status.queue_size, 3);
    assert_eq!(status.processing_count, 0);
    assert_eq!(status.users_in_queue, 2);

    let user_status = db.user_queue_status(user_a).await.unwrap();
    assert_eq!(user_status.user_pending, 2);
    assert_eq!(user_status.ahead_in_queue, 1);
    assert_eq!(user_status.estimated_position, 2);
}

#[tokio::test]
async fn deleting_activity_cascades_queue_items() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    let activity = make_activity(user_id, 50, Utc::now(), None);
    db.insert_activity(&activity).await.unwrap();
    db.enqueue_enrichment(activity.id, user_id, 0).await.unwrap();

    assert!(db.delete_activity_by_strava_id(50).await.unwrap());
    assert!(db.queue_item_for_activity(activity.id).await.unwrap().is_none());
}
