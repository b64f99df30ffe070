// ABOUTME: Integration tests for the credential collaborator - expiry margin and single-flight
// ABOUTME: Concurrent refreshes for one user must collapse into a single upstream exchange
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

mod common;

use chrono::{Duration, Utc};
use common::{seed_user, test_database, CountingRefresher, PanicRefresher};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use stride_sync::credentials::TokenManager;
use stride_sync::models::StravaConnection;
use stride_sync::providers::errors::ProviderError;

#[tokio::test]
async fn fresh_token_is_returned_without_refresh() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    db.upsert_strava_connection(&StravaConnection {
        user_id,
        athlete_id: 11,
        access_token: "still-good".into(),
        refresh_token: "refresh".into(),
        expires_at: Utc::now() + Duration::hours(2),
        scope: None,
    })
    .await
    .unwrap();

    let manager = TokenManager::new(db, Arc::new(PanicRefresher));
    assert_eq!(manager.access_token(user_id).await.unwrap(), "still-good");
}

#[tokio::test]
async fn token_inside_margin_is_refreshed_and_rotated() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    db.upsert_strava_connection(&StravaConnection {
        user_id,
        athlete_id: 12,
        access_token: "nearly-dead".into(),
        refresh_token: "refresh".into(),
        expires_at: Utc::now() + Duration::seconds(120),
        scope: None,
    })
    .await
    .unwrap();

    let refresher = Arc::new(CountingRefresher::new());
    let manager = TokenManager::new(
        db.clone(),
        Arc::clone(&refresher) as Arc<dyn stride_sync::credentials::TokenRefresher>,
    );

    let token = manager.access_token(user_id).await.unwrap();
    assert_eq!(token, "rotated-access");
    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

    // The rotated refresh token was persisted before the call returned
    let stored = db.strava_connection(user_id).await.unwrap().unwrap();
    assert_eq!(stored.access_token, "rotated-access");
    assert_eq!(stored.refresh_token, "rotated-refresh");
    assert!(stored.expires_at > Utc::now() + Duration::hours(1));
}

#[tokio::test]
async fn concurrent_refreshes_single_flight() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    db.upsert_strava_connection(&StravaConnection {
        user_id,
        athlete_id: 13,
        access_token: "nearly-dead".into(),
        refresh_token: "refresh".into(),
        expires_at: Utc::now() + Duration::seconds(60),
        scope: None,
    })
    .await
    .unwrap();

    let refresher = Arc::new(CountingRefresher::new());
    let manager = Arc::new(TokenManager::new(
        db,
        Arc::clone(&refresher) as Arc<dyn stride_sync::credentials::TokenRefresher>,
    ));

    let mut handles = Vec::new();
    for _ in 0..5 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move { manager.access_token(user_id).await }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap(), "rotated-access");
    }

    assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_connection_is_unauthorized() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();

    let manager = TokenManager::new(db, Arc::new(PanicRefresher));
    assert!(matches!(
        manager.access_token(user_id).await,
        Err(ProviderError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn athlete_lookup_resolves_webhook_owners() {
    let (db, _dir) = test_database().await.unwrap();
    let user_id = seed_user(&db, None).await.unwrap();
    db.upsert_strava_connection(&StravaConnection {
        user_id,
        athlete_id: 14,
        access_token: "token".into(),
        refresh_token: "refresh".into(),
        expires_at: Utc::now() + Duration::hours(2),
        scope: None,
    })
    .await
    .unwrap();

    let manager = TokenManager::new(db, Arc::new(PanicRefresher));
    assert_eq!(manager.user_for_athlete(14).await.unwrap(), Some(user_id));
    assert_eq!(manager.user_for_athlete(999).await.unwrap(), None);
}
