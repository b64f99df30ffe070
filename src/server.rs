// ABOUTME: Shared server resources and HTTP app assembly
// ABOUTME: Builds collaborators once, wires the router, and runs the axum server
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use crate::cache::factory::Cache;
use crate::cache::CacheConfig;
use crate::config::environment::ServerConfig;
use crate::credentials::{HttpTokenRefresher, TokenManager};
use crate::database::Database;
use crate::enrichment::EnrichmentExecutor;
use crate::providers::transport::HttpTransport;
use crate::providers::StravaClient;
use crate::quota::QuotaManager;
use crate::scheduler::{EnrichmentScheduler, SchedulerHandle};
use crate::weather::WeatherService;
use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Long-lived collaborators shared by every route handler
pub struct ServerResources {
    pub database: Database,
    pub quota: Arc<QuotaManager>,
    pub tokens: Arc<TokenManager>,
    pub strava: Arc<StravaClient>,
    pub executor: Arc<EnrichmentExecutor>,
    pub weather: Arc<WeatherService>,
    pub scheduler: Arc<SchedulerHandle>,
    pub config: Arc<ServerConfig>,
}

/// Built resources plus the scheduler task ready to be spawned
pub struct Server {
    pub resources: Arc<ServerResources>,
    pub scheduler: EnrichmentScheduler,
}

impl Server {
    /// Construct every collaborator from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the database or cache cannot be initialized
    pub async fn build(config: ServerConfig) -> Result<Self> {
        let database = Database::new(&config.database_url, config.encryption_key.clone())
            .await
            .context("database initialization failed")?;

        let cache_config = config
            .redis_url
            .clone()
            .map_or_else(CacheConfig::in_memory, CacheConfig::redis);
        let cache = Cache::new(cache_config)
            .await
            .context("cache initialization failed")?;

        let quota = Arc::new(QuotaManager::new(cache));
        let refresher = Arc::new(HttpTokenRefresher::new(&config.strava));
        let tokens = Arc::new(TokenManager::new(database.clone(), refresher));
        let transport = Arc::new(HttpTransport::new(config.strava.api_base.clone()));
        let strava = Arc::new(StravaClient::new(
            transport,
            Arc::clone(&quota),
            Arc::clone(&tokens),
        ));
        let weather = Arc::new(WeatherService::new(database.clone()));
        let executor = Arc::new(EnrichmentExecutor::new(
            database.clone(),
            Arc::clone(&strava),
            Arc::clone(&quota),
            Arc::clone(&weather),
        ));

        let scheduler = EnrichmentScheduler::new(
            database.clone(),
            Arc::clone(&executor),
            Arc::clone(&quota),
            config.scheduler.clone(),
        );
        let scheduler_handle = scheduler.handle();

        let resources = Arc::new(ServerResources {
            database,
            quota,
            tokens,
            strava,
            executor,
            weather,
            scheduler: scheduler_handle,
            config: Arc::new(config),
        });

        Ok(Self {
            resources,
            scheduler,
        })
    }

    /// Compose the full HTTP application
    #[must_use]
    pub fn router(resources: Arc<ServerResources>) -> Router {
        crate::routes::api_router(resources)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Serve HTTP and run the scheduler until SIGINT/SIGTERM
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails
    pub async fn run(self) -> Result<()> {
        let port = self.resources.config.http_port;
        let scheduler_handle = self.scheduler.handle();
        let scheduler_task = tokio::spawn(self.scheduler.run());

        let app = Self::router(Arc::clone(&self.resources));
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
            .await
            .with_context(|| format!("failed to bind port {port}"))?;
        info!("HTTP server listening on port {port}");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("HTTP server error")?;

        info!("shutting down scheduler");
        scheduler_handle.shutdown();
        let _ = scheduler_task.await;
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        if let Ok(mut signal) =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            signal.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("shutdown signal received");
}
