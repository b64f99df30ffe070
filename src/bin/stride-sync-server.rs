// ABOUTME: Server binary - configuration, logging, resource construction, and the run loop
// ABOUTME: CLI flags override the port and log level from the environment
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

use anyhow::Result;
use clap::Parser;
use stride_sync::config::environment::{LogLevel, ServerConfig};
use stride_sync::logging::{self, LogFormat};
use stride_sync::server::Server;
use tracing::info;

#[derive(Parser)]
#[command(name = "stride-sync-server", about = "Fitness activity enrichment server", version)]
struct Args {
    /// HTTP port (overrides HTTP_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    if let Some(level) = args.log_level.as_deref() {
        config.log_level = LogLevel::from_str_or_default(level);
    }

    logging::init(&config.log_level, LogFormat::from_env())?;
    info!("starting stride-sync-server: {}", config.summary());

    let server = Server::build(config).await?;
    server.run().await
}
