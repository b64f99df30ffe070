// ABOUTME: Configuration module for environment-driven server settings
// ABOUTME: Environment variables are the only configuration source, parsed once at startup
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

pub mod environment;

pub use environment::{Environment, LogLevel, ServerConfig};
