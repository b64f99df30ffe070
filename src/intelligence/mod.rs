// ABOUTME: Derived analytics - daily training load and advanced per-segment features
// ABOUTME: Pure math kept separate from persistence so it can be tested without a database
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

pub mod features;
pub mod training_load;
