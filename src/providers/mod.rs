// ABOUTME: Upstream provider integration - transport abstraction and the quota-gated Strava client
// ABOUTME: All outgoing Strava traffic flows through this module and nothing else
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

pub mod errors;
pub mod strava;
pub mod transport;

pub use errors::{ProviderError, ProviderResult};
pub use strava::StravaClient;
pub use transport::{HttpTransport, StravaTransport};
