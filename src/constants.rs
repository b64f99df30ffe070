// ABOUTME: Centralized constants for quota limits, enrichment defaults, and external API endpoints
// ABOUTME: Grouped by subsystem so magic numbers live in exactly one place
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

/// Strava API quota accounting
pub mod quota {
    /// Shared-cache key for the rolling daily counter
    pub const DAILY_KEY: &str = "strava:quota:daily";
    /// Shared-cache key for the rolling 15-minute counter
    pub const SHORT_KEY: &str = "strava:quota:15min";
    /// Requests allowed per UTC day
    pub const DAILY_LIMIT: u64 = 1000;
    /// Requests allowed per 15-minute window
    pub const SHORT_LIMIT: u64 = 100;
    /// Length of the short window in seconds
    pub const SHORT_WINDOW_SECS: u64 = 900;
    /// Fallback wait when the short-window TTL cannot be read
    pub const SHORT_WAIT_FALLBACK_SECS: u64 = 60;
}

/// Enrichment queue and scheduler defaults
pub mod enrichment {
    /// Attempts before an item is failed terminally
    pub const MAX_ATTEMPTS: i64 = 3;
    /// Base of the exponential retry backoff, in seconds (30, 60, 120, ...)
    pub const BACKOFF_BASE_SECS: i64 = 30;
    /// IN_PROGRESS items older than this are reaped back to PENDING
    pub const REAPER_THRESHOLD_SECS: i64 = 30 * 60;
    /// Default number of items leased per scheduling cycle
    pub const DEFAULT_BATCH_SIZE: usize = 5;
    /// Default number of parallel enrichment workers
    pub const DEFAULT_WORKER_COUNT: usize = 5;
    /// Default items granted to each user per round-robin cycle
    pub const DEFAULT_ITEMS_PER_USER_PER_CYCLE: usize = 2;
    /// Default sleep between scheduling cycles, in seconds
    pub const DEFAULT_SLEEP_SECS: u64 = 300;
    /// Pause between two activities handled by the same worker
    pub const INTER_ACTIVITY_DELAY_MS: u64 = 500;
}

/// Stream segmentation
pub mod segmentation {
    /// Target segment length in meters
    pub const SEGMENT_LENGTH_M: f64 = 100.0;
}

/// Training load (Banister / Edwards)
pub mod training_load {
    /// Chronic training load time constant, days
    pub const CTL_DAYS: f64 = 42.0;
    /// Acute training load time constant, days
    pub const ATL_DAYS: f64 = 7.0;
    /// Fraction of max heart rate below which Edwards zones score zero
    pub const EDWARDS_FLOOR: f64 = 0.5;
}

/// Strava API surface
pub mod strava {
    /// REST API base
    pub const API_BASE: &str = "https://www.strava.com/api/v3";
    /// OAuth token endpoint
    pub const TOKEN_URL: &str = "https://www.strava.com/api/v3/oauth/token";
    /// Activities returned per page (Strava maximum)
    pub const ACTIVITIES_PER_PAGE: u32 = 200;
    /// Stream types requested during enrichment
    pub const STREAM_KEYS: &[&str] = &[
        "time",
        "latlng",
        "distance",
        "altitude",
        "velocity_smooth",
        "heartrate",
        "cadence",
        "watts",
        "temp",
        "moving",
        "grade_smooth",
    ];
    /// Reserved key under which segment efforts are merged into the streams blob
    pub const SEGMENT_EFFORTS_KEY: &str = "segment_efforts";
    /// Access tokens within this margin of expiry are refreshed before use
    pub const TOKEN_EXPIRY_MARGIN_SECS: i64 = 5 * 60;
}

/// Open-Meteo weather enrichment
pub mod weather {
    /// Endpoint for dates older than the historical threshold
    pub const HISTORICAL_BASE_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
    /// Endpoint for recent dates
    pub const FORECAST_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";
    /// Hourly variables requested for the activity's start date
    pub const HOURLY_PARAMS: &str = "temperature_2m,relative_humidity_2m,wind_speed_10m,wind_direction_10m,surface_pressure,precipitation,cloud_cover,weather_code";
    /// Activities older than this many days use the historical endpoint
    pub const HISTORICAL_THRESHOLD_DAYS: i64 = 5;
    /// Minimum delay between two weather requests
    pub const REQUEST_DELAY_MS: u64 = 100;
    /// Per-request timeout for the weather service
    pub const REQUEST_TIMEOUT_SECS: u64 = 15;
}

/// HTTP client defaults
pub mod http_client {
    /// Request timeout for upstream provider calls
    pub const TIMEOUT_SECS: u64 = 30;
    /// Connection timeout for upstream provider calls
    pub const CONNECT_TIMEOUT_SECS: u64 = 10;
}

/// HTTP status codes used by the error mapping
pub mod http_status {
    pub const BAD_REQUEST: u16 = 400;
    pub const UNAUTHORIZED: u16 = 401;
    pub const FORBIDDEN: u16 = 403;
    pub const NOT_FOUND: u16 = 404;
    pub const CONFLICT: u16 = 409;
    pub const TOO_MANY_REQUESTS: u16 = 429;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
    pub const BAD_GATEWAY: u16 = 502;
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}
