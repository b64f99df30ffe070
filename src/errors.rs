// ABOUTME: Centralized error handling and error types for the Stride Sync API
// ABOUTME: Defines error codes, HTTP status mapping, and response formatting for all routes
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Stride Sync

//! # Unified Error Handling System
//!
//! Standard error types, error codes, and HTTP response formatting shared by
//! every route module. The upstream-provider taxonomy lives in
//! [`crate::providers::errors`]; this module is the HTTP-facing layer.

use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Standard error codes used throughout the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Authentication is required but not provided
    AuthRequired,
    /// Authentication credentials are invalid
    AuthInvalid,
    /// Rate limit has been exceeded
    RateLimitExceeded,
    /// Usage quota has been exceeded
    QuotaExceeded,
    /// Input validation failed
    InvalidInput,
    /// Required field is missing from request
    MissingRequiredField,
    /// Requested resource was not found
    ResourceNotFound,
    /// Resource already exists (conflict)
    ResourceAlreadyExists,
    /// External service returned an error
    ExternalServiceError,
    /// Authentication with external service failed
    ExternalAuthFailed,
    /// Configuration error occurred
    ConfigError,
    /// Internal server error
    InternalError,
    /// Database operation failed
    DatabaseError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::MissingRequiredField => {
                crate::constants::http_status::BAD_REQUEST
            }
            Self::AuthRequired | Self::AuthInvalid => crate::constants::http_status::UNAUTHORIZED,
            Self::ResourceNotFound => crate::constants::http_status::NOT_FOUND,
            Self::ResourceAlreadyExists => crate::constants::http_status::CONFLICT,
            Self::RateLimitExceeded | Self::QuotaExceeded => {
                crate::constants::http_status::TOO_MANY_REQUESTS
            }
            Self::ExternalServiceError => crate::constants::http_status::BAD_GATEWAY,
            Self::ExternalAuthFailed => crate::constants::http_status::SERVICE_UNAVAILABLE,
            Self::ConfigError | Self::InternalError | Self::DatabaseError => {
                crate::constants::http_status::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::AuthRequired => "Authentication is required to access this resource",
            Self::AuthInvalid => "The provided authentication credentials are invalid",
            Self::RateLimitExceeded => "Rate limit exceeded. Please slow down your requests",
            Self::QuotaExceeded => "The upstream API quota is exhausted",
            Self::InvalidInput => "The provided input is invalid",
            Self::MissingRequiredField => "A required field is missing from the request",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::ResourceAlreadyExists => "A resource with this identifier already exists",
            Self::ExternalServiceError => "An external service encountered an error",
            Self::ExternalAuthFailed => "Authentication with external service failed",
            Self::ConfigError => "Configuration error encountered",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&format!("{self:?}"))
    }
}

/// Simplified error type for the application
#[derive(Debug, Clone, Error)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Get sanitized message safe for client exposure.
    /// Internal error details are replaced with generic messages.
    #[must_use]
    pub fn sanitized_message(&self) -> String {
        match self.code {
            ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::ResourceNotFound
            | ErrorCode::QuotaExceeded => self.message.clone(),
            _ => self.code.description().to_owned(),
        }
    }

    /// Authentication required
    #[must_use]
    pub fn auth_required() -> Self {
        Self::new(ErrorCode::AuthRequired, "Authentication required")
    }

    /// Invalid authentication
    #[must_use]
    pub fn auth_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthInvalid, message)
    }

    /// Resource not found
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource_str = resource.into();
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{resource_str} not found"),
        )
    }

    /// Invalid input
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Internal server error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// Upstream quota exhausted
    #[must_use]
    pub fn quota_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::QuotaExceeded, message)
    }

    /// External service error
    #[must_use]
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        let service_str = service.into();
        let message_str = message.into();
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{service_str}: {message_str}"),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Simplified HTTP error response format
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code identifying the type of error
    pub code: ErrorCode,
    /// Human-readable error message (sanitized for client)
    pub message: String,
    /// RFC3339 timestamp when the error occurred
    pub timestamp: String,
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        tracing::warn!("API error: {:?}: {}", error.code, error.message);

        Self {
            code: error.code,
            message: error.sanitized_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse::from(self);
        (status, Json(body)).into_response()
    }
}

/// Conversion from `anyhow::Error` to `AppError`
impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(ErrorCode::InternalError, error.to_string())
    }
}

/// Conversion from `sqlx::Error` to `AppError`
impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(error.to_string())
    }
}

/// Conversion from `serde_json::Error` to `AppError`
impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorCode::InvalidInput, format!("JSON error: {error}"))
    }
}

/// Conversion from `uuid::Error` to `AppError`
impl From<uuid::Error> for AppError {
    fn from(error: uuid::Error) -> Self {
        Self::new(ErrorCode::InvalidInput, format!("UUID error: {error}"))
    }
}

/// Conversion from the provider taxonomy to the HTTP layer
impl From<crate::providers::errors::ProviderError> for AppError {
    fn from(error: crate::providers::errors::ProviderError) -> Self {
        use crate::providers::errors::ProviderError;
        match error {
            ProviderError::QuotaExhausted => {
                Self::quota_exhausted("Daily Strava quota exhausted, retry after next UTC midnight")
            }
            ProviderError::RateLimited => Self::new(
                ErrorCode::RateLimitExceeded,
                "Strava rate limit hit, enrichment paused",
            ),
            ProviderError::Unauthorized(message) => {
                Self::new(ErrorCode::ExternalAuthFailed, message)
            }
            ProviderError::Validation(message) => Self::invalid_input(message),
            ProviderError::Transient(message) => Self::external_service("strava", message),
            ProviderError::Storage(message) => Self::database(message),
        }
    }
}
