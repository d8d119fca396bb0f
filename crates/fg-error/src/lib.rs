// SPDX-License-Identifier: MIT OR Apache-2.0
//! Unified error taxonomy with stable error codes for the function gateway.
//!
//! Every error the orchestrator, registry, code store, or deploy handler can
//! raise is collapsed into a single [`GatewayError`], which knows its HTTP
//! status and how to render itself as a JSON body via
//! [`IntoResponse`](axum::response::IntoResponse). A *system* failure
//! (this type) is distinct from a *function-reported* failure, which is
//! wrapped with [`function_error_body`] and still returns 200.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use fg_core::ValidationError;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code, independent of HTTP status.
///
/// Serialises to a `SCREAMING_SNAKE_CASE` string that will not change
/// across patch releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// A request field failed validation (id, version, language, entryPoint,
    /// dependencies, or body shape).
    ValidationError,
    /// Missing, unknown, inactive, or expired credential.
    Unauthenticated,
    /// No metadata or no code artifact for the requested function.
    NotFound,
    /// The HTTP method is not defined for this route.
    MethodNotAllowed,
    /// A deploy targeted an `(id, version)` that already exists.
    VersionExists,
    /// A rate-limit dimension denied the request.
    RateLimited,
    /// Source failed to compile.
    CompilationError,
    /// A required external collaborator (sandbox, log store) is absent.
    NotConfigured,
    /// Catch-all for unexpected internal failures.
    InternalError,
}

impl ErrorCode {
    /// Stable string representation, e.g. `"RATE_LIMITED"`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::NotFound => "NOT_FOUND",
            Self::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            Self::VersionExists => "VERSION_EXISTS",
            Self::RateLimited => "RATE_LIMITED",
            Self::CompilationError => "COMPILATION_ERROR",
            Self::NotConfigured => "NOT_CONFIGURED",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// A system-level gateway failure, mapped to an HTTP status and JSON body.
///
/// Internal errors are logged in full via `tracing::error!`; the HTTP body
/// never carries a backtrace or `at file:line` frame.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// A request field failed validation.
    #[error("{0}")]
    Validation(String),

    /// Missing, unknown, inactive, or expired credential.
    #[error("{0}")]
    Unauthenticated(String),

    /// No metadata or no code artifact for the requested resource.
    #[error("{0} not found")]
    NotFound(String),

    /// The HTTP method is not defined for this route.
    #[error("{0} not allowed")]
    MethodNotAllowed(String),

    /// A deploy targeted an `(id, version)` that already exists.
    #[error("a version of this function already exists")]
    VersionExists,

    /// A rate-limit dimension denied the request.
    #[error("rate limit exceeded for {blocking_category}")]
    RateLimited {
        /// Seconds the client should wait before retrying.
        retry_after_secs: u64,
        /// Wall-clock millisecond timestamp when the blocking dimension's
        /// window resets.
        reset_at_ms: i64,
        /// The dimension (`"ip"`, `"function"`, ...) that denied the request.
        blocking_category: String,
    },

    /// Source failed to compile.
    #[error("compilation failed: {message}")]
    Compilation {
        /// Compiler-reported message.
        message: String,
        /// 1-based source line, if the compiler reported one.
        line: Option<u32>,
        /// 1-based source column, if the compiler reported one.
        column: Option<u32>,
    },

    /// A required external collaborator is absent.
    #[error("{what} is not configured")]
    NotConfigured {
        /// Name of the missing collaborator, e.g. `"sandbox"`.
        what: String,
        /// Status to report; distinguishes a structural gap (`501`) from a
        /// transiently-unavailable dependency (`503`).
        status: StatusCode,
    },

    /// Catch-all for unexpected internal failures.
    #[error("{0}")]
    Internal(String),
}

impl GatewayError {
    /// `"Missing API key"` — no `Authorization` header present.
    #[must_use]
    pub fn missing_api_key() -> Self {
        Self::Unauthenticated("Missing API key".to_string())
    }

    /// `"Missing authentication"` — an auth mechanism was attempted but
    /// produced no credential.
    #[must_use]
    pub fn missing_authentication() -> Self {
        Self::Unauthenticated("Missing authentication".to_string())
    }

    /// `"API key has expired"`.
    #[must_use]
    pub fn expired_api_key() -> Self {
        Self::Unauthenticated("API key has expired".to_string())
    }

    /// `"Invalid API key"` — unknown key or an inactive/non-matching one.
    #[must_use]
    pub fn invalid_api_key() -> Self {
        Self::Unauthenticated("Invalid API key".to_string())
    }

    /// The sandbox collaborator is absent. Maps to `501 Not Implemented`.
    #[must_use]
    pub fn sandbox_not_configured() -> Self {
        Self::NotConfigured {
            what: "sandbox".to_string(),
            status: StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// The log-store collaborator is absent. Maps to `503 Service Unavailable`.
    #[must_use]
    pub fn log_store_not_configured() -> Self {
        Self::NotConfigured {
            what: "log store".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// The stable [`ErrorCode`] for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Unauthenticated(_) => ErrorCode::Unauthenticated,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::MethodNotAllowed(_) => ErrorCode::MethodNotAllowed,
            Self::VersionExists => ErrorCode::VersionExists,
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::Compilation { .. } => ErrorCode::CompilationError,
            Self::NotConfigured { .. } => ErrorCode::NotConfigured,
            Self::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// The HTTP status this error maps to.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Compilation { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::VersionExists => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotConfigured { status, .. } => *status,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ValidationError> for GatewayError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(format!("{}: {}", err.field, err.reason))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(code = self.code().as_str(), error = %self, "internal error");
        }

        let mut body = json!({
            "error": self.to_string(),
            "code": self.code().as_str(),
        });
        if let Self::Compilation { line, column, .. } = &self {
            if let Some(line) = line {
                body["line"] = json!(line);
            }
            if let Some(column) = column {
                body["column"] = json!(column);
            }
        }
        if let Self::RateLimited {
            retry_after_secs,
            reset_at_ms,
            blocking_category,
        } = &self
        {
            body["message"] = json!(format!("{blocking_category} rate limit exceeded"));
            body["retryAfter"] = json!(retry_after_secs);
            body["resetAt"] = json!(reset_at_ms);
        }

        let mut response = (status, Json(body)).into_response();
        if let Self::RateLimited {
            retry_after_secs,
            reset_at_ms,
            ..
        } = &self
        {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
            if let Ok(value) = HeaderValue::from_str(&reset_at_ms.to_string()) {
                response.headers_mut().insert("x-ratelimit-reset", value);
            }
        }
        response
    }
}

// ---------------------------------------------------------------------------
// Function-reported errors
// ---------------------------------------------------------------------------

/// Build the `200`-status body used when the user's function itself fails
/// (raises, or returns a non-2xx `Response`) — distinct from a
/// [`GatewayError`], which always represents a *system* failure.
#[must_use]
pub fn function_error_body(message: impl Into<String>, meta: Value) -> Value {
    json!({
        "error": message.into(),
        "_meta": meta,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
