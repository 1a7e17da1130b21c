//! Error taxonomy for the request pipeline.
//!
//! The [`HttpError`] variant itself is the machine-readable classification
//! plugins use to decide retryability; there is no string code to compare.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::response::HttpResponse;

// ============================================================================
// Error Code
// ============================================================================

/// Machine classification of an [`HttpError`], for logs and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Transport-level failure (connection refused, DNS, I/O).
    Network,
    /// A single attempt exceeded its timeout.
    Timeout,
    /// The caller cancelled the request.
    Abort,
    /// The payload could not be decoded as requested.
    Parse,
    /// 4xx status.
    ClientStatus,
    /// 5xx status.
    ServerStatus,
    /// Non-success status outside the 4xx/5xx families.
    Status,
    /// Admission denied by the rate limiter.
    RateLimited,
    /// The URL could not be resolved against the client configuration.
    InvalidUrl,
    /// A plugin hook failed.
    Plugin,
}

// ============================================================================
// HTTP Error
// ============================================================================

/// Error type for pipeline operations.
///
/// A call either resolves with an [`HttpResponse`] or fails with exactly
/// one of these variants, carrying enough context to diagnose without
/// inspecting pipeline internals.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Transport-level failure.
    #[error("network error: {message}")]
    Network {
        /// Description of the underlying failure.
        message: String,
    },

    /// A single attempt exceeded its timeout.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// How long the attempt ran before expiry.
        elapsed: Duration,
    },

    /// The caller cancelled the request.
    #[error("request aborted")]
    Aborted,

    /// The payload could not be decoded as requested.
    #[error("failed to decode response body: {message}")]
    Parse {
        /// Description of the decode failure.
        message: String,
    },

    /// The server answered with a non-success status.
    #[error("HTTP status {status} {status_text}")]
    Status {
        /// Status code.
        status: u16,
        /// Status reason phrase.
        status_text: String,
        /// The full response that carried the status.
        response: Box<HttpResponse>,
    },

    /// Admission denied by the rate limiter.
    #[error("rate limit exceeded ({queue_depth} requests queued)")]
    RateLimited {
        /// Queue depth at the time admission was denied.
        queue_depth: usize,
    },

    /// The URL could not be resolved against the client configuration.
    #[error("invalid URL {url:?}: {message}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why resolution failed.
        message: String,
    },

    /// A plugin hook failed.
    #[error("plugin {plugin} failed: {message}")]
    Plugin {
        /// Name of the failing plugin.
        plugin: String,
        /// Description of the failure.
        message: String,
    },
}

impl HttpError {
    /// Returns the machine classification for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Network { .. } => ErrorCode::Network,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Aborted => ErrorCode::Abort,
            Self::Parse { .. } => ErrorCode::Parse,
            Self::Status { status, .. } => match status {
                400..=499 => ErrorCode::ClientStatus,
                500..=599 => ErrorCode::ServerStatus,
                _ => ErrorCode::Status,
            },
            Self::RateLimited { .. } => ErrorCode::RateLimited,
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::Plugin { .. } => ErrorCode::Plugin,
        }
    }

    /// Returns the HTTP status, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the underlying response, if this error carries one.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Status { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Returns true for 4xx status errors.
    pub fn is_client_error(&self) -> bool {
        self.code() == ErrorCode::ClientStatus
    }

    /// Returns true for 5xx status errors.
    pub fn is_server_error(&self) -> bool {
        self.code() == ErrorCode::ServerStatus
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RequestConfig;
    use crate::response::ResponseBody;
    use std::collections::BTreeMap;

    fn status_error(status: u16) -> HttpError {
        let response = HttpResponse::new(
            status,
            "",
            BTreeMap::new(),
            ResponseBody::Json(serde_json::Value::Null),
            RequestConfig::get("https://api.example.com"),
        );
        HttpError::Status {
            status,
            status_text: String::new(),
            response: Box::new(response),
        }
    }

    #[test]
    fn test_status_family_codes() {
        assert_eq!(status_error(404).code(), ErrorCode::ClientStatus);
        assert_eq!(status_error(503).code(), ErrorCode::ServerStatus);
        assert_eq!(status_error(301).code(), ErrorCode::Status);

        assert!(status_error(404).is_client_error());
        assert!(status_error(503).is_server_error());
        assert!(!status_error(301).is_client_error());
    }

    #[test]
    fn test_status_accessors() {
        let err = status_error(429);
        assert_eq!(err.status(), Some(429));
        assert!(err.response().is_some());

        let err = HttpError::Aborted;
        assert_eq!(err.status(), None);
        assert!(err.response().is_none());
        assert_eq!(err.code(), ErrorCode::Abort);
    }

    #[test]
    fn test_code_serde_snake_case() {
        let json = serde_json::to_string(&ErrorCode::RateLimited).unwrap();
        assert_eq!(json, "\"rate_limited\"");
    }
}
