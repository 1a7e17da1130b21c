//! Response types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::config::RequestConfig;

// ============================================================================
// Response Body
// ============================================================================

/// Decoded response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// JSON payload.
    Json(JsonValue),
    /// UTF-8 text payload.
    Text(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
}

impl ResponseBody {
    /// Returns the JSON value, if this body was decoded as JSON.
    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the text, if this body was decoded as text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns true if the payload carries no data.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Json(value) => value.is_null(),
            Self::Text(text) => text.is_empty(),
            Self::Bytes(bytes) => bytes.is_empty(),
        }
    }
}

// ============================================================================
// HTTP Response
// ============================================================================

/// A decoded HTTP response.
///
/// Responses are immutable once constructed; plugins that transform a
/// response return a new one. Cache hits hand out clones, so a plugin
/// downstream of the cache never mutates an entry another call shares.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase (e.g. "OK").
    pub status_text: String,
    /// Response headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Decoded payload.
    pub body: ResponseBody,
    /// Echo of the config that produced this response.
    pub config: RequestConfig,
    /// When the response was received.
    pub received_at: DateTime<Utc>,
}

impl HttpResponse {
    /// Creates a response received now.
    pub fn new(
        status: u16,
        status_text: impl Into<String>,
        headers: BTreeMap<String, String>,
        body: ResponseBody,
        config: RequestConfig,
    ) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers,
            body,
            config,
            received_at: Utc::now(),
        }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16) -> HttpResponse {
        HttpResponse::new(
            status,
            "OK",
            BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            ResponseBody::Json(json!({"ok": true})),
            RequestConfig::get("https://api.example.com"),
        )
    }

    #[test]
    fn test_is_success() {
        assert!(response(200).is_success());
        assert!(response(204).is_success());
        assert!(!response(301).is_success());
        assert!(!response(404).is_success());
        assert!(!response(500).is_success());
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let resp = response(200);
        assert_eq!(resp.header("Content-Type"), Some("application/json"));
        assert_eq!(resp.header("content-type"), Some("application/json"));
        assert_eq!(resp.header("x-missing"), None);
    }

    #[test]
    fn test_body_accessors() {
        assert_eq!(
            ResponseBody::Json(json!({"a": 1})).as_json(),
            Some(&json!({"a": 1}))
        );
        assert_eq!(ResponseBody::Text("hi".to_string()).as_text(), Some("hi"));
        assert!(ResponseBody::Json(JsonValue::Null).is_empty());
        assert!(ResponseBody::Bytes(Vec::new()).is_empty());
        assert!(!ResponseBody::Text("x".to_string()).is_empty());
    }
}
