//! Request configuration types.
//!
//! A [`RequestConfig`] describes one outbound call. Configs are value
//! types: every plugin in the request chain receives the current config
//! and returns a new one, so sibling in-flight requests never observe
//! each other's mutations.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Method
// ============================================================================

/// HTTP method for an outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET request.
    Get,
    /// HEAD request.
    Head,
    /// POST request.
    Post,
    /// PUT request.
    Put,
    /// DELETE request.
    Delete,
    /// PATCH request.
    Patch,
    /// OPTIONS request.
    Options,
}

impl Method {
    /// Returns the canonical uppercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
            Self::Options => "OPTIONS",
        }
    }

    /// Returns true for methods that never modify server state.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head | Self::Options)
    }

    /// Returns true for methods that can be repeated without changing the
    /// outcome beyond the first application.
    pub fn is_idempotent(&self) -> bool {
        self.is_safe() || matches!(self, Self::Put | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Decode Hint
// ============================================================================

/// How the response payload should be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeHint {
    /// Decode the payload as JSON (the default).
    #[default]
    Json,
    /// Decode the payload as UTF-8 text.
    Text,
    /// Keep the raw payload bytes.
    Bytes,
}

// ============================================================================
// Request Config
// ============================================================================

/// Description of one outbound call.
///
/// Headers and query parameters use `BTreeMap` so their serialized form is
/// stable; the cache plugin derives keys from the serialized query.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Target URL, absolute or relative to a client base URL.
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Query parameters, appended to the URL at transport time.
    pub query: BTreeMap<String, String>,
    /// Optional JSON body.
    pub body: Option<JsonValue>,
    /// Per-request timeout for a single transport attempt.
    pub timeout: Option<Duration>,
    /// Caller-supplied cancellation signal.
    pub cancel: Option<CancellationToken>,
    /// Response-decoding hint.
    pub decode: DecodeHint,
}

impl RequestConfig {
    /// Creates a config for the given method and URL.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method,
            headers: BTreeMap::new(),
            query: BTreeMap::new(),
            body: None,
            timeout: None,
            cancel: None,
            decode: DecodeHint::default(),
        }
    }

    /// Creates a GET config.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Creates a HEAD config.
    pub fn head(url: impl Into<String>) -> Self {
        Self::new(Method::Head, url)
    }

    /// Creates a POST config with a JSON body.
    pub fn post(url: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Method::Post, url).with_body(body)
    }

    /// Creates a PUT config with a JSON body.
    pub fn put(url: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Method::Put, url).with_body(body)
    }

    /// Creates a DELETE config.
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::Delete, url)
    }

    /// Creates a PATCH config with a JSON body.
    pub fn patch(url: impl Into<String>, body: JsonValue) -> Self {
        Self::new(Method::Patch, url).with_body(body)
    }

    /// Sets a header, replacing any existing value for the same name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: JsonValue) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attaches a cancellation token.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Sets the response-decoding hint.
    pub fn with_decode(mut self, decode: DecodeHint) -> Self {
        self.decode = decode;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
