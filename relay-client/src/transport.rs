//! Transport primitive: the pluggable "perform HTTP exchange" seam.
//!
//! The pipeline owns everything around the exchange (timeouts,
//! cancellation mapping, decoding, status synthesis); a [`Transport`]
//! only resolves a request into a status, headers, and raw payload.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, instrument};

use relay_core::{HttpError, Method, RequestConfig};

/// Default timeout applied by the bundled reqwest transport.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// User agent string for relay.
const USER_AGENT: &str = concat!("relay/", env!("CARGO_PKG_VERSION"));

// ============================================================================
// Transport Request / Raw Response
// ============================================================================

/// The resolved request a transport performs.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    /// Fully resolved URL (base URL already joined).
    pub url: String,
    /// HTTP method.
    pub method: Method,
    /// Request headers.
    pub headers: BTreeMap<String, String>,
    /// Query parameters to append to the URL.
    pub query: BTreeMap<String, String>,
    /// Optional JSON body.
    pub body: Option<JsonValue>,
}

impl TransportRequest {
    /// Builds a transport request from a pipeline config.
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            url: config.url.clone(),
            method: config.method,
            headers: config.headers.clone(),
            query: config.query.clone(),
            body: config.body.clone(),
        }
    }
}

/// The undecoded result of an exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Status reason phrase.
    pub status_text: String,
    /// Response headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// Raw payload bytes.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Creates a raw response with the given status and JSON payload.
    ///
    /// # Panics
    ///
    /// Panics if the value cannot be serialized; only possible for
    /// non-string map keys, which `serde_json::Value` cannot represent.
    pub fn json(status: u16, status_text: impl Into<String>, value: &JsonValue) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: BTreeMap::from([(
                "content-type".to_string(),
                "application/json".to_string(),
            )]),
            body: serde_json::to_vec(value).expect("JSON value serializes"),
        }
    }

    /// Creates a 200 OK raw response with a JSON payload.
    pub fn ok_json(value: &JsonValue) -> Self {
        Self::json(200, "OK", value)
    }
}

// ============================================================================
// Transport Failure
// ============================================================================

/// Failure raised by a transport, before any HTTP status exists.
#[derive(Debug, Error)]
pub enum TransportFailure {
    /// The exchange was cancelled.
    #[error("exchange cancelled")]
    Cancelled,

    /// The transport's own timeout expired.
    #[error("exchange timed out")]
    TimedOut,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other I/O failure.
    #[error("transport I/O error: {0}")]
    Io(String),
}

// ============================================================================
// Transport Trait
// ============================================================================

/// A pluggable HTTP exchange primitive.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs the exchange, returning the undecoded result.
    async fn perform(&self, request: &TransportRequest) -> Result<RawResponse, TransportFailure>;
}

// ============================================================================
// Reqwest Transport
// ============================================================================

/// The default transport, backed by a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    inner: Client,
}

impl ReqwestTransport {
    /// Creates a transport with default settings.
    pub fn new() -> Result<Self, HttpError> {
        let inner = Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Network {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { inner })
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(inner: Client) -> Self {
        Self { inner }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn classify(error: reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        TransportFailure::TimedOut
    } else if error.is_connect() {
        TransportFailure::Connect(error.to_string())
    } else {
        TransportFailure::Io(error.to_string())
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn perform(&self, request: &TransportRequest) -> Result<RawResponse, TransportFailure> {
        let mut builder = self
            .inner
            .request(to_reqwest_method(request.method), &request.url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();

        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_ascii_lowercase(), value.to_string());
            }
        }

        let body = response.bytes().await.map_err(classify)?.to_vec();
        debug!(status = status.as_u16(), bytes = body.len(), "exchange complete");

        Ok(RawResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
