//! The user-facing client: defaults, plugin registration, method sugar.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use url::Url;

use relay_core::{HttpError, HttpResponse, RequestConfig};

use crate::pipeline::Pipeline;
use crate::plugin::Plugin;
use crate::transport::{ReqwestTransport, Transport};

// ============================================================================
// Client Defaults
// ============================================================================

/// Client-level defaults merged into every request config.
///
/// Headers and query parameters merge as maps with the caller winning per
/// key; all other fields follow last-write-wins (the caller's value, when
/// present, replaces the default).
#[derive(Debug, Clone, Default)]
pub struct ClientDefaults {
    /// Base URL that relative request URLs are joined against.
    pub base_url: Option<String>,
    /// Headers applied to every request.
    pub headers: BTreeMap<String, String>,
    /// Query parameters applied to every request.
    pub query: BTreeMap<String, String>,
    /// Fallback per-request timeout.
    pub timeout: Option<Duration>,
}

impl ClientDefaults {
    /// Merges a caller config with these defaults.
    pub fn merge(&self, mut config: RequestConfig) -> Result<RequestConfig, HttpError> {
        config.url = self.resolve_url(&config.url)?;
        for (name, value) in &self.headers {
            config
                .headers
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        for (name, value) in &self.query {
            config
                .query
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }
        if config.timeout.is_none() {
            config.timeout = self.timeout;
        }
        Ok(config)
    }

    fn resolve_url(&self, url: &str) -> Result<String, HttpError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        let Some(base) = &self.base_url else {
            return Err(HttpError::InvalidUrl {
                url: url.to_string(),
                message: "relative URL requires a client base URL".to_string(),
            });
        };
        let base = Url::parse(base).map_err(|e| HttpError::InvalidUrl {
            url: base.clone(),
            message: e.to_string(),
        })?;
        let joined = base.join(url).map_err(|e| HttpError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        Ok(joined.into())
    }
}

// ============================================================================
// Client
// ============================================================================

/// An HTTP client composed of a transport and an ordered plugin chain.
///
/// Clients are built explicitly via [`Client::builder`]; there is no
/// process-wide default instance.
pub struct Client {
    pipeline: Pipeline,
    defaults: ClientDefaults,
}

impl Client {
    /// Creates a builder for customizing the client.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Runs one logical call through the pipeline.
    pub async fn request(&self, config: RequestConfig) -> Result<HttpResponse, HttpError> {
        let merged = self.defaults.merge(config)?;
        self.pipeline.run(merged).await
    }

    /// Performs a GET request.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.request(RequestConfig::get(url)).await
    }

    /// Performs a HEAD request.
    pub async fn head(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.request(RequestConfig::head(url)).await
    }

    /// Performs a POST request with a JSON body.
    pub async fn post(&self, url: &str, body: JsonValue) -> Result<HttpResponse, HttpError> {
        self.request(RequestConfig::post(url, body)).await
    }

    /// Performs a PUT request with a JSON body.
    pub async fn put(&self, url: &str, body: JsonValue) -> Result<HttpResponse, HttpError> {
        self.request(RequestConfig::put(url, body)).await
    }

    /// Performs a DELETE request.
    pub async fn delete(&self, url: &str) -> Result<HttpResponse, HttpError> {
        self.request(RequestConfig::delete(url)).await
    }

    /// Performs a PATCH request with a JSON body.
    pub async fn patch(&self, url: &str, body: JsonValue) -> Result<HttpResponse, HttpError> {
        self.request(RequestConfig::patch(url, body)).await
    }

    /// Returns the registered plugin with the given name, downcast to its
    /// concrete type.
    ///
    /// This is the typed accessor for plugin administrative surfaces:
    ///
    /// ```ignore
    /// let cache = client.capability::<CachePlugin>("cache").unwrap();
    /// println!("{:?}", cache.stats());
    /// ```
    pub fn capability<P: Plugin>(&self, name: &str) -> Option<Arc<P>> {
        self.pipeline
            .plugin(name)
            .and_then(|plugin| plugin.as_any().downcast::<P>().ok())
    }

    /// Returns the defaults this client applies.
    pub fn defaults(&self) -> &ClientDefaults {
        &self.defaults
    }
}

// ============================================================================
// Client Builder
// ============================================================================

/// Builder for constructing a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    defaults: ClientDefaults,
    plugins: Vec<Arc<dyn Plugin>>,
    transport: Option<Arc<dyn Transport>>,
}

impl ClientBuilder {
    /// Creates a builder with no defaults and no plugins.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base URL for relative request URLs.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.defaults.base_url = Some(url.into());
        self
    }

    /// Adds a default header.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a default query parameter.
    pub fn default_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.query.insert(name.into(), value.into());
        self
    }

    /// Sets the fallback per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = Some(timeout);
        self
    }

    /// Appends a plugin to the chain.
    pub fn plugin(mut self, plugin: impl Plugin) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Appends an already-shared plugin to the chain.
    pub fn shared_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Replaces the default transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the client, falling back to the bundled reqwest transport.
    pub fn build(self) -> Result<Client, HttpError> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let mut pipeline = Pipeline::new(transport);
        for plugin in self.plugins {
            pipeline.register(plugin);
        }
        Ok(Client {
            pipeline,
            defaults: self.defaults,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{RawResponse, TransportFailure, TransportRequest};
    use async_trait::async_trait;
    use serde_json::json;
    use std::any::Any;
    use std::sync::Mutex;

    /// Records the request it receives and answers 200.
    struct CapturingTransport {
        last: Mutex<Option<TransportRequest>>,
    }

    impl CapturingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                last: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn perform(
            &self,
            request: &TransportRequest,
        ) -> Result<RawResponse, TransportFailure> {
            *self.last.lock().unwrap() = Some(request.clone());
            Ok(RawResponse::ok_json(&json!({})))
        }
    }

    struct MarkerPlugin {
        tag: &'static str,
    }

    #[async_trait]
    impl Plugin for MarkerPlugin {
        fn name(&self) -> &str {
            "marker"
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[tokio::test]
    async fn test_defaults_merge_with_caller_winning() {
        let transport = CapturingTransport::new();
        let client = Client::builder()
            .base_url("https://api.example.com/v1/")
            .default_header("accept", "application/json")
            .default_header("x-tenant", "default")
            .default_query("version", "1")
            .transport(transport.clone())
            .build()
            .unwrap();

        client
            .request(
                RequestConfig::get("usage")
                    .with_header("x-tenant", "acme")
                    .with_query("page", "3"),
            )
            .await
            .unwrap();

        let request = transport.last.lock().unwrap().clone().unwrap();
        assert_eq!(request.url, "https://api.example.com/v1/usage");
        assert_eq!(request.headers.get("accept").map(String::as_str), Some("application/json"));
        // Caller wins per key.
        assert_eq!(request.headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(request.query.get("version").map(String::as_str), Some("1"));
        assert_eq!(request.query.get("page").map(String::as_str), Some("3"));
    }

    #[tokio::test]
    async fn test_relative_url_without_base_fails() {
        let client = Client::builder()
            .transport(CapturingTransport::new())
            .build()
            .unwrap();

        let error = client.get("usage").await.unwrap_err();
        assert_eq!(error.code(), relay_core::ErrorCode::InvalidUrl);
    }

    #[tokio::test]
    async fn test_capability_downcasts_by_name() {
        let client = Client::builder()
            .transport(CapturingTransport::new())
            .plugin(MarkerPlugin { tag: "here" })
            .build()
            .unwrap();

        let marker = client.capability::<MarkerPlugin>("marker").unwrap();
        assert_eq!(marker.tag, "here");
        assert!(client.capability::<MarkerPlugin>("absent").is_none());
    }
}
