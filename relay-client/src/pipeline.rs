//! Request pipeline: ordered hook execution around the transport.
//!
//! Every call runs the registered plugins' `on_request` hooks, performs
//! the exchange, then runs `on_response` on success or `on_error` on any
//! failure. An `on_error` hook may resolve the failure, replace it, or ask
//! for a retry; a retry re-enters the attempt loop with the same
//! [`PluginContext`], which is how the retry counter survives re-entry.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use relay_core::{
    DecodeHint, HttpError, HttpResponse, PluginContext, RequestConfig, Resolution, ResponseBody,
};

use crate::plugin::{ErrorDisposition, Plugin};
use crate::transport::{RawResponse, Transport, TransportFailure, TransportRequest};

// ============================================================================
// Attempt Outcomes
// ============================================================================

/// Result of one pass through the pipeline.
enum AttemptOutcome {
    /// The call finished with this result.
    Done(Result<HttpResponse, HttpError>),
    /// A plugin asked for the request to be re-run.
    Retry,
}

/// Where the current attempt is in the response/error convergence loop.
enum Flow {
    Respond(HttpResponse),
    Fail(HttpError),
}

/// Result of running the full `on_error` chain once.
enum ChainVerdict {
    Retry,
    Resolved(HttpResponse),
    Unresolved(HttpError),
}

// ============================================================================
// Pipeline
// ============================================================================

/// The core component sequencing hooks, the transport call, and retries.
pub struct Pipeline {
    plugins: Vec<Arc<dyn Plugin>>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    /// Creates a pipeline with no plugins.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            plugins: Vec::new(),
            transport,
        }
    }

    /// Registers a plugin at the end of the chain.
    ///
    /// A plugin whose name is already registered is skipped, preserving
    /// the first registration.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            warn!(
                plugin = plugin.name(),
                "duplicate plugin name, keeping first registration"
            );
            return;
        }
        debug!(plugin = plugin.name(), "registered plugin");
        self.plugins.push(plugin);
    }

    /// Returns the registered plugins in chain order.
    pub fn plugins(&self) -> &[Arc<dyn Plugin>] {
        &self.plugins
    }

    /// Looks up a registered plugin by name.
    pub fn plugin(&self, name: &str) -> Option<Arc<dyn Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    /// Runs one logical call to completion, including retries.
    #[instrument(skip(self, config), fields(method = %config.method, url = %config.url, plugins = self.plugins.len()))]
    pub async fn run(&self, config: RequestConfig) -> Result<HttpResponse, HttpError> {
        let ctx = PluginContext::new();
        loop {
            match self.attempt(config.clone(), &ctx).await {
                AttemptOutcome::Done(result) => return result,
                AttemptOutcome::Retry => {
                    debug!(attempt = ctx.attempts(), "re-entering pipeline for retry");
                }
            }
        }
    }

    /// One pass: request chain, exchange, convergence.
    async fn attempt(&self, config: RequestConfig, ctx: &PluginContext) -> AttemptOutcome {
        // A hook failure on a prior attempt can leave a stale resolution
        // behind; every attempt starts clean.
        drop(ctx.take_resolution());

        let mut config = config;
        for plugin in &self.plugins {
            let snapshot = config.clone();
            match plugin.on_request(config, ctx).await {
                Ok(next) => config = next,
                Err(error) => {
                    // Fatal to the rest of the request chain; the error
                    // path still runs.
                    warn!(plugin = plugin.name(), error = %error, "request hook failed");
                    return self.converge(Flow::Fail(error), &snapshot, ctx).await;
                }
            }
        }

        if let Resolution::ShortCircuit(response) = ctx.take_resolution() {
            debug!("request resolved without transport");
            return AttemptOutcome::Done(Ok(response));
        }

        let flow = match self.exchange(&config).await {
            Ok(response) => Flow::Respond(response),
            Err(error) => Flow::Fail(error),
        };
        self.converge(flow, &config, ctx).await
    }

    /// Performs the exchange and synthesizes status errors.
    async fn exchange(&self, config: &RequestConfig) -> Result<HttpResponse, HttpError> {
        if let Some(token) = &config.cancel {
            if token.is_cancelled() {
                return Err(HttpError::Aborted);
            }
        }

        let request = TransportRequest::from_config(config);
        let started = Instant::now();
        let raw = self.perform_bounded(&request, config, started).await?;
        let response = decode_response(raw, config)?;

        if response.is_success() {
            Ok(response)
        } else {
            Err(HttpError::Status {
                status: response.status,
                status_text: response.status_text.clone(),
                response: Box::new(response),
            })
        }
    }

    /// Transport call bounded by the per-request timeout and the
    /// cancellation signal.
    async fn perform_bounded(
        &self,
        request: &TransportRequest,
        config: &RequestConfig,
        started: Instant,
    ) -> Result<RawResponse, HttpError> {
        let perform = async {
            match config.timeout {
                Some(limit) => match tokio::time::timeout(limit, self.transport.perform(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportFailure::TimedOut),
                },
                None => self.transport.perform(request).await,
            }
        };

        let result = match &config.cancel {
            Some(token) => tokio::select! {
                () = token.cancelled() => Err(TransportFailure::Cancelled),
                result = perform => result,
            },
            None => perform.await,
        };

        result.map_err(|failure| match failure {
            TransportFailure::Cancelled => HttpError::Aborted,
            TransportFailure::TimedOut => HttpError::Timeout {
                elapsed: started.elapsed(),
            },
            TransportFailure::Connect(message) | TransportFailure::Io(message) => {
                HttpError::Network { message }
            }
        })
    }

    /// Drives the response/error chains until the attempt settles.
    ///
    /// Every failure converges on the error chain; a response resolved by
    /// the error chain re-enters the response chain so downstream plugins
    /// observe it. A second resolution within the same attempt is returned
    /// directly, bounding the resolve/fail cycle.
    async fn converge(
        &self,
        mut flow: Flow,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> AttemptOutcome {
        let mut resolved_once = false;
        loop {
            match flow {
                Flow::Respond(response) => {
                    match self.run_response_chain(response, config, ctx).await {
                        Ok(response) => return AttemptOutcome::Done(Ok(response)),
                        Err(error) => flow = Flow::Fail(error),
                    }
                }
                Flow::Fail(error) => match self.run_error_chain(error, config, ctx).await {
                    ChainVerdict::Retry => return AttemptOutcome::Retry,
                    ChainVerdict::Resolved(response) => {
                        if resolved_once {
                            return AttemptOutcome::Done(Ok(response));
                        }
                        resolved_once = true;
                        flow = Flow::Respond(response);
                    }
                    ChainVerdict::Unresolved(error) => return AttemptOutcome::Done(Err(error)),
                },
            }
        }
    }

    async fn run_response_chain(
        &self,
        response: HttpResponse,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> Result<HttpResponse, HttpError> {
        let mut response = response;
        for plugin in &self.plugins {
            match plugin.on_response(response, config, ctx).await {
                Ok(next) => response = next,
                Err(error) => {
                    warn!(plugin = plugin.name(), error = %error, "response hook failed, entering error chain");
                    return Err(error);
                }
            }
        }
        Ok(response)
    }

    async fn run_error_chain(
        &self,
        error: HttpError,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> ChainVerdict {
        let mut current = error;
        for plugin in &self.plugins {
            match plugin.on_error(&current, config, ctx).await {
                Ok(ErrorDisposition::Unhandled) => {}
                Ok(ErrorDisposition::Retry) => {
                    debug!(plugin = plugin.name(), "plugin requested retry");
                    return ChainVerdict::Retry;
                }
                Ok(ErrorDisposition::Resolve(response)) => {
                    debug!(plugin = plugin.name(), "plugin resolved the error");
                    return ChainVerdict::Resolved(response);
                }
                Err(replacement) => {
                    warn!(
                        plugin = plugin.name(),
                        error = %replacement,
                        "error hook failed, replacing current error"
                    );
                    current = replacement;
                }
            }
        }
        ChainVerdict::Unresolved(current)
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decodes a raw transport result per the config's hint.
fn decode_response(raw: RawResponse, config: &RequestConfig) -> Result<HttpResponse, HttpError> {
    let RawResponse {
        status,
        status_text,
        headers,
        body,
    } = raw;

    let body = match config.decode {
        DecodeHint::Json => {
            if body.is_empty() {
                ResponseBody::Json(JsonValue::Null)
            } else {
                ResponseBody::Json(serde_json::from_slice(&body).map_err(|e| {
                    HttpError::Parse {
                        message: e.to_string(),
                    }
                })?)
            }
        }
        DecodeHint::Text => ResponseBody::Text(String::from_utf8(body).map_err(|e| {
            HttpError::Parse {
                message: e.to_string(),
            }
        })?),
        DecodeHint::Bytes => ResponseBody::Bytes(body),
    };

    Ok(HttpResponse::new(
        status,
        status_text,
        headers,
        body,
        config.clone(),
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::any::Any;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptTransport {
        script: Mutex<VecDeque<RawResponse>>,
        fallback: RawResponse,
        calls: AtomicUsize,
    }

    impl ScriptTransport {
        fn always(fallback: RawResponse) -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        fn script(responses: Vec<RawResponse>, fallback: RawResponse) -> Self {
            Self {
                script: Mutex::new(responses.into()),
                fallback,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptTransport {
        async fn perform(
            &self,
            _request: &TransportRequest,
        ) -> Result<RawResponse, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            Ok(next.unwrap_or_else(|| self.fallback.clone()))
        }
    }

    struct RecorderPlugin {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Plugin for RecorderPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        async fn on_request(
            &self,
            config: RequestConfig,
            _ctx: &PluginContext,
        ) -> Result<RequestConfig, HttpError> {
            self.log.lock().unwrap().push(format!("{}:request", self.name));
            Ok(config)
        }

        async fn on_response(
            &self,
            response: HttpResponse,
            _config: &RequestConfig,
            _ctx: &PluginContext,
        ) -> Result<HttpResponse, HttpError> {
            self.log.lock().unwrap().push(format!("{}:response", self.name));
            Ok(response)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct ShortCircuitPlugin;

    #[async_trait]
    impl Plugin for ShortCircuitPlugin {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn on_request(
            &self,
            config: RequestConfig,
            ctx: &PluginContext,
        ) -> Result<RequestConfig, HttpError> {
            let response = HttpResponse::new(
                200,
                "OK",
                BTreeMap::new(),
                ResponseBody::Json(json!({"from": "plugin"})),
                config.clone(),
            );
            ctx.resolve(response);
            Ok(config)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    /// Retries while the context counter is below the limit.
    struct RetryUpTo {
        limit: u32,
    }

    #[async_trait]
    impl Plugin for RetryUpTo {
        fn name(&self) -> &str {
            "retry-up-to"
        }

        async fn on_error(
            &self,
            _error: &HttpError,
            _config: &RequestConfig,
            ctx: &PluginContext,
        ) -> Result<ErrorDisposition, HttpError> {
            if ctx.attempts() < self.limit {
                ctx.record_attempt();
                return Ok(ErrorDisposition::Retry);
            }
            Ok(ErrorDisposition::Unhandled)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct FailingResponsePlugin;

    #[async_trait]
    impl Plugin for FailingResponsePlugin {
        fn name(&self) -> &str {
            "failing-response"
        }

        async fn on_response(
            &self,
            _response: HttpResponse,
            _config: &RequestConfig,
            _ctx: &PluginContext,
        ) -> Result<HttpResponse, HttpError> {
            Err(HttpError::Plugin {
                plugin: "failing-response".to_string(),
                message: "nope".to_string(),
            })
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    /// Resolves any error with a synthesized response, recording the code
    /// of the error it saw.
    struct ResolverPlugin {
        seen: Arc<Mutex<Vec<relay_core::ErrorCode>>>,
    }

    #[async_trait]
    impl Plugin for ResolverPlugin {
        fn name(&self) -> &str {
            "resolver"
        }

        async fn on_error(
            &self,
            error: &HttpError,
            config: &RequestConfig,
            _ctx: &PluginContext,
        ) -> Result<ErrorDisposition, HttpError> {
            self.seen.lock().unwrap().push(error.code());
            Ok(ErrorDisposition::Resolve(HttpResponse::new(
                200,
                "OK",
                BTreeMap::new(),
                ResponseBody::Json(json!({"resolved": true})),
                config.clone(),
            )))
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    struct ThrowingErrorPlugin;

    #[async_trait]
    impl Plugin for ThrowingErrorPlugin {
        fn name(&self) -> &str {
            "throwing-error"
        }

        async fn on_error(
            &self,
            _error: &HttpError,
            _config: &RequestConfig,
            _ctx: &PluginContext,
        ) -> Result<ErrorDisposition, HttpError> {
            Err(HttpError::Plugin {
                plugin: "throwing-error".to_string(),
                message: "replaced".to_string(),
            })
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn ok_transport() -> Arc<ScriptTransport> {
        Arc::new(ScriptTransport::always(RawResponse::ok_json(
            &json!({"data": "ok"}),
        )))
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = ok_transport();
        let mut pipeline = Pipeline::new(transport.clone());
        pipeline.register(Arc::new(RecorderPlugin {
            name: "a".to_string(),
            log: log.clone(),
        }));
        pipeline.register(Arc::new(RecorderPlugin {
            name: "b".to_string(),
            log: log.clone(),
        }));

        pipeline
            .run(RequestConfig::get("https://api.example.com"))
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:request", "b:request", "a:response", "b:response"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_transport() {
        let transport = ok_transport();
        let mut pipeline = Pipeline::new(transport.clone());
        pipeline.register(Arc::new(ShortCircuitPlugin));

        let response = pipeline
            .run(RequestConfig::get("https://api.example.com"))
            .await
            .unwrap();

        assert_eq!(transport.calls(), 0);
        assert_eq!(response.body.as_json(), Some(&json!({"from": "plugin"})));
    }

    #[tokio::test]
    async fn test_status_error_carries_response() {
        let transport = Arc::new(ScriptTransport::always(RawResponse::json(
            404,
            "Not Found",
            &json!({"error": "missing"}),
        )));
        let pipeline = Pipeline::new(transport);

        let error = pipeline
            .run(RequestConfig::get("https://api.example.com/missing"))
            .await
            .unwrap_err();

        assert_eq!(error.status(), Some(404));
        assert!(error.is_client_error());
        let response = error.response().unwrap();
        assert_eq!(response.body.as_json(), Some(&json!({"error": "missing"})));
    }

    #[tokio::test]
    async fn test_retry_reuses_context_until_limit() {
        let transport = Arc::new(ScriptTransport::always(RawResponse::json(
            500,
            "Internal Server Error",
            &json!({}),
        )));
        let mut pipeline = Pipeline::new(transport.clone());
        pipeline.register(Arc::new(RetryUpTo { limit: 2 }));

        let error = pipeline
            .run(RequestConfig::get("https://api.example.com"))
            .await
            .unwrap_err();

        // Initial attempt plus two retries.
        assert_eq!(transport.calls(), 3);
        assert_eq!(error.status(), Some(500));
    }

    #[tokio::test]
    async fn test_error_hook_failure_replaces_current_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(ScriptTransport::always(RawResponse::json(
            500,
            "Internal Server Error",
            &json!({}),
        )));
        let mut pipeline = Pipeline::new(transport);
        pipeline.register(Arc::new(ThrowingErrorPlugin));
        pipeline.register(Arc::new(ResolverPlugin { seen: seen.clone() }));

        let response = pipeline
            .run(RequestConfig::get("https://api.example.com"))
            .await
            .unwrap();

        assert_eq!(response.body.as_json(), Some(&json!({"resolved": true})));
        // The resolver saw the replacement error, not the original status.
        assert_eq!(seen.lock().unwrap()[0], relay_core::ErrorCode::Plugin);
    }

    #[tokio::test]
    async fn test_response_hook_failure_converges_on_error_chain() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let transport = ok_transport();
        let mut pipeline = Pipeline::new(transport.clone());
        pipeline.register(Arc::new(FailingResponsePlugin));
        pipeline.register(Arc::new(ResolverPlugin { seen: seen.clone() }));

        let response = pipeline
            .run(RequestConfig::get("https://api.example.com"))
            .await
            .unwrap();

        // The resolved response re-enters the response chain, fails again,
        // and the second resolution is returned directly.
        assert_eq!(response.body.as_json(), Some(&json!({"resolved": true})));
        assert_eq!(transport.calls(), 1);
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_plugin_keeps_first() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(ok_transport());
        pipeline.register(Arc::new(RecorderPlugin {
            name: "dup".to_string(),
            log: log.clone(),
        }));
        pipeline.register(Arc::new(RecorderPlugin {
            name: "dup".to_string(),
            log: log.clone(),
        }));

        assert_eq!(pipeline.plugins().len(), 1);
    }

    #[tokio::test]
    async fn test_parse_error_for_invalid_json() {
        let transport = Arc::new(ScriptTransport::always(RawResponse {
            status: 200,
            status_text: "OK".to_string(),
            headers: BTreeMap::new(),
            body: b"not json".to_vec(),
        }));
        let pipeline = Pipeline::new(transport);

        let error = pipeline
            .run(RequestConfig::get("https://api.example.com"))
            .await
            .unwrap_err();

        assert_eq!(error.code(), relay_core::ErrorCode::Parse);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_request_timeout() {
        struct HangingTransport;

        #[async_trait]
        impl Transport for HangingTransport {
            async fn perform(
                &self,
                _request: &TransportRequest,
            ) -> Result<RawResponse, TransportFailure> {
                tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                unreachable!("the pipeline timeout fires first")
            }
        }

        let pipeline = Pipeline::new(Arc::new(HangingTransport));
        let config = RequestConfig::get("https://api.example.com")
            .with_timeout(std::time::Duration::from_secs(5));

        let error = pipeline.run(config).await.unwrap_err();
        assert_eq!(error.code(), relay_core::ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_cancellation_maps_to_abort() {
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();

        let transport = ok_transport();
        let pipeline = Pipeline::new(transport.clone());
        let config = RequestConfig::get("https://api.example.com").with_cancel(token);

        let error = pipeline.run(config).await.unwrap_err();
        assert_eq!(error.code(), relay_core::ErrorCode::Abort);
        assert_eq!(transport.calls(), 0);
    }
}
