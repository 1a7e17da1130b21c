//! Plugin contract for the request pipeline.
//!
//! A plugin implements any subset of the three hooks; unimplemented hooks
//! default to pass-through. Hooks run in plugin-registration order on the
//! request path and in the same order on the response and error paths,
//! which keeps composition predictable for stateful plugins: the cache
//! observes the final response after retry has already resolved it.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;

use relay_core::{HttpError, HttpResponse, PluginContext, RequestConfig};

// ============================================================================
// Error Disposition
// ============================================================================

/// What an `on_error` hook decided about the current error.
#[derive(Debug)]
pub enum ErrorDisposition {
    /// Pass the current error to the next plugin unchanged.
    Unhandled,
    /// Ask the pipeline to re-run the whole request with the same context.
    Retry,
    /// Resolve the error with a response; it re-enters the response chain
    /// so downstream plugins observe it.
    Resolve(HttpResponse),
}

// ============================================================================
// Plugin Trait
// ============================================================================

/// A pipeline extension.
///
/// ## Implementing a Plugin
///
/// ```ignore
/// struct HeaderPlugin;
///
/// #[async_trait]
/// impl Plugin for HeaderPlugin {
///     fn name(&self) -> &str {
///         "header"
///     }
///
///     async fn on_request(
///         &self,
///         config: RequestConfig,
///         _ctx: &PluginContext,
///     ) -> Result<RequestConfig, HttpError> {
///         Ok(config.with_header("x-request-source", "relay"))
///     }
///
///     fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
///         self
///     }
/// }
/// ```
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique name for this plugin; duplicate registrations are skipped.
    fn name(&self) -> &str;

    /// Called before the transport, in registration order.
    ///
    /// Receives the current config and returns a (possibly new) one. A
    /// plugin may resolve the call without the transport being invoked by
    /// setting [`PluginContext::resolve`]. Returning an error aborts the
    /// remaining request chain and enters the error path.
    async fn on_request(
        &self,
        config: RequestConfig,
        ctx: &PluginContext,
    ) -> Result<RequestConfig, HttpError> {
        let _ = ctx;
        Ok(config)
    }

    /// Called after a successful exchange, in registration order.
    ///
    /// An error returned here is routed into the error chain; every
    /// failure path converges on `on_error` before surfacing.
    async fn on_response(
        &self,
        response: HttpResponse,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> Result<HttpResponse, HttpError> {
        let _ = (config, ctx);
        Ok(response)
    }

    /// Called for every failure, in registration order.
    ///
    /// Returning an error makes that error the current one for the next
    /// plugin in the chain.
    async fn on_error(
        &self,
        error: &HttpError,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> Result<ErrorDisposition, HttpError> {
        let _ = (error, config, ctx);
        Ok(ErrorDisposition::Unhandled)
    }

    /// Upcast for the client's typed capability accessor.
    ///
    /// Implementations return `self`.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::Method;

    struct NoopPlugin;

    #[async_trait]
    impl Plugin for NoopPlugin {
        fn name(&self) -> &str {
            "noop"
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    #[tokio::test]
    async fn test_default_hooks_pass_through() {
        let plugin = NoopPlugin;
        let ctx = PluginContext::new();

        let config = RequestConfig::get("https://api.example.com").with_query("a", "1");
        let out = plugin.on_request(config, &ctx).await.unwrap();
        assert_eq!(out.method, Method::Get);
        assert_eq!(out.query.get("a").map(String::as_str), Some("1"));

        let disposition = plugin
            .on_error(&HttpError::Aborted, &out, &ctx)
            .await
            .unwrap();
        assert!(matches!(disposition, ErrorDisposition::Unhandled));
    }
}
