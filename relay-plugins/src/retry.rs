//! Retry controller plugin.
//!
//! `on_error` classifies the failure, suspends for the configured
//! backoff, increments the attempt counter on the shared call context,
//! and asks the pipeline to re-run the request. Because the pipeline
//! reuses the same [`PluginContext`] on re-entry, the counter survives
//! across retries of one logical call while staying isolated from
//! unrelated concurrent calls.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use relay_client::{ErrorDisposition, Plugin};
use relay_core::{ErrorCode, HttpError, Method, PluginContext, RequestConfig};

// ============================================================================
// Backoff
// ============================================================================

/// Retry delay growth function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// `base * 2^attempt`.
    #[default]
    Exponential,
    /// `base * (attempt + 1)`.
    Linear,
}

// ============================================================================
// Retry Config
// ============================================================================

/// Configuration for the retry controller.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retry ceiling; the transport is invoked at most `max_retries + 1`
    /// times per logical call.
    pub max_retries: u32,
    /// Base backoff delay.
    pub base_delay: Duration,
    /// Delay growth function.
    pub backoff: Backoff,
    /// Statuses eligible for retry.
    pub retry_statuses: Vec<u16>,
    /// Methods eligible for retry (safe and idempotent by default).
    pub methods: Vec<Method>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(300),
            backoff: Backoff::default(),
            retry_statuses: vec![408, 429, 500, 502, 503, 504],
            methods: vec![
                Method::Get,
                Method::Head,
                Method::Options,
                Method::Put,
                Method::Delete,
            ],
        }
    }
}

impl RetryConfig {
    /// Sets the retry ceiling.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base delay.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Sets the delay growth function.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the retryable statuses.
    pub fn with_retry_statuses(mut self, retry_statuses: Vec<u16>) -> Self {
        self.retry_statuses = retry_statuses;
        self
    }

    /// Sets the retryable methods.
    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }
}

// ============================================================================
// Retry Plugin
// ============================================================================

/// Caller-supplied retryability predicate; takes precedence over the
/// status allow-list and error-code classification.
pub type RetryPredicate = dyn Fn(&HttpError) -> bool + Send + Sync;

/// Observer invoked before each backoff suspend with the attempt number,
/// the error, and the chosen delay. Fire-and-forget.
pub type RetryObserver = dyn Fn(u32, &HttpError, Duration) + Send + Sync;

/// Backoff-driven retry controller.
pub struct RetryPlugin {
    config: RetryConfig,
    predicate: Option<Arc<RetryPredicate>>,
    observer: Option<Arc<RetryObserver>>,
}

impl RetryPlugin {
    /// Creates a retry controller with the given configuration.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            predicate: None,
            observer: None,
        }
    }

    /// Replaces the default retryability classification.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&HttpError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Registers an observer called before each backoff suspend.
    pub fn with_observer(
        mut self,
        observer: impl Fn(u32, &HttpError, Duration) + Send + Sync + 'static,
    ) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Computes the delay for the given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.config.backoff {
            Backoff::Exponential => self
                .config
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt)),
            Backoff::Linear => self
                .config
                .base_delay
                .saturating_mul(attempt.saturating_add(1)),
        }
    }

    fn is_retryable(&self, error: &HttpError) -> bool {
        if let Some(predicate) = &self.predicate {
            return predicate(error);
        }
        if let Some(status) = error.status() {
            return self.config.retry_statuses.contains(&status);
        }
        matches!(error.code(), ErrorCode::Network | ErrorCode::Timeout)
    }
}

impl Default for RetryPlugin {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[async_trait]
impl Plugin for RetryPlugin {
    fn name(&self) -> &str {
        "retry"
    }

    async fn on_error(
        &self,
        error: &HttpError,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> Result<ErrorDisposition, HttpError> {
        let attempt = ctx.attempts();
        if attempt >= self.config.max_retries {
            debug!(attempt, "retry ceiling reached");
            return Ok(ErrorDisposition::Unhandled);
        }
        if !self.config.methods.contains(&config.method) {
            debug!(method = %config.method, "method not eligible for retry");
            return Ok(ErrorDisposition::Unhandled);
        }
        if !self.is_retryable(error) {
            return Ok(ErrorDisposition::Unhandled);
        }

        let delay = self.delay_for_attempt(attempt);
        if let Some(observer) = &self.observer {
            observer(attempt, error, delay);
        }
        warn!(attempt, delay = ?delay, error = %error, "retrying after backoff");
        tokio::time::sleep(delay).await;
        ctx.record_attempt();
        Ok(ErrorDisposition::Retry)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
