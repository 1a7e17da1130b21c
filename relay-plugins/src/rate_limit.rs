//! Sliding-window rate limiter plugin.
//!
//! `on_request` blocks until admission: requests within the trailing
//! window are counted, and callers over the limit wait in a FIFO queue
//! released by a drain task when the oldest admission leaves the window.
//! The window and queue are shared across every call through one plugin
//! instance; all mutations happen under a single mutex so no interleaving
//! can exceed the configured limit.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use relay_client::Plugin;
use relay_core::{HttpError, PluginContext, RequestConfig};

/// Guard against the drain timer waking one tick before the oldest
/// timestamp has actually expired.
const DRAIN_BUFFER: Duration = Duration::from_millis(5);

// ============================================================================
// Rate Limit Config
// ============================================================================

/// Configuration for the rate limiter plugin.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Admissions allowed within the trailing window.
    pub max_requests: usize,
    /// Length of the sliding window.
    pub window: Duration,
    /// Whether denied callers queue instead of failing fast.
    pub queue: bool,
    /// Maximum queued callers before failing fast.
    pub max_queue: usize,
    /// How long a queued caller waits before giving up.
    pub max_queue_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(1),
            queue: true,
            max_queue: 100,
            max_queue_wait: Duration::from_secs(30),
        }
    }
}

impl RateLimitConfig {
    /// Sets the admission limit per window.
    pub fn with_max_requests(mut self, max_requests: usize) -> Self {
        self.max_requests = max_requests;
        self
    }

    /// Sets the window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Disables queuing; denied callers fail fast.
    pub fn without_queue(mut self) -> Self {
        self.queue = false;
        self
    }

    /// Sets the maximum queue depth.
    pub fn with_max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }

    /// Sets the queued-caller timeout.
    pub fn with_max_queue_wait(mut self, max_queue_wait: Duration) -> Self {
        self.max_queue_wait = max_queue_wait;
        self
    }
}

// ============================================================================
// Rate Limit Stats
// ============================================================================

/// Snapshot reported by [`RateLimitPlugin::stats`].
#[derive(Debug, Clone)]
pub struct RateLimitStats {
    /// Admissions currently inside the window.
    pub request_count: usize,
    /// Callers waiting in the queue.
    pub queue_size: usize,
    /// Admission timestamps inside the window, oldest first.
    pub timestamps: Vec<Instant>,
}

// ============================================================================
// State
// ============================================================================

struct LimiterState {
    timestamps: VecDeque<Instant>,
    queue: VecDeque<oneshot::Sender<()>>,
    drain_armed: bool,
}

impl LimiterState {
    fn new() -> Self {
        Self {
            timestamps: VecDeque::new(),
            queue: VecDeque::new(),
            drain_armed: false,
        }
    }
}

fn lock(state: &Mutex<LimiterState>) -> MutexGuard<'_, LimiterState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn prune(timestamps: &mut VecDeque<Instant>, window: Duration) {
    while timestamps
        .front()
        .is_some_and(|oldest| oldest.elapsed() > window)
    {
        timestamps.pop_front();
    }
}

// ============================================================================
// Rate Limit Plugin
// ============================================================================

/// Sliding-window admission control with a FIFO overflow queue.
pub struct RateLimitPlugin {
    config: RateLimitConfig,
    state: Arc<Mutex<LimiterState>>,
}

impl RateLimitPlugin {
    /// Creates a rate limiter with the given configuration.
    pub fn new(config: RateLimitConfig) -> Self {
        debug!(
            max_requests = config.max_requests,
            window = ?config.window,
            "creating rate limiter"
        );
        Self {
            config,
            state: Arc::new(Mutex::new(LimiterState::new())),
        }
    }

    /// Returns the current window and queue occupancy.
    pub fn stats(&self) -> RateLimitStats {
        let mut state = lock(&self.state);
        prune(&mut state.timestamps, self.config.window);
        RateLimitStats {
            request_count: state.timestamps.len(),
            queue_size: state.queue.len(),
            timestamps: state.timestamps.iter().copied().collect(),
        }
    }

    /// Clears the window and immediately admits queued callers into the
    /// freed slots.
    pub fn reset(&self) {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.timestamps.clear();
        admit_queued(state, self.config.max_requests);
        info!("rate limiter reset");
    }
}

impl Default for RateLimitPlugin {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Admits queue heads while slots remain. A dropped receiver (a caller
/// that gave up waiting) consumes no slot.
fn admit_queued(state: &mut LimiterState, max_requests: usize) {
    while state.timestamps.len() < max_requests {
        let Some(sender) = state.queue.pop_front() else {
            break;
        };
        if sender.send(()).is_ok() {
            state.timestamps.push_back(Instant::now());
        }
    }
}

/// Drains the queue each time the oldest admission leaves the window,
/// re-arming until the queue is empty.
async fn drain_loop(state: Arc<Mutex<LimiterState>>, config: RateLimitConfig) {
    loop {
        let wake_at = {
            let guard = lock(&state);
            guard
                .timestamps
                .front()
                .map_or_else(Instant::now, |oldest| *oldest + config.window + DRAIN_BUFFER)
        };
        tokio::time::sleep_until(wake_at).await;

        let mut guard = lock(&state);
        let state_ref = &mut *guard;
        prune(&mut state_ref.timestamps, config.window);
        admit_queued(state_ref, config.max_requests);
        debug!(
            admitted_window = state_ref.timestamps.len(),
            queued = state_ref.queue.len(),
            "drained rate-limit queue"
        );
        if state_ref.queue.is_empty() {
            state_ref.drain_armed = false;
            return;
        }
    }
}

#[async_trait]
impl Plugin for RateLimitPlugin {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn on_request(
        &self,
        config: RequestConfig,
        _ctx: &PluginContext,
    ) -> Result<RequestConfig, HttpError> {
        let receiver = {
            let mut guard = lock(&self.state);
            let state = &mut *guard;
            prune(&mut state.timestamps, self.config.window);

            if state.timestamps.len() < self.config.max_requests {
                state.timestamps.push_back(Instant::now());
                return Ok(config);
            }

            if !self.config.queue || state.queue.len() >= self.config.max_queue {
                warn!(queue_depth = state.queue.len(), "admission denied");
                return Err(HttpError::RateLimited {
                    queue_depth: state.queue.len(),
                });
            }

            let (sender, receiver) = oneshot::channel();
            state.queue.push_back(sender);
            debug!(queue_depth = state.queue.len(), "queued for admission");
            if !state.drain_armed {
                state.drain_armed = true;
                tokio::spawn(drain_loop(Arc::clone(&self.state), self.config.clone()));
            }
            receiver
        };

        match tokio::time::timeout(self.config.max_queue_wait, receiver).await {
            Ok(Ok(())) => Ok(config),
            Ok(Err(_)) | Err(_) => {
                let queue_depth = lock(&self.state).queue.len();
                warn!(queue_depth, "gave up waiting for admission");
                Err(HttpError::RateLimited { queue_depth })
            }
        }
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
