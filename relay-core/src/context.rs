//! Per-call plugin context.
//!
//! A [`PluginContext`] is created once per caller-initiated call and
//! reused, never recreated, across retry re-entries of that call. This is
//! what lets the retry counter and plugin scratch state persist across
//! attempts while staying isolated from unrelated concurrent calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value as JsonValue;

use crate::response::HttpResponse;

// ============================================================================
// Resolution
// ============================================================================

/// How the current attempt should proceed after the request chain.
///
/// This is the explicit side channel a plugin uses to resolve a call
/// without the transport being invoked (cache hit, mock). The pipeline
/// inspects it structurally right after the request chain completes.
#[derive(Debug, Default)]
pub enum Resolution {
    /// Proceed to the transport.
    #[default]
    Continue,
    /// Return the carried response without touching the transport.
    ShortCircuit(HttpResponse),
}

// ============================================================================
// Plugin Context
// ============================================================================

/// Mutable per-logical-call state, distinct from the request config.
///
/// Concurrent calls never share a context. All interior mutability is
/// thread-safe: the cooperative single-thread model of the original design
/// does not hold on a multi-threaded runtime.
#[derive(Debug, Default)]
pub struct PluginContext {
    attempts: AtomicU32,
    resolution: Mutex<Resolution>,
    values: Mutex<HashMap<String, JsonValue>>,
}

// Context data stays valid across a poisoned lock; recover the guard.
fn recover<'a, T>(
    result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>,
) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl PluginContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of retries recorded so far (0 on the first
    /// attempt).
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Records a retry decision, returning the updated count.
    pub fn record_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Resolves the current attempt with the given response, bypassing
    /// the transport.
    pub fn resolve(&self, response: HttpResponse) {
        *recover(self.resolution.lock()) = Resolution::ShortCircuit(response);
    }

    /// Takes the current resolution, resetting it to [`Resolution::Continue`]
    /// so a retry re-entry starts clean.
    pub fn take_resolution(&self) -> Resolution {
        std::mem::take(&mut *recover(self.resolution.lock()))
    }

    /// Stores a plugin scratch value under the given key.
    ///
    /// Keys are namespaced by convention (e.g. `cache.key`).
    pub fn set_value(&self, key: impl Into<String>, value: JsonValue) {
        recover(self.values.lock()).insert(key.into(), value);
    }

    /// Returns a clone of the scratch value under the given key.
    pub fn value(&self, key: &str) -> Option<JsonValue> {
        recover(self.values.lock()).get(key).cloned()
    }

    /// Removes and returns the scratch value under the given key.
    pub fn take_value(&self, key: &str) -> Option<JsonValue> {
        recover(self.values.lock()).remove(key)
    }
}

// ============================================================================
// Tests
// ============================================================================
