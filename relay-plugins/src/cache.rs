//! Response cache plugin.
//!
//! `on_request` consults the store and short-circuits the transport on a
//! hit; `on_response` populates it. Expiry is lazy (checked on read and
//! write), with an optional background sweep bounding growth from
//! write-once keys. Capacity eviction picks the entry with the lowest hit
//! count, tie-broken by oldest insertion.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use relay_client::Plugin;
use relay_core::{HttpError, HttpResponse, Method, PluginContext, RequestConfig};

/// Context scratch key carrying the cache key from `on_request` to
/// `on_response`.
const KEY_FIELD: &str = "cache.key";

/// Upper bound on the background sweep interval.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// Cache Config
// ============================================================================

/// Configuration for the cache plugin.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry stays fresh.
    pub ttl: Duration,
    /// Maximum number of entries before eviction.
    pub max_entries: usize,
    /// Methods eligible for caching.
    pub methods: Vec<Method>,
    /// Whether to run the periodic expiry sweep.
    pub sweep: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 100,
            methods: vec![Method::Get, Method::Head],
            sweep: false,
        }
    }
}

impl CacheConfig {
    /// Sets the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Sets the capacity.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the cacheable methods.
    pub fn with_methods(mut self, methods: Vec<Method>) -> Self {
        self.methods = methods;
        self
    }

    /// Enables the periodic expiry sweep.
    pub fn with_sweep(mut self) -> Self {
        self.sweep = true;
        self
    }
}

// ============================================================================
// Cache Stats
// ============================================================================

/// Counters reported by [`CachePlugin::stats`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Requests answered from the store.
    pub hits: u64,
    /// Requests that went to the transport.
    pub misses: u64,
    /// Current number of entries.
    pub size: usize,
    /// hits / (hits + misses), 0.0 before any lookup.
    pub hit_rate: f64,
}

// ============================================================================
// Store
// ============================================================================

/// One cached response.
#[derive(Debug, Clone)]
struct CacheEntry {
    response: HttpResponse,
    inserted_at: Instant,
    hits: u64,
    url: String,
}

#[derive(Debug, Default)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

fn lock(store: &Mutex<CacheStore>) -> MutexGuard<'_, CacheStore> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Cache Plugin
// ============================================================================

/// Signature of a caller-supplied cache key function.
pub type KeyFn = dyn Fn(&RequestConfig) -> String + Send + Sync;

/// TTL + capacity-bounded response cache.
///
/// ## Example
///
/// ```ignore
/// let client = Client::builder()
///     .plugin(CachePlugin::new(
///         CacheConfig::default().with_ttl(Duration::from_secs(60)),
///     ))
///     .build()?;
///
/// let stats = client.capability::<CachePlugin>("cache").unwrap().stats();
/// ```
pub struct CachePlugin {
    config: CacheConfig,
    key_fn: Option<Arc<KeyFn>>,
    store: Arc<Mutex<CacheStore>>,
    sweeper: Once,
}

impl CachePlugin {
    /// Creates a cache plugin with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        debug!(
            ttl = ?config.ttl,
            max_entries = config.max_entries,
            "creating cache plugin"
        );
        Self {
            config,
            key_fn: None,
            store: Arc::new(Mutex::new(CacheStore::default())),
            sweeper: Once::new(),
        }
    }

    /// Replaces the default key derivation.
    pub fn with_key_fn(
        mut self,
        key_fn: impl Fn(&RequestConfig) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    fn key_for(&self, config: &RequestConfig) -> String {
        match &self.key_fn {
            Some(key_fn) => key_fn(config),
            None => default_key(config),
        }
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut store = lock(&self.store);
        let cleared = store.entries.len();
        store.entries.clear();
        info!(cleared, "cleared cache");
    }

    /// Removes entries whose key or URL contains the given substring.
    /// Returns the number removed.
    pub fn invalidate(&self, pattern: &str) -> usize {
        let mut store = lock(&self.store);
        let before = store.entries.len();
        store
            .entries
            .retain(|key, entry| !key.contains(pattern) && !entry.url.contains(pattern));
        let removed = before - store.entries.len();
        debug!(pattern, removed, "invalidated cache entries");
        removed
    }

    /// Removes entries whose key or URL matches the given pattern.
    /// Returns the number removed.
    pub fn invalidate_matching(&self, pattern: &Regex) -> usize {
        let mut store = lock(&self.store);
        let before = store.entries.len();
        store
            .entries
            .retain(|key, entry| !pattern.is_match(key) && !pattern.is_match(&entry.url));
        let removed = before - store.entries.len();
        debug!(pattern = %pattern, removed, "invalidated cache entries");
        removed
    }

    /// Returns hit/miss counters and the current size.
    pub fn stats(&self) -> CacheStats {
        let store = lock(&self.store);
        let lookups = store.hits + store.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            store.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: store.hits,
            misses: store.misses,
            size: store.entries.len(),
            hit_rate,
        }
    }

    /// Returns the current number of entries.
    pub fn len(&self) -> usize {
        lock(&self.store).entries.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the periodic sweep on first use, if configured.
    ///
    /// Spawning is deferred to the first hook call so constructing the
    /// plugin does not require a runtime.
    fn ensure_sweeper(&self) {
        if !self.config.sweep {
            return;
        }
        self.sweeper.call_once(|| {
            let store = Arc::downgrade(&self.store);
            let ttl = self.config.ttl;
            tokio::spawn(sweep_loop(store, ttl, ttl.min(MAX_SWEEP_INTERVAL)));
        });
    }
}

impl Default for CachePlugin {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

/// Default key: `METHOD:URL:serialized(query)`.
///
/// Query parameters live in a `BTreeMap`, so serialization order is
/// stable regardless of insertion order.
fn default_key(config: &RequestConfig) -> String {
    let query = serde_json::to_string(&config.query).unwrap_or_default();
    format!("{}:{}:{}", config.method, config.url, query)
}

/// Periodic expiry sweep. Holds only a weak reference so a dropped
/// plugin stops its sweeper.
async fn sweep_loop(store: Weak<Mutex<CacheStore>>, ttl: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(store) = store.upgrade() else { return };
        let mut store = lock(&store);
        let before = store.entries.len();
        store
            .entries
            .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
        let removed = before - store.entries.len();
        if removed > 0 {
            debug!(removed, remaining = store.entries.len(), "swept expired cache entries");
        }
    }
}

#[async_trait]
impl Plugin for CachePlugin {
    fn name(&self) -> &str {
        "cache"
    }

    async fn on_request(
        &self,
        config: RequestConfig,
        ctx: &PluginContext,
    ) -> Result<RequestConfig, HttpError> {
        if !self.config.methods.contains(&config.method) {
            return Ok(config);
        }
        self.ensure_sweeper();

        let key = self.key_for(&config);
        let mut guard = lock(&self.store);
        let store = &mut *guard;

        // Lazy expiry on read.
        if store
            .entries
            .get(&key)
            .is_some_and(|entry| entry.inserted_at.elapsed() > self.config.ttl)
        {
            debug!(key = %key, "dropping expired entry");
            store.entries.remove(&key);
        }

        if let Some(entry) = store.entries.get_mut(&key) {
            entry.hits += 1;
            store.hits += 1;
            let response = entry.response.clone();
            drop(guard);
            debug!(key = %key, "cache hit");
            ctx.resolve(response);
            return Ok(config);
        }

        store.misses += 1;
        drop(guard);
        debug!(key = %key, "cache miss");
        ctx.set_value(KEY_FIELD, JsonValue::String(key));
        Ok(config)
    }

    async fn on_response(
        &self,
        response: HttpResponse,
        config: &RequestConfig,
        ctx: &PluginContext,
    ) -> Result<HttpResponse, HttpError> {
        // No key attached: excluded method, custom-key overlap, or a
        // response some other plugin resolved before our on_request ran.
        let Some(JsonValue::String(key)) = ctx.take_value(KEY_FIELD) else {
            return Ok(response);
        };

        let mut guard = lock(&self.store);
        let store = &mut *guard;

        if !store.entries.contains_key(&key) && store.entries.len() >= self.config.max_entries {
            // Lazy expiry on write, then capacity eviction.
            let ttl = self.config.ttl;
            store
                .entries
                .retain(|_, entry| entry.inserted_at.elapsed() <= ttl);
            if store.entries.len() >= self.config.max_entries {
                if let Some(victim) = store
                    .entries
                    .iter()
                    .min_by_key(|(_, entry)| (entry.hits, entry.inserted_at))
                    .map(|(key, _)| key.clone())
                {
                    debug!(key = %victim, "evicting least-reused entry");
                    store.entries.remove(&victim);
                }
            }
        }

        debug!(key = %key, "storing response");
        store.entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                inserted_at: Instant::now(),
                // The write itself counts as a use.
                hits: 1,
                url: config.url.clone(),
            },
        );
        Ok(response)
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Resolution, ResponseBody};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config_for(url: &str) -> RequestConfig {
        RequestConfig::get(url)
    }

    /// Simulates a miss followed by the transport answering, feeding the
    /// response back through `on_response`.
    async fn prime(plugin: &CachePlugin, url: &str) {
        let ctx = PluginContext::new();
        let config = plugin.on_request(config_for(url), &ctx).await.unwrap();
        assert!(matches!(ctx.take_resolution(), Resolution::Continue));
        let response = HttpResponse::new(
            200,
            "OK",
            BTreeMap::new(),
            ResponseBody::Json(json!({"url": url})),
            config.clone(),
        );
        plugin.on_response(response, &config, &ctx).await.unwrap();
    }

    /// Runs `on_request` and returns the short-circuited response, if any.
    async fn look_up(plugin: &CachePlugin, url: &str) -> Option<HttpResponse> {
        let ctx = PluginContext::new();
        plugin.on_request(config_for(url), &ctx).await.unwrap();
        match ctx.take_resolution() {
            Resolution::ShortCircuit(response) => Some(response),
            Resolution::Continue => None,
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let plugin = CachePlugin::default();
        assert!(look_up(&plugin, "https://api.example.com/a").await.is_none());

        prime(&plugin, "https://api.example.com/a").await;
        let hit = look_up(&plugin, "https://api.example.com/a").await.unwrap();
        assert_eq!(
            hit.body.as_json(),
            Some(&json!({"url": "https://api.example.com/a"}))
        );

        let stats = plugin.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn test_excluded_method_passes_through() {
        let plugin = CachePlugin::default();
        let ctx = PluginContext::new();
        let config = RequestConfig::post("https://api.example.com/a", json!({}));
        plugin.on_request(config, &ctx).await.unwrap();

        assert!(matches!(ctx.take_resolution(), Resolution::Continue));
        assert_eq!(ctx.value(KEY_FIELD), None);
        assert_eq!(plugin.stats().misses, 0);
    }

    #[tokio::test]
    async fn test_query_affects_default_key() {
        let plugin = CachePlugin::default();
        let ctx = PluginContext::new();
        let config = config_for("https://api.example.com/a").with_query("page", "1");
        plugin.on_request(config, &ctx).await.unwrap();

        let Some(JsonValue::String(key)) = ctx.value(KEY_FIELD) else {
            panic!("expected a stashed cache key");
        };
        assert_eq!(key, "GET:https://api.example.com/a:{\"page\":\"1\"}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry_is_lazy() {
        let plugin = CachePlugin::new(CacheConfig::default().with_ttl(Duration::from_secs(30)));
        prime(&plugin, "https://api.example.com/a").await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(look_up(&plugin, "https://api.example.com/a").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(look_up(&plugin, "https://api.example.com/a").await.is_none());
        // The expired entry was dropped on read.
        assert_eq!(plugin.len(), 0);
    }

    #[tokio::test]
    async fn test_eviction_prefers_lowest_hit_count() {
        let plugin = CachePlugin::new(CacheConfig::default().with_max_entries(2));
        prime(&plugin, "https://api.example.com/a").await;
        prime(&plugin, "https://api.example.com/b").await;
        // One read moves `a` to two uses; `b` stays at one.
        assert!(look_up(&plugin, "https://api.example.com/a").await.is_some());

        prime(&plugin, "https://api.example.com/c").await;

        assert!(look_up(&plugin, "https://api.example.com/a").await.is_some());
        assert!(look_up(&plugin, "https://api.example.com/c").await.is_some());
        assert!(look_up(&plugin, "https://api.example.com/b").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_ties_break_by_age() {
        let plugin = CachePlugin::new(CacheConfig::default().with_max_entries(2));
        prime(&plugin, "https://api.example.com/a").await;
        tokio::time::advance(Duration::from_millis(10)).await;
        prime(&plugin, "https://api.example.com/b").await;

        // Both sit at one use; the older entry goes.
        prime(&plugin, "https://api.example.com/c").await;
        assert!(look_up(&plugin, "https://api.example.com/a").await.is_none());
        assert!(look_up(&plugin, "https://api.example.com/b").await.is_some());
    }

    #[tokio::test]
    async fn test_invalidate_by_substring_and_pattern() {
        let plugin = CachePlugin::default();
        prime(&plugin, "https://api.example.com/items/1").await;
        prime(&plugin, "https://api.example.com/items/2").await;
        prime(&plugin, "https://api.example.com/users/1").await;

        assert_eq!(plugin.invalidate("/items/"), 2);
        assert_eq!(plugin.len(), 1);

        let pattern = Regex::new(r"/users/\d+$").unwrap();
        assert_eq!(plugin.invalidate_matching(&pattern), 1);
        assert!(plugin.is_empty());
    }

    #[tokio::test]
    async fn test_clear_empties_store() {
        let plugin = CachePlugin::default();
        prime(&plugin, "https://api.example.com/a").await;
        prime(&plugin, "https://api.example.com/b").await;
        plugin.clear();
        assert!(plugin.is_empty());
    }

    #[tokio::test]
    async fn test_custom_key_fn() {
        let plugin = CachePlugin::default().with_key_fn(|config| {
            // Collapse every URL under one key.
            format!("{}", config.method)
        });
        prime(&plugin, "https://api.example.com/a").await;
        assert!(look_up(&plugin, "https://api.example.com/b").await.is_some());
    }
}
