// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Relay Plugins
//!
//! The stateful plugins bundled with `relay`:
//!
//! - [`CachePlugin`] - TTL response cache with least-reused eviction
//! - [`RateLimitPlugin`] - sliding-window admission with a FIFO queue
//! - [`RetryPlugin`] - retryability classification and backoff
//!
//! Each plugin exposes an administrative surface reachable through the
//! client's typed capability accessor:
//!
//! ```ignore
//! use relay_client::Client;
//! use relay_plugins::{CacheConfig, CachePlugin, RetryConfig, RetryPlugin};
//!
//! let client = Client::builder()
//!     .plugin(CachePlugin::new(CacheConfig::default()))
//!     .plugin(RetryPlugin::new(RetryConfig::default()))
//!     .build()?;
//!
//! let cache = client.capability::<CachePlugin>("cache").unwrap();
//! println!("hit rate: {}", cache.stats().hit_rate);
//! ```
//!
//! Registration order matters: register the cache before the retry
//! controller so the cache observes the final response after retry has
//! already resolved it.

pub mod cache;
pub mod rate_limit;
pub mod retry;

pub use cache::{CacheConfig, CachePlugin, CacheStats};
pub use rate_limit::{RateLimitConfig, RateLimitPlugin, RateLimitStats};
pub use retry::{Backoff, RetryConfig, RetryPlugin};
