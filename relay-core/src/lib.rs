// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Relay Core
//!
//! Core types for the `relay` HTTP client pipeline.
//!
//! This crate provides the data model shared by the pipeline engine and
//! all plugins:
//!
//! - [`RequestConfig`] - value-type description of one outbound call
//! - [`HttpResponse`] / [`ResponseBody`] - decoded responses
//! - [`PluginContext`] / [`Resolution`] - per-call state surviving retries
//! - [`HttpError`] / [`ErrorCode`] - the error taxonomy
//!
//! ## Key Invariants
//!
//! - Configs are value types: every mutation produces a new config, never
//!   a shared reference another in-flight call can observe.
//! - A context is created once per caller-initiated call and reused across
//!   retry re-entries of that call; concurrent calls never share one.
//! - The [`HttpError`] variant is the canonical retryability signal; there
//!   is no string-code fallback.

pub mod config;
pub mod context;
pub mod error;
pub mod response;

// Re-export the data model at the crate root
pub use config::{DecodeHint, Method, RequestConfig};
pub use context::{PluginContext, Resolution};
pub use error::{ErrorCode, HttpError};
pub use response::{HttpResponse, ResponseBody};
