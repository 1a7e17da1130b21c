// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # Relay Client
//!
//! The request pipeline and client surface for `relay`.
//!
//! This crate provides:
//!
//! - [`Plugin`] - the extension contract (`on_request` / `on_response` /
//!   `on_error` hooks, any subset)
//! - [`Pipeline`] - ordered hook execution around the transport, with the
//!   retry re-entry protocol
//! - [`Transport`] - the pluggable exchange primitive, with
//!   [`ReqwestTransport`] as the bundled implementation
//! - [`Client`] / [`ClientBuilder`] - defaults, method sugar, and the
//!   typed capability accessor for plugin admin surfaces
//!
//! ## Example
//!
//! ```ignore
//! use relay_client::Client;
//!
//! let client = Client::builder()
//!     .base_url("https://api.example.com/")
//!     .default_header("accept", "application/json")
//!     .build()?;
//!
//! let response = client.get("items").await?;
//! ```

pub mod client;
pub mod pipeline;
pub mod plugin;
pub mod transport;

// Re-export key types at crate root

pub use client::{Client, ClientBuilder, ClientDefaults};
pub use pipeline::Pipeline;
pub use plugin::{ErrorDisposition, Plugin};
pub use transport::{
    RawResponse, ReqwestTransport, Transport, TransportFailure, TransportRequest,
};
