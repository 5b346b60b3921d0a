//! Client-side telemetry for Rust applications.
//!
//! Errors, messages and breadcrumbs become events, timed work becomes
//! transactions made of spans, and both are batched into envelopes that a
//! background thread posts to the ingestion endpoint named by a DSN.
//!
//! # Getting started
//!
//! [`init`] builds a client with the default HTTP transport, fills unset
//! options from the environment and binds the client to the current
//! [`Hub`].  Keep the returned guard alive: dropping it drains the queue,
//! waiting at most `shutdown_timeout` (two seconds by default).
//!
//! ```
//! let _guard = tracelet::init("https://key@tracelet.invalid/42");
//! tracelet::capture_message("cache warmed", tracelet::Level::Info);
//! ```
//!
//! # Spans
//!
//! ```
//! let _guard = tracelet::init(tracelet::ClientOptions {
//!     traces_sample_rate: 1.0,
//!     ..Default::default()
//! });
//!
//! tracelet::start_span("http.server", "GET /checkout", |span| {
//!     span.set_tag("region", "eu-west");
//!     tracelet::start_span("db.query", "load cart", |_| {});
//! });
//! ```
//!
//! # Delivery
//!
//! Items are grouped by `batch_size` and `batch_interval`.  Network errors
//! and 5xx responses are retried with exponential backoff up to
//! `max_retries` times, then the envelope moves to the offline queue.  Set
//! `offline_cache_dir` to keep that queue on disk and replay it on the next
//! start.
//!
//! Libraries that only record data, or applications bringing their own
//! [`Transport`], can depend on `tracelet-core` alone.
//!
//! # Features
//!
//! - `transport` (default): the `reqwest` HTTP transport with `native-tls`.
//! - `rustls`: TLS through `rustls` instead of `native-tls`.
//! - `test`: the capture helpers in [`test`].
//! - `debug-logs`: SDK diagnostics go to the `log` crate instead of stderr.

#![cfg_attr(doc_cfg, feature(doc_cfg))]
#![warn(missing_docs)]

mod defaults;
mod init;
pub mod transports;

#[doc(inline)]
pub use tracelet_core::*;

pub use crate::defaults::apply_defaults;
pub use crate::init::{init, ClientInitGuard};
