//! This crate provides the core of the tracelet SDK, which can be used to
//! instrument code and to build integrations.
//!
//! The main entry points are the [`Hub`], which holds the currently bound
//! [`Client`] together with a stack of [`Scope`]s, and the free functions in
//! this crate that operate on the current hub: [`capture_event`],
//! [`capture_message`], [`capture_error`], [`add_breadcrumb`],
//! [`configure_scope`] and [`start_transaction`].
//!
//! Events and finished transactions are not sent right away.  The client
//! hands them to a batcher, which groups them into envelopes and passes
//! those to the configured [`Transport`].
//!
//! # Minimal Example
//!
//! ```
//! use tracelet_core::{add_breadcrumb, capture_message, Breadcrumb, Level};
//!
//! add_breadcrumb(Breadcrumb {
//!     category: Some("app".into()),
//!     message: Some("starting up".into()),
//!     ..Default::default()
//! });
//! capture_message("Something happened", Level::Warning);
//! ```
//!
//! Without a bound client all of these calls are no-ops.  The `tracelet`
//! crate provides `init`, which binds a client with an HTTP transport.
//!
//! # Features
//!
//! - `test`: Enables testing support, such as [`test::TestTransport`] and
//!   [`test::with_captured_events`].
//! - `debug-logs`: Routes SDK-internal diagnostics to the `log` crate
//!   instead of stderr.

#![warn(missing_docs)]

// macros; these need to be first to be used by other modules
#[macro_use]
mod macros;

mod api;
mod batcher;
mod breadcrumbs;
mod client;
mod clientoptions;
mod constants;
mod error;
mod hub;
mod intodsn;
pub mod offline;
mod performance;
mod scope;
mod transport;

// public api or exports from this crate
pub use crate::api::*;
pub use crate::breadcrumbs::{BreadcrumbBuffer, IntoBreadcrumbs};
pub use crate::client::Client;
pub use crate::clientoptions::{BeforeCallback, ClientOptions};
pub use crate::constants::{SDK_INFO, USER_AGENT, VERSION};
pub use crate::error::{capture_error, event_from_error, parse_type_from_debug};
pub use crate::hub::Hub;
pub use crate::intodsn::IntoDsn;
pub use crate::offline::{OfflineQueue, OfflineQueueError};
pub use crate::performance::*;
pub use crate::scope::{EventProcessor, Scope, ScopeGuard};
pub use crate::transport::{Transport, TransportFactory};


// public api from other crates
#[doc(inline)]
pub use tracelet_types as types;
pub use tracelet_types::protocol::latest as protocol;
pub use tracelet_types::protocol::latest::{Breadcrumb, Envelope, Level, User};
