//! This crate provides common types for working with the tracelet protocol or
//! the tracelet ingestion endpoint.  It's used by the tracelet client as well
//! as by tools that need to read or write envelopes directly.
//!
//! Most of the types are re-exported from [`protocol::v1`]: events,
//! transactions, spans and breadcrumbs.  The [`Dsn`] type parses and
//! represents the connection string that tells a client where to send data.
//!
//! # Example
//!
//! ```
//! use tracelet_types::Dsn;
//!
//! let dsn: Dsn = "https://public@ingest.example.com/42".parse().unwrap();
//! assert_eq!(
//!     dsn.envelope_api_url().as_str(),
//!     "https://ingest.example.com/api/42/envelope/"
//! );
//! ```

#![warn(missing_docs)]

#[macro_use]
mod macros;

mod auth;
mod dsn;
mod project_id;
pub mod protocol;
pub(crate) mod utils;

pub use crate::auth::*;
pub use crate::dsn::*;
pub use crate::project_id::*;

// Re-export external types and traits for convenience
pub use uuid::Uuid;

/// Generates a random v4 [`Uuid`].
pub fn random_uuid() -> Uuid {
    Uuid::new_v4()
}
