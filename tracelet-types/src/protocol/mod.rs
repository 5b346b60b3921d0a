//! This module exposes the types for the tracelet protocol in different versions.

#[cfg(feature = "protocol")]
pub mod v1;

#[cfg(feature = "protocol")]
mod envelope;

/// The latest version of the protocol.
pub const LATEST: u16 = 1;

/// The always latest tracelet protocol version.
#[cfg(feature = "protocol")]
pub mod latest {
    pub use super::v1::*;
}
