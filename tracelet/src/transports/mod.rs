//! Delivery of envelopes to the ingestion endpoint.
//!
//! With the `reqwest` feature (part of the default `transport` feature) the
//! [`HttpTransport`] posts envelopes from a background thread, retries
//! failures with backoff, honours server rate limits and parks what it
//! cannot deliver in the offline queue.

use std::sync::Arc;

use crate::{ClientOptions, Transport, TransportFactory};

#[cfg(feature = "httpdate")]
mod ratelimit;
#[cfg(feature = "reqwest")]
mod reqwest;
#[cfg(feature = "reqwest")]
mod retry;
#[cfg(feature = "reqwest")]
mod thread;

#[cfg(feature = "httpdate")]
pub use self::ratelimit::{RateLimiter, RateLimitingCategory};
#[cfg(feature = "reqwest")]
pub use self::reqwest::ReqwestHttpTransport;

/// The HTTP transport used by [`DefaultTransportFactory`].
#[cfg(feature = "reqwest")]
pub type HttpTransport = ReqwestHttpTransport;

/// The transport factory `apply_defaults` installs.
///
/// Builds an [`HttpTransport`] when one is compiled in.  Otherwise every
/// envelope is dropped and a diagnostic is logged once.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    #[cfg(feature = "reqwest")]
    fn create_transport(&self, options: &ClientOptions) -> Arc<dyn Transport> {
        Arc::new(HttpTransport::new(options))
    }

    #[cfg(not(feature = "reqwest"))]
    fn create_transport(&self, _options: &ClientOptions) -> Arc<dyn Transport> {
        crate::tracelet_debug!("no HTTP transport compiled in, envelopes will be dropped");
        Arc::new(Discard)
    }
}

#[cfg(not(feature = "reqwest"))]
struct Discard;

#[cfg(not(feature = "reqwest"))]
impl Transport for Discard {
    fn send_envelope(&self, _envelope: crate::Envelope) {}
}
