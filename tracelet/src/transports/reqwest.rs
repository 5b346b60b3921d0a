use std::time::{Duration, SystemTime};

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client as ReqwestClient, Proxy, RequestBuilder, StatusCode};

use super::ratelimit::RateLimiter;
use super::thread::{SendOutcome, TransportThread};
use crate::{tracelet_debug, ClientOptions, Envelope, Transport};

const RATE_LIMITS_HEADER: &str = "x-tracelet-rate-limits";
const AUTH_HEADER: &str = "x-tracelet-auth";
const ENVELOPE_CONTENT_TYPE: &str = "application/x-tracelet-envelope";

const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`Transport`] that posts envelopes with [`reqwest`].
///
/// This is the transport of the default `transport` feature, and on its
/// own needs the `reqwest` feature.  Posting happens on a background
/// thread.  Failed deliveries are retried with exponential backoff, then
/// parked in the offline queue sized by `max_offline_envelopes`.
///
/// [`reqwest`]: https://crates.io/crates/reqwest
#[cfg_attr(doc_cfg, doc(cfg(feature = "reqwest")))]
pub struct ReqwestHttpTransport {
    thread: TransportThread,
}

/// Where and as whom envelopes are posted.
struct Endpoint {
    url: String,
    auth: String,
    user_agent: String,
}

impl Endpoint {
    fn from_options(options: &ClientOptions) -> Option<Endpoint> {
        let dsn = options.dsn.as_ref()?;
        Some(Endpoint {
            url: dsn.envelope_api_url().to_string(),
            auth: dsn.to_auth(Some(options.user_agent.as_ref())).to_string(),
            user_agent: options.user_agent.to_string(),
        })
    }

    fn request(&self, client: &ReqwestClient, mut envelope: Envelope) -> Option<RequestBuilder> {
        envelope.set_sent_at(SystemTime::now());
        let body = match envelope.to_vec() {
            Ok(body) => body,
            Err(err) => {
                tracelet_debug!("dropping envelope that failed to encode: {}", err);
                return None;
            }
        };
        Some(
            client
                .post(&self.url)
                .header(AUTH_HEADER, &self.auth)
                .header(USER_AGENT, &self.user_agent)
                .header(CONTENT_TYPE, ENVELOPE_CONTENT_TYPE)
                .body(body),
        )
    }
}

/// Performs one attempt and feeds the response headers to the limiter.
async fn deliver(
    request: Option<RequestBuilder>,
    mut limiter: RateLimiter,
) -> (RateLimiter, SendOutcome) {
    let Some(request) = request else {
        return (limiter, SendOutcome::Discard);
    };
    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            tracelet_debug!("envelope delivery failed: {}", err);
            return (limiter, SendOutcome::Retry);
        }
    };

    let headers = response.headers();
    if let Some(retry_after) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
        limiter.update_from_retry_after(retry_after);
    }
    if let Some(limits) = headers.get(RATE_LIMITS_HEADER).and_then(|v| v.to_str().ok()) {
        limiter.update_from_rate_limits_header(limits);
    }

    let status = response.status();
    match response.text().await {
        Ok(body) => tracelet_debug!("ingestion replied {}: `{}`", status, body),
        Err(err) => tracelet_debug!("ingestion replied {}, body unreadable: {}", status, err),
    }
    (limiter, classify(status))
}

#[cfg_attr(doc_cfg, doc(cfg(feature = "reqwest")))]
impl ReqwestHttpTransport {
    /// Starts the transport with an HTTP client built from `options`.
    pub fn new(options: &ClientOptions) -> Self {
        Self::with_client(options, build_client(options))
    }

    /// Starts the transport on a caller supplied HTTP client.
    pub fn with_client(options: &ClientOptions, client: ReqwestClient) -> Self {
        let endpoint = Endpoint::from_options(options);
        let thread = TransportThread::new(options, move |envelope, limiter| {
            // the request is built here, the future must not borrow `client`
            let request = endpoint
                .as_ref()
                .and_then(|endpoint| endpoint.request(&client, envelope));
            deliver(request, limiter)
        });
        ReqwestHttpTransport { thread }
    }
}

fn request_timeout(options: &ClientOptions) -> Duration {
    options
        .shutdown_timeout
        .clamp(MIN_REQUEST_TIMEOUT, MAX_REQUEST_TIMEOUT)
}

fn build_client(options: &ClientOptions) -> ReqwestClient {
    let proxies = [
        options.http_proxy.as_deref().map(|url| (url, Proxy::http(url))),
        options.https_proxy.as_deref().map(|url| (url, Proxy::https(url))),
    ];
    let mut builder = ReqwestClient::builder().timeout(request_timeout(options));
    for (url, proxy) in proxies.into_iter().flatten() {
        match proxy {
            Ok(proxy) => builder = builder.proxy(proxy),
            Err(err) => tracelet_debug!("ignoring proxy {}: {}", url, err),
        }
    }
    builder.build().unwrap_or_else(|err| {
        tracelet_debug!("http client options rejected, using defaults: {}", err);
        ReqwestClient::new()
    })
}

// A 429 is discarded too, the limiter holds the pause by now.
fn classify(status: StatusCode) -> SendOutcome {
    match status {
        status if status.is_success() => SendOutcome::Sent,
        status if status.is_server_error() => SendOutcome::Retry,
        _ => SendOutcome::Discard,
    }
}

#[cfg_attr(doc_cfg, doc(cfg(feature = "reqwest")))]
impl Transport for ReqwestHttpTransport {
    fn send_envelope(&self, envelope: Envelope) {
        self.thread.send(envelope);
    }

    fn flush(&self, timeout: Duration) -> bool {
        self.thread.flush(timeout)
    }

    fn shutdown(&self, timeout: Duration) -> bool {
        self.flush(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_status_codes() {
        assert_eq!(classify(StatusCode::OK), SendOutcome::Sent);
        assert_eq!(classify(StatusCode::ACCEPTED), SendOutcome::Sent);
        assert_eq!(classify(StatusCode::BAD_GATEWAY), SendOutcome::Retry);
        assert_eq!(classify(StatusCode::BAD_REQUEST), SendOutcome::Discard);
        assert_eq!(classify(StatusCode::TOO_MANY_REQUESTS), SendOutcome::Discard);
    }

    #[test]
    fn request_timeout_follows_shutdown_timeout() {
        let mut options = ClientOptions::default();
        options.shutdown_timeout = Duration::from_secs(12);
        assert_eq!(request_timeout(&options), Duration::from_secs(12));
        options.shutdown_timeout = Duration::ZERO;
        assert_eq!(request_timeout(&options), MIN_REQUEST_TIMEOUT);
        options.shutdown_timeout = Duration::from_secs(3600);
        assert_eq!(request_timeout(&options), MAX_REQUEST_TIMEOUT);
    }
}
