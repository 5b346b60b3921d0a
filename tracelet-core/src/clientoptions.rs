use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::breadcrumbs::DEFAULT_MAX_BREADCRUMBS;
use crate::constants::USER_AGENT;
use crate::protocol::{Breadcrumb, Event};
use crate::types::Dsn;
use crate::{IntoDsn, TransportFactory};

/// A hook that may rewrite a value or drop it by returning `None`.
pub type BeforeCallback<T> = Arc<dyn Fn(T) -> Option<T> + Send + Sync>;

/// Everything a [`Client`](crate::Client) is configured with.
///
/// Unset values can be filled from the environment by
/// `tracelet::apply_defaults`.
///
/// # Examples
///
/// ```
/// let _options = tracelet_core::ClientOptions {
///     debug: true,
///     traces_sample_rate: 0.25,
///     ..Default::default()
/// };
/// ```
#[derive(Clone)]
pub struct ClientOptions {
    /// Where payloads are sent.  Without one the client stays disabled.
    pub dsn: Option<Dsn>,
    /// Print SDK diagnostics to stderr.
    pub debug: bool,
    /// Release name attached to events and transactions.
    pub release: Option<Cow<'static, str>>,
    /// Deployment environment attached to events and transactions.
    pub environment: Option<Cow<'static, str>>,
    /// Host name attached to events.
    pub server_name: Option<Cow<'static, str>>,
    /// Share of events that are sent, from `0.0` to `1.0`.
    pub sample_rate: f32,
    /// Share of transactions that are sent when the transaction context
    /// makes no decision, from `0.0` to `1.0`.
    pub traces_sample_rate: f32,
    /// Breadcrumb capacity of each scope.
    pub max_breadcrumbs: usize,
    /// Finished child spans kept per transaction.
    pub max_spans: usize,
    /// Keep `User::email` and `User::ip_address` on outgoing payloads.
    /// Both are stripped when this is off.
    pub send_default_pii: bool,
    /// Last chance to rewrite or drop an event before it is queued.
    pub before_send: Option<BeforeCallback<Event>>,
    /// Runs on each breadcrumb before it is recorded.
    pub before_breadcrumb: Option<BeforeCallback<Breadcrumb>>,
    /// Builds the transport.  Either a closure taking `&ClientOptions` or an
    /// `Arc` of a [`Transport`](crate::Transport).
    pub transport: Option<Arc<dyn TransportFactory>>,
    /// Proxy for `http` DSNs.
    pub http_proxy: Option<Cow<'static, str>>,
    /// Proxy for `https` DSNs.  `apply_defaults` falls back to `http_proxy`.
    pub https_proxy: Option<Cow<'static, str>>,
    /// How long closing the client waits for queued payloads.
    pub shutdown_timeout: Duration,
    /// Items per submitted batch.
    pub batch_size: usize,
    /// Longest time an item waits for its batch to fill.  Zero submits
    /// every item on its own.
    pub batch_interval: Duration,
    /// Delivery attempts after the first before an envelope goes to the
    /// offline queue.
    pub max_retries: u32,
    /// Directory for undelivered envelopes.  Memory only when unset.
    pub offline_cache_dir: Option<PathBuf>,
    /// Capacity of the offline queue.
    pub max_offline_envelopes: usize,
    /// `User-Agent` of outgoing requests.
    pub user_agent: Cow<'static, str>,
}

impl ClientOptions {
    /// The defaults, same as [`ClientOptions::default`].
    pub fn new() -> Self {
        ClientOptions::default()
    }

    /// Builds options through the chainable setters.
    ///
    /// ```
    /// let options = tracelet_core::ClientOptions::configure(|o| o.set_debug(true).set_batch_size(5));
    /// assert!(options.debug);
    /// assert_eq!(options.batch_size, 5);
    /// ```
    pub fn configure<F>(f: F) -> Self
    where
        F: FnOnce(&mut ClientOptions) -> &mut ClientOptions,
    {
        let mut options = ClientOptions::default();
        f(&mut options);
        options
    }

    /// Sets the DSN.
    pub fn set_dsn(&mut self, dsn: Dsn) -> &mut Self {
        self.dsn = Some(dsn);
        self
    }

    /// Enables or disables debug output.
    pub fn set_debug(&mut self, debug: bool) -> &mut Self {
        self.debug = debug;
        self
    }

    /// Sets the release.
    pub fn set_release(&mut self, release: Option<Cow<'static, str>>) -> &mut Self {
        self.release = release;
        self
    }

    /// Sets the environment.
    pub fn set_environment(&mut self, environment: Option<Cow<'static, str>>) -> &mut Self {
        self.environment = environment;
        self
    }

    /// Sets the event sample rate.
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> &mut Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Sets the transaction sample rate.
    pub fn set_traces_sample_rate(&mut self, traces_sample_rate: f32) -> &mut Self {
        self.traces_sample_rate = traces_sample_rate;
        self
    }

    /// Sets the breadcrumb capacity of every scope.
    pub fn set_max_breadcrumbs(&mut self, max_breadcrumbs: usize) -> &mut Self {
        self.max_breadcrumbs = max_breadcrumbs;
        self
    }

    /// Sets the maximum number of spans per transaction.
    pub fn set_max_spans(&mut self, max_spans: usize) -> &mut Self {
        self.max_spans = max_spans;
        self
    }

    /// Installs a `before_send` hook.
    pub fn set_before_send<F>(&mut self, before_send: F) -> &mut Self
    where
        F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
    {
        self.before_send = Some(Arc::new(before_send));
        self
    }

    /// Installs a `before_breadcrumb` hook.
    pub fn set_before_breadcrumb<F>(&mut self, before_breadcrumb: F) -> &mut Self
    where
        F: Fn(Breadcrumb) -> Option<Breadcrumb> + Send + Sync + 'static,
    {
        self.before_breadcrumb = Some(Arc::new(before_breadcrumb));
        self
    }

    /// Sets the transport factory.
    pub fn set_transport<F>(&mut self, transport: F) -> &mut Self
    where
        F: TransportFactory + 'static,
    {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the batch size.
    pub fn set_batch_size(&mut self, batch_size: usize) -> &mut Self {
        self.batch_size = batch_size;
        self
    }

    /// Sets the batch interval.
    pub fn set_batch_interval(&mut self, batch_interval: Duration) -> &mut Self {
        self.batch_interval = batch_interval;
        self
    }

    /// Sets the number of delivery retries.
    pub fn set_max_retries(&mut self, max_retries: u32) -> &mut Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the directory of the offline queue.
    pub fn set_offline_cache_dir<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        self.offline_cache_dir = Some(dir.into());
        self
    }
}

fn hook<T: ?Sized>(hook: &Option<Arc<T>>) -> Option<&'static str> {
    hook.as_ref().map(|_| "<fn>")
}

impl fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientOptions")
            .field("dsn", &self.dsn)
            .field("debug", &self.debug)
            .field("release", &self.release)
            .field("environment", &self.environment)
            .field("server_name", &self.server_name)
            .field("sample_rate", &self.sample_rate)
            .field("traces_sample_rate", &self.traces_sample_rate)
            .field("max_breadcrumbs", &self.max_breadcrumbs)
            .field("max_spans", &self.max_spans)
            .field("send_default_pii", &self.send_default_pii)
            .field("before_send", &hook(&self.before_send))
            .field("before_breadcrumb", &hook(&self.before_breadcrumb))
            .field("transport", &hook(&self.transport))
            .field("http_proxy", &self.http_proxy)
            .field("https_proxy", &self.https_proxy)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("batch_size", &self.batch_size)
            .field("batch_interval", &self.batch_interval)
            .field("max_retries", &self.max_retries)
            .field("offline_cache_dir", &self.offline_cache_dir)
            .field("max_offline_envelopes", &self.max_offline_envelopes)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for ClientOptions {
    fn default() -> ClientOptions {
        ClientOptions {
            dsn: None,
            debug: false,
            release: None,
            environment: None,
            server_name: None,
            sample_rate: 1.0,
            traces_sample_rate: 0.0,
            max_breadcrumbs: DEFAULT_MAX_BREADCRUMBS,
            max_spans: 1_000,
            send_default_pii: false,
            before_send: None,
            before_breadcrumb: None,
            transport: None,
            http_proxy: None,
            https_proxy: None,
            shutdown_timeout: Duration::from_secs(2),
            batch_size: 30,
            batch_interval: Duration::from_secs(5),
            max_retries: 3,
            offline_cache_dir: None,
            max_offline_envelopes: 30,
            user_agent: Cow::Borrowed(USER_AGENT),
        }
    }
}

// An invalid DSN leaves the client disabled instead of failing.
fn dsn_or_none<T: IntoDsn>(into_dsn: T) -> Option<Dsn> {
    into_dsn.into_dsn().ok().flatten()
}

impl<T: IntoDsn> From<(T, ClientOptions)> for ClientOptions {
    fn from((into_dsn, mut opts): (T, ClientOptions)) -> ClientOptions {
        opts.dsn = dsn_or_none(into_dsn);
        opts
    }
}

impl<T: IntoDsn> From<T> for ClientOptions {
    fn from(into_dsn: T) -> ClientOptions {
        ClientOptions {
            dsn: dsn_or_none(into_dsn),
            ..ClientOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = ClientOptions::default();
        assert_eq!(options.sample_rate, 1.0);
        assert_eq!(options.traces_sample_rate, 0.0);
        assert_eq!(options.max_breadcrumbs, 100);
        assert_eq!(options.max_spans, 1000);
        assert_eq!(options.batch_size, 30);
        assert_eq!(options.batch_interval, Duration::from_secs(5));
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.max_offline_envelopes, 30);
        assert!(options.user_agent.starts_with("tracelet.rust/"));
    }

    #[test]
    fn invalid_dsn_disables() {
        let options: ClientOptions = "not a dsn".into();
        assert!(options.dsn.is_none());

        let options: ClientOptions = "https://public@example.com/42".into();
        assert_eq!(options.dsn.unwrap().host(), "example.com");

        let options: ClientOptions = ().into();
        assert!(options.dsn.is_none());
    }

    #[test]
    fn debug_hides_callbacks() {
        let options = ClientOptions::configure(|o| o.set_before_send(|_| None));
        let output = format!("{options:?}");
        assert!(output.contains(r#"before_send: Some("<fn>")"#));
        assert!(output.contains("before_breadcrumb: None"));
    }
}
