use std::sync::Arc;
use std::time::Duration;

use crate::defaults::apply_defaults;
use crate::{tracelet_debug, Client, ClientOptions, Hub};

/// Keeps the client started by [`init`] alive.
///
/// Dropping the guard closes the client: queued items are submitted and
/// the transport gets up to `shutdown_timeout` to deliver them.
#[must_use = "dropping the guard closes the client right away, use mem::forget to keep it \
              running for the rest of the process"]
pub struct ClientInitGuard(Arc<Client>);

impl ClientInitGuard {
    /// `false` when no valid DSN was configured.
    pub fn is_enabled(&self) -> bool {
        self.0.is_enabled()
    }

    /// Delivers everything queued so far and keeps the client open.
    ///
    /// `None` waits up to `shutdown_timeout`.
    pub fn flush(&self, timeout: Option<Duration>) -> bool {
        self.0.flush(timeout)
    }
}

impl Drop for ClientInitGuard {
    fn drop(&mut self) {
        if self.0.is_enabled() {
            tracelet_debug!("init guard dropped, closing client");
        }
        if !self.0.close(None) {
            tracelet_debug!("client closed before every envelope was delivered");
        }
    }
}

/// Starts a client and binds it to the current hub.
///
/// `opts` is anything convertible into [`ClientOptions`], a DSN string
/// included.  Unset options are then filled by [`apply_defaults`], so the
/// DSN may also come from `TRACELET_DSN`.  Without a valid DSN the client
/// is disabled and captures do nothing.
///
/// # Examples
///
/// ```
/// let _tracelet = tracelet::init("https://key@tracelet.invalid/1234");
/// ```
///
/// The guard can be leaked when the process exits without running
/// destructors anyway:
///
/// ```
/// std::mem::forget(tracelet::init("https://key@tracelet.invalid/1234"));
/// ```
///
/// ```
/// let guard = tracelet::init(tracelet::ClientOptions {
///     release: Some("checkout@2.4.1".into()),
///     ..Default::default()
/// });
/// if guard.is_enabled() {
///     tracelet::capture_message("ready", tracelet::Level::Info);
/// }
/// ```
pub fn init<C: Into<ClientOptions>>(opts: C) -> ClientInitGuard {
    let client = Arc::new(Client::from(apply_defaults(opts.into())));
    Hub::with(|hub| hub.bind_client(Some(Arc::clone(&client))));
    match client.dsn() {
        Some(dsn) => tracelet_debug!("client enabled for {}", dsn),
        None => tracelet_debug!("no valid DSN configured, client disabled"),
    }
    ClientInitGuard(client)
}
