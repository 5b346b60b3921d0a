use std::borrow::Cow;
use std::fmt;
use std::panic::RefUnwindSafe;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use rand::random;
use tracelet_types::random_uuid;

use crate::batcher::{Batcher, TransportArc};
use crate::breadcrumbs::keep_newest;
use crate::constants::SDK_INFO;
use crate::protocol::{ClientSdkInfo, EnvelopeItem, Event, Transaction, User};
use crate::types::{Dsn, Uuid};
use crate::{ClientOptions, Envelope, Hub, Scope, Transport};

impl<T: Into<ClientOptions>> From<T> for Client {
    fn from(o: T) -> Client {
        Client::with_options(o.into())
    }
}

/// The tracelet Client.
///
/// The Client is responsible for event processing and for handing events
/// and transactions to the configured [`Transport`](crate::Transport).
/// Items are not sent right away: they are collected by a batcher and
/// submitted as one envelope per batch.
///
/// # Examples
///
/// ```
/// tracelet_core::Client::from(tracelet_core::ClientOptions::default());
/// ```
pub struct Client {
    options: ClientOptions,
    transport: TransportArc,
    batcher: RwLock<Option<Batcher>>,
    pub(crate) sdk_info: ClientSdkInfo,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("dsn", &self.dsn())
            .field("options", &self.options)
            .finish()
    }
}

impl Client {
    /// Creates a new client from a config.
    ///
    /// # Supported Configs
    ///
    /// * `ClientOptions`: configure the client with the given client options.
    /// * `()` or empty string: Disable the client.
    /// * `&str` / `String`: configure the client with the given DSN.
    /// * `Dsn` / `&Dsn`: configure the client with a given DSN.
    /// * `(Dsn, ClientOptions)`: configure the client from the given DSN and options.
    ///
    /// A DSN that fails to parse disables the client.
    pub fn from_config<O: Into<ClientOptions>>(opts: O) -> Client {
        Client::with_options(opts.into())
    }

    /// Builds a client.  Without a DSN or a transport factory the client is
    /// disabled and never starts a batcher.
    pub fn with_options(options: ClientOptions) -> Client {
        // the batcher thread must never be the one creating the process hub
        Hub::with(|_| {});

        let transport = options
            .dsn
            .as_ref()
            .and(options.transport.as_ref())
            .map(|factory| factory.create_transport(&options));
        let batcher = transport.is_some();
        let transport: TransportArc = Arc::new(RwLock::new(transport));
        let batcher = batcher.then(|| {
            Batcher::new(
                Arc::clone(&transport),
                options.batch_size,
                options.batch_interval,
            )
        });

        Client {
            options,
            transport,
            batcher: RwLock::new(batcher),
            sdk_info: SDK_INFO.clone(),
        }
    }

    /// Turns a captured event into the one that is queued.
    ///
    /// Applies the scope, fills client defaults, strips PII unless
    /// `send_default_pii` is set, then runs `before_send` and event
    /// sampling.  `None` means the event was dropped along the way.
    pub fn prepare_event(&self, mut event: Event, scope: Option<&Scope>) -> Option<Event> {
        // processors and hooks may read the id and the SDK info
        if event.event_id.is_nil() {
            event.event_id = random_uuid();
        }
        event.sdk.get_or_insert_with(|| self.sdk_info.clone());
        let id = event.event_id;

        if let Some(scope) = scope {
            let Some(scoped) = scope.apply_to_event(event) else {
                tracelet_debug!("[Client] event {} dropped by an event processor", id);
                return None;
            };
            event = scoped;
        }
        keep_newest(&mut event.breadcrumbs, self.options.max_breadcrumbs);

        fill_from(&mut event.release, &self.options.release);
        fill_from(&mut event.environment, &self.options.environment);
        fill_from(&mut event.server_name, &self.options.server_name);
        if !self.options.send_default_pii {
            strip_pii(event.user.as_mut());
        }

        if let Some(before_send) = &self.options.before_send {
            let Some(kept) = before_send(event) else {
                tracelet_debug!("[Client] event {} dropped by before_send", id);
                return None;
            };
            event = kept;
        }

        if self.sample_should_send(self.options.sample_rate) {
            Some(event)
        } else {
            tracelet_debug!(
                "[Client] event {} sampled out at rate {}",
                id,
                self.options.sample_rate
            );
            None
        }
    }

    /// Returns the options of this client.
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Returns the DSN that constructed this client.
    pub fn dsn(&self) -> Option<&Dsn> {
        self.options.dsn.as_ref()
    }

    /// Quick check to see if the client is enabled.
    ///
    /// The Client is enabled if it has a valid DSN and Transport configured,
    /// and has not been closed.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// let client = tracelet_core::Client::from(tracelet_core::ClientOptions::default());
    /// assert!(!client.is_enabled());
    ///
    /// let dsn = "https://public@example.com/1";
    /// let transport = tracelet_core::test::TestTransport::new();
    /// let client = tracelet_core::Client::from((
    ///     dsn,
    ///     tracelet_core::ClientOptions {
    ///         transport: Some(Arc::new(transport)),
    ///         ..Default::default()
    ///     },
    /// ));
    /// assert!(client.is_enabled());
    /// ```
    pub fn is_enabled(&self) -> bool {
        self.options.dsn.is_some()
            && self
                .transport
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .is_some()
    }

    /// Captures an event and queues it for sending.
    ///
    /// Returns the id of the event, or the nil uuid if it was dropped.
    pub fn capture_event(&self, event: Event, scope: Option<&Scope>) -> Uuid {
        if !self.is_enabled() {
            return Uuid::nil();
        }
        let Some(event) = self.prepare_event(event, scope) else {
            return Uuid::nil();
        };
        let event_id = event.event_id;
        if self.enqueue(EnvelopeItem::Event(event)) {
            event_id
        } else {
            Uuid::nil()
        }
    }

    /// Captures a finished transaction and queues it for sending.
    ///
    /// The scope contributes its user, tags, extra and contexts.  Values
    /// already set on the transaction win.
    pub fn capture_transaction(&self, mut transaction: Transaction, scope: Option<&Scope>) {
        if !self.is_enabled() {
            return;
        }
        if transaction.event_id.is_nil() {
            transaction.event_id = random_uuid();
        }
        if let Some(scope) = scope {
            scope.apply_to_transaction(&mut transaction);
        }
        fill_from(&mut transaction.release, &self.options.release);
        fill_from(&mut transaction.environment, &self.options.environment);
        transaction.sdk.get_or_insert_with(|| self.sdk_info.clone());
        if !self.options.send_default_pii {
            strip_pii(transaction.user.as_mut());
        }
        tracelet_debug!(
            "[Client] queueing transaction {} with {} spans",
            transaction.event_id,
            transaction.spans.len()
        );
        self.enqueue(EnvelopeItem::Transaction(transaction));
    }

    fn enqueue(&self, item: EnvelopeItem) -> bool {
        let batcher = self.batcher.read().unwrap_or_else(PoisonError::into_inner);
        match batcher.as_ref() {
            Some(batcher) => {
                batcher.enqueue(item);
                true
            }
            None => {
                tracelet_debug!("[Client] client is closed, dropping {}", item.item_type());
                false
            }
        }
    }

    fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Hands `envelope` to the transport right away, skipping the batcher.
    pub fn send_envelope(&self, envelope: Envelope) {
        match self.current_transport() {
            Some(transport) => transport.send_envelope(envelope),
            None => tracelet_debug!("[Client] no transport, dropping envelope"),
        }
    }

    /// Submits the pending batch and waits for the transport to deliver
    /// everything queued so far.  The client stays usable.
    ///
    /// `None` waits up to `shutdown_timeout`.  Returns `false` on timeout.
    pub fn flush(&self, timeout: Option<Duration>) -> bool {
        if let Some(batcher) = &*self.batcher.read().unwrap_or_else(PoisonError::into_inner) {
            batcher.flush();
        }
        self.current_transport().map_or(true, |transport| {
            transport.flush(timeout.unwrap_or(self.options.shutdown_timeout))
        })
    }

    /// Like [`Client::flush`], but shuts the transport down afterwards.
    ///
    /// The client is disabled from then on.  Closing twice is harmless.
    pub fn close(&self, timeout: Option<Duration>) -> bool {
        // dropping the batcher submits whatever it still holds
        drop(
            self.batcher
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );

        let Some(transport) = self
            .transport
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return true;
        };
        let drained = transport.shutdown(timeout.unwrap_or(self.options.shutdown_timeout));
        if !drained {
            tracelet_debug!("[Client] transport still busy at the shutdown deadline");
        }
        drained
    }

    /// `true` with probability `rate`.  Rates outside `0.0..1.0` always or
    /// never send.
    pub fn sample_should_send(&self, rate: f32) -> bool {
        match rate {
            rate if rate >= 1.0 => true,
            rate if rate <= 0.0 => false,
            rate => random::<f32>() < rate,
        }
    }

    /// Makes a sampling decision for a new transaction from `traces_sample_rate`.
    pub fn sample_traces_should_send(&self) -> bool {
        self.sample_should_send(self.options.traces_sample_rate)
    }
}

fn fill_from(slot: &mut Option<String>, fallback: &Option<Cow<'static, str>>) {
    if slot.is_none() {
        *slot = fallback.as_deref().map(str::to_owned);
    }
}

fn strip_pii(user: Option<&mut User>) {
    if let Some(user) = user {
        user.email = None;
        user.ip_address = None;
    }
}

// the hooks in `ClientOptions` are not `RefUnwindSafe` on their own
impl RefUnwindSafe for Client {}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::protocol::Level;
    use crate::test::{self, with_captured_events_options};

    #[test]
    fn disabled_without_dsn() {
        let client = Client::from(ClientOptions::default());
        assert!(!client.is_enabled());
        assert!(client.capture_event(Event::new(), None).is_nil());
    }

    #[test]
    fn fills_client_defaults() {
        let events = with_captured_events_options(
            || {
                crate::capture_message("hello", Level::Info);
            },
            ClientOptions {
                release: Some("app@1.0.0".into()),
                environment: Some("staging".into()),
                server_name: Some("web-1".into()),
                ..Default::default()
            },
        );
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.release.as_deref(), Some("app@1.0.0"));
        assert_eq!(event.environment.as_deref(), Some("staging"));
        assert_eq!(event.server_name.as_deref(), Some("web-1"));
        assert_eq!(event.sdk.as_ref().map(|sdk| sdk.name.as_str()), Some("tracelet.rust"));
    }

    #[test]
    fn before_send_can_drop() {
        let events = with_captured_events_options(
            || {
                crate::capture_message("keep", Level::Info);
                crate::capture_message("drop", Level::Info);
            },
            ClientOptions::new().set_before_send(|event| {
                if event.message.as_deref() == Some("drop") {
                    None
                } else {
                    Some(event)
                }
            }).clone(),
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message.as_deref(), Some("keep"));
    }

    #[test]
    fn event_breadcrumbs_are_capped() {
        let events = with_captured_events_options(
            || {
                let mut event = Event::new();
                for i in 0..5 {
                    event.breadcrumbs.push(crate::protocol::Breadcrumb {
                        message: Some(format!("step {i}")),
                        ..Default::default()
                    });
                }
                crate::capture_event(event);
            },
            ClientOptions {
                max_breadcrumbs: 2,
                ..Default::default()
            },
        );
        let messages: Vec<_> = events[0]
            .breadcrumbs
            .iter()
            .filter_map(|crumb| crumb.message.as_deref())
            .collect();
        assert_eq!(messages, ["step 3", "step 4"]);
    }

    #[test]
    fn zero_sample_rate_drops_everything() {
        let events = with_captured_events_options(
            || {
                let id = crate::capture_message("nope", Level::Info);
                assert!(id.is_nil());
            },
            ClientOptions {
                sample_rate: 0.0,
                ..Default::default()
            },
        );
        assert!(events.is_empty());
    }

    #[test]
    fn pii_is_stripped_by_default() {
        let events = with_captured_events_options(
            || {
                crate::configure_scope(|scope| {
                    scope.set_user(Some(User {
                        id: Some("42".into()),
                        email: Some("jane@example.com".into()),
                        ip_address: Some("127.0.0.1".into()),
                        ..Default::default()
                    }));
                });
                crate::capture_message("who", Level::Info);
            },
            ClientOptions::default(),
        );
        let user = events[0].user.as_ref().unwrap();
        assert_eq!(user.id.as_deref(), Some("42"));
        assert_eq!(user.email, None);
        assert_eq!(user.ip_address, None);
    }

    #[test]
    fn closed_client_drops_events() {
        let transport = test::TestTransport::new();
        let client = Client::from(ClientOptions {
            dsn: Some(test::TEST_DSN.clone()),
            transport: Some(Arc::new(transport.clone())),
            ..Default::default()
        });
        assert!(client.close(None));
        assert!(!client.is_enabled());
        assert!(client.capture_event(Event::new(), None).is_nil());
        assert!(transport.fetch_and_clear_envelopes().is_empty());
    }

    #[test]
    fn flush_submits_pending_batch() {
        let transport = test::TestTransport::new();
        let client = Client::from(ClientOptions {
            dsn: Some(test::TEST_DSN.clone()),
            transport: Some(Arc::new(transport.clone())),
            ..Default::default()
        });
        client.capture_event(Event::new(), None);
        client.capture_event(Event::new(), None);
        assert!(client.flush(None));

        let envelopes = transport.fetch_and_clear_envelopes();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].len(), 2);
    }
}
