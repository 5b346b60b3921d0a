//! Groups envelope items into batches.

use std::mem;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::protocol::EnvelopeItem;
use crate::{Envelope, Transport};

pub(crate) type TransportArc = Arc<RwLock<Option<Arc<dyn Transport>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the batcher and its timer thread.
struct Shared {
    pending: Mutex<Vec<EnvelopeItem>>,
    stopped: Mutex<bool>,
    wake: Condvar,
    transport: TransportArc,
}

impl Shared {
    /// Sends everything pending as one envelope.
    fn submit(&self) {
        let items = mem::take(&mut *lock(&self.pending));
        self.send(items);
    }

    fn send(&self, items: Vec<EnvelopeItem>) {
        if items.is_empty() {
            return;
        }
        let transport = self
            .transport
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(transport) = transport else {
            tracelet_debug!("[Batcher] transport closed, dropping {} items", items.len());
            return;
        };
        tracelet_debug!("[Batcher] submitting {} items", items.len());
        let envelope = items.into_iter().fold(Envelope::new(), |mut envelope, item| {
            envelope.add_item(item);
            envelope
        });
        transport.send_envelope(envelope);
    }

    /// Submits every `interval` until stopped.
    fn tick(&self, interval: Duration) {
        let mut stopped = lock(&self.stopped);
        let mut last_submit = Instant::now();
        while !*stopped {
            let wait = interval.saturating_sub(last_submit.elapsed());
            stopped = self
                .wake
                .wait_timeout(stopped, wait)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            if !*stopped && last_submit.elapsed() >= interval {
                self.submit();
                last_submit = Instant::now();
            }
        }
    }
}

/// Collects items and submits them as one envelope per batch.
///
/// A batch goes out once it holds `batch_size` items, once `interval` has
/// passed since the last timed submission, on [`Batcher::flush`] and when
/// the batcher is dropped.
pub(crate) struct Batcher {
    shared: Arc<Shared>,
    timer: Option<JoinHandle<()>>,
    batch_size: usize,
}

impl Batcher {
    /// A zero `interval` submits every item on its own and runs no timer
    /// thread.
    pub(crate) fn new(transport: TransportArc, batch_size: usize, interval: Duration) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(Vec::new()),
            stopped: Mutex::new(false),
            wake: Condvar::new(),
            transport,
        });
        if interval.is_zero() {
            return Batcher {
                shared,
                timer: None,
                batch_size: 1,
            };
        }

        let timer_state = Arc::clone(&shared);
        let timer = thread::Builder::new()
            .name("tracelet-batcher".into())
            .spawn(move || timer_state.tick(interval))
            .map_err(|err| tracelet_debug!("[Batcher] no timer thread: {}", err))
            .ok();

        Batcher {
            shared,
            timer,
            batch_size: batch_size.max(1),
        }
    }

    /// Adds an item, submitting the batch once it is full.
    pub(crate) fn enqueue(&self, item: EnvelopeItem) {
        let full = {
            let mut pending = lock(&self.shared.pending);
            pending.push(item);
            (pending.len() >= self.batch_size).then(|| mem::take(&mut *pending))
        };
        if let Some(batch) = full {
            self.shared.send(batch);
        }
    }

    /// Submits the pending items now.
    pub(crate) fn flush(&self) {
        self.shared.submit();
    }
}

impl Drop for Batcher {
    fn drop(&mut self) {
        *lock(&self.shared.stopped) = true;
        self.shared.wake.notify_all();
        if let Some(timer) = self.timer.take() {
            timer.join().ok();
        }
        self.shared.submit();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::protocol::Level;
    use crate::test;
    use crate::{Client, ClientOptions, Hub};

    #[test]
    fn events_are_sent_in_batches() {
        let envelopes = test::with_captured_envelopes_options(
            || {
                for i in 0..7 {
                    crate::capture_message(&format!("message {i}"), Level::Info);
                }
            },
            ClientOptions {
                batch_size: 3,
                ..Default::default()
            },
        );

        let sizes: Vec<_> = envelopes.iter().map(|envelope| envelope.len()).collect();
        assert_eq!(sizes, [3, 3, 1]);
    }

    #[test]
    fn interval_flushes_partial_batches() {
        let transport = test::TestTransport::new();
        let client = Arc::new(Client::from(ClientOptions {
            dsn: Some(test::TEST_DSN.clone()),
            transport: Some(Arc::new(transport.clone())),
            batch_interval: Duration::from_millis(50),
            ..Default::default()
        }));

        Hub::run(Arc::new(Hub::new(Some(client), Default::default())), || {
            crate::capture_message("lonely", Level::Info);
            std::thread::sleep(Duration::from_millis(500));
        });
        assert_eq!(transport.fetch_and_clear_envelopes().len(), 1);
    }

    #[test]
    fn zero_interval_sends_each_item() {
        let transport = test::TestTransport::new();
        let client = Arc::new(Client::from(ClientOptions {
            dsn: Some(test::TEST_DSN.clone()),
            transport: Some(Arc::new(transport.clone())),
            batch_interval: Duration::ZERO,
            ..Default::default()
        }));

        Hub::run(Arc::new(Hub::new(Some(client), Default::default())), || {
            for i in 0..3 {
                crate::capture_message(&format!("now {i}"), Level::Info);
            }
            let sizes: Vec<_> = transport
                .fetch_and_clear_envelopes()
                .iter()
                .map(|envelope| envelope.len())
                .collect();
            assert_eq!(sizes, [1, 1, 1]);
        });
    }
}
