use std::future::Future;
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::ratelimit::{RateLimiter, RateLimitingCategory};
use super::retry::Backoff;
use crate::{tracelet_debug, ClientOptions, Envelope, OfflineQueue};

/// How a single delivery attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The endpoint accepted the envelope.
    Sent,
    /// A network or server error, the envelope may be sent again.
    Retry,
    /// The envelope was rejected or rate limited and must not be sent again.
    Discard,
}

enum Task {
    SendEnvelope(Envelope),
    Flush(SyncSender<()>),
    Shutdown,
}

const FULL_QUEUE_POLL: Duration = Duration::from_millis(5);

pub struct TransportThread {
    sender: SyncSender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl TransportThread {
    pub const QUEUE_SIZE: usize = 30;

    /// Spawns the worker thread.
    ///
    /// `send` performs one delivery attempt.  Retries, the offline queue and
    /// rate limits are handled by the worker.
    pub fn new<SendFn, SendFuture>(options: &ClientOptions, send: SendFn) -> Self
    where
        SendFn: FnMut(Envelope, RateLimiter) -> SendFuture + Send + 'static,
        // the limiter is moved in and handed back so the future owns no borrows
        SendFuture: Future<Output = (RateLimiter, SendOutcome)>,
    {
        let (sender, receiver) = sync_channel(Self::QUEUE_SIZE);
        let mut worker = Worker {
            send,
            rl: RateLimiter::new(),
            queue: OfflineQueue::from_options(options),
            backoff: Backoff::new(options.max_retries),
        };

        let handle = thread::Builder::new()
            .name("tracelet-transport".into())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(err) => {
                        tracelet_debug!("failed to start transport runtime: {}", err);
                        return;
                    }
                };

                rt.block_on(async move {
                    if !worker.queue.is_empty() {
                        tracelet_debug!(
                            "replaying {} envelopes from the offline queue",
                            worker.queue.len()
                        );
                        worker.drain().await;
                    }

                    for task in receiver.into_iter() {
                        match task {
                            Task::SendEnvelope(envelope) => worker.handle(envelope).await,
                            Task::Flush(sender) => {
                                worker.drain().await;
                                sender.send(()).ok();
                            }
                            Task::Shutdown => return,
                        }
                    }
                })
            });

        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracelet_debug!("failed to spawn transport thread: {}", err);
                None
            }
        };

        Self { sender, handle }
    }

    pub fn send(&self, envelope: Envelope) {
        match self.sender.try_send(Task::SendEnvelope(envelope)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracelet_debug!("transport queue is full, dropping envelope");
            }
            Err(TrySendError::Disconnected(_)) => {
                tracelet_debug!("transport thread is gone, dropping envelope");
            }
        }
    }

    /// Waits until everything queued before this call was handled.
    ///
    /// Gives up at `timeout`, also while the task queue stays full.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (sender, receiver) = sync_channel(1);
        let mut task = Task::Flush(sender);
        loop {
            match self.sender.try_send(task) {
                Ok(()) => break,
                Err(TrySendError::Full(rejected)) => {
                    let left = deadline.saturating_duration_since(Instant::now());
                    if left.is_zero() {
                        tracelet_debug!("transport queue stayed full, flush timed out");
                        return false;
                    }
                    thread::sleep(left.min(FULL_QUEUE_POLL));
                    task = rejected;
                }
                Err(TrySendError::Disconnected(_)) => return false,
            }
        }
        receiver
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .is_ok()
    }
}

impl Drop for TransportThread {
    fn drop(&mut self) {
        self.sender.send(Task::Shutdown).ok();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

struct Worker<SendFn> {
    send: SendFn,
    rl: RateLimiter,
    queue: OfflineQueue,
    backoff: Backoff,
}

impl<SendFn, SendFuture> Worker<SendFn>
where
    SendFn: FnMut(Envelope, RateLimiter) -> SendFuture,
    SendFuture: Future<Output = (RateLimiter, SendOutcome)>,
{
    async fn handle(&mut self, envelope: Envelope) {
        if let Some(time_left) = self.rl.is_disabled(RateLimitingCategory::Any) {
            tracelet_debug!(
                "rate limited for another {}s, dropping envelope",
                time_left.as_secs()
            );
            return;
        }
        let Some(envelope) = self.rl.filter_envelope(envelope) else {
            tracelet_debug!("every item of the envelope is rate limited");
            return;
        };

        // keep envelopes in order behind whatever is already parked
        if !self.queue.is_empty() {
            self.park(&envelope);
            self.drain().await;
            return;
        }

        if self.deliver(&envelope).await == SendOutcome::Retry {
            self.park(&envelope);
        }
    }

    async fn attempt(&mut self, envelope: Envelope) -> SendOutcome {
        let rl = std::mem::take(&mut self.rl);
        let (rl, outcome) = (self.send)(envelope, rl).await;
        self.rl = rl;
        outcome
    }

    /// Sends the envelope, retrying with backoff.
    ///
    /// Returns [`SendOutcome::Retry`] if all attempts failed.
    async fn deliver(&mut self, envelope: &Envelope) -> SendOutcome {
        let mut retry = 0;
        loop {
            let outcome = self.attempt(envelope.clone()).await;
            if outcome != SendOutcome::Retry {
                return outcome;
            }
            retry += 1;
            match self.backoff.delay(retry) {
                Some(delay) => {
                    tracelet_debug!("retrying envelope in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
                None => return outcome,
            }
        }
    }

    fn park(&mut self, envelope: &Envelope) {
        match self.queue.push(envelope) {
            Ok(()) => tracelet_debug!("parked envelope, {} in offline queue", self.queue.len()),
            Err(err) => tracelet_debug!("failed to park envelope: {}", err),
        }
    }

    /// Sends parked envelopes, oldest first.
    ///
    /// Stops at the first envelope that could not be delivered.
    async fn drain(&mut self) {
        while let Some(envelope) = self.queue.peek() {
            if self.rl.is_disabled(RateLimitingCategory::Any).is_some() {
                return;
            }
            let outcome = match self.rl.filter_envelope(envelope) {
                Some(envelope) => self.attempt(envelope).await,
                None => SendOutcome::Discard,
            };
            if outcome == SendOutcome::Retry {
                tracelet_debug!("offline queue still unreachable, {} parked", self.queue.len());
                return;
            }
            if let Err(err) = self.queue.remove() {
                tracelet_debug!("failed to remove parked envelope: {}", err);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Arc};

    use super::*;
    use crate::protocol::Event;

    #[test]
    fn flush_waits_for_queued_envelopes() {
        let sent = Arc::new(AtomicUsize::new(0));
        let counter = sent.clone();
        let thread = TransportThread::new(&ClientOptions::default(), move |_envelope, rl| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { (rl, SendOutcome::Sent) }
        });
        for _ in 0..3 {
            thread.send(Envelope::from(Event::new()));
        }
        assert!(thread.flush(Duration::from_secs(5)));
        assert_eq!(sent.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn flush_times_out_on_a_full_queue() {
        let (release, gate) = mpsc::channel::<()>();
        let thread = TransportThread::new(&ClientOptions::default(), move |_envelope, rl| {
            gate.recv().ok();
            async move { (rl, SendOutcome::Sent) }
        });
        // the worker blocks on the first envelope, the rest fill the queue
        for _ in 0..=TransportThread::QUEUE_SIZE {
            thread.send(Envelope::from(Event::new()));
        }

        let started = Instant::now();
        assert!(!thread.flush(Duration::from_millis(100)));
        assert!(started.elapsed() < Duration::from_secs(2));

        drop(release);
        drop(thread);
    }
}
