use std::time::Duration;

/// Exponential backoff between delivery attempts.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_retries: u32,
}

impl Backoff {
    pub const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
    pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

    pub fn new(max_retries: u32) -> Self {
        Self {
            initial: Self::INITIAL_BACKOFF,
            max: Self::MAX_BACKOFF,
            max_retries,
        }
    }

    /// The delay before retry number `retry` (starting at 1).
    ///
    /// Returns `None` once `max_retries` is exhausted.
    pub fn delay(&self, retry: u32) -> Option<Duration> {
        if retry == 0 || retry > self.max_retries {
            return None;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        Some(self.initial.saturating_mul(factor).min(self.max))
    }
}
