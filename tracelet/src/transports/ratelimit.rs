use std::time::{Duration, SystemTime};

use httpdate::parse_http_date;

use crate::protocol::EnvelopeItem;
use crate::Envelope;

/// Upper bound for a single pause announced by the server.
const MAX_PAUSE: Duration = Duration::from_secs(24 * 60 * 60);

// Negative and NaN seconds pause until now, huge or infinite ones are capped.
fn deadline_after(secs: f64) -> Option<SystemTime> {
    let pause = Duration::try_from_secs_f64(secs.max(0.0).ceil())
        .unwrap_or(MAX_PAUSE)
        .min(MAX_PAUSE);
    SystemTime::now().checked_add(pause)
}

/// The kind of payload a limit applies to.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitingCategory {
    /// Every payload.
    Any,
    /// Events.
    Error,
    /// Transactions.
    Transaction,
}

impl RateLimitingCategory {
    fn of(item: &EnvelopeItem) -> Self {
        match item {
            EnvelopeItem::Event(_) => RateLimitingCategory::Error,
            EnvelopeItem::Transaction(_) => RateLimitingCategory::Transaction,
            _ => RateLimitingCategory::Any,
        }
    }
}

/// Remembers until when the server asked us to hold back, per category.
#[derive(Debug, Default)]
pub struct RateLimiter {
    all: Option<SystemTime>,
    errors: Option<SystemTime>,
    transactions: Option<SystemTime>,
}

impl RateLimiter {
    /// A limiter without any active limits.
    pub fn new() -> Self {
        Self::default()
    }

    fn pause(&mut self, category: RateLimitingCategory, until: SystemTime) {
        let slot = match category {
            RateLimitingCategory::Any => &mut self.all,
            RateLimitingCategory::Error => &mut self.errors,
            RateLimitingCategory::Transaction => &mut self.transactions,
        };
        *slot = Some(until);
    }

    /// Applies a `Retry-After` value, either seconds or an HTTP date, to all
    /// categories. Unparsable values are ignored.
    pub fn update_from_retry_after(&mut self, header: &str) {
        let value = header.trim();
        let until = match value.parse::<f64>() {
            Ok(secs) => deadline_after(secs),
            Err(_) => parse_http_date(value).ok(),
        };
        if let Some(until) = until {
            self.pause(RateLimitingCategory::Any, until);
        }
    }

    /// Applies an `x-tracelet-rate-limits` value.
    ///
    /// The header is a comma separated list of
    /// `<seconds>:<category>[;<category>..]:<scope>[:<reason>]` groups. An
    /// empty category list limits everything, unknown categories and
    /// malformed groups are skipped.
    pub fn update_from_rate_limits_header(&mut self, header: &str) {
        for group in header.split(',') {
            let mut fields = group.trim().split(':');
            let (Some(secs), Some(categories), Some(_scope)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            let Some(until) = secs.parse().ok().and_then(deadline_after) else {
                continue;
            };

            if categories.is_empty() {
                self.pause(RateLimitingCategory::Any, until);
                continue;
            }
            for name in categories.split(';') {
                match name {
                    "error" => self.pause(RateLimitingCategory::Error, until),
                    "transaction" => self.pause(RateLimitingCategory::Transaction, until),
                    _ => {}
                }
            }
        }
    }

    /// `true` while any category is limited.
    pub fn is_any_disabled(&self) -> bool {
        let now = SystemTime::now();
        [self.all, self.errors, self.transactions]
            .into_iter()
            .flatten()
            .any(|until| until > now)
    }

    /// How long `category` stays limited, `None` if it may send now.
    pub fn is_disabled(&self, category: RateLimitingCategory) -> Option<Duration> {
        let now = SystemTime::now();
        let remaining = |until: Option<SystemTime>| {
            until?
                .duration_since(now)
                .ok()
                .filter(|left| !left.is_zero())
        };
        let specific = match category {
            RateLimitingCategory::Any => None,
            RateLimitingCategory::Error => self.errors,
            RateLimitingCategory::Transaction => self.transactions,
        };
        remaining(self.all).or_else(|| remaining(specific))
    }

    /// Drops the items of limited categories. `None` if nothing remains.
    pub fn filter_envelope(&self, envelope: Envelope) -> Option<Envelope> {
        envelope.filter(|item| self.is_disabled(RateLimitingCategory::of(item)).is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Event, Transaction};

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn category_limits_stay_separate() {
        let mut rl = RateLimiter::new();
        rl.update_from_rate_limits_header("3600:transaction:project:quota_exceeded");

        assert!(rl.is_disabled(RateLimitingCategory::Transaction).unwrap() <= HOUR);
        assert!(rl.is_disabled(RateLimitingCategory::Error).is_none());
        assert!(rl.is_disabled(RateLimitingCategory::Any).is_none());
        assert!(rl.is_any_disabled());
    }

    #[test]
    fn empty_category_list_limits_everything() {
        let mut rl = RateLimiter::new();
        rl.update_from_rate_limits_header("nonsense, 5:error, 10::organization");
        for category in [
            RateLimitingCategory::Any,
            RateLimitingCategory::Error,
            RateLimitingCategory::Transaction,
        ] {
            assert!(rl.is_disabled(category).unwrap() <= Duration::from_secs(10));
        }
    }

    #[test]
    fn several_categories_in_one_group() {
        let mut rl = RateLimiter::new();
        rl.update_from_rate_limits_header("20:error;session;transaction:key");
        assert!(rl.is_disabled(RateLimitingCategory::Error).is_some());
        assert!(rl.is_disabled(RateLimitingCategory::Transaction).is_some());
        assert!(rl.is_disabled(RateLimitingCategory::Any).is_none());
    }

    #[test]
    fn retry_after_accepts_seconds_and_dates() {
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after(" 2.5 ");
        assert!(rl.is_disabled(RateLimitingCategory::Error).unwrap() <= Duration::from_secs(3));

        let mut rl = RateLimiter::new();
        rl.update_from_retry_after(&httpdate::fmt_http_date(SystemTime::now() + HOUR));
        assert!(rl.is_disabled(RateLimitingCategory::Transaction).unwrap() <= HOUR);

        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("soon");
        assert!(!rl.is_any_disabled());
    }

    #[test]
    fn out_of_range_seconds_are_capped() {
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("inf");
        let left = rl.is_disabled(RateLimitingCategory::Any).unwrap();
        assert!(left > HOUR && left <= MAX_PAUSE);

        let mut rl = RateLimiter::new();
        rl.update_from_rate_limits_header("1e300:error:org");
        let left = rl.is_disabled(RateLimitingCategory::Error).unwrap();
        assert!(left > HOUR && left <= MAX_PAUSE);
        assert!(rl.is_disabled(RateLimitingCategory::Transaction).is_none());
    }

    #[test]
    fn negative_and_nan_seconds_do_not_limit() {
        let mut rl = RateLimiter::new();
        rl.update_from_retry_after("-30");
        rl.update_from_rate_limits_header("NaN:transaction:org");
        assert!(rl.is_disabled(RateLimitingCategory::Any).is_none());
        assert!(rl.is_disabled(RateLimitingCategory::Transaction).is_none());
    }

    #[test]
    fn filter_keeps_unlimited_items() {
        let mut envelope = Envelope::from(Transaction::new());
        envelope.add_item(Event::new());

        let mut rl = RateLimiter::new();
        assert_eq!(rl.filter_envelope(envelope.clone()).unwrap().len(), 2);

        rl.update_from_rate_limits_header("60:error:organization");
        let kept = rl.filter_envelope(envelope).unwrap();
        assert!(kept.event().is_none());
        assert!(kept.transaction().is_some());

        rl.update_from_retry_after("60");
        assert!(rl.filter_envelope(kept).is_none());
    }
}
