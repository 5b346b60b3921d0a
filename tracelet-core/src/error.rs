use std::error::Error;
use std::fmt;
use std::iter;

use crate::protocol::{Event, Exception, Level};
use crate::types::Uuid;
use crate::Hub;

impl Hub {
    /// Captures `error` and its sources on this hub.
    pub fn capture_error<E: Error + ?Sized>(&self, error: &E) -> Uuid {
        match self.client() {
            Some(_) => self.capture_event(event_from_error(error)),
            None => Uuid::nil(),
        }
    }
}

/// Captures `error` and its sources on the current hub.
///
/// # Examples
/// ```
/// tracelet_core::capture_error(&std::io::Error::last_os_error());
/// ```
pub fn capture_error<E: Error + ?Sized>(error: &E) -> Uuid {
    Hub::with_active(|hub| hub.capture_error(error))
}

/// Builds an error level event with one exception per error in the
/// `source()` chain.  The root cause comes first, `err` itself last.
///
/// # Examples
///
/// ```
/// use thiserror::Error;
///
/// #[derive(Debug, Error)]
/// #[error("connection reset")]
/// struct ResetError;
///
/// #[derive(Debug, Error)]
/// #[error("sync failed")]
/// struct SyncError(#[from] ResetError);
///
/// let event = tracelet_core::event_from_error(&SyncError(ResetError));
/// let types: Vec<_> = event.exception.iter().map(|e| e.ty.as_str()).collect();
/// assert_eq!(types, ["ResetError", "SyncError"]);
/// assert_eq!(event.exception[1].value.as_deref(), Some("sync failed"));
/// ```
pub fn event_from_error<E: Error + ?Sized>(err: &E) -> Event {
    let causes = iter::successors(err.source(), |&cause| cause.source());
    let mut exception: Vec<_> = iter::once(describe(err))
        .chain(causes.map(describe))
        .collect();
    exception.reverse();

    Event {
        exception,
        level: Level::Error,
        ..Default::default()
    }
}

fn describe<E: Error + ?Sized>(err: &E) -> Exception {
    Exception {
        ty: parse_type_from_debug(err),
        value: Some(err.to_string()),
        ..Default::default()
    }
}

/// The type name a `Debug` rendering starts with.
///
/// Everything before the first space, parenthesis, brace or line break.
///
/// # Examples
///
/// ```
/// use tracelet_core::parse_type_from_debug;
///
/// let err = "NaN".parse::<usize>().unwrap_err();
/// assert_eq!(&parse_type_from_debug(&err), "ParseIntError");
/// ```
pub fn parse_type_from_debug<D: fmt::Debug + ?Sized>(d: &D) -> String {
    let rendered = format!("{d:?}");
    let end = rendered
        .find([' ', '(', '{', '\r', '\n'])
        .unwrap_or(rendered.len());
    rendered[..end].trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::with_captured_events;
    use crate::types::Dsn;

    #[test]
    fn parses_type_names() {
        #[derive(Debug)]
        struct Unit;
        assert_eq!(parse_type_from_debug(&Unit), "Unit");

        #[derive(Debug)]
        #[allow(dead_code)]
        struct Named {
            field: u8,
        }
        assert_eq!(parse_type_from_debug(&Named { field: 1 }), "Named");

        let err = "https://key@host/abc".parse::<Dsn>().unwrap_err();
        assert_eq!(parse_type_from_debug(&err), "InvalidProjectId");
    }

    #[test]
    fn captures_error_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("disk on fire")]
        struct DiskError;

        #[derive(Debug, thiserror::Error)]
        #[error("upload failed")]
        struct UploadError(#[source] DiskError);

        let events = with_captured_events(|| {
            crate::capture_error(&UploadError(DiskError));
        });
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.exception.len(), 2);
        assert_eq!(event.exception[0].ty, "DiskError");
        assert_eq!(event.exception[0].value.as_deref(), Some("disk on fire"));
        assert_eq!(event.exception[1].ty, "UploadError");
    }

    #[test]
    fn trait_objects_can_be_captured() {
        let boxed: Box<dyn Error + Send + Sync> = "plain message".into();
        let event = event_from_error(&*boxed);
        assert_eq!(event.exception.len(), 1);
        assert_eq!(event.exception[0].value.as_deref(), Some("plain message"));
    }

    #[test]
    fn no_client_no_capture() {
        let id = Hub::new(None, Default::default()).capture_error(&fmt::Error);
        assert!(id.is_nil());
    }
}
