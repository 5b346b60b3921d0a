//! Free functions that act on the hub of the current thread.

use crate::protocol::{Event, Level};
use crate::types::Uuid;
use crate::{Hub, IntoBreadcrumbs, Scope};

/// Sends a fully built event through the current hub.
///
/// Returns the id the event was sent with, or the nil id when no client is
/// bound or the event was filtered out.
///
/// ```
/// use tracelet_core::protocol::{Event, Level};
///
/// let id = tracelet_core::capture_event(Event {
///     message: Some("cache rebuilt".into()),
///     level: Level::Info,
///     ..Event::new()
/// });
/// assert!(id.is_nil()); // nothing is bound in this example
/// ```
pub fn capture_event(event: Event) -> Uuid {
    Hub::with_active(|hub| hub.capture_event(event))
}

/// Sends a plain text event at `level`.
pub fn capture_message(msg: &str, level: Level) -> Uuid {
    Hub::with_active(|hub| hub.capture_message(msg, level))
}

/// Records breadcrumbs on the current scope.
///
/// Accepts a [`Breadcrumb`](crate::Breadcrumb), an `Option` or `Vec` of
/// them, or a closure producing any of those. Closures only run while a
/// client is bound, so building an expensive breadcrumb costs nothing when
/// reporting is off. The scope keeps the newest `max_breadcrumbs` entries.
///
/// ```
/// use tracelet_core::protocol::{Breadcrumb, Level};
///
/// tracelet_core::add_breadcrumb(|| Breadcrumb {
///     category: Some("queue".into()),
///     message: Some(format!("picked job {}", 17)),
///     level: Level::Debug,
///     ..Default::default()
/// });
/// ```
pub fn add_breadcrumb<B: IntoBreadcrumbs>(breadcrumb: B) {
    Hub::with_active(|hub| hub.add_breadcrumb(breadcrumb))
}

/// Edits the current scope in place.
///
/// `f` is skipped when no client is bound, in which case `R::default()` is
/// returned.
///
/// ```
/// let tagged = tracelet_core::configure_scope(|scope| {
///     scope.set_tag("worker", "7");
///     true
/// });
/// assert!(!tagged);
/// ```
pub fn configure_scope<F, R>(f: F) -> R
where
    R: Default,
    F: FnOnce(&mut Scope) -> R,
{
    Hub::with_active(|hub| hub.configure_scope(f))
}

/// Runs `callback` with a temporary scope prepared by `scope_config`.
///
/// The scope is popped when `callback` returns, so its changes only affect
/// what is captured inside it.
///
/// ```
/// use tracelet_core::{capture_message, with_scope, Level};
///
/// with_scope(
///     |scope| scope.set_tag("tenant", "acme"),
///     || capture_message("quota exceeded", Level::Warning),
/// );
/// ```
pub fn with_scope<C, F, R>(scope_config: C, callback: F) -> R
where
    C: FnOnce(&mut Scope),
    F: FnOnce() -> R,
{
    Hub::with(|hub| {
        if hub.is_active() {
            hub.with_scope(scope_config, callback)
        } else {
            callback()
        }
    })
}

/// The id of the last event captured on this thread's hub.
pub fn last_event_id() -> Option<Uuid> {
    Hub::with(|hub| hub.last_event_id())
}
