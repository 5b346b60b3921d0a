use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use crate::breadcrumbs::{keep_newest, BreadcrumbBuffer};
use crate::performance::TransactionOrSpan;
use crate::protocol::{Breadcrumb, Event, Level, Map, Transaction, User, Value};
use crate::Client;

/// A callback that can rewrite or drop an event before it is sent.
pub type EventProcessor = Arc<dyn Fn(Event) -> Option<Event> + Send + Sync>;

/// Data attached to every event captured while the scope is active.
///
/// A scope holds tags, extra values, contexts, the user, a level override,
/// a transaction name, recent breadcrumbs, event processors and the active
/// span.  Each of these sits behind its own `Arc`, so cloning a scope for a
/// nested [`with_scope`](crate::with_scope) call is cheap and a field is
/// only copied once the clone writes to it.
///
/// Scopes are usually changed through [`configure_scope`](crate::configure_scope)
/// and read by the client when it prepares an event.
#[derive(Clone, Default)]
pub struct Scope {
    pub(crate) level: Option<Level>,
    pub(crate) transaction: Option<Arc<str>>,
    pub(crate) breadcrumbs: Arc<BreadcrumbBuffer>,
    pub(crate) user: Option<Arc<User>>,
    pub(crate) extra: Arc<Map<String, Value>>,
    pub(crate) tags: Arc<Map<String, String>>,
    pub(crate) contexts: Arc<Map<String, Value>>,
    pub(crate) event_processors: Arc<Vec<EventProcessor>>,
    pub(crate) span: Arc<Option<TransactionOrSpan>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("level", &self.level)
            .field("transaction", &self.transaction)
            .field("tags", &self.tags)
            .field("user", &self.user)
            .field("breadcrumbs", &self.breadcrumbs.len())
            .field("event_processors", &self.event_processors.len())
            .field("span", &self.span)
            .finish_non_exhaustive()
    }
}

/// A client together with the scope it captures with.
#[derive(Debug, Clone)]
pub(crate) struct Layer {
    pub client: Option<Arc<Client>>,
    pub scope: Arc<Scope>,
}

/// The scope stack of a hub.  It always holds at least the root layer.
#[derive(Debug)]
pub(crate) struct Stack {
    layers: Vec<Layer>,
    root: Layer,
}

impl Stack {
    pub fn new(client: Option<Arc<Client>>, scope: Arc<Scope>) -> Stack {
        Stack {
            layers: Vec::new(),
            root: Layer { client, scope },
        }
    }

    /// Pushes a copy of the top layer and returns the new depth.
    pub fn push(&mut self) -> usize {
        let copy = self.top().clone();
        self.layers.push(copy);
        self.layers.len()
    }

    /// Removes the top layer.  The root layer is never removed.
    pub fn pop(&mut self) -> Option<Layer> {
        self.layers.pop()
    }

    pub fn top(&self) -> &Layer {
        self.layers.last().unwrap_or(&self.root)
    }

    pub fn top_mut(&mut self) -> &mut Layer {
        self.layers.last_mut().unwrap_or(&mut self.root)
    }

    /// Number of layers above the root.
    pub fn depth(&self) -> usize {
        self.layers.len()
    }
}

/// Pops the scope pushed by [`Hub::push_scope`](crate::Hub::push_scope)
/// when dropped.
///
/// Guards must be dropped in reverse order of creation, otherwise dropping
/// panics.
#[derive(Default)]
pub struct ScopeGuard {
    stack: Option<Arc<RwLock<Stack>>>,
    depth: usize,
}

impl ScopeGuard {
    pub(crate) fn new(stack: Arc<RwLock<Stack>>, depth: usize) -> ScopeGuard {
        ScopeGuard {
            stack: Some(stack),
            depth,
        }
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("depth", &self.depth)
            .finish()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        let Some(stack) = self.stack.take() else {
            return;
        };
        let (depth, layer) = {
            let mut stack = stack.write().unwrap_or_else(PoisonError::into_inner);
            (stack.depth(), stack.pop())
        };
        // the layer may own the last client handle, drop it unlocked
        drop(layer);
        if depth != self.depth {
            panic!("scope guards dropped out of order");
        }
    }
}

impl Scope {
    /// Resets every field, including breadcrumbs and the active span.
    pub fn clear(&mut self) {
        *self = Scope::default();
    }

    /// Forgets the recorded breadcrumbs.
    pub fn clear_breadcrumbs(&mut self) {
        Arc::make_mut(&mut self.breadcrumbs).clear();
    }

    /// The recorded breadcrumbs, oldest first.
    pub fn breadcrumbs(&self) -> impl Iterator<Item = &Breadcrumb> {
        self.breadcrumbs.iter()
    }

    /// Overrides the level of every captured event.
    pub fn set_level(&mut self, level: Option<Level>) {
        self.level = level;
    }

    /// Names the current transaction.
    ///
    /// The active span's transaction, if any, is renamed as well.
    pub fn set_transaction(&mut self, transaction: Option<&str>) {
        self.transaction = transaction.map(Arc::from);
        if let (Some(name), Some(span)) = (transaction, self.span.as_ref()) {
            span.rename_transaction(name);
        }
    }

    pub fn set_user(&mut self, user: Option<User>) {
        self.user = user.map(Arc::new);
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_deref()
    }

    /// Sets a tag, converting the value to a string.
    pub fn set_tag<V: ToString>(&mut self, key: &str, value: V) {
        Arc::make_mut(&mut self.tags).insert(key.to_owned(), value.to_string());
    }

    pub fn remove_tag(&mut self, key: &str) {
        Arc::make_mut(&mut self.tags).remove(key);
    }

    pub fn get_tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    /// Sets a context.
    ///
    /// Contexts are JSON objects, other values are wrapped as `{"value": ..}`.
    pub fn set_context<C: Into<Value>>(&mut self, key: &str, value: C) {
        let value = match value.into() {
            object @ Value::Object(_) => object,
            scalar => serde_json::json!({ "value": scalar }),
        };
        Arc::make_mut(&mut self.contexts).insert(key.to_owned(), value);
    }

    pub fn remove_context(&mut self, key: &str) {
        Arc::make_mut(&mut self.contexts).remove(key);
    }

    pub fn set_extra(&mut self, key: &str, value: Value) {
        Arc::make_mut(&mut self.extra).insert(key.to_owned(), value);
    }

    pub fn remove_extra(&mut self, key: &str) {
        Arc::make_mut(&mut self.extra).remove(key);
    }

    /// Registers a processor.  Processors run in insertion order after the
    /// scope data has been applied, and any of them may drop the event.
    pub fn add_event_processor<F>(&mut self, f: F)
    where
        F: Fn(Event) -> Option<Event> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.event_processors).push(Arc::new(f));
    }

    /// Makes `span` the parent of spans started under this scope.
    pub fn set_span(&mut self, span: Option<TransactionOrSpan>) {
        self.span = Arc::new(span);
    }

    pub fn get_span(&self) -> Option<TransactionOrSpan> {
        (*self.span).clone()
    }

    /// Appends breadcrumbs, resizing the buffer to `capacity` first.
    pub(crate) fn push_breadcrumbs<I>(&mut self, breadcrumbs: I, capacity: usize)
    where
        I: IntoIterator<Item = Breadcrumb>,
    {
        let buffer = Arc::make_mut(&mut self.breadcrumbs);
        if buffer.capacity() != capacity {
            buffer.set_capacity(capacity);
        }
        breadcrumbs.into_iter().for_each(|crumb| {
            buffer.push(crumb);
        });
    }

    /// Fills `event` from the scope and runs the event processors.
    ///
    /// Values already on the event win, except for the level override.
    /// The breadcrumbs are the scope's followed by the event's, trimmed to
    /// the buffer capacity.  `None` means a processor dropped the event.
    pub fn apply_to_event(&self, mut event: Event) -> Option<Event> {
        event.level = self.level.unwrap_or(event.level);
        if event.user.is_none() {
            event.user = self.user.as_deref().cloned();
        }
        if event.transaction.is_none() {
            event.transaction = self.transaction.as_deref().map(str::to_owned);
        }

        let mut breadcrumbs = self.breadcrumbs.snapshot();
        breadcrumbs.append(&mut event.breadcrumbs);
        keep_newest(&mut breadcrumbs, self.breadcrumbs.capacity());
        event.breadcrumbs = breadcrumbs;

        fill_missing(&mut event.extra, &self.extra);
        fill_missing(&mut event.tags, &self.tags);
        fill_missing(&mut event.contexts, &self.contexts);
        if let Some(span) = self.span.as_ref() {
            span.apply_to_event(&mut event);
        }

        self.event_processors
            .iter()
            .try_fold(event, |event, processor| processor(event))
    }

    /// Fills the user, tags, extra and contexts of a finished transaction.
    pub fn apply_to_transaction(&self, transaction: &mut Transaction) {
        if transaction.user.is_none() {
            transaction.user = self.user.as_deref().cloned();
        }
        fill_missing(&mut transaction.extra, &self.extra);
        fill_missing(&mut transaction.tags, &self.tags);
        fill_missing(&mut transaction.contexts, &self.contexts);
    }
}

fn fill_missing<V: Clone>(target: &mut Map<String, V>, source: &Map<String, V>) {
    for (key, value) in source {
        target.entry(key.clone()).or_insert_with(|| value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_values_win() {
        let mut scope = Scope::default();
        scope.set_tag("shared", "scope");
        scope.set_tag("only_scope", 1);
        scope.set_extra("shared", "scope".into());
        scope.set_context("device", serde_json::json!({"model": "pixel"}));
        scope.set_level(Some(Level::Fatal));
        scope.set_transaction(Some("/checkout"));

        let mut event = Event::new();
        event.tags.insert("shared".into(), "event".into());
        event.extra.insert("shared".into(), "event".into());
        event.level = Level::Info;

        let event = scope.apply_to_event(event).unwrap();
        assert_eq!(event.tags["shared"], "event");
        assert_eq!(event.tags["only_scope"], "1");
        assert_eq!(event.extra["shared"], "event");
        assert_eq!(event.contexts["device"]["model"], "pixel");
        assert_eq!(event.level, Level::Fatal);
        assert_eq!(event.transaction.as_deref(), Some("/checkout"));
    }

    #[test]
    fn scalar_contexts_are_wrapped() {
        let mut scope = Scope::default();
        scope.set_context("flag", true);
        assert_eq!(scope.contexts["flag"], serde_json::json!({"value": true}));

        scope.remove_context("flag");
        assert!(scope.contexts.is_empty());
    }

    #[test]
    fn breadcrumbs_are_snapshotted_oldest_first() {
        let mut scope = Scope::default();
        let crumbs = ["a", "b", "c"].map(|message| Breadcrumb {
            message: Some(message.into()),
            ..Default::default()
        });
        scope.push_breadcrumbs(crumbs, 2);

        let mut event = Event::new();
        event.breadcrumbs.push(Breadcrumb {
            message: Some("own".into()),
            ..Default::default()
        });
        let event = scope.apply_to_event(event).unwrap();
        let messages: Vec<_> = event
            .breadcrumbs
            .iter()
            .filter_map(|crumb| crumb.message.as_deref())
            .collect();
        assert_eq!(messages, ["c", "own"]);

        // the clone shares storage until it is written to
        let mut cloned = scope.clone();
        cloned.clear_breadcrumbs();
        assert_eq!(scope.breadcrumbs().count(), 2);
        assert_eq!(cloned.breadcrumbs().count(), 0);
    }

    #[test]
    fn merged_breadcrumbs_are_capped() {
        let mut scope = Scope::default();
        scope.push_breadcrumbs(
            ["s1", "s2", "s3"].map(|message| Breadcrumb {
                message: Some(message.into()),
                ..Default::default()
            }),
            4,
        );
        let mut event = Event::new();
        event.breadcrumbs = ["e1", "e2", "e3"]
            .map(|message| Breadcrumb {
                message: Some(message.into()),
                ..Default::default()
            })
            .into();

        let event = scope.apply_to_event(event).unwrap();
        let messages: Vec<_> = event
            .breadcrumbs
            .iter()
            .filter_map(|crumb| crumb.message.as_deref())
            .collect();
        assert_eq!(messages, ["s3", "e1", "e2", "e3"]);
    }

    #[test]
    fn event_processor_can_drop() {
        let mut scope = Scope::default();
        scope.add_event_processor(|event| {
            if event.message.as_deref() == Some("drop me") {
                None
            } else {
                Some(event)
            }
        });

        let mut event = Event::new();
        event.message = Some("drop me".into());
        assert!(scope.apply_to_event(event).is_none());
        assert!(scope.apply_to_event(Event::new()).is_some());
    }

    #[test]
    fn stack_keeps_its_root() {
        let mut stack = Stack::new(None, Default::default());
        assert!(stack.pop().is_none());
        assert_eq!(stack.push(), 1);
        Arc::make_mut(&mut stack.top_mut().scope).set_tag("inner", "yes");
        assert_eq!(stack.depth(), 1);

        let popped = stack.pop().unwrap();
        assert_eq!(popped.scope.get_tag("inner"), Some("yes"));
        assert_eq!(stack.top().scope.get_tag("inner"), None);
    }
}
