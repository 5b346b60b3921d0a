use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock, MutexGuard, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use crate::protocol::{Event, Level};
use crate::scope::{Layer, Stack};
use crate::types::Uuid;
use crate::{Client, IntoBreadcrumbs, Scope, ScopeGuard};

/// The hub of the thread that first touched the SDK.
struct ProcessHub {
    hub: Arc<Hub>,
    owner: ThreadId,
}

static PROCESS_HUB: LazyLock<ProcessHub> = LazyLock::new(|| ProcessHub {
    hub: Arc::new(Hub::new(None, Arc::default())),
    owner: thread::current().id(),
});

thread_local! {
    static THREAD_HUB: RefCell<Arc<Hub>> = RefCell::new(
        if PROCESS_HUB.owner == thread::current().id() {
            Arc::clone(&PROCESS_HUB.hub)
        } else {
            Arc::new(Hub::new_from_top(&PROCESS_HUB.hub))
        }
    );
}

/// Restores the previous thread hub when dropped.
struct SwitchGuard {
    previous: Option<Arc<Hub>>,
    _not_send: PhantomData<MutexGuard<'static, ()>>,
}

impl SwitchGuard {
    fn install(hub: Arc<Hub>) -> Self {
        let previous = THREAD_HUB.with(|current| {
            let same = Arc::ptr_eq(&current.borrow(), &hub);
            (!same).then(|| current.replace(hub))
        });
        SwitchGuard {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for SwitchGuard {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            // keep the replaced hub alive until the borrow has ended
            let _replaced = THREAD_HUB.try_with(|current| current.replace(previous));
        }
    }
}

/// Routes captures to a client together with a stack of scopes.
///
/// Every thread has its own hub, see [`Hub::current`].  A thread's hub
/// starts as a copy of the top layer of the process hub ([`Hub::main`]), so
/// a client bound there before threads are spawned is picked up everywhere.
/// Work that hops between threads, such as futures, can carry a hub along
/// and install it with [`Hub::run`].
///
/// The stack lock is never held while user callbacks, the client or SDK
/// logging run.
#[derive(Debug)]
pub struct Hub {
    stack: Arc<RwLock<Stack>>,
    last_event_id: RwLock<Option<Uuid>>,
}

impl Hub {
    fn read_top<F: FnOnce(&Layer) -> R, R>(&self, f: F) -> R {
        let stack = self.stack.read().unwrap_or_else(PoisonError::into_inner);
        f(stack.top())
    }

    fn write_stack<F: FnOnce(&mut Stack) -> R, R>(&self, f: F) -> R {
        let mut stack = self.stack.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut stack)
    }

    /// A hub with a single layer holding `client` and `scope`.
    pub fn new(client: Option<Arc<Client>>, scope: Arc<Scope>) -> Hub {
        Hub {
            stack: Arc::new(RwLock::new(Stack::new(client, scope))),
            last_event_id: RwLock::new(None),
        }
    }

    /// A hub starting from the client and scope on top of `other`.
    pub fn new_from_top(other: &Hub) -> Hub {
        let Layer { client, scope } = other.read_top(Layer::clone);
        Hub::new(client, scope)
    }

    /// The hub of the calling thread.
    ///
    /// On first use in a thread the hub is derived from [`Hub::main`].  Use
    /// [`Hub::run`] to install a different one.
    pub fn current() -> Arc<Hub> {
        Hub::with(Arc::clone)
    }

    /// The process hub, owned by the thread that first used the SDK.
    pub fn main() -> Arc<Hub> {
        Arc::clone(&PROCESS_HUB.hub)
    }

    /// Calls `f` with the hub of the calling thread.
    ///
    /// During thread teardown the process hub is used instead.
    pub fn with<F, R>(f: F) -> R
    where
        F: FnOnce(&Arc<Hub>) -> R,
    {
        let hub = THREAD_HUB
            .try_with(|current| Arc::clone(&current.borrow()))
            .unwrap_or_else(|_| Hub::main());
        f(&hub)
    }

    /// Like [`Hub::with`], but returns `R::default()` without calling `f`
    /// unless an enabled client is bound.
    pub fn with_active<F, R>(f: F) -> R
    where
        F: FnOnce(&Arc<Hub>) -> R,
        R: Default,
    {
        Hub::with(|hub| if hub.is_active() { f(hub) } else { R::default() })
    }

    /// Installs `hub` as the thread hub while `f` runs.
    ///
    /// The previous hub comes back afterwards, also when `f` panics.
    pub fn run<F: FnOnce() -> R, R>(hub: Arc<Hub>, f: F) -> R {
        let _switch = SwitchGuard::install(hub);
        f()
    }

    /// The client of the top layer.
    pub fn client(&self) -> Option<Arc<Client>> {
        self.read_top(|top| top.client.clone())
    }

    /// Replaces the client of the top layer.
    pub fn bind_client(&self, client: Option<Arc<Client>>) {
        let replaced =
            self.write_stack(|stack| std::mem::replace(&mut stack.top_mut().client, client));
        drop(replaced);
    }

    pub(crate) fn is_active(&self) -> bool {
        self.read_top(|top| top.client.as_ref().is_some_and(|client| client.is_enabled()))
    }

    pub(crate) fn current_scope(&self) -> Arc<Scope> {
        self.read_top(|top| Arc::clone(&top.scope))
    }

    /// Mutates the top scope in place.
    ///
    /// `f` runs under the stack lock and must not call back into the SDK.
    pub(crate) fn with_current_scope_mut<F: FnOnce(&mut Scope) -> R, R>(&self, f: F) -> R {
        self.write_stack(|stack| f(Arc::make_mut(&mut stack.top_mut().scope)))
    }

    /// Captures `event` with the top client and scope.
    ///
    /// Returns the event id, or the nil uuid when there is no client or the
    /// event was dropped.
    pub fn capture_event(&self, event: Event) -> Uuid {
        let Layer { client, scope } = self.read_top(Layer::clone);
        let Some(client) = client else {
            return Uuid::nil();
        };

        let event_id = client.capture_event(event, Some(&*scope));
        if !event_id.is_nil() {
            let mut last = self
                .last_event_id
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            *last = Some(event_id);
        }
        event_id
    }

    /// Captures a plain message at `level`.
    pub fn capture_message(&self, msg: &str, level: Level) -> Uuid {
        self.capture_event(Event {
            message: Some(msg.to_owned()),
            level,
            ..Default::default()
        })
    }

    /// The id of the last event this hub captured.
    pub fn last_event_id(&self) -> Option<Uuid> {
        *self
            .last_event_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Pushes a copy of the top layer.  The guard pops it again.
    pub fn push_scope(&self) -> ScopeGuard {
        let depth = self.write_stack(Stack::push);
        ScopeGuard::new(Arc::clone(&self.stack), depth)
    }

    /// Runs `callback` in a pushed scope configured by `scope_config`.
    ///
    /// See the global [`with_scope`](crate::with_scope).
    pub fn with_scope<C, F, R>(&self, scope_config: C, callback: F) -> R
    where
        C: FnOnce(&mut Scope),
        F: FnOnce() -> R,
    {
        let _guard = self.push_scope();
        self.configure_scope(scope_config);
        callback()
    }

    /// Changes the top scope.
    ///
    /// `f` works on a copy that replaces the top scope when it returns, so
    /// it may capture events itself.
    pub fn configure_scope<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut Scope) -> R,
    {
        let mut scope = Scope::clone(&self.current_scope());
        let rv = f(&mut scope);
        let replaced =
            self.write_stack(|stack| std::mem::replace(&mut stack.top_mut().scope, Arc::new(scope)));
        drop(replaced);
        rv
    }

    /// Records breadcrumbs on the top scope.
    ///
    /// Each one passes the client's `before_breadcrumb` hook first.  Without
    /// a client nothing is recorded.
    pub fn add_breadcrumb<B: IntoBreadcrumbs>(&self, breadcrumbs: B) {
        let Some(client) = self.client() else {
            return;
        };
        let options = client.options();
        let kept: Vec<_> = breadcrumbs
            .into_breadcrumbs()
            .filter_map(|crumb| match &options.before_breadcrumb {
                Some(hook) => hook(crumb),
                None => Some(crumb),
            })
            .collect();
        if !kept.is_empty() {
            let capacity = options.max_breadcrumbs;
            self.with_current_scope_mut(|scope| scope.push_breadcrumbs(kept, capacity));
        }
    }
}
