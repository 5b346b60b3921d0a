//! Timing spans grouped into transactions.
//!
//! A [`Transaction`] is the root of a span tree.  Every handle in the tree,
//! the transaction included, points at the same recording, which collects
//! finished children until the transaction itself is finished and handed
//! to the client.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::protocol::{self, SpanId, SpanStatus, TraceId, Value};
use crate::{Client, Hub};

/// The name of the header used for trace propagation.
pub const TRACE_HEADER: &str = "tracelet-trace";

/// A trace propagation header as a `(name, value)` pair.
pub type TraceHeader = (&'static str, String);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts a new transaction on the current hub.
///
/// Nothing is sent unless [`Transaction::finish`] is called.  Child spans are
/// opened with [`Transaction::start_child`].
pub fn start_transaction(ctx: TransactionContext) -> Transaction {
    let client = Hub::with_active(|hub| hub.client());
    Transaction::new(client, ctx)
}

/// Runs `f` inside a new span.
///
/// The span is a child of the span currently set on the scope, or a new
/// transaction if there is none.  While `f` runs, the new span is the active
/// span of the scope, so nested calls build a tree.  The span is finished
/// once `f` returns.
///
/// # Examples
///
/// ```
/// let rows = tracelet_core::start_span("db.query", "load users", |span| {
///     span.set_data("rows", 3.into());
///     3
/// });
/// assert_eq!(rows, 3);
/// ```
pub fn start_span<F, R>(op: &str, description: &str, f: F) -> R
where
    F: FnOnce(&TransactionOrSpan) -> R,
{
    Hub::with(|hub| hub.start_span(op, description, f))
}

impl Hub {
    /// Starts a new transaction bound to this hub's client.
    pub fn start_transaction(&self, ctx: TransactionContext) -> Transaction {
        Transaction::new(self.client(), ctx)
    }

    /// Runs `f` inside a new span.
    ///
    /// See the global [`start_span`].
    pub fn start_span<F, R>(&self, op: &str, description: &str, f: F) -> R
    where
        F: FnOnce(&TransactionOrSpan) -> R,
    {
        let span = match self.current_scope().get_span() {
            Some(parent) => TransactionOrSpan::Span(parent.start_child(op, description)),
            None => {
                let name = if description.is_empty() { op } else { description };
                TransactionOrSpan::Transaction(
                    self.start_transaction(TransactionContext::new(name, op)),
                )
            }
        };

        let rv = {
            let _guard = self.push_scope();
            self.with_current_scope_mut(|scope| scope.set_span(Some(span.clone())));
            f(&span)
        };
        span.finish();
        rv
    }
}

/// Name, operation and trace position of a transaction that is about to start.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    name: String,
    op: String,
    trace_id: TraceId,
    parent_span_id: Option<SpanId>,
    sampled: Option<bool>,
}

impl TransactionContext {
    /// A context that starts a fresh trace.
    #[must_use = "this must be used with `start_transaction`"]
    pub fn new(name: &str, op: &str) -> Self {
        TransactionContext {
            name: name.to_owned(),
            op: op.to_owned(),
            trace_id: TraceId::default(),
            parent_span_id: None,
            sampled: None,
        }
    }

    /// A context that continues the trace named by incoming `headers`.
    ///
    /// The first `tracelet-trace` header, matched case-insensitively, is
    /// used.  When it is missing or malformed a fresh trace is started.
    #[must_use = "this must be used with `start_transaction`"]
    pub fn continue_from_headers<'a, I>(name: &str, op: &str, headers: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ctx = TransactionContext::new(name, op);
        let parent = headers
            .into_iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(TRACE_HEADER))
            .and_then(|(_, value)| TraceParent::parse(value));
        if let Some(parent) = parent {
            ctx.trace_id = parent.trace_id;
            ctx.parent_span_id = Some(parent.span_id);
            ctx.sampled = parent.sampled;
        }
        ctx
    }

    /// A context that continues the trace of `span`, for work handed off to
    /// another thread.
    pub fn continue_from_span(name: &str, op: &str, span: Option<&TransactionOrSpan>) -> Self {
        let mut ctx = TransactionContext::new(name, op);
        if let Some(span) = span {
            let node = span.node();
            let (trace_id, span_id) = node.ids();
            ctx.trace_id = trace_id;
            ctx.parent_span_id = Some(span_id);
            ctx.sampled = Some(node.sampled);
        }
        ctx
    }

    /// Forces the sampling decision.  `None` defers to `traces_sample_rate`.
    pub fn set_sampled(&mut self, sampled: impl Into<Option<bool>>) {
        self.sampled = sampled.into();
    }

    /// The explicit sampling decision, if any.
    pub fn sampled(&self) -> Option<bool> {
        self.sampled
    }

    /// The transaction name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The operation of the root span.
    pub fn operation(&self) -> &str {
        &self.op
    }

    /// The trace the transaction joins.
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// The remote span this transaction continues.
    pub fn parent_span_id(&self) -> Option<SpanId> {
        self.parent_span_id
    }
}

/// The transaction payload while it is being recorded.
///
/// Absent when nothing will be sent: the transaction was not sampled, there
/// is no client, or it has already been finished.
#[derive(Debug)]
struct Recording {
    client: Arc<Client>,
    max_spans: usize,
    payload: protocol::Transaction,
}

type SharedRecording = Arc<Mutex<Option<Recording>>>;

/// One span of the tree plus the recording it reports into.
#[derive(Debug, Clone)]
struct Node {
    recording: SharedRecording,
    span: Arc<Mutex<protocol::Span>>,
    sampled: bool,
}

impl Node {
    fn child(&self, op: &str, description: &str) -> Node {
        let (trace_id, parent) = self.ids();
        let span = protocol::Span {
            trace_id,
            parent_span_id: Some(parent),
            op: Some(op.to_owned()),
            description: Some(description.to_owned()).filter(|d| !d.is_empty()),
            ..Default::default()
        };
        Node {
            recording: Arc::clone(&self.recording),
            span: Arc::new(Mutex::new(span)),
            sampled: self.sampled,
        }
    }

    fn ids(&self) -> (TraceId, SpanId) {
        let span = lock(&self.span);
        (span.trace_id, span.span_id)
    }

    fn context(&self) -> protocol::TraceContext {
        let span = lock(&self.span);
        protocol::TraceContext {
            span_id: span.span_id,
            trace_id: span.trace_id,
            parent_span_id: span.parent_span_id,
            op: span.op.clone(),
            status: span.status,
        }
    }

    fn header(&self) -> TraceHeader {
        let (trace_id, span_id) = self.ids();
        let parent = TraceParent {
            trace_id,
            span_id,
            sampled: Some(self.sampled),
        };
        (TRACE_HEADER, parent.to_string())
    }

    /// Stamps the end time.  Returns the finished span the first time only.
    fn close(&self) -> Option<protocol::Span> {
        let mut span = lock(&self.span);
        if span.timestamp.is_some() {
            return None;
        }
        span.finish();
        Some(span.clone())
    }
}

/// A running transaction, the root of a span tree.
///
/// Neither the transaction nor its children are sent unless
/// [`Transaction::finish`] is called.
#[derive(Clone, Debug)]
pub struct Transaction {
    node: Node,
}

impl Transaction {
    fn new(client: Option<Arc<Client>>, ctx: TransactionContext) -> Self {
        let sampled = ctx.sampled.unwrap_or_else(|| {
            client
                .as_ref()
                .is_some_and(|client| client.sample_traces_should_send())
        });
        let recording = client.filter(|_| sampled).map(|client| Recording {
            max_spans: client.options().max_spans,
            client,
            payload: protocol::Transaction {
                name: Some(ctx.name),
                ..Default::default()
            },
        });
        let root = protocol::Span {
            trace_id: ctx.trace_id,
            parent_span_id: ctx.parent_span_id,
            op: Some(ctx.op),
            ..Default::default()
        };
        Transaction {
            node: Node {
                recording: Arc::new(Mutex::new(recording)),
                span: Arc::new(Mutex::new(root)),
                sampled,
            },
        }
    }

    /// Adds extra data to the transaction.
    pub fn set_data(&self, key: &str, value: Value) {
        if let Some(recording) = lock(&self.node.recording).as_mut() {
            recording.payload.extra.insert(key.to_owned(), value);
        }
    }

    /// Adds a tag to the transaction.
    pub fn set_tag<V: ToString>(&self, key: &str, value: V) {
        if let Some(recording) = lock(&self.node.recording).as_mut() {
            recording.payload.tags.insert(key.to_owned(), value.to_string());
        }
    }

    /// Status of the root span.
    pub fn get_status(&self) -> Option<SpanStatus> {
        lock(&self.node.span).status
    }

    /// Sets the status of the root span.
    pub fn set_status(&self, status: SpanStatus) {
        lock(&self.node.span).status = Some(status);
    }

    /// Whether finishing the transaction sends it.
    pub fn is_sampled(&self) -> bool {
        self.node.sampled
    }

    /// How long the transaction ran, `None` while it is running.
    pub fn duration(&self) -> Option<Duration> {
        lock(&self.node.span).duration()
    }

    /// The `trace` context describing the root span.
    pub fn trace_context(&self) -> protocol::TraceContext {
        self.node.context()
    }

    /// The header that lets a downstream service continue this trace.
    pub fn trace_header(&self) -> TraceHeader {
        self.node.header()
    }

    /// Opens a child span.  It is only recorded once finished.
    #[must_use = "a span must be explicitly closed via `finish()`"]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        Span {
            node: self.node.child(op, description),
        }
    }

    /// Stamps the end time and hands the transaction, with every child
    /// finished so far, to the client.  Later calls do nothing.
    pub fn finish(&self) {
        let Some(root) = self.node.close() else {
            return;
        };
        let Some(Recording {
            client,
            mut payload,
            ..
        }) = lock(&self.node.recording).take()
        else {
            return;
        };

        payload.start_timestamp = root.start_timestamp;
        payload.timestamp = root.timestamp;
        payload
            .contexts
            .insert("trace".to_owned(), self.node.context().into());

        let scope = Hub::with(|hub| hub.current_scope());
        client.capture_transaction(payload, Some(&*scope));
    }
}

/// A running child span.
///
/// A span that is never finished is not recorded.
#[derive(Clone, Debug)]
pub struct Span {
    node: Node,
}

impl Span {
    /// Adds a data attribute.
    pub fn set_data(&self, key: &str, value: Value) {
        lock(&self.node.span).data.insert(key.to_owned(), value);
    }

    /// Adds a tag.
    pub fn set_tag<V: ToString>(&self, key: &str, value: V) {
        lock(&self.node.span).tags.insert(key.to_owned(), value.to_string());
    }

    /// Status of the span.
    pub fn get_status(&self) -> Option<SpanStatus> {
        lock(&self.node.span).status
    }

    /// Sets the status of the span.
    pub fn set_status(&self, status: SpanStatus) {
        lock(&self.node.span).status = Some(status);
    }

    /// Inherited from the transaction.
    pub fn is_sampled(&self) -> bool {
        self.node.sampled
    }

    /// How long the span ran, `None` while it is running.
    pub fn duration(&self) -> Option<Duration> {
        lock(&self.node.span).duration()
    }

    /// Id of the span.
    pub fn span_id(&self) -> SpanId {
        self.node.ids().1
    }

    /// A `trace` context with this span as the current one.
    pub fn trace_context(&self) -> protocol::TraceContext {
        self.node.context()
    }

    /// The header that lets a downstream service continue from this span.
    pub fn trace_header(&self) -> TraceHeader {
        self.node.header()
    }

    /// Opens a nested span.
    #[must_use = "a span must be explicitly closed via `finish()`"]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        Span {
            node: self.node.child(op, description),
        }
    }

    /// Stamps the end time and adds the span to its transaction.
    ///
    /// Spans finished after their transaction, or beyond `max_spans`, are
    /// discarded.  Later calls do nothing.
    pub fn finish(&self) {
        let Some(finished) = self.node.close() else {
            return;
        };
        if let Some(recording) = lock(&self.node.recording).as_mut() {
            if recording.payload.spans.len() < recording.max_spans {
                recording.payload.spans.push(finished);
            }
        }
    }
}

/// Either end of the span tree, as stored on a [`Scope`](crate::Scope).
#[derive(Clone, Debug)]
pub enum TransactionOrSpan {
    /// The root of the tree.
    Transaction(Transaction),
    /// A child somewhere below the root.
    Span(Span),
}

impl From<Transaction> for TransactionOrSpan {
    fn from(transaction: Transaction) -> Self {
        TransactionOrSpan::Transaction(transaction)
    }
}

impl From<Span> for TransactionOrSpan {
    fn from(span: Span) -> Self {
        TransactionOrSpan::Span(span)
    }
}

impl TransactionOrSpan {
    fn node(&self) -> &Node {
        match self {
            TransactionOrSpan::Transaction(transaction) => &transaction.node,
            TransactionOrSpan::Span(span) => &span.node,
        }
    }

    /// Transaction extra data or span data, depending on the variant.
    pub fn set_data(&self, key: &str, value: Value) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.set_data(key, value),
            TransactionOrSpan::Span(span) => span.set_data(key, value),
        }
    }

    /// Transaction tag or span tag, depending on the variant.
    pub fn set_tag<V: ToString>(&self, key: &str, value: V) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.set_tag(key, value),
            TransactionOrSpan::Span(span) => span.set_tag(key, value),
        }
    }

    /// See [`Span::get_status`].
    pub fn get_status(&self) -> Option<SpanStatus> {
        lock(&self.node().span).status
    }

    /// See [`Span::set_status`].
    pub fn set_status(&self, status: SpanStatus) {
        lock(&self.node().span).status = Some(status);
    }

    /// See [`Span::is_sampled`].
    pub fn is_sampled(&self) -> bool {
        self.node().sampled
    }

    /// See [`Span::duration`].
    pub fn duration(&self) -> Option<Duration> {
        lock(&self.node().span).duration()
    }

    /// See [`Span::trace_context`].
    pub fn trace_context(&self) -> protocol::TraceContext {
        self.node().context()
    }

    /// See [`Span::trace_header`].
    pub fn trace_header(&self) -> TraceHeader {
        self.node().header()
    }

    /// See [`Span::start_child`].
    #[must_use = "a span must be explicitly closed via `finish()`"]
    pub fn start_child(&self, op: &str, description: &str) -> Span {
        Span {
            node: self.node().child(op, description),
        }
    }

    /// Finishes the transaction or span.
    pub fn finish(&self) {
        match self {
            TransactionOrSpan::Transaction(transaction) => transaction.finish(),
            TransactionOrSpan::Span(span) => span.finish(),
        }
    }

    /// Renames the transaction this handle belongs to.
    pub(crate) fn rename_transaction(&self, name: &str) {
        if let Some(recording) = lock(&self.node().recording).as_mut() {
            recording.payload.name = Some(name.to_owned());
        }
    }

    pub(crate) fn apply_to_event(&self, event: &mut protocol::Event) {
        event
            .contexts
            .entry("trace".to_owned())
            .or_insert_with(|| self.trace_context().into());
    }
}

/// `<trace_id>-<span_id>[-<0|1>]`
#[derive(Debug, PartialEq)]
struct TraceParent {
    trace_id: TraceId,
    span_id: SpanId,
    sampled: Option<bool>,
}

impl TraceParent {
    fn parse(header: &str) -> Option<TraceParent> {
        let mut parts = header.trim().splitn(3, '-');
        let trace_id = parts.next()?.parse().ok()?;
        let span_id = parts.next()?.parse().ok()?;
        let sampled = match parts.next() {
            None => None,
            Some("1") => Some(true),
            Some("0") => Some(false),
            Some(_) => return None,
        };
        Some(TraceParent {
            trace_id,
            span_id,
            sampled,
        })
    }
}

impl fmt::Display for TraceParent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.trace_id, self.span_id)?;
        match self.sampled {
            Some(true) => f.write_str("-1"),
            Some(false) => f.write_str("-0"),
            None => Ok(()),
        }
    }
}
