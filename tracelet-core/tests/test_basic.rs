#![cfg(feature = "test")]

use tracelet_core::protocol::{EnvelopeItem, Level, SpanStatus, Value};
use tracelet_core::test::{
    with_captured_envelopes_options, with_captured_events,
};
use tracelet_core::{ClientOptions, Hub, TransactionContext};

#[test]
fn test_basic_capture_message() {
    let mut last_event_id = None;
    let events = with_captured_events(|| {
        tracelet_core::configure_scope(|scope| {
            scope.set_tag("worker", "worker1");
        });
        tracelet_core::capture_message("Hello World!", Level::Warning);
        last_event_id = tracelet_core::last_event_id();
    });
    assert_eq!(events.len(), 1);
    let event = events.into_iter().next().unwrap();
    assert_eq!(event.message.as_deref(), Some("Hello World!"));
    assert_eq!(event.level, Level::Warning);
    assert_eq!(event.tags.get("worker").map(String::as_str), Some("worker1"));
    assert_eq!(Some(event.event_id), last_event_id);
}

#[test]
fn test_event_processor_can_drop() {
    let events = with_captured_events(|| {
        tracelet_core::with_scope(
            |scope| scope.add_event_processor(|_| None),
            || tracelet_core::capture_message("dropped", Level::Info),
        );
        tracelet_core::capture_message("kept", Level::Info);
    });
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message.as_deref(), Some("kept"));
}

#[test]
fn test_nested_spans_in_one_transaction() {
    let envelopes = with_captured_envelopes_options(
        || {
            tracelet_core::start_span("http.server", "GET /cart", |root| {
                root.set_status(SpanStatus::Ok);
                tracelet_core::start_span("db.query", "select cart", |span| {
                    span.set_data("rows", 3.into());
                });
                tracelet_core::capture_message("inside span", Level::Info);
            });
        },
        ClientOptions {
            traces_sample_rate: 1.0,
            ..Default::default()
        },
    );

    let items: Vec<_> = envelopes.iter().flat_map(|envelope| envelope.items()).collect();
    let event = items
        .iter()
        .find_map(|item| match item {
            EnvelopeItem::Event(event) => Some(event),
            _ => None,
        })
        .unwrap();
    let transaction = items
        .iter()
        .find_map(|item| match item {
            EnvelopeItem::Transaction(transaction) => Some(transaction),
            _ => None,
        })
        .unwrap();

    assert_eq!(transaction.name.as_deref(), Some("GET /cart"));
    assert_eq!(transaction.spans.len(), 1);
    let child = &transaction.spans[0];
    assert_eq!(child.op.as_deref(), Some("db.query"));
    assert_eq!(child.data.get("rows"), Some(&Value::from(3)));

    let trace = &transaction.contexts["trace"];
    assert_eq!(event.contexts["trace"]["trace_id"], trace["trace_id"]);
    assert_eq!(
        child.parent_span_id.map(|id| id.to_string()).as_deref(),
        trace["span_id"].as_str()
    );
}

#[test]
fn test_hub_per_thread() {
    let events = with_captured_events(|| {
        let hub = Hub::current();
        std::thread::spawn(move || {
            Hub::run(hub, || tracelet_core::capture_message("from thread", Level::Info));
        })
        .join()
        .unwrap();
    });
    assert_eq!(events.len(), 1);
}

#[test]
fn test_continue_trace_from_headers() {
    let envelopes = with_captured_envelopes_options(
        || {
            let ctx = TransactionContext::continue_from_headers(
                "worker",
                "queue.process",
                [(
                    "tracelet-trace",
                    "09e04486820349518ac7b5d2adbf6ba5-9cf635fa5b870b3a-1",
                )],
            );
            tracelet_core::start_transaction(ctx).finish();
        },
        ClientOptions::default(),
    );
    let transaction = envelopes[0].transaction().unwrap();
    let trace = &transaction.contexts["trace"];
    assert_eq!(trace["trace_id"], "09e04486820349518ac7b5d2adbf6ba5");
    assert_eq!(trace["parent_span_id"], "9cf635fa5b870b3a");
}
