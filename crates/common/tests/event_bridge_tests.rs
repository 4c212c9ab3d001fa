//! Event Bridge Integration Tests
//!
//! Tests for the channel bridge between background sync contexts and the
//! protocol writer, plus the scripted enumerator used across crates.
//!
//! # Test Scenarios
//! - Events emitted from plain threads reach the async receiver in order
//! - Concurrent emitters never lose events
//! - Emitting never blocks, even with nobody draining
//! - Mock enumerator lifecycle and scripting
//!
//! Run with: `cargo test -p common --test event_bridge_tests`

use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockEnumerator, RecordingSink, create_dfu_record, create_dfu_record_list,
    with_timeout,
};
use common::{DeviceEnumerator, EventSink, SyncEvent, create_event_bridge};
use protocol::{Port, PortProperties};
use std::sync::Arc;
use std::thread;

fn port(address: &str) -> Port {
    Port {
        address: address.to_string(),
        address_label: address.to_string(),
        protocol: "dfu".to_string(),
        protocol_label: "USB DFU".to_string(),
        properties: PortProperties::new(),
        hardware_id: String::new(),
    }
}

// ============================================================================
// Bridge Tests
// ============================================================================

#[tokio::test]
async fn test_bridge_delivers_across_threads() {
    let (sink, events) = create_event_bridge();

    let handle = thread::spawn(move || {
        for i in 0..10 {
            sink.on_port_added(&port(&format!("1-{}", i)));
        }
    });
    handle.join().expect("Emitter thread panicked");

    for i in 0..10 {
        let event = with_timeout(DEFAULT_TEST_TIMEOUT, events.recv())
            .await
            .expect("Timed out")
            .expect("Bridge closed");
        assert_eq!(event, SyncEvent::Added(port(&format!("1-{}", i))));
    }
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_concurrent_emitters() {
    let (sink, events) = create_event_bridge();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    sink.on_port_added(&port(&format!("{}-{}", t, i)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("Emitter thread panicked");
    }

    let mut received = 0;
    while let Some(event) = events.try_recv() {
        assert!(matches!(event, SyncEvent::Added(_)));
        received += 1;
    }
    assert_eq!(received, 100);
}

#[test]
fn test_emit_without_reader_never_blocks() {
    let (sink, events) = create_event_bridge();
    for i in 0..10_000 {
        sink.on_port_removed(&port(&format!("1-{}", i)));
    }
    drop(events);

    // Receiver gone: events are dropped silently
    sink.on_error("late error");
}

#[tokio::test]
async fn test_bridge_used_as_trait_object() {
    let (sink, events) = create_event_bridge();
    let sink: Arc<dyn EventSink> = Arc::new(sink);

    sink.on_error("scan failed");
    assert_eq!(
        events.recv().await.unwrap(),
        SyncEvent::Error("scan failed".to_string())
    );
}

// ============================================================================
// Test Utility Tests
// ============================================================================

#[test]
fn test_mock_enumerator_lifecycle() {
    let enumerator = MockEnumerator::new();
    enumerator.set_records(create_dfu_record_list(3));

    assert!(enumerator.enumerate().is_err());
    enumerator.open().unwrap();
    assert_eq!(enumerator.enumerate().unwrap().len(), 3);

    enumerator.set_records(vec![create_dfu_record("2-1", 0x1234, 0x5678, "")]);
    assert_eq!(enumerator.enumerate().unwrap()[0].path, "2-1");

    enumerator.close();
    enumerator.close();
    assert!(!enumerator.is_open());
    assert_eq!(enumerator.open_calls(), 1);
    assert_eq!(enumerator.close_calls(), 2);
    assert_eq!(enumerator.enumerate_calls(), 3);
}

#[test]
fn test_mock_enumerator_scripted_failures() {
    let enumerator = MockEnumerator::failing_open("no device access");
    match enumerator.open() {
        Err(common::Error::BackendInit(message)) => assert_eq!(message, "no device access"),
        other => panic!("unexpected {:?}", other),
    }

    let enumerator = MockEnumerator::new();
    enumerator.open().unwrap();
    enumerator.set_enumerate_error(Some("bus reset"));
    assert!(enumerator.enumerate().is_err());
    enumerator.set_enumerate_error(None);
    assert!(enumerator.enumerate().is_ok());
}

#[test]
fn test_recording_sink_keeps_order() {
    let sink = RecordingSink::new();
    sink.on_port_added(&port("1-1"));
    sink.on_port_removed(&port("1-2"));
    sink.on_error("boom");

    assert_eq!(sink.added(), vec!["1-1"]);
    assert_eq!(sink.removed(), vec!["1-2"]);
    assert_eq!(sink.errors(), vec!["boom"]);
    assert_eq!(sink.take().len(), 3);
    assert!(sink.is_empty());
}
