//! Integration tests for the connection lifecycle
//!
//! - Exclusive sessions across reconnects
//! - Monotonic connection ids
//! - Settle check against devices that drop the line
//! - Events tagged with the owning connection

mod common;

use common::{Device, FakeBackend};
use spp_capture::{ConnectionId, ConnectionState, SerialEvent, TransportError};
use std::time::Duration;
use tokio::sync::broadcast;

fn drain(events: &mut broadcast::Receiver<SerialEvent>) -> Vec<SerialEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test]
async fn reconnect_closes_previous_session_first() {
    let backend = FakeBackend::new()
        .with("COM3", Device::Echo)
        .with("COM4", Device::Echo);
    let manager = backend.manager();
    let mut events = manager.subscribe();

    let first = manager.connect("COM3").await.unwrap();
    let second = manager.connect("COM4").await.unwrap();

    assert!(second.connection_id > first.connection_id);
    assert_eq!(manager.current(), Some(second.clone()));
    assert_eq!(manager.state(), ConnectionState::Open);
    assert_eq!(backend.opened(), ["COM3", "COM4"]);

    let closed: Vec<ConnectionId> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, SerialEvent::Closed { .. }))
        .map(|e| e.connection_id())
        .collect();
    assert_eq!(closed, [first.connection_id]);
}

#[tokio::test]
async fn reconnecting_same_port_gets_new_identity() {
    let backend = FakeBackend::new().with("/dev/cu.BS1C", Device::Echo);
    let manager = backend.manager();

    let mut last = ConnectionId(0);
    for _ in 0..3 {
        let info = manager.connect("/dev/cu.BS1C").await.unwrap();
        assert!(info.connection_id > last);
        last = info.connection_id;
    }
    assert_eq!(last, ConnectionId(3));
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let backend = FakeBackend::new().with("COM3", Device::Echo);
    let manager = backend.manager();

    assert_eq!(manager.disconnect().await, None);

    let info = manager.connect("COM3").await.unwrap();
    assert_eq!(manager.disconnect().await, Some(info));
    assert_eq!(manager.disconnect().await, None);
    assert_eq!(manager.state(), ConnectionState::Idle);
}

#[tokio::test]
async fn unknown_port_fails_to_open() {
    let manager = FakeBackend::new().manager();

    let err = manager.connect("COM99").await.unwrap_err();
    assert!(matches!(err, TransportError::OpenFailed { .. }));
    assert!(err.to_string().contains("COM99"));
}

#[tokio::test]
async fn device_dropping_line_fails_settle_check() {
    let backend = FakeBackend::new().with("/dev/tty.BS1C", Device::DropOnOpen);
    let manager = backend.manager();

    let err = manager.connect("/dev/tty.BS1C").await.unwrap_err();
    assert!(matches!(err, TransportError::ImmediateClose { .. }));
    assert!(manager.current().is_none());
    assert_eq!(manager.disconnect().await, None);
}

#[tokio::test]
async fn rapid_reconnect_supersedes_settling_attempt() {
    let backend = FakeBackend::new()
        .with("COM3", Device::Echo)
        .with("COM4", Device::Echo);
    let manager = backend.manager();

    let (a, b) = tokio::join!(manager.connect("COM3"), manager.connect("COM4"));

    let (winner, loser) = match (a, b) {
        (Ok(info), Err(err)) | (Err(err), Ok(info)) => (info, err),
        (a, b) => panic!("expected exactly one success, got {a:?} and {b:?}"),
    };
    assert!(matches!(loser, TransportError::ImmediateClose { .. }));
    assert_eq!(winner.connection_id, ConnectionId(2));
    assert_eq!(manager.current(), Some(winner));
}

#[tokio::test]
async fn spontaneous_close_is_reported_with_connection_id() {
    let backend = FakeBackend::new().with("COM5", Device::Silent);
    let manager = backend.manager();
    let mut events = manager.subscribe();

    let info = manager.connect("COM5").await.unwrap();
    backend.hang_up("COM5");

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        event,
        SerialEvent::Closed { ref path, connection_id, .. }
            if path == "COM5" && connection_id == info.connection_id
    ));
    assert_eq!(manager.state(), ConnectionState::Idle);

    // the dead session is still cleared (and reported) by disconnect
    assert_eq!(manager.disconnect().await, Some(info));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test]
async fn broken_handle_closes_quietly() {
    let backend = FakeBackend::new().with("COM6", Device::BrokenWriter);
    let manager = backend.manager();

    let info = manager.connect("COM6").await.unwrap();
    assert_eq!(manager.disconnect().await, Some(info));
}

#[tokio::test]
async fn read_error_is_reported_then_closed_once() {
    let backend = FakeBackend::new().with("COM8", Device::ResetOnHangUp);
    let manager = backend.manager();
    let mut events = manager.subscribe();

    let info = manager.connect("COM8").await.unwrap();
    backend.hang_up("COM8");

    let mut seen = Vec::new();
    while !matches!(seen.last(), Some(SerialEvent::Closed { .. })) {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(event);
    }

    assert_eq!(seen.len(), 2, "{seen:?}");
    assert!(matches!(
        &seen[0],
        SerialEvent::Error { connection_id, message, .. }
            if *connection_id == info.connection_id && message.contains("device reset")
    ));
    assert_eq!(seen[1].connection_id(), info.connection_id);
    assert_eq!(manager.state(), ConnectionState::Idle);

    assert_eq!(manager.disconnect().await, Some(info));
    assert!(drain(&mut events).is_empty());
}
