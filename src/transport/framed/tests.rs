//! Tests for the buffered framed transport.

use rstest::{fixture, rstest};

use super::*;
use crate::{
    error::S2sError,
    test_utils::{RecordingConnector, split_signature},
};

fn signature() -> Signature {
    Signature::new("localhost", "9997")
}

#[fixture]
fn connector() -> RecordingConnector {
    RecordingConnector::new()
}

fn transport(connector: &RecordingConnector, threshold: usize) -> FramedTransport<RecordingConnector> {
    FramedTransport::new(connector.clone(), &signature(), threshold)
}

#[rstest]
fn signature_is_first_on_the_wire(connector: RecordingConnector) {
    let mut transport = transport(&connector, 1024);
    transport.open().expect("open");
    transport.write(b"frame").expect("write");
    transport.flush().expect("flush");

    let connections = connector.connections();
    assert_eq!(connections.len(), 1);
    let (sig, rest) = split_signature(&connections[0].bytes).expect("signature");
    assert_eq!(sig, signature().to_bytes().as_slice());
    assert_eq!(rest, b"frame");
    assert_eq!(connections[0].flushes, 1);
}

#[rstest]
fn writes_under_threshold_stay_buffered(connector: RecordingConnector) {
    let mut transport = transport(&connector, 100);
    transport.open().expect("open");
    assert_eq!(transport.write(&[1; 60]).expect("write"), WriteOutcome::Buffered);
    assert_eq!(transport.write(&[2; 40]).expect("write"), WriteOutcome::Buffered);
    assert_eq!(transport.pending_bytes(), 100);

    let connections = connector.connections();
    assert_eq!(connections[0].flushes, 0);
    assert!(connections[0].bytes.is_empty());
}

#[rstest]
fn crossing_threshold_flushes_and_redials(connector: RecordingConnector) {
    let mut transport = transport(&connector, 100);
    transport.open().expect("open");
    transport.write(&[1; 60]).expect("write");
    assert_eq!(transport.write(&[2; 60]).expect("write"), WriteOutcome::Rotated);
    assert_eq!(transport.pending_bytes(), 0);
    assert!(transport.is_connected());

    let connections = connector.connections();
    assert_eq!(connections.len(), 2);
    let first = &connections[0];
    assert_eq!(first.flushes, 1);
    assert!(first.disconnected);
    let (_, payload) = split_signature(&first.bytes).expect("signature");
    assert_eq!(payload.len(), 120);
    assert!(!connections[1].disconnected);

    transport.flush().expect("flush");
    let second = &connector.connections()[1];
    assert_eq!(second.bytes, signature().to_bytes().to_vec());
}

#[rstest]
fn flush_resets_the_counter(connector: RecordingConnector) {
    let mut transport = transport(&connector, 100);
    transport.open().expect("open");
    transport.write(&[0; 80]).expect("write");
    transport.flush().expect("flush");
    assert_eq!(transport.write(&[0; 80]).expect("write"), WriteOutcome::Buffered);
    assert_eq!(connector.connection_count(), 1);
}

#[rstest]
fn close_is_idempotent(connector: RecordingConnector) {
    let mut transport = transport(&connector, 1024);
    transport.open().expect("open");
    transport.write(b"tail").expect("write");
    transport.close().expect("first close");
    transport.close().expect("second close");
    assert!(transport.is_closed());

    let connections = connector.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].flushes, 1);
    assert!(connections[0].disconnected);
    assert!(connections[0].bytes.ends_with(b"tail"));
}

#[rstest]
fn close_with_tail_never_redials(connector: RecordingConnector) {
    let mut transport = transport(&connector, 10);
    transport.open().expect("open");
    transport.close_with(&[9; 50]).expect("close with tail");
    assert!(transport.is_closed());

    let connections = connector.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].flushes, 1);
    assert!(connections[0].disconnected);
    let (_, tail) = split_signature(&connections[0].bytes).expect("signature");
    assert_eq!(tail, [9u8; 50].as_slice());
}

#[rstest]
fn close_with_tail_after_failure_discards_it(connector: RecordingConnector) {
    let mut transport = transport(&connector, 1024);
    transport.open().expect("open");
    connector.fail_writes(true);
    transport.flush().expect_err("flush fails");
    connector.fail_writes(false);

    transport.close_with(b"late").expect("nothing to write");
    assert!(transport.is_closed());
    assert_eq!(connector.connection_count(), 1);
}

#[rstest]
fn rejects_use_outside_open_state(connector: RecordingConnector) {
    let mut transport = transport(&connector, 1024);
    let err = transport.write(b"x").expect_err("not open");
    assert!(matches!(err, S2sError::ProtocolMisuse(Misuse::NotOpen)));

    transport.open().expect("open");
    let err = transport.open().expect_err("already open");
    assert!(matches!(err, S2sError::ProtocolMisuse(Misuse::AlreadyOpen)));

    transport.close().expect("close");
    let err = transport.write(b"x").expect_err("closed");
    assert!(matches!(err, S2sError::ProtocolMisuse(Misuse::Closed)));
    let err = transport.open().expect_err("closed");
    assert!(matches!(err, S2sError::ProtocolMisuse(Misuse::Closed)));
}

#[rstest]
fn flush_failure_drops_the_connection(connector: RecordingConnector) {
    let mut transport = transport(&connector, 1024);
    transport.open().expect("open");
    transport.write(b"frame").expect("write");
    connector.fail_writes(true);

    let err = transport.flush().expect_err("flush fails");
    assert!(matches!(err, S2sError::Io(_)));
    assert!(!transport.is_connected());
    assert_eq!(transport.pending_bytes(), 0);
    let err = transport.write(b"more").expect_err("disconnected");
    assert!(matches!(err, S2sError::ProtocolMisuse(Misuse::NotOpen)));

    connector.fail_writes(false);
    transport.open().expect("reopen");
    assert_eq!(connector.connection_count(), 2);
}

#[rstest]
fn refused_redial_surfaces_connection_error(connector: RecordingConnector) {
    let mut transport = transport(&connector, 10);
    transport.open().expect("open");
    connector.refuse_connects(true);

    let err = transport.write(&[7; 20]).expect_err("redial refused");
    assert!(matches!(err, S2sError::Connection { ref address, .. } if address == "memory"));
    assert!(!transport.is_connected());

    let connections = connector.connections();
    assert_eq!(connections.len(), 1);
    assert_eq!(connections[0].flushes, 1);
    assert!(connections[0].disconnected);
}

#[rstest]
fn refused_open_leaves_transport_disconnected(connector: RecordingConnector) {
    connector.refuse_connects(true);
    let mut transport = transport(&connector, 10);
    let err = transport.open().expect_err("refused");
    assert!(matches!(err, S2sError::Connection { .. }));
    assert!(!transport.is_connected());
    assert!(!transport.is_closed());
}
