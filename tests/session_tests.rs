//! Session Tests
//!
//! Tests for the session multiplexer over localhost socket pairs:
//! - Request/response correlation, including out-of-order responses
//! - Lifecycle: end(), peer close, event firing
//! - Streaming decode across arbitrary chunk boundaries
//! - Decode-error containment

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam::channel::unbounded;
use tidekv::network::Session;
use tidekv::protocol::{
    decode_header, decode_packet, encode_packet, ErrorCode, Packet, Value, HEADER_SIZE,
};
use tidekv::TideError;

const WAIT: Duration = Duration::from_secs(5);

/// A connected (client, server) socket pair on loopback
fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

/// Read one complete packet off a raw stream
fn read_raw_packet(stream: &mut TcpStream) -> Packet {
    let mut header_bytes = [0u8; HEADER_SIZE];
    stream.read_exact(&mut header_bytes).unwrap();
    let header = decode_header(&header_bytes).unwrap();

    let mut payload = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload).unwrap();
    decode_packet(&header, &payload).unwrap()
}

fn write_raw_packet(stream: &mut TcpStream, packet: &Packet) {
    stream.write_all(&encode_packet(packet)).unwrap();
    stream.flush().unwrap();
}

// =============================================================================
// Correlation Tests
// =============================================================================

#[test]
fn test_request_ids_are_fresh_and_nonzero() {
    let (client, _server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();

    let first = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "a".to_string(),
        })
        .unwrap();
    let second = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "b".to_string(),
        })
        .unwrap();

    assert_ne!(first.id(), 0);
    assert_ne!(second.id(), 0);
    assert_ne!(first.id(), second.id());
    session.end();
}

#[test]
fn test_responses_arriving_in_reverse_order_match_their_requests() {
    let (client, mut server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();

    let responder = thread::spawn(move || {
        let first = read_raw_packet(&mut server);
        let second = read_raw_packet(&mut server);

        // answer in reverse arrival order
        for request in [&second, &first] {
            let key = match request {
                Packet::DataRequest { key, .. } => key.clone(),
                other => panic!("unexpected request: {:?}", other),
            };
            write_raw_packet(
                &mut server,
                &Packet::DataResponse {
                    id: request.id(),
                    outcome: Ok(Value::Str(format!("value-of-{}", key))),
                },
            );
        }
        server
    });

    let handle_a = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "a".to_string(),
        })
        .unwrap();
    let handle_b = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "b".to_string(),
        })
        .unwrap();

    let response_a = handle_a.wait_timeout(WAIT).unwrap();
    let response_b = handle_b.wait_timeout(WAIT).unwrap();

    assert_eq!(
        response_a,
        Packet::DataResponse {
            id: response_a.id(),
            outcome: Ok(Value::Str("value-of-a".to_string()))
        }
    );
    assert_eq!(
        response_b,
        Packet::DataResponse {
            id: response_b.id(),
            outcome: Ok(Value::Str("value-of-b".to_string()))
        }
    );

    responder.join().unwrap();
    session.end();
}

#[test]
fn test_unsolicited_response_is_dropped_without_event() {
    let (client, mut server) = socket_pair();
    let session = Session::new(client).unwrap();

    let (event_tx, event_rx) = unbounded();
    session.on_packet(move |packet| {
        let _ = event_tx.send(packet);
    });
    session.start_polling().unwrap();

    // a response nobody asked for
    write_raw_packet(
        &mut server,
        &Packet::AuthResponse {
            id: 999,
            error: None,
        },
    );

    assert!(event_rx.recv_timeout(Duration::from_millis(300)).is_err());
    assert!(!session.is_ended());
    session.end();
}

#[test]
fn test_packet_event_fires_after_completion_is_resolved() {
    let (client, mut server) = socket_pair();
    let session = Session::new(client).unwrap();

    let (event_tx, event_rx) = unbounded();
    session.on_packet(move |packet| {
        let _ = event_tx.send(packet);
    });
    session.start_polling().unwrap();

    let handle = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "k".to_string(),
        })
        .unwrap();

    let request = read_raw_packet(&mut server);
    write_raw_packet(
        &mut server,
        &Packet::DataResponse {
            id: request.id(),
            outcome: Err(ErrorCode::KeyNotFound),
        },
    );

    // once the event has fired, the completion must already be resolved:
    // a zero-length wait succeeds
    let event = event_rx.recv_timeout(WAIT).unwrap();
    assert_eq!(event.id(), request.id());
    let response = handle.wait_timeout(Duration::from_millis(0)).unwrap();
    assert_eq!(response, event);

    session.end();
}

// =============================================================================
// Streaming Decode Tests
// =============================================================================

#[test]
fn test_response_delivered_byte_by_byte_still_completes() {
    let (client, mut server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();

    let handle = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "slow".to_string(),
        })
        .unwrap();

    let request = read_raw_packet(&mut server);
    let bytes = encode_packet(&Packet::DataResponse {
        id: request.id(),
        outcome: Ok(Value::Int(7)),
    });
    for byte in bytes {
        server.write_all(&[byte]).unwrap();
        server.flush().unwrap();
        thread::sleep(Duration::from_millis(1));
    }

    let response = handle.wait_timeout(WAIT).unwrap();
    assert_eq!(
        response,
        Packet::DataResponse {
            id: request.id(),
            outcome: Ok(Value::Int(7))
        }
    );
    session.end();
}

#[test]
fn test_two_packets_in_one_write_both_arrive() {
    let (client, mut server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();

    let handle_a = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "a".to_string(),
        })
        .unwrap();
    let handle_b = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "b".to_string(),
        })
        .unwrap();

    let first = read_raw_packet(&mut server);
    let second = read_raw_packet(&mut server);

    let mut combined = encode_packet(&Packet::DataResponse {
        id: first.id(),
        outcome: Ok(Value::Bool(true)),
    });
    combined.extend(encode_packet(&Packet::DataResponse {
        id: second.id(),
        outcome: Ok(Value::Bool(false)),
    }));
    server.write_all(&combined).unwrap();

    assert_eq!(
        handle_a.wait_timeout(WAIT).unwrap(),
        Packet::DataResponse {
            id: first.id(),
            outcome: Ok(Value::Bool(true))
        }
    );
    assert_eq!(
        handle_b.wait_timeout(WAIT).unwrap(),
        Packet::DataResponse {
            id: second.id(),
            outcome: Ok(Value::Bool(false))
        }
    );
    session.end();
}

#[test]
fn test_malformed_packet_is_dropped_and_session_survives() {
    let (client, mut server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();

    let handle = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "k".to_string(),
        })
        .unwrap();
    let request = read_raw_packet(&mut server);

    // a full header with a bad version and no payload, then a valid answer
    let garbage = [0x7F, 0, 0, 0, 1, 0x04, 0, 0, 0, 0];
    server.write_all(&garbage).unwrap();
    write_raw_packet(
        &mut server,
        &Packet::DataResponse {
            id: request.id(),
            outcome: Ok(Value::Int(1)),
        },
    );

    let response = handle.wait_timeout(WAIT).unwrap();
    assert_eq!(response.id(), request.id());
    assert!(session.decode_errors() >= 1);
    assert!(!session.is_ended());
    session.end();
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_end_fails_every_outstanding_request_once() {
    let (client, _server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();

    let handle_a = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "a".to_string(),
        })
        .unwrap();
    let handle_b = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "b".to_string(),
        })
        .unwrap();

    session.end();

    assert!(matches!(
        handle_a.wait_timeout(WAIT),
        Err(TideError::SessionEnded)
    ));
    assert!(matches!(
        handle_b.wait_timeout(WAIT),
        Err(TideError::SessionEnded)
    ));
}

#[test]
fn test_peer_close_ends_the_session_and_fires_on_ended_once() {
    let (client, server) = socket_pair();
    let session = Session::new(client).unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = Arc::clone(&fired);
    session.on_ended(move |_error| {
        fired_in_callback.fetch_add(1, Ordering::SeqCst);
    });
    session.start_polling().unwrap();

    let handle = session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "k".to_string(),
        })
        .unwrap();

    drop(server);

    assert!(matches!(
        handle.wait_timeout(WAIT),
        Err(TideError::SessionEnded)
    ));
    session.wait_ended();
    assert!(session.is_ended());

    // a second end() must not re-fire the event
    session.end();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_send_after_end_is_rejected() {
    let (client, _server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.end();

    assert!(matches!(
        session.send_packet(&Packet::AuthRequest {
            id: 0,
            api_key: "k".to_string()
        }),
        Err(TideError::SessionEnded)
    ));
    assert!(session
        .send_request(Packet::DataRequest {
            id: 0,
            key: "k".to_string()
        })
        .is_err());
}

#[test]
fn test_start_polling_twice_is_rejected() {
    let (client, _server) = socket_pair();
    let session = Session::new(client).unwrap();
    session.start_polling().unwrap();
    assert!(session.start_polling().is_err());
    session.end();
}

// =============================================================================
// Two-Session Exchange
// =============================================================================

#[test]
fn test_send_response_mirrors_the_request_id() {
    let (client_stream, server_stream) = socket_pair();

    let server_session = Session::new(server_stream).unwrap();
    let responder = Arc::downgrade(&server_session);
    server_session.on_packet(move |packet| {
        if let Some(session) = responder.upgrade() {
            if matches!(packet, Packet::AuthRequest { .. }) {
                session
                    .send_response(&packet, Packet::AuthResponse { id: 0, error: None })
                    .unwrap();
            }
        }
    });
    server_session.start_polling().unwrap();

    let client_session = Session::new(client_stream).unwrap();
    client_session.start_polling().unwrap();

    let handle = client_session
        .send_request(Packet::AuthRequest {
            id: 0,
            api_key: "secret".to_string(),
        })
        .unwrap();
    let sent_id = handle.id();

    let response = handle.wait_timeout(WAIT).unwrap();
    assert_eq!(response, Packet::AuthResponse { id: sent_id, error: None });

    client_session.end();
    server_session.end();
}
