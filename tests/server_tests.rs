//! Server Tests
//!
//! End-to-end tests over real TCP: literal wire-byte exchanges, the
//! client library against a live server, auth gating and multi-client
//! traffic.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tidekv::network::Server;
use tidekv::{Client, Config, Store, TideError, Value};

const SECRET: &str = "S";

/// Bind an ephemeral port, serve in a background thread, return the port
fn spawn_server(api_key: &str) -> SocketAddr {
    let config = Config::builder().api_key(api_key).port(0).build();
    let store = Arc::new(Store::new(config.tree_a, config.tree_b).unwrap());
    let mut server = Server::new(config, store);

    server.bind().unwrap();
    let port = server.local_addr().unwrap().port();
    thread::spawn(move || {
        let _ = server.serve();
    });

    SocketAddr::from(([127, 0, 0, 1], port))
}

fn raw_exchange(stream: &mut TcpStream, request: &[u8], response_len: usize) -> Vec<u8> {
    stream.write_all(request).unwrap();
    stream.flush().unwrap();

    let mut response = vec![0u8; response_len];
    stream.read_exact(&mut response).unwrap();
    response
}

// =============================================================================
// Literal Wire-Byte Scenarios
// =============================================================================

#[test]
fn test_wire_auth_happy_path() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    // AuthRequest, id 0, key "S"
    let request = [0x01, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x53];
    let response = raw_exchange(&mut stream, &request, 11);

    // AuthResponse, id 0, Success
    assert_eq!(
        response,
        [0x01, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x01]
    );
}

#[test]
fn test_wire_add_then_find_string() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    // authenticate first
    let auth = [0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x53];
    raw_exchange(&mut stream, &auth, 11);

    // ADD key="k" value=(String, "hi"), id 2
    let add = [
        0x01, 0x00, 0x00, 0x00, 0x02, 0x05, 0x00, 0x00, 0x00, 0x08, // header
        0x00, 0x00, 0x00, 0x01, 0x6B, 0x01, 0x68, 0x69, // payload
    ];
    let add_response = raw_exchange(&mut stream, &add, 11);
    assert_eq!(
        add_response,
        [0x01, 0x00, 0x00, 0x00, 0x02, 0x06, 0x00, 0x00, 0x00, 0x01, 0x01]
    );

    // FIND key="k", id 3
    let find = [0x01, 0x00, 0x00, 0x00, 0x03, 0x03, 0x00, 0x00, 0x00, 0x01, 0x6B];
    let find_response = raw_exchange(&mut stream, &find, 14);
    assert_eq!(
        find_response,
        [0x01, 0x00, 0x00, 0x00, 0x03, 0x04, 0x00, 0x00, 0x00, 0x04, 0x01, 0x01, 0x68, 0x69]
    );
}

#[test]
fn test_wire_find_missing_key() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    let auth = [0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00, 0x01, 0x53];
    raw_exchange(&mut stream, &auth, 11);

    // FIND key="x", id 4
    let find = [0x01, 0x00, 0x00, 0x00, 0x04, 0x03, 0x00, 0x00, 0x00, 0x01, 0x78];
    let response = raw_exchange(&mut stream, &find, 12);

    // DataResponse, Failure, KeyNotFound
    assert_eq!(
        response,
        [0x01, 0x00, 0x00, 0x00, 0x04, 0x04, 0x00, 0x00, 0x00, 0x02, 0x02, 0x02]
    );
}

#[test]
fn test_wire_data_request_before_auth_is_rejected() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    // FIND without authenticating, id 5
    let find = [0x01, 0x00, 0x00, 0x00, 0x05, 0x03, 0x00, 0x00, 0x00, 0x01, 0x78];
    let response = raw_exchange(&mut stream, &find, 12);

    // DataResponse, Failure, AuthRequired
    assert_eq!(
        response,
        [0x01, 0x00, 0x00, 0x00, 0x05, 0x04, 0x00, 0x00, 0x00, 0x02, 0x02, 0x01]
    );
}

#[test]
fn test_wire_removal_before_auth_gets_removal_response_kind() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    // REMOVE without authenticating, id 6
    let remove = [0x01, 0x00, 0x00, 0x00, 0x06, 0x07, 0x00, 0x00, 0x00, 0x01, 0x78];
    let response = raw_exchange(&mut stream, &remove, 12);

    // the reply is a DataRemovalResponse (0x08), not an addition response
    assert_eq!(
        response,
        [0x01, 0x00, 0x00, 0x00, 0x06, 0x08, 0x00, 0x00, 0x00, 0x02, 0x02, 0x01]
    );
}

#[test]
fn test_wire_bad_api_key_rejected() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    // AuthRequest with key "X"
    let auth = [0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x00, 0x00, 0x00, 0x01, 0x58];
    let response = raw_exchange(&mut stream, &auth, 12);

    // AuthResponse, Failure, AuthRequired
    assert_eq!(
        response,
        [0x01, 0x00, 0x00, 0x00, 0x07, 0x02, 0x00, 0x00, 0x00, 0x02, 0x02, 0x01]
    );

    // the session is still unauthenticated
    let find = [0x01, 0x00, 0x00, 0x00, 0x08, 0x03, 0x00, 0x00, 0x00, 0x01, 0x78];
    let rejected = raw_exchange(&mut stream, &find, 12);
    assert_eq!(rejected[10], 0x02);
    assert_eq!(rejected[11], 0x01);
}

// =============================================================================
// Client Library Against a Live Server
// =============================================================================

#[test]
fn test_client_full_round_trip() {
    let addr = spawn_server("swordfish");
    let client = Client::connect(addr, "swordfish").unwrap();

    client.add("greeting", Value::Str("hello".to_string())).unwrap();
    client.add("count", Value::Int(-12)).unwrap();
    client.add("enabled", Value::Bool(true)).unwrap();

    assert_eq!(
        client.find("greeting").unwrap(),
        Some(Value::Str("hello".to_string()))
    );
    assert_eq!(client.find("count").unwrap(), Some(Value::Int(-12)));
    assert_eq!(client.find("enabled").unwrap(), Some(Value::Bool(true)));
    assert_eq!(client.find("missing").unwrap(), None);

    client.remove("count").unwrap();
    assert_eq!(client.find("count").unwrap(), None);

    // removing an absent key still succeeds
    client.remove("count").unwrap();

    client.close();
}

#[test]
fn test_client_overwrite_is_visible() {
    let addr = spawn_server(SECRET);
    let client = Client::connect(addr, SECRET).unwrap();

    client.add("k", Value::Int(1)).unwrap();
    client.add("k", Value::Int(2)).unwrap();
    assert_eq!(client.find("k").unwrap(), Some(Value::Int(2)));
}

#[test]
fn test_client_with_wrong_key_is_rejected() {
    let addr = spawn_server(SECRET);
    let result = Client::connect(addr, "wrong");
    assert!(matches!(result, Err(TideError::AuthRejected)));
}

#[test]
fn test_two_clients_share_the_store() {
    let addr = spawn_server(SECRET);
    let writer = Client::connect(addr, SECRET).unwrap();
    let reader = Client::connect(addr, SECRET).unwrap();

    writer.add("shared", Value::Str("payload".to_string())).unwrap();
    assert_eq!(
        reader.find("shared").unwrap(),
        Some(Value::Str("payload".to_string()))
    );

    reader.remove("shared").unwrap();
    assert_eq!(writer.find("shared").unwrap(), None);
}

#[test]
fn test_many_clients_in_parallel() {
    let addr = spawn_server(SECRET);
    const CLIENTS: usize = 6;
    const KEYS_PER_CLIENT: i32 = 50;

    let mut handles = Vec::new();
    for c in 0..CLIENTS {
        handles.push(thread::spawn(move || {
            let client = Client::connect(addr, SECRET).unwrap();
            for i in 0..KEYS_PER_CLIENT {
                client
                    .add(&format!("c{}-key-{}", c, i), Value::Int(i))
                    .unwrap();
            }
            for i in 0..KEYS_PER_CLIENT {
                assert_eq!(
                    client.find(&format!("c{}-key-{}", c, i)).unwrap(),
                    Some(Value::Int(i))
                );
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // every client's writes are visible to a late joiner
    let auditor = Client::connect(addr, SECRET).unwrap();
    for c in 0..CLIENTS {
        assert_eq!(
            auditor.find(&format!("c{}-key-0", c)).unwrap(),
            Some(Value::Int(0))
        );
    }
}

#[test]
fn test_malformed_bytes_do_not_kill_the_connection() {
    let addr = spawn_server(SECRET);
    let mut stream = TcpStream::connect(addr).unwrap();

    // a complete header with an unsupported version and no payload
    stream
        .write_all(&[0x7F, 0, 0, 0, 1, 0x01, 0, 0, 0, 0])
        .unwrap();
    thread::sleep(Duration::from_millis(100));

    // the same connection can still authenticate
    let auth = [0x01, 0x00, 0x00, 0x00, 0x09, 0x01, 0x00, 0x00, 0x00, 0x01, 0x53];
    let response = raw_exchange(&mut stream, &auth, 11);
    assert_eq!(response[5], 0x02);
    assert_eq!(response[10], 0x01);
}
