//! Common test harness utilities for integration tests.
//!
//! Helpers for starting a broker on an ephemeral loopback port and for
//! driving raw MQTT clients against it.

// Not all test files use all helpers; silence dead_code warnings for unused exports.
#![allow(dead_code)]

use fluxmq::broker::Broker;
use fluxmq::config::BrokerConfig;
use fluxmq::protocol::{self, ConnAckPacket, ConnectPacket, ConnectReturnCode, ControlPacket};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

/// Allocate an ephemeral loopback port.
pub fn ephemeral_port() -> u16 {
    StdTcpListener::bind("127.0.0.1:0")
        .expect("bind ephemeral port")
        .local_addr()
        .expect("ephemeral addr")
        .port()
}

/// Start a broker on an ephemeral loopback port and wait until it accepts
/// connections. Returns the broker handle and its address.
pub async fn start_broker() -> (Arc<Broker>, String) {
    let port = ephemeral_port();
    let config = BrokerConfig {
        worker: 8,
        host: "127.0.0.1".to_string(),
        port: port.to_string(),
        debug: false,
    };
    let broker = Broker::new(config).expect("broker");
    broker.start();
    let addr = format!("127.0.0.1:{port}");
    for _ in 0..200 {
        if TcpStream::connect(&addr).await.is_ok() {
            return (broker, addr);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("broker did not start listening on {addr}");
}

pub fn connect_packet(client_id: &str, clean_session: bool) -> ControlPacket {
    ControlPacket::Connect(ConnectPacket {
        protocol_name: "MQTT".to_string(),
        protocol_level: 4,
        reserved_flag: false,
        clean_session,
        keep_alive: 30,
        client_id: client_id.to_string(),
        will: None,
        username: None,
        password: None,
    })
}

/// Open a TCP connection and complete the MQTT handshake.
pub async fn connect_client(addr: &str, client_id: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    protocol::write_packet(&mut stream, &connect_packet(client_id, true))
        .await
        .expect("write connect");
    match read_with_timeout(&mut stream).await {
        ControlPacket::ConnAck(ConnAckPacket { return_code, .. }) => {
            assert_eq!(return_code, ConnectReturnCode::Accepted);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    stream
}

/// Read the next packet, failing the test after two seconds.
pub async fn read_with_timeout(stream: &mut TcpStream) -> ControlPacket {
    tokio::time::timeout(Duration::from_secs(2), protocol::read_packet(stream))
        .await
        .expect("timed out waiting for a packet")
        .expect("read packet")
}

/// Assert that no packet arrives within a quiet window.
pub async fn assert_no_traffic(stream: &mut TcpStream) {
    let read =
        tokio::time::timeout(Duration::from_millis(200), protocol::read_packet(stream)).await;
    assert!(read.is_err(), "expected no traffic, got {read:?}");
}

/// Poll the registry until it holds the expected number of clients.
pub async fn wait_for_clients(broker: &Broker, expected: usize) {
    for _ in 0..200 {
        if broker.clients().len() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "registry never reached {expected} clients (now {})",
        broker.clients().len()
    );
}
