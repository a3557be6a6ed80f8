//! End-to-end broker scenarios over real TCP connections.

mod common;

use common::{
    assert_no_traffic, connect_client, connect_packet, read_with_timeout, start_broker,
    wait_for_clients,
};
use fluxmq::protocol::{
    self, ConnectReturnCode, ControlPacket, PublishPacket, SubscribePacket,
};
use std::time::Duration;
use tokio::net::TcpStream;

fn publish_packet(topic: &str, payload: &[u8]) -> ControlPacket {
    ControlPacket::Publish(PublishPacket {
        dup: false,
        qos: 0,
        retain: false,
        topic: topic.to_string(),
        message_id: None,
        payload: payload.to_vec(),
    })
}

#[tokio::test]
async fn handshake_happy_path_registers_the_client() {
    let (broker, addr) = start_broker().await;
    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    protocol::write_packet(&mut stream, &connect_packet("c1", true))
        .await
        .expect("write connect");

    match read_with_timeout(&mut stream).await {
        ControlPacket::ConnAck(connack) => {
            assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
            assert!(!connack.session_present);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    wait_for_clients(&broker, 1).await;
    assert!(broker.clients().load("c1").is_some());
}

#[tokio::test]
async fn connack_reports_session_present_for_persistent_connects() {
    let (_broker, addr) = start_broker().await;
    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    protocol::write_packet(&mut stream, &connect_packet("c1", false))
        .await
        .expect("write connect");

    match read_with_timeout(&mut stream).await {
        ControlPacket::ConnAck(connack) => {
            assert_eq!(connack.return_code, ConnectReturnCode::Accepted);
            assert!(connack.session_present);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_identifier_is_rejected_once() {
    let (broker, addr) = start_broker().await;
    let mut original = connect_client(&addr, "c1").await;
    wait_for_clients(&broker, 1).await;

    let mut second = TcpStream::connect(&addr).await.expect("connect");
    protocol::write_packet(&mut second, &connect_packet("c1", true))
        .await
        .expect("write connect");
    match read_with_timeout(&mut second).await {
        ControlPacket::ConnAck(connack) => {
            assert_eq!(connack.return_code, ConnectReturnCode::NotAuthorized);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    // No second CONNACK: the broker drops the connection after the rejection.
    let next = tokio::time::timeout(Duration::from_secs(2), protocol::read_packet(&mut second))
        .await
        .expect("broker should close the duplicate connection");
    assert!(next.is_err(), "expected EOF, got {next:?}");

    // The original session stays registered and functional.
    assert_eq!(broker.clients().len(), 1);
    protocol::write_packet(&mut original, &ControlPacket::PingReq)
        .await
        .expect("write pingreq");
    assert!(matches!(
        read_with_timeout(&mut original).await,
        ControlPacket::PingResp
    ));
}

#[tokio::test]
async fn ping_is_answered_without_disturbing_peers() {
    let (broker, addr) = start_broker().await;
    let mut c1 = connect_client(&addr, "c1").await;
    let mut c2 = connect_client(&addr, "c2").await;
    wait_for_clients(&broker, 2).await;

    protocol::write_packet(&mut c1, &ControlPacket::PingReq)
        .await
        .expect("write pingreq");
    assert!(matches!(
        read_with_timeout(&mut c1).await,
        ControlPacket::PingResp
    ));
    assert_no_traffic(&mut c2).await;
}

#[tokio::test]
async fn publish_fans_out_to_every_peer_but_the_source() {
    let (broker, addr) = start_broker().await;
    let mut c1 = connect_client(&addr, "c1").await;
    let mut c2 = connect_client(&addr, "c2").await;
    let mut c3 = connect_client(&addr, "c3").await;
    wait_for_clients(&broker, 3).await;

    protocol::write_packet(&mut c1, &publish_packet("t/1", b"hello"))
        .await
        .expect("write publish");

    for stream in [&mut c2, &mut c3] {
        match read_with_timeout(stream).await {
            ControlPacket::Publish(p) => {
                assert_eq!(p.topic, "t/1");
                assert_eq!(p.payload, b"hello");
            }
            other => panic!("expected PUBLISH, got {other:?}"),
        }
    }
    assert_no_traffic(&mut c1).await;
}

#[tokio::test]
async fn read_error_tears_the_session_down() {
    let (broker, addr) = start_broker().await;
    let mut c1 = connect_client(&addr, "c1").await;
    let c2 = connect_client(&addr, "c2").await;
    let mut c3 = connect_client(&addr, "c3").await;
    wait_for_clients(&broker, 3).await;

    drop(c2);
    wait_for_clients(&broker, 2).await;
    assert!(broker.clients().load("c2").is_none());

    protocol::write_packet(&mut c1, &publish_packet("t/1", b"after-teardown"))
        .await
        .expect("write publish");
    match read_with_timeout(&mut c3).await {
        ControlPacket::Publish(p) => assert_eq!(p.payload, b"after-teardown"),
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

#[tokio::test]
async fn subscribe_is_acknowledged_with_qos0_grants() {
    let (broker, addr) = start_broker().await;
    let mut c2 = connect_client(&addr, "c2").await;
    wait_for_clients(&broker, 1).await;

    let subscribe = ControlPacket::Subscribe(SubscribePacket {
        message_id: 42,
        topics: vec!["a".into(), "b".into(), "c".into()],
        requested_qos: vec![1, 1, 1],
    });
    protocol::write_packet(&mut c2, &subscribe)
        .await
        .expect("write subscribe");

    match read_with_timeout(&mut c2).await {
        ControlPacket::SubAck(suback) => {
            assert_eq!(suback.message_id, 42);
            assert_eq!(suback.return_codes, vec![0x00, 0x00, 0x00]);
        }
        other => panic!("expected SUBACK, got {other:?}"),
    }
}

#[tokio::test]
async fn first_packet_must_be_connect() {
    let (broker, addr) = start_broker().await;
    let mut stream = TcpStream::connect(&addr).await.expect("connect");
    protocol::write_packet(&mut stream, &ControlPacket::PingReq)
        .await
        .expect("write pingreq");

    // No CONNACK for a botched handshake; the connection is just dropped.
    let next = tokio::time::timeout(Duration::from_secs(2), protocol::read_packet(&mut stream))
        .await
        .expect("broker should close the connection");
    assert!(next.is_err(), "expected EOF, got {next:?}");
    assert!(broker.clients().is_empty());
}

#[tokio::test]
async fn rejected_connect_gets_a_rejection_connack() {
    let (broker, addr) = start_broker().await;
    let mut stream = TcpStream::connect(&addr).await.expect("connect");

    // An empty identifier without clean session is rejected by validation.
    protocol::write_packet(&mut stream, &connect_packet("", false))
        .await
        .expect("write connect");

    match read_with_timeout(&mut stream).await {
        ControlPacket::ConnAck(connack) => {
            assert_eq!(connack.return_code, ConnectReturnCode::IdentifierRejected);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    assert!(broker.clients().is_empty());
}

#[tokio::test]
async fn disconnect_packet_deregisters_the_client() {
    let (broker, addr) = start_broker().await;
    let mut c1 = connect_client(&addr, "c1").await;
    wait_for_clients(&broker, 1).await;

    protocol::write_packet(&mut c1, &ControlPacket::Disconnect)
        .await
        .expect("write disconnect");
    wait_for_clients(&broker, 0).await;
}
