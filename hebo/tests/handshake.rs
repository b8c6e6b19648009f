// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use codec::v3::{ConnectPacket, ConnectReturnCode};
use codec::{ConnectFlags, PROTOCOL_LEVEL};
use common::{ServerPacket, TestBroker, TestClient};

#[tokio::test]
async fn happy_handshake_is_accepted() {
    let broker = TestBroker::start().await;
    let mut client = TestClient::connect(broker.addr).await;
    let ack = client.handshake("happy-client").await;
    assert_eq!(ack.return_code, ConnectReturnCode::Accepted);
}

#[tokio::test]
async fn client_id_too_long_is_rejected() {
    let broker = TestBroker::start().await;
    let mut client = TestClient::connect(broker.addr).await;

    let oversized_id = "x".repeat(codec::utils::DEFAULT_MAX_CLIENT_ID_LEN + 1);
    let connect = ConnectPacket {
        protocol_level: PROTOCOL_LEVEL,
        flags: ConnectFlags {
            clean_session: true,
            ..ConnectFlags::default()
        },
        keep_alive: 60,
        client_id: oversized_id,
        will_topic: None,
        will_message: Vec::new(),
        username: None,
        password: None,
    };
    client.send(&connect).await;

    match client.recv().await.expect("CONNACK") {
        ServerPacket::ConnectAck(ack) => {
            assert_eq!(ack.return_code, ConnectReturnCode::IdentifierRejected);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    assert!(client.try_recv().await.is_none(), "broker should close after rejecting");
}

#[tokio::test]
async fn unsupported_protocol_version_is_rejected() {
    let broker = TestBroker::start().await;
    let mut client = TestClient::connect(broker.addr).await;

    let connect = ConnectPacket {
        protocol_level: 4, // MQTT v3.1.1, which this broker does not speak
        flags: ConnectFlags {
            clean_session: true,
            ..ConnectFlags::default()
        },
        keep_alive: 60,
        client_id: "doesnt-matter".to_string(),
        will_topic: None,
        will_message: Vec::new(),
        username: None,
        password: None,
    };
    client.send(&connect).await;

    match client.recv().await.expect("CONNACK") {
        ServerPacket::ConnectAck(ack) => {
            assert_eq!(ack.return_code, ConnectReturnCode::UnacceptableProtocolVersion);
        }
        other => panic!("expected CONNACK, got {other:?}"),
    }
    assert!(client.try_recv().await.is_none(), "broker should close after rejecting");
}
