// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

mod common;

use codec::v3::PublishPacket;
use codec::QoS;
use common::{ServerPacket, TestBroker, TestClient};

#[tokio::test]
async fn subscribe_then_receive_matches_wildcards() {
    let broker = TestBroker::start().await;

    let mut subscriber = TestClient::connect(broker.addr).await;
    subscriber.handshake("subscriber").await;
    subscriber.subscribe(1, "a/+/c", QoS::AtMostOnce).await;
    match subscriber.recv().await.expect("SUBACK") {
        ServerPacket::SubscribeAck(ack) => assert_eq!(ack.packet_id, 1),
        other => panic!("expected SUBACK, got {other:?}"),
    }

    let mut publisher = TestClient::connect(broker.addr).await;
    publisher.handshake("publisher").await;
    publisher
        .send(&PublishPacket {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "a/b/c".to_string(),
            packet_id: None,
            payload: b"hello".to_vec(),
        })
        .await;

    match subscriber.recv().await.expect("PUBLISH") {
        ServerPacket::Publish(publish) => {
            assert_eq!(publish.topic, "a/b/c");
            assert_eq!(publish.payload, b"hello");
            assert_eq!(publish.qos, QoS::AtMostOnce);
        }
        other => panic!("expected PUBLISH, got {other:?}"),
    }
}

#[tokio::test]
async fn non_matching_topic_is_not_delivered() {
    let broker = TestBroker::start().await;

    let mut subscriber = TestClient::connect(broker.addr).await;
    subscriber.handshake("subscriber").await;
    subscriber.subscribe(1, "a/b", QoS::AtMostOnce).await;
    subscriber.recv().await.expect("SUBACK");

    let mut publisher = TestClient::connect(broker.addr).await;
    publisher.handshake("publisher").await;
    publisher
        .send(&PublishPacket {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: "a/c".to_string(),
            packet_id: None,
            payload: b"nope".to_vec(),
        })
        .await;

    subscriber.assert_silent(200).await;
}
