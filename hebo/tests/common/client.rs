// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! A bare-bones MQTT client built directly on `hebo_codec`, for driving a
//! [`super::TestBroker`] end to end the way a real client would - raw
//! frames over a loopback `TcpStream`, no reliance on anything internal to
//! the `hebo` crate.

use std::net::SocketAddr;

use codec::v3::{
    ConnectAckPacket, ConnectPacket, PingResponsePacket, PublishAckPacket,
    PublishCompletePacket, PublishPacket, PublishReceivedPacket, PublishReleasePacket,
    SubscribePacket, SubscribeTopic, SubscribeAckPacket, UnsubscribeAckPacket,
    UnsubscribePacket,
};
use codec::{ByteArray, ConnectFlags, DecodePacket, EncodePacket, PacketId, QoS};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Every packet type the broker ever sends to a client.
#[derive(Debug)]
pub enum ServerPacket {
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    SubscribeAck(SubscribeAckPacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingResponse(PingResponsePacket),
}

pub struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to test broker");
        stream.set_nodelay(true).expect("set_nodelay");
        Self { stream }
    }

    pub async fn send(&mut self, packet: &impl EncodePacket) {
        let mut buf = Vec::new();
        packet.encode(&mut buf).expect("encode packet");
        self.stream.write_all(&buf).await.expect("write packet");
    }

    /// Sends a default CONNECT for `client_id` (clean session, no will, no
    /// credentials, 60s keep alive) and returns the CONNACK.
    pub async fn handshake(&mut self, client_id: &str) -> ConnectAckPacket {
        let connect = ConnectPacket {
            protocol_level: codec::PROTOCOL_LEVEL,
            flags: ConnectFlags {
                clean_session: true,
                ..ConnectFlags::default()
            },
            keep_alive: 60,
            client_id: client_id.to_string(),
            will_topic: None,
            will_message: Vec::new(),
            username: None,
            password: None,
        };
        self.send(&connect).await;
        match self.recv().await.expect("CONNACK") {
            ServerPacket::ConnectAck(ack) => ack,
            other => panic!("expected CONNACK, got {other:?}"),
        }
    }

    /// Sends a SUBSCRIBE with a single filter.
    pub async fn subscribe(&mut self, packet_id: PacketId, filter: &str, qos: QoS) {
        self.send(&SubscribePacket {
            packet_id,
            topics: vec![SubscribeTopic {
                filter: filter.to_string(),
                qos,
            }],
        })
        .await;
    }

    /// Sends an UNSUBSCRIBE with a single filter.
    pub async fn unsubscribe(&mut self, packet_id: PacketId, filter: &str) {
        self.send(&UnsubscribePacket {
            packet_id,
            filters: vec![filter.to_string()],
        })
        .await;
    }

    /// Reads and decodes exactly one frame, or `None` if the connection
    /// closed before a full frame arrived.
    pub async fn try_recv(&mut self) -> Option<ServerPacket> {
        let mut header_byte = [0u8; 1];
        if self.stream.read_exact(&mut header_byte).await.is_err() {
            return None;
        }
        let type_bits = (header_byte[0] & 0b1111_0000) >> 4;

        let mut remaining_length_bytes = Vec::new();
        let mut value: usize = 0;
        let mut multiplier: usize = 1;
        loop {
            let mut byte = [0u8; 1];
            self.stream.read_exact(&mut byte).await.ok()?;
            remaining_length_bytes.push(byte[0]);
            value += usize::from(byte[0] & 0x7F) * multiplier;
            if byte[0] & 0x80 == 0 {
                break;
            }
            multiplier *= 128;
        }

        let mut body = vec![0u8; value];
        self.stream.read_exact(&mut body).await.ok()?;

        let mut frame = Vec::with_capacity(1 + remaining_length_bytes.len() + value);
        frame.push(header_byte[0]);
        frame.extend_from_slice(&remaining_length_bytes);
        frame.extend_from_slice(&body);

        let mut ba = ByteArray::new(&frame);
        Some(match type_bits {
            2 => ServerPacket::ConnectAck(ConnectAckPacket::decode(&mut ba).expect("decode CONNACK")),
            3 => ServerPacket::Publish(PublishPacket::decode(&mut ba).expect("decode PUBLISH")),
            4 => ServerPacket::PublishAck(PublishAckPacket::decode(&mut ba).expect("decode PUBACK")),
            5 => ServerPacket::PublishReceived(PublishReceivedPacket::decode(&mut ba).expect("decode PUBREC")),
            6 => ServerPacket::PublishRelease(PublishReleasePacket::decode(&mut ba).expect("decode PUBREL")),
            7 => ServerPacket::PublishComplete(PublishCompletePacket::decode(&mut ba).expect("decode PUBCOMP")),
            9 => ServerPacket::SubscribeAck(SubscribeAckPacket::decode(&mut ba).expect("decode SUBACK")),
            11 => ServerPacket::UnsubscribeAck(UnsubscribeAckPacket::decode(&mut ba).expect("decode UNSUBACK")),
            13 => ServerPacket::PingResponse(PingResponsePacket::decode(&mut ba).expect("decode PINGRESP")),
            other => panic!("test client received unexpected packet type bits {other}"),
        })
    }

    /// Same as [`Self::try_recv`], but with a bound on how long to wait -
    /// most assertions want to fail fast rather than hang forever when the
    /// broker doesn't deliver what the test expected.
    pub async fn recv(&mut self) -> Option<ServerPacket> {
        tokio::time::timeout(std::time::Duration::from_secs(5), self.try_recv())
            .await
            .expect("timed out waiting for a server packet")
    }

    /// Asserts nothing arrives within `millis` - used to check a delivery
    /// that should NOT happen (e.g. a cleared retained message).
    pub async fn assert_silent(&mut self, millis: u64) {
        let result = tokio::time::timeout(std::time::Duration::from_millis(millis), self.try_recv()).await;
        assert!(result.is_err(), "expected no packet, got {:?}", result.unwrap());
    }
}
