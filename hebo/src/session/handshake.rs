// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! `CONNECT`/`CONNACK` handling, run once per connection
//! before a [`crate::session::Session`] exists at all.

use std::sync::Arc;

use codec::v3::{ConnectReturnCode, ConnectAckPacket};
use codec::{ByteArray, DecodeError, DecodePacket, EncodePacket};
use log::debug;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;

use crate::config::SessionConfig;
use crate::error::{Error, ErrorKind};
use crate::handler::{ConnectDecision, Handler};
use crate::session::codec_io;
use crate::trie::Message;

pub(crate) struct HandshakeOutcome {
    pub client_id: String,
    pub will: Option<Message>,
    pub keep_alive: u16,
}

async fn send_connack(writer: &mpsc::UnboundedSender<Vec<u8>>, code: ConnectReturnCode) {
    let mut buf = Vec::new();
    if ConnectAckPacket::new(code).encode(&mut buf).is_ok() {
        let _ = writer.send(buf);
    }
}

/// Runs the handshake to completion: reads exactly one frame, requires it
/// to be `CONNECT`, validates it, consults `handler`, and replies with
/// `CONNACK`. On any rejection the appropriate `CONNACK` (if any) has
/// already been sent before this returns `Err`.
pub(crate) async fn perform(
    read_half: &mut OwnedReadHalf,
    writer: &mpsc::UnboundedSender<Vec<u8>>,
    handler: &Arc<dyn Handler>,
    config: &SessionConfig,
) -> Result<HandshakeOutcome, Error> {
    let (type_bits, frame) = codec_io::read_frame(read_half, config.max_packet_size).await?;
    if type_bits != 1 {
        return Err(Error::new(ErrorKind::ProtocolError, "first packet was not CONNECT"));
    }

    let mut ba = ByteArray::new(&frame);
    let connect = match codec::v3::ConnectPacket::decode(&mut ba) {
        Ok(connect) => connect,
        Err(DecodeError::InvalidProtocolName) => {
            debug!("handshake: unrecognized protocol name, closing without a reply");
            return Err(Error::new(ErrorKind::ProtocolError, "unrecognized protocol name"));
        }
        Err(DecodeError::InvalidProtocolLevel) => {
            send_connack(writer, ConnectReturnCode::UnacceptableProtocolVersion).await;
            return Err(Error::new(ErrorKind::ProtocolError, "unsupported protocol level"));
        }
        Err(err) => {
            debug!("handshake: malformed CONNECT, closing without a reply: {err}");
            return Err(err.into());
        }
    };

    if codec::v3::validate_client_id(&connect, config.max_client_id_len).is_err() {
        send_connack(writer, ConnectReturnCode::IdentifierRejected).await;
        return Err(Error::new(ErrorKind::ProtocolError, "client id rejected"));
    }

    match handler.on_connect(&connect.client_id, connect.username.as_deref(), connect.password.as_deref()) {
        ConnectDecision::Reject(code) => {
            send_connack(writer, code).await;
            Err(Error::new(ErrorKind::ProtocolError, "rejected by handler"))
        }
        ConnectDecision::Accept => {
            let will = connect.flags.will.then(|| {
                Message::new(
                    connect.will_topic.clone().unwrap_or_default(),
                    connect.will_message.clone(),
                    connect.flags.will_qos,
                    connect.flags.will_retain,
                )
            });
            send_connack(writer, ConnectReturnCode::Accepted).await;
            Ok(HandshakeOutcome {
                client_id: connect.client_id,
                will,
                keep_alive: connect.keep_alive,
            })
        }
    }
}
