// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Frames MQTT control packets off an async byte stream.
//!
//! [`codec::ByteArray`] decodes from an already-buffered slice; it has no
//! opinion about where the bytes came from. This module does the part the
//! codec crate deliberately leaves out: reading exactly one frame's worth of
//! bytes off the socket before handing them to the packet decoders.

use codec::{ByteArray, DecodePacket};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, ErrorKind};

/// Every packet type a client is allowed to send to the broker. CONNACK,
/// SUBACK, UNSUBACK and PINGRESP are broker-to-client only; seeing one from
/// a client is a protocol error.
#[derive(Debug)]
pub enum InboundPacket {
    Connect(codec::v3::ConnectPacket),
    Publish(codec::v3::PublishPacket),
    PublishAck(codec::v3::PublishAckPacket),
    PublishReceived(codec::v3::PublishReceivedPacket),
    PublishRelease(codec::v3::PublishReleasePacket),
    PublishComplete(codec::v3::PublishCompletePacket),
    Subscribe(codec::v3::SubscribePacket),
    Unsubscribe(codec::v3::UnsubscribePacket),
    PingRequest(codec::v3::PingRequestPacket),
    Disconnect(codec::v3::DisconnectPacket),
}

const MAX_REMAINING_LENGTH_BYTES: usize = 4;

/// Reads exactly one frame (fixed header plus however many bytes the
/// remaining-length field declares) off `reader`, without decoding it.
/// Returns the high nibble of the first byte (the packet type bits) and the
/// full frame, so callers that need to inspect a specific decode error (the
/// CONNECT handshake does) can decode it themselves.
///
/// # Errors
///
/// Returns `ProtocolError` if the frame declares more than four
/// remaining-length continuation bytes, or would exceed `max_packet_size`.
/// Returns `IoError` if the stream closes or errors mid-frame.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_packet_size: usize,
) -> Result<(u8, Vec<u8>), Error> {
    let mut header_byte = [0u8; 1];
    reader.read_exact(&mut header_byte).await?;

    let mut remaining_length_bytes = Vec::with_capacity(MAX_REMAINING_LENGTH_BYTES);
    let mut value: usize = 0;
    let mut multiplier: usize = 1;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).await?;
        remaining_length_bytes.push(byte[0]);
        value += usize::from(byte[0] & 0x7F) * multiplier;
        if byte[0] & 0x80 == 0 {
            break;
        }
        if remaining_length_bytes.len() >= MAX_REMAINING_LENGTH_BYTES {
            return Err(Error::new(ErrorKind::ProtocolError, "variable length integer too long"));
        }
        multiplier *= 128;
    }

    let frame_len = 1 + remaining_length_bytes.len() + value;
    if frame_len > max_packet_size {
        return Err(Error::new(ErrorKind::ProtocolError, "packet exceeds max_packet_size"));
    }

    let mut body = vec![0u8; value];
    reader.read_exact(&mut body).await?;

    let mut frame = Vec::with_capacity(frame_len);
    frame.push(header_byte[0]);
    frame.extend_from_slice(&remaining_length_bytes);
    frame.extend_from_slice(&body);

    let type_bits = (header_byte[0] & 0b1111_0000) >> 4;
    Ok((type_bits, frame))
}

/// Decodes a frame previously read by [`read_frame`].
///
/// # Errors
///
/// Returns `ProtocolError` if `type_bits` names a packet type a client may
/// never send. Returns the codec's `DecodeError` if the frame's own fields
/// fail validation.
pub fn decode_packet(type_bits: u8, frame: &[u8]) -> Result<InboundPacket, codec::DecodeError> {
    let mut ba = ByteArray::new(frame);
    Ok(match type_bits {
        1 => InboundPacket::Connect(codec::v3::ConnectPacket::decode(&mut ba)?),
        3 => InboundPacket::Publish(codec::v3::PublishPacket::decode(&mut ba)?),
        4 => InboundPacket::PublishAck(codec::v3::PublishAckPacket::decode(&mut ba)?),
        5 => InboundPacket::PublishReceived(codec::v3::PublishReceivedPacket::decode(&mut ba)?),
        6 => InboundPacket::PublishRelease(codec::v3::PublishReleasePacket::decode(&mut ba)?),
        7 => InboundPacket::PublishComplete(codec::v3::PublishCompletePacket::decode(&mut ba)?),
        8 => InboundPacket::Subscribe(codec::v3::SubscribePacket::decode(&mut ba)?),
        10 => InboundPacket::Unsubscribe(codec::v3::UnsubscribePacket::decode(&mut ba)?),
        12 => InboundPacket::PingRequest(codec::v3::PingRequestPacket::decode(&mut ba)?),
        14 => InboundPacket::Disconnect(codec::v3::DisconnectPacket::decode(&mut ba)?),
        _ => return Err(codec::DecodeError::InvalidPacketType),
    })
}

/// Reads one frame and decodes it in a single call, for the steady-state
/// loop that doesn't need per-variant error handling.
///
/// # Errors
///
/// See [`read_frame`] and [`decode_packet`].
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_packet_size: usize,
) -> Result<InboundPacket, Error> {
    let (type_bits, frame) = read_frame(reader, max_packet_size).await?;
    Ok(decode_packet(type_bits, &frame)?)
}
