// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::base::{DecodePacket, EncodePacket, Packet};
use crate::byte_array::ByteArray;
use crate::error::{DecodeError, EncodeError};
use crate::header::{FixedHeader, PacketType};

/// `PINGRESP` - keepalive reply, no variable header, no payload.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PingResponsePacket;

impl DecodePacket for PingResponsePacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::PingResponse {
            return Err(DecodeError::InvalidPacketType);
        }
        Ok(Self)
    }
}

impl EncodePacket for PingResponsePacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();
        FixedHeader::new(PacketType::PingResponse, 0)
            .map_err(|_| EncodeError::InvalidVarInt)?
            .encode(v)?;
        Ok(v.len() - old_len)
    }
}

impl Packet for PingResponsePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PingResponse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut buf = Vec::new();
        PingResponsePacket.encode(&mut buf).unwrap();
        assert_eq!(buf, vec![0xD0, 0x00]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PingResponsePacket::decode(&mut ba).unwrap(), PingResponsePacket);
    }
}
